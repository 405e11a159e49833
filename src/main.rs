use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use heartbeat::config::Config;
use heartbeat::error::ConfigError;
use heartbeat::incident::elapsed_minutes;
use heartbeat::monitor::{Monitor, NotificationStatus};
use heartbeat::notify::format_duration;
use log::{error, info, warn};
use std::path::{Path, PathBuf};

/// Command-line arguments for the heartbeat monitor
#[derive(Parser)]
#[command(
    name = "heartbeat",
    about = "Synthetic website monitoring with escalating email alerts",
    long_about = "Checks configured websites and endpoints for expected status codes and content, \
                  tracks sustained failures as incidents across runs, and emails alerts with \
                  evidence once an incident persists. Intended to be run periodically (e.g. from cron)."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Override the state file location
    #[arg(long, value_name = "FILE", help = "Incident state file (overrides the config)")]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run one monitoring pass (default)
    Run {
        /// Probe and decide, but log notifications instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the persisted incident record
    Status,
    /// Reset the incident record to all-clear
    Reset,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in load_config
            if config_path.exists() && !config_path.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    config_path.display()
                ));
            }

            if let Some(extension) = config_path.extension() {
                if extension != "toml" {
                    warn!(
                        "Configuration file does not have .toml extension: {}",
                        config_path.display()
                    );
                }
            }
        }

        if let Some(ref state_path) = self.state {
            if state_path.is_dir() {
                return Err(format!(
                    "State path is a directory: {}",
                    state_path.display()
                ));
            }
        }

        Ok(())
    }

    fn command(&self) -> Command {
        match &self.command {
            Some(Command::Run { dry_run }) => Command::Run { dry_run: *dry_run },
            Some(Command::Status) => Command::Status,
            Some(Command::Reset) => Command::Reset,
            None => Command::Run { dry_run: false },
        }
    }
}

/// Load configuration from file or use defaults
///
/// A missing file falls back to defaults with a warning; a file that exists
/// but is invalid is an error.
fn load_config(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match Config::from_file(path) {
                Ok(config) => config,
                Err(ConfigError::ReadError(e)) => {
                    warn!("Configuration file not found or unreadable, using defaults: {}", e);
                    Config::default()
                }
                Err(e) => return Err(e),
            }
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let mut config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(state) = &cli.state {
        config.monitor.state_file = state.clone();
    }

    match cli.command() {
        Command::Status => {
            let tracker = Monitor::tracker_for(&config);
            let state = tracker.current_state();
            println!("{}", serde_json::to_string_pretty(&state)?);
            if let Some(started_at) = state.started_at {
                let now = Utc::now();
                let elapsed = state.duration(now).map(|d| d.num_seconds()).unwrap_or(0);
                println!(
                    "Incident open for {} ({} minute(s) by the alert policy)",
                    format_duration(elapsed),
                    elapsed_minutes(started_at, now)
                );
            } else {
                println!("All clear");
            }
        }
        Command::Reset => {
            let tracker = Monitor::tracker_for(&config);
            if !tracker.reset() {
                anyhow::bail!(
                    "Could not reset state file {}",
                    config.monitor.state_file.display()
                );
            }
            info!("Incident state reset to all-clear");
        }
        Command::Run { dry_run } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            let monitor = Monitor::from_config(config, dry_run)
                .context("Failed to initialize monitor")?;

            info!("Heartbeat check started");
            let report = runtime.block_on(monitor.run_once());

            match &report.notification {
                NotificationStatus::NotDue => {}
                NotificationStatus::Sent(receipt) => info!("Alert sent to {}", receipt.recipient),
                NotificationStatus::Failed(e) => warn!("Alert could not be delivered: {}", e),
            }
            info!(
                "Heartbeat check ended: {} failure(s), incident {}",
                report.failures(),
                if report.outcome.state.active { "open" } else { "closed" }
            );
        }
    }

    Ok(())
}

fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(config: Option<PathBuf>) -> Cli {
        Cli {
            config,
            verbose: false,
            state: None,
            command: None,
        }
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heartbeat.toml");
        std::fs::write(&path, "[monitor]\nname = \"test\"").unwrap();

        assert!(cli(Some(path)).validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        // Missing files are handled by falling back to defaults
        assert!(cli(Some(PathBuf::from("/nonexistent/heartbeat.toml")))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = TempDir::new().unwrap();
        assert!(cli(Some(dir.path().to_path_buf())).validate().is_err());

        let mut with_state_dir = cli(None);
        with_state_dir.state = Some(dir.path().to_path_buf());
        assert!(with_state_dir.validate().is_err());
    }

    #[test]
    fn test_default_command_is_run() {
        assert_eq!(cli(None).command(), Command::Run { dry_run: false });

        let parsed = Cli::parse_from(["heartbeat", "--config", "x.toml", "run", "--dry-run"]);
        assert_eq!(parsed.command(), Command::Run { dry_run: true });
        assert_eq!(parsed.config, Some(PathBuf::from("x.toml")));

        let parsed = Cli::parse_from(["heartbeat", "status"]);
        assert_eq!(parsed.command(), Command::Status);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/heartbeat.toml"))).unwrap();
        assert_eq!(config.monitor.name, "heartbeat");
    }

    #[test]
    fn test_load_config_invalid_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heartbeat.toml");
        std::fs::write(&path, "[policy]\nrepeat_every_minutes = 0\n").unwrap();

        assert!(load_config(Some(&path)).is_err());
    }
}
