//! Configuration loading and validation
//!
//! Configuration is a TOML file. Every section has defaults so a partial file
//! is valid; only the sites to monitor and the mail settings are
//! deployment-specific. Mail secrets can also come from the environment.

use crate::error::ConfigError;
use crate::incident::{EscalationPolicy, Recipients};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_MAILGUN_API_KEY: &str = "HEARTBEAT_MAILGUN_API_KEY";
pub const ENV_MAILGUN_DOMAIN: &str = "HEARTBEAT_MAILGUN_DOMAIN";
pub const ENV_ALERTS_TO: &str = "HEARTBEAT_ALERTS_TO";
pub const ENV_ESCALATION_TO: &str = "HEARTBEAT_ESCALATION_TO";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub policy: EscalationPolicy,
    pub mail: MailConfig,
    pub screenshot: ScreenshotConfig,
    pub sites: Vec<SiteConfig>,
}

/// Run-level settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Name used in notification subjects and the probe user agent
    pub name: String,
    /// Where the incident record lives
    pub state_file: PathBuf,
    /// Scratch directory for failure evidence
    pub evidence_dir: PathBuf,
    /// Keep evidence files after the run instead of deleting them
    pub keep_evidence: bool,
    /// Probe all endpoints concurrently rather than one after another
    pub concurrent: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            name: "heartbeat".to_string(),
            state_file: PathBuf::from("tracking.json"),
            evidence_dir: PathBuf::from("evidence"),
            keep_evidence: false,
            concurrent: true,
        }
    }
}

/// Mailgun delivery settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MailConfig {
    pub api_base: String,
    pub domain: String,
    pub api_key: String,
    pub from: String,
    /// Primary alert address
    pub alerts_to: String,
    /// Address used once an incident escalates, defaults to `alerts_to`
    pub escalation_to: Option<String>,
    pub subject: String,
    /// Optional HTML template replacing the built-in one
    pub template: Option<PathBuf>,
    pub timeout_seconds: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.mailgun.net/v3".to_string(),
            domain: String::new(),
            api_key: String::new(),
            from: String::new(),
            alerts_to: String::new(),
            escalation_to: None,
            subject: "URGENT NOTIFICATION - heartbeat".to_string(),
            template: None,
            timeout_seconds: 30,
        }
    }
}

impl MailConfig {
    /// Whether enough is configured to attempt delivery
    pub fn is_complete(&self) -> bool {
        !self.domain.is_empty()
            && !self.api_key.is_empty()
            && !self.from.is_empty()
            && !self.alerts_to.is_empty()
    }
}

/// Headless browser screenshot settings
///
/// `args` may contain `{url}` and `{output}` placeholders, replaced with the
/// failing URL and the screenshot path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreenshotConfig {
    pub enabled: bool,
    pub command: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "chromium".to_string(),
            args: vec![
                "--headless".to_string(),
                "--disable-gpu".to_string(),
                "--hide-scrollbars".to_string(),
                "--window-size=1280,1024".to_string(),
                "--screenshot={output}".to_string(),
                "{url}".to_string(),
            ],
            timeout_seconds: 30,
        }
    }
}

/// One monitored host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    pub host: String,
    /// Set to false to skip the site without removing it
    #[serde(default = "default_true")]
    pub check: bool,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

impl SiteConfig {
    pub fn url(&self, endpoint: &EndpointSpec) -> String {
        format!("{}://{}{}", self.scheme, self.host, endpoint.path)
    }
}

/// Expectations for one endpoint of a site
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointSpec {
    pub path: String,
    #[serde(default = "default_status")]
    pub status: u16,
    /// Substring the response body must contain
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl EndpointSpec {
    pub fn new(path: impl Into<String>, status: u16) -> Self {
        Self {
            path: path.into(),
            status,
            contains: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }

    /// Empty strings in the config mean "no content check"
    pub fn content_match(&self) -> Option<&str> {
        self.contains.as_deref().filter(|s| !s.is_empty())
    }
}

fn default_true() -> bool {
    true
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_status() -> u16 {
    200
}

fn default_timeout_seconds() -> u64 {
    5
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` when the file cannot be read and
    /// `ConfigError::ParseError` or `ConfigError::ValidationError` for bad content.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&contents)?;

        // Relative paths in the file are relative to the file itself.
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay mail settings from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay mail settings from a key lookup, ignoring empty values
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(ENV_MAILGUN_API_KEY) {
            self.mail.api_key = key;
        }
        if let Some(domain) = get(ENV_MAILGUN_DOMAIN) {
            self.mail.domain = domain;
        }
        if let Some(to) = get(ENV_ALERTS_TO) {
            self.mail.alerts_to = to;
        }
        if let Some(to) = get(ENV_ESCALATION_TO) {
            self.mail.escalation_to = Some(to);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate().map_err(ConfigError::ValidationError)?;

        if self.mail.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "mail.timeout_seconds must be positive".to_string(),
            ));
        }

        if self.screenshot.enabled {
            if self.screenshot.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "screenshot.command must be set when screenshots are enabled".to_string(),
                ));
            }
            if self.screenshot.timeout_seconds == 0 {
                return Err(ConfigError::ValidationError(
                    "screenshot.timeout_seconds must be positive".to_string(),
                ));
            }
        }

        for site in &self.sites {
            if site.host.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "site host must not be empty".to_string(),
                ));
            }
            if site.scheme != "https" && site.scheme != "http" {
                return Err(ConfigError::ValidationError(format!(
                    "site '{}' has unsupported scheme '{}'",
                    site.host, site.scheme
                )));
            }

            for endpoint in &site.endpoints {
                if !endpoint.path.starts_with('/') {
                    return Err(ConfigError::ValidationError(format!(
                        "endpoint '{}' of site '{}' must start with '/'",
                        endpoint.path, site.host
                    )));
                }
                if !(100..=599).contains(&endpoint.status) {
                    return Err(ConfigError::ValidationError(format!(
                        "endpoint '{}' of site '{}' expects invalid status {}",
                        endpoint.path, site.host, endpoint.status
                    )));
                }
                if endpoint.timeout_seconds == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "endpoint '{}' of site '{}' must have a positive timeout",
                        endpoint.path, site.host
                    )));
                }
            }
        }

        Ok(())
    }

    /// Primary and escalation addresses
    pub fn recipients(&self) -> Recipients {
        let escalation = self
            .mail
            .escalation_to
            .clone()
            .filter(|addr| !addr.is_empty())
            .unwrap_or_else(|| self.mail.alerts_to.clone());
        Recipients::new(self.mail.alerts_to.clone(), escalation)
    }

    /// Sites with checking enabled, skipping the rest with a log line
    pub fn active_sites(&self) -> impl Iterator<Item = &SiteConfig> {
        self.sites.iter().filter(|site| {
            if !site.check {
                info!("Check disabled for {}, skipping", site.host);
            }
            site.check
        })
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.monitor.state_file);
        resolve(&mut self.monitor.evidence_dir);
        if let Some(template) = self.mail.template.as_mut() {
            resolve(template);
        }
    }
}
