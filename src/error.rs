use thiserror::Error;

/// Errors raised while probing an endpoint
///
/// These never reach the incident tracker: the probe runner converts every
/// variant into an unreachable `Observation`.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Invalid probe URL: {0}")]
    InvalidUrl(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to read response body: {0}")]
    Body(String),
}

/// Errors that can occur while reading or writing the persisted incident record
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to read state file: {0}")]
    Read(String),

    #[error("State file is corrupt: {0}")]
    Corrupt(String),

    #[error("Failed to write state file: {0}")]
    Write(String),

    #[error("Failed to lock state file: {0}")]
    Lock(String),
}

/// Errors that can occur while capturing failure evidence
#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("Screenshot command failed: {0}")]
    ScreenshotFailed(String),

    #[error("Screenshot command timed out after {0} seconds")]
    ScreenshotTimeout(u64),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur when delivering a notification
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notifier is not configured: {0}")]
    NotConfigured(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Mail API rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to attach evidence: {0}")]
    Attachment(String),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),
}
