/// Error types for the monitoring agent
pub mod error;

/// Per-run check results
pub mod observation;

/// Configuration management
pub mod config;

/// Endpoint probing
pub mod probe;

/// Failure evidence capture
pub mod evidence;

/// Incident state machine and persisted record
pub mod incident;

/// Alert digests and delivery
pub mod notify;

/// Single-run orchestration
pub mod monitor;

// Re-export commonly used types
pub use error::{ConfigError, EvidenceError, NotificationError, ProbeError, StateError};
pub use incident::{IncidentState, IncidentTracker, NotificationDecision};
pub use monitor::{Monitor, NotificationStatus, RunReport};
pub use observation::{FailureReason, Observation};
