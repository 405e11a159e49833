//! Per-run check results
//!
//! This module defines the data produced by the probe runner for every
//! configured endpoint and consumed by the incident tracker and notifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Status recorded when no HTTP response was received at all
pub const UNREACHABLE_STATUS: u16 = 0;

/// Why an observation counts as failing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Response status differed from the expected status
    StatusMismatch,
    /// Expected substring was absent from the response body
    ContentMismatch,
    /// Network error, DNS failure or timeout
    Unreachable,
    /// The check passed
    None,
}

impl FailureReason {
    /// Human-readable label used in alert digests
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::StatusMismatch => "Status code mismatch",
            FailureReason::ContentMismatch => "DOM string mismatch",
            FailureReason::Unreachable => "Unreachable",
            FailureReason::None => "OK",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identifier tying a failing observation to its evidence artifacts
///
/// Keys only contain `[A-Za-z0-9._-]` so they can be used directly as file
/// name stems. Any other byte of the site and path, `_` included, is written
/// as `_` plus two hex digits, so distinct endpoints never share a key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvidenceKey(String);

impl EvidenceKey {
    /// Build a key from the site, endpoint path and run timestamp
    pub fn new(site: &str, path: &str, run_at: Timestamp) -> Self {
        let mut key = String::with_capacity(site.len() + path.len() + 20);
        for byte in site.bytes().chain(path.bytes()) {
            if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
                key.push(byte as char);
            } else {
                key.push_str(&format!("_{:02X}", byte));
            }
        }
        key.push('-');
        key.push_str(&run_at.format("%Y%m%dT%H%M%S%3f").to_string());
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvidenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one endpoint check in one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    /// Host being monitored (e.g. `example.com`)
    pub site: String,
    /// Endpoint path, always starting with `/`
    pub path: String,
    /// Full URL that was requested
    pub url: String,
    /// Status code the configuration expects
    pub expected_status: u16,
    /// Status code received, `0` when unreachable
    pub received_status: u16,
    /// Why the check failed, or `None` when it passed
    pub reason: FailureReason,
    /// Error text or mismatch explanation
    pub detail: Option<String>,
    /// Raw response body, kept only for failing checks
    pub body: Option<String>,
    /// Response headers, kept only for failing checks
    pub headers: Option<BTreeMap<String, String>>,
    /// Key for evidence artifacts belonging to this observation
    pub evidence_key: EvidenceKey,
    /// When the probe finished
    pub observed_at: Timestamp,
}

impl Observation {
    /// Whether this observation should start or extend an incident
    pub fn is_failure(&self) -> bool {
        self.reason != FailureReason::None
    }

    /// A passing observation
    pub fn passed(site: &str, path: &str, url: &str, status: u16, observed_at: Timestamp) -> Self {
        Self {
            site: site.to_string(),
            path: path.to_string(),
            url: url.to_string(),
            expected_status: status,
            received_status: status,
            reason: FailureReason::None,
            detail: None,
            body: None,
            headers: None,
            evidence_key: EvidenceKey::new(site, path, observed_at),
            observed_at,
        }
    }

    /// A failing observation for an endpoint that could not be reached
    pub fn unreachable(
        site: &str,
        path: &str,
        url: &str,
        expected_status: u16,
        detail: impl Into<String>,
        observed_at: Timestamp,
    ) -> Self {
        let mut detail = detail.into();
        if detail.is_empty() {
            detail = "Unreachable, response code is 0".to_string();
        }

        Self {
            site: site.to_string(),
            path: path.to_string(),
            url: url.to_string(),
            expected_status,
            received_status: UNREACHABLE_STATUS,
            reason: FailureReason::Unreachable,
            detail: Some(detail),
            body: None,
            headers: None,
            evidence_key: EvidenceKey::new(site, path, observed_at),
            observed_at,
        }
    }
}

/// Count the failing observations in a run
pub fn failure_count(observations: &[Observation]) -> u64 {
    observations.iter().filter(|o| o.is_failure()).count() as u64
}
