use crate::observation::Timestamp;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// The persisted cross-run incident record
///
/// Exactly one record exists per deployment. An inactive record always has
/// the all-clear shape: no timestamps and a zero failure count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct IncidentState {
    /// Whether an incident is currently open
    #[serde(rename = "incident_active")]
    pub active: bool,
    /// When the current incident was first observed
    #[serde(rename = "incident_start")]
    pub started_at: Option<Timestamp>,
    /// Last run that observed a failure during the current incident
    #[serde(rename = "incident_last_seen")]
    pub last_seen_at: Option<Timestamp>,
    /// Failing observations accumulated over the life of the incident
    #[serde(rename = "failures_total")]
    pub cumulative_failures: u64,
}

impl IncidentState {
    /// The all-clear record
    pub fn inactive() -> Self {
        Self::default()
    }

    /// A freshly opened incident
    pub fn started(at: Timestamp, failures: u64) -> Self {
        Self {
            active: true,
            started_at: Some(at),
            last_seen_at: Some(at),
            cumulative_failures: failures,
        }
    }

    /// How long the incident has lasted at `now`, `None` when inactive
    ///
    /// A start time in the future reads as zero.
    pub fn duration(&self, now: Timestamp) -> Option<Duration> {
        self.started_at
            .map(|started| (now - started).max(Duration::zero()))
    }

    /// Check the record's shape invariants
    pub fn is_consistent(&self) -> bool {
        if self.active {
            self.started_at.is_some()
        } else {
            self.started_at.is_none()
                && self.last_seen_at.is_none()
                && self.cumulative_failures == 0
        }
    }

    /// Coerce an inconsistent record read from disk into a usable one
    ///
    /// An active record without a start time cannot be timed, so it is
    /// restarted at `last_seen_at` when available. An inactive record with
    /// leftover fields is reset to all-clear.
    pub fn normalized(self) -> Self {
        if self.is_consistent() {
            return self;
        }

        if self.active {
            match self.last_seen_at {
                Some(last_seen) => Self {
                    started_at: Some(last_seen),
                    ..self
                },
                None => Self::inactive(),
            }
        } else {
            Self::inactive()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_persisted_schema_field_names() {
        let state = IncidentState::started(t0(), 3);
        let json = serde_json::to_value(state).unwrap();

        assert_eq!(json["incident_active"], true);
        assert_eq!(json["incident_start"], "2024-03-01T12:00:00Z");
        assert_eq!(json["incident_last_seen"], "2024-03-01T12:00:00Z");
        assert_eq!(json["failures_total"], 3);
    }

    #[test]
    fn test_inactive_schema_uses_nulls() {
        let json = serde_json::to_string(&IncidentState::inactive()).unwrap();
        assert_eq!(
            json,
            r#"{"incident_active":false,"incident_start":null,"incident_last_seen":null,"failures_total":0}"#
        );
    }

    #[test]
    fn test_duration() {
        let state = IncidentState::started(t0(), 1);
        let now = t0() + Duration::minutes(90);
        assert_eq!(state.duration(now), Some(Duration::minutes(90)));
        assert_eq!(state.duration(t0() - Duration::minutes(1)), Some(Duration::zero()));
        assert_eq!(IncidentState::inactive().duration(now), None);
    }

    #[test]
    fn test_normalized_repairs_records() {
        let dangling = IncidentState {
            active: false,
            started_at: Some(t0()),
            last_seen_at: None,
            cumulative_failures: 7,
        };
        assert_eq!(dangling.normalized(), IncidentState::inactive());

        let untimed = IncidentState {
            active: true,
            started_at: None,
            last_seen_at: Some(t0()),
            cumulative_failures: 4,
        };
        let repaired = untimed.normalized();
        assert!(repaired.is_consistent());
        assert_eq!(repaired.started_at, Some(t0()));
        assert_eq!(repaired.cumulative_failures, 4);

        let hopeless = IncidentState {
            active: true,
            started_at: None,
            last_seen_at: None,
            cumulative_failures: 2,
        };
        assert_eq!(hopeless.normalized(), IncidentState::inactive());
    }
}
