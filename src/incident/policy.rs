//! Notification timing and escalation rules
//!
//! Eligibility is decided from the whole number of minutes an incident has
//! lasted at tracker-invocation time:
//!
//! * below `notify_after_minutes` nothing is sent
//! * from `notify_after_minutes` up to `steady_until_minutes` every run is eligible
//! * from `steady_until_minutes` on, only exact multiples of
//!   `repeat_every_minutes` are eligible
//!
//! Once `escalate_after_minutes` is reached the escalation address receives
//! the notification instead of the primary address.

use crate::observation::Timestamp;
use serde::{Deserialize, Serialize};

/// Incident duration in whole minutes, floored
///
/// Clock skew that puts `started_at` after `now` reads as zero.
pub fn elapsed_minutes(started_at: Timestamp, now: Timestamp) -> i64 {
    (now - started_at).num_seconds().max(0) / 60
}

/// Which configured address a notification goes to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    Primary,
    Escalation,
}

/// Thresholds for the alert policy, all in minutes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EscalationPolicy {
    /// Minimum incident age before anything is sent
    pub notify_after_minutes: i64,
    /// End of the band in which every run notifies
    pub steady_until_minutes: i64,
    /// Spacing of notifications after the steady band
    pub repeat_every_minutes: i64,
    /// Incident age at which the escalation address takes over
    pub escalate_after_minutes: i64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            notify_after_minutes: 5,
            steady_until_minutes: 30,
            repeat_every_minutes: 15,
            escalate_after_minutes: 300,
        }
    }
}

impl EscalationPolicy {
    /// Whether a failing run at this incident age should notify
    pub fn is_eligible(&self, elapsed_minutes: i64) -> bool {
        if elapsed_minutes < self.notify_after_minutes {
            false
        } else if elapsed_minutes < self.steady_until_minutes {
            true
        } else {
            self.repeat_every_minutes > 0 && elapsed_minutes % self.repeat_every_minutes == 0
        }
    }

    /// Who a notification at this incident age goes to
    pub fn recipient(&self, elapsed_minutes: i64) -> RecipientKind {
        if elapsed_minutes >= self.escalate_after_minutes {
            RecipientKind::Escalation
        } else {
            RecipientKind::Primary
        }
    }

    /// Reject threshold combinations that make the bands meaningless
    pub fn validate(&self) -> Result<(), String> {
        if self.notify_after_minutes < 0 {
            return Err("policy.notify_after_minutes must not be negative".to_string());
        }
        if self.steady_until_minutes < self.notify_after_minutes {
            return Err(
                "policy.steady_until_minutes must be at least policy.notify_after_minutes"
                    .to_string(),
            );
        }
        if self.repeat_every_minutes <= 0 {
            return Err("policy.repeat_every_minutes must be positive".to_string());
        }
        if self.escalate_after_minutes < 0 {
            return Err("policy.escalate_after_minutes must not be negative".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_elapsed_minutes_floors() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(elapsed_minutes(start, start), 0);
        assert_eq!(elapsed_minutes(start, start + Duration::seconds(59)), 0);
        assert_eq!(elapsed_minutes(start, start + Duration::seconds(60)), 1);
        assert_eq!(elapsed_minutes(start, start + Duration::seconds(44 * 60 + 59)), 44);
        assert_eq!(elapsed_minutes(start, start + Duration::milliseconds(299_999)), 4);
    }

    #[test]
    fn test_elapsed_minutes_clock_skew() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(elapsed_minutes(start, start - Duration::minutes(10)), 0);
    }

    #[test]
    fn test_eligibility_bands() {
        let policy = EscalationPolicy::default();

        for minute in 0..5 {
            assert!(!policy.is_eligible(minute), "minute {} should be quiet", minute);
        }
        for minute in 5..30 {
            assert!(policy.is_eligible(minute), "minute {} should notify", minute);
        }

        assert!(policy.is_eligible(30));
        assert!(!policy.is_eligible(31));
        assert!(!policy.is_eligible(44));
        assert!(policy.is_eligible(45));
        assert!(!policy.is_eligible(46));
        assert!(policy.is_eligible(60));
        assert!(policy.is_eligible(300));
        assert!(!policy.is_eligible(301));
    }

    #[test]
    fn test_recipient_switches_at_escalation_threshold() {
        let policy = EscalationPolicy::default();
        assert_eq!(policy.recipient(0), RecipientKind::Primary);
        assert_eq!(policy.recipient(299), RecipientKind::Primary);
        assert_eq!(policy.recipient(300), RecipientKind::Escalation);
        assert_eq!(policy.recipient(10_000), RecipientKind::Escalation);
    }

    #[test]
    fn test_validate() {
        assert!(EscalationPolicy::default().validate().is_ok());

        let bad_repeat = EscalationPolicy {
            repeat_every_minutes: 0,
            ..EscalationPolicy::default()
        };
        assert!(bad_repeat.validate().is_err());

        let inverted = EscalationPolicy {
            notify_after_minutes: 40,
            ..EscalationPolicy::default()
        };
        assert!(inverted.validate().is_err());
    }
}
