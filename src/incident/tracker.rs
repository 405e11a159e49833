use crate::incident::policy::{elapsed_minutes, EscalationPolicy, RecipientKind};
use crate::incident::store::{StateStore, StoreLock};
use crate::incident::IncidentState;
use crate::observation::{failure_count, Observation, Timestamp};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

/// Addresses notifications can be routed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    pub primary: String,
    pub escalation: String,
}

impl Recipients {
    pub fn new(primary: impl Into<String>, escalation: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            escalation: escalation.into(),
        }
    }

    pub fn address(&self, kind: RecipientKind) -> &str {
        match kind {
            RecipientKind::Primary => &self.primary,
            RecipientKind::Escalation => &self.escalation,
        }
    }
}

/// Which edge of the incident lifecycle a run produced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// First failing run after an all-clear
    Started,
    /// Failing run during an open incident
    Continued,
    /// First passing run after an incident
    Recovered,
    /// Passing run with no open incident
    Quiet,
}

/// Result of applying one run's observations to the previous record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: IncidentState,
    pub kind: TransitionKind,
    /// Incident age in whole minutes, `None` when no incident is open
    pub elapsed_minutes: Option<i64>,
    pub eligible: bool,
    pub recipient: RecipientKind,
}

/// Apply one run to the previous record
///
/// Only failing observations start or extend an incident. Any run without
/// failures ends the incident and resets the record to all-clear.
pub fn transition(
    previous: IncidentState,
    observations: &[Observation],
    now: Timestamp,
    policy: &EscalationPolicy,
) -> Transition {
    let failures = failure_count(observations);

    if failures == 0 {
        let kind = if previous.active {
            TransitionKind::Recovered
        } else {
            TransitionKind::Quiet
        };
        return Transition {
            state: IncidentState::inactive(),
            kind,
            elapsed_minutes: None,
            eligible: false,
            recipient: RecipientKind::Primary,
        };
    }

    let (mut state, kind) = match (previous.active, previous.started_at) {
        (true, Some(_)) => (previous, TransitionKind::Continued),
        _ => (IncidentState::started(now, 0), TransitionKind::Started),
    };

    state.cumulative_failures = state.cumulative_failures.saturating_add(failures);
    state.last_seen_at = Some(now);

    let started_at = state.started_at.unwrap_or(now);
    let elapsed = elapsed_minutes(started_at, now);

    Transition {
        state,
        kind,
        elapsed_minutes: Some(elapsed),
        eligible: policy.is_eligible(elapsed),
        recipient: policy.recipient(elapsed),
    }
}

/// Whether and where to send a notification for this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationDecision {
    pub should_send: bool,
    pub recipient: RecipientKind,
    pub address: String,
    /// Incident age used for the decision, `None` when no incident is open
    pub elapsed_minutes: Option<i64>,
}

impl NotificationDecision {
    pub fn is_escalated(&self) -> bool {
        self.recipient == RecipientKind::Escalation
    }
}

/// Everything the tracker decided for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerOutcome {
    pub previous: IncidentState,
    pub state: IncidentState,
    pub kind: TransitionKind,
    pub decision: NotificationDecision,
    /// Whether the new record reached durable storage
    pub persisted: bool,
}

/// Converts per-run observations into incident state and notification decisions
///
/// The tracker performs one locked read-modify-write of the persisted record
/// per call. Storage failures never abort the run: an unreadable record is
/// replaced by the all-clear record and a failed write only costs the next
/// run its memory of this one.
pub struct IncidentTracker {
    store: Box<dyn StateStore>,
    policy: EscalationPolicy,
    recipients: Recipients,
}

impl IncidentTracker {
    pub fn new(store: Box<dyn StateStore>, policy: EscalationPolicy, recipients: Recipients) -> Self {
        Self {
            store,
            policy,
            recipients,
        }
    }

    /// Read the current record, substituting all-clear when it is unreadable
    pub fn current_state(&self) -> IncidentState {
        match self.store.load() {
            Ok(state) => state,
            Err(e) => {
                warn!("Treating incident state as all-clear: {}", e);
                IncidentState::inactive()
            }
        }
    }

    /// Reset the persisted record to all-clear
    pub fn reset(&self) -> bool {
        let _guard = self.acquire_lock();
        match self.store.save(&IncidentState::inactive()) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to reset incident state: {}", e);
                false
            }
        }
    }

    /// Apply one run's observations and decide on notification
    ///
    /// Holds the store lock for the whole read-modify-write, so overlapping
    /// runs never lose each other's failure counts. The new record is written
    /// on every call, including all-clear runs.
    ///
    /// # Arguments
    ///
    /// * `observations` - Every observation of the run, passing ones included
    /// * `now` - Decision time, normally read once probing has finished
    ///
    /// # Returns
    ///
    /// The previous and new records, the transition kind and the notification
    /// decision. `persisted` is false when the new record could not be
    /// written; the decision is still valid.
    pub fn update(&self, observations: &[Observation], now: Timestamp) -> TrackerOutcome {
        let _guard = self.acquire_lock();

        let previous = self.current_state();
        let result = transition(previous, observations, now, &self.policy);
        self.log_transition(&previous, &result);

        // Written even when nothing changed.
        let persisted = match self.store.save(&result.state) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to persist incident state, next run will not see this one: {}",
                    e
                );
                false
            }
        };

        let decision = NotificationDecision {
            should_send: result.eligible,
            recipient: result.recipient,
            address: self.recipients.address(result.recipient).to_string(),
            elapsed_minutes: result.elapsed_minutes,
        };

        TrackerOutcome {
            previous,
            state: result.state,
            kind: result.kind,
            decision,
            persisted,
        }
    }

    fn acquire_lock(&self) -> StoreLock {
        match self.store.lock() {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Proceeding without state lock: {}", e);
                StoreLock::none()
            }
        }
    }

    fn log_transition(&self, previous: &IncidentState, result: &Transition) {
        match result.kind {
            TransitionKind::Started => info!(
                "Incident started with {} failing check(s)",
                result.state.cumulative_failures
            ),
            TransitionKind::Continued => info!(
                "Incident ongoing for {} minute(s), {} failure(s) so far, notify={}",
                result.elapsed_minutes.unwrap_or(0),
                result.state.cumulative_failures,
                result.eligible
            ),
            TransitionKind::Recovered => info!(
                "Incident resolved after {} failure(s)",
                previous.cumulative_failures
            ),
            TransitionKind::Quiet => debug!("All clear"),
        }

        if result.recipient == RecipientKind::Escalation && result.eligible {
            warn!(
                "Incident has lasted {} minute(s), escalating",
                result.elapsed_minutes.unwrap_or(0)
            );
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::observation::Observation;
    use chrono::{Duration, TimeZone, Utc};
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// One simulated run: how many endpoints failed and how long after the
    /// previous run it happened
    #[derive(Debug, Clone)]
    struct Run {
        failures: u8,
        gap_seconds: u32,
    }

    impl Arbitrary for Run {
        fn arbitrary(g: &mut Gen) -> Self {
            // Bias towards failing runs so incidents actually develop
            let failures = if u8::arbitrary(g) % 4 == 0 {
                0
            } else {
                1 + u8::arbitrary(g) % 5
            };
            Self {
                failures,
                gap_seconds: 1 + u32::arbitrary(g) % 1800,
            }
        }
    }

    fn observations_for(run: &Run, at: Timestamp) -> Vec<Observation> {
        (0..run.failures)
            .map(|i| {
                let path = format!("/{}", i);
                Observation::unreachable("example.com", &path, "https://example.com", 200, "down", at)
            })
            .collect()
    }

    fn start() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[quickcheck]
    fn prop_state_invariants_hold_after_every_run(runs: Vec<Run>) -> bool {
        let policy = EscalationPolicy::default();
        let mut state = IncidentState::inactive();
        let mut now = start();

        for run in &runs {
            now += Duration::seconds(run.gap_seconds as i64);
            let previous = state;
            let result = transition(state, &observations_for(run, now), now, &policy);
            state = result.state;

            if !state.is_consistent() {
                return false;
            }
            if previous.active
                && state.active
                && (state.cumulative_failures < previous.cumulative_failures
                    || state.started_at != previous.started_at)
            {
                return false;
            }
            if state.active && state.last_seen_at != Some(now) {
                return false;
            }
        }
        true
    }

    #[quickcheck]
    fn prop_cumulative_failures_equal_sum_since_start(runs: Vec<Run>) -> bool {
        let policy = EscalationPolicy::default();
        let mut state = IncidentState::inactive();
        let mut now = start();
        let mut expected: u64 = 0;

        for run in &runs {
            now += Duration::seconds(run.gap_seconds as i64);
            state = transition(state, &observations_for(run, now), now, &policy).state;
            if run.failures == 0 {
                expected = 0;
            } else {
                expected += run.failures as u64;
            }
            if state.cumulative_failures != expected {
                return false;
            }
        }
        true
    }

    #[quickcheck]
    fn prop_all_clear_never_notifies(state_failures: u16, active_minutes: u16) -> bool {
        let policy = EscalationPolicy::default();
        let now = start() + Duration::days(2);
        let previous = if state_failures == 0 {
            IncidentState::inactive()
        } else {
            IncidentState {
                active: true,
                started_at: Some(now - Duration::minutes(active_minutes as i64)),
                last_seen_at: Some(now),
                cumulative_failures: state_failures as u64,
            }
        };

        let result = transition(previous, &[], now, &policy);
        !result.eligible && result.state == IncidentState::inactive()
    }

    #[quickcheck]
    fn prop_eligibility_matches_band_rule(elapsed_seconds: u32) -> bool {
        let policy = EscalationPolicy::default();
        let now = start() + Duration::days(30);
        let previous = IncidentState::started(now - Duration::seconds(elapsed_seconds as i64), 1);
        let result = transition(previous, &observations_for(&Run { failures: 1, gap_seconds: 0 }, now), now, &policy);

        let minutes = elapsed_seconds as i64 / 60;
        let expected = (5..30).contains(&minutes) || (minutes >= 30 && minutes % 15 == 0);
        let expected_recipient = if minutes >= 300 {
            RecipientKind::Escalation
        } else {
            RecipientKind::Primary
        };

        result.eligible == expected && result.recipient == expected_recipient
    }
}
