/// Incident tracking: persisted state, alert policy and the run-to-run state machine
pub mod policy;
pub mod state;
pub mod store;
pub mod tracker;

pub use policy::{elapsed_minutes, EscalationPolicy, RecipientKind};
pub use state::IncidentState;
pub use store::{FileStateStore, StateStore, StoreLock};
pub use tracker::{
    transition, IncidentTracker, NotificationDecision, Recipients, TrackerOutcome, Transition,
    TransitionKind,
};
