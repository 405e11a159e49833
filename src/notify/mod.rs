/// Alert digest formatting and delivery
pub mod digest;
pub mod mailgun;
pub mod mock;

pub use digest::{format_duration, Digest};
pub use mailgun::MailgunNotifier;
pub use mock::MockNotifier;

use crate::error::NotificationError;
use crate::evidence::Artifact;
use crate::incident::{IncidentState, NotificationDecision};
use crate::observation::{Observation, Timestamp};
use std::future::Future;
use std::pin::Pin;

/// Everything a notifier needs to describe one run
#[derive(Debug, Clone, Copy)]
pub struct AlertContext<'a> {
    pub observations: &'a [Observation],
    pub state: &'a IncidentState,
    pub decision: &'a NotificationDecision,
    pub attachments: &'a [Artifact],
    /// Time the tracker made its decision
    pub now: Timestamp,
}

impl AlertContext<'_> {
    pub fn recipient(&self) -> &str {
        &self.decision.address
    }
}

/// Confirmation that a message was accepted for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub recipient: String,
    /// Provider message id, when the provider returns one
    pub message_id: Option<String>,
}

/// Trait for alert delivery channels
///
/// Delivery is fire-and-forget from the tracker's point of view: errors are
/// reported to the caller for logging and never change incident state.
pub trait Notifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        alert: AlertContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryReceipt, NotificationError>> + Send + 'a>>;
}
