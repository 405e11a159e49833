use crate::error::NotificationError;
use crate::notify::digest::{Digest, DEFAULT_TEMPLATE};
use crate::notify::{AlertContext, DeliveryReceipt, Notifier};
use log::info;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// A notification captured by `MockNotifier`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub recipient: String,
    pub digest: Digest,
    pub attachment_count: usize,
}

/// Subject used when none is configured
pub const MOCK_SUBJECT: &str = "MOCK NOTIFICATION";

/// Mock notifier for tests and dry runs
///
/// Renders the digest like a real notifier would, logs it and records it
/// instead of delivering it. Configure the subject and template to preview
/// exactly what the mail notifier would send.
#[derive(Debug, Clone)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    fail_with: Option<String>,
    subject: String,
    template: String,
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
            subject: MOCK_SUBJECT.to_string(),
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails with a transport error
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Base subject for rendered digests
    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    /// HTML template for rendered digests
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Notifications recorded so far
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Notifier for MockNotifier {
    fn notify<'a>(
        &'a self,
        alert: AlertContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryReceipt, NotificationError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(message) = &self.fail_with {
                return Err(NotificationError::Transport(message.clone()));
            }

            let digest = Digest::build(&alert, &self.subject, &self.template);
            info!(
                "MOCK NOTIFICATION - To: {}, Subject: {}\n{}",
                alert.recipient(),
                digest.subject,
                digest.text
            );

            if let Ok(mut sent) = self.sent.lock() {
                sent.push(SentNotification {
                    recipient: alert.recipient().to_string(),
                    digest,
                    attachment_count: alert.attachments.len(),
                });
            }

            Ok(DeliveryReceipt {
                recipient: alert.recipient().to_string(),
                message_id: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::Artifact;
    use crate::incident::{IncidentState, NotificationDecision, RecipientKind};
    use crate::observation::{Observation, Timestamp};
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn escalated() -> NotificationDecision {
        NotificationDecision {
            should_send: true,
            recipient: RecipientKind::Escalation,
            address: "oncall@example.com".to_string(),
            elapsed_minutes: Some(300),
        }
    }

    #[tokio::test]
    async fn test_renders_configured_subject_and_template() {
        let notifier = MockNotifier::new()
            .with_subject("URGENT NOTIFICATION - acme")
            .with_template("failed={{failure_count}}");
        let now = t0() + Duration::minutes(300);
        let state = IncidentState::started(t0(), 300);
        let decision = escalated();
        let observations = vec![Observation::unreachable(
            "example.com",
            "/",
            "https://example.com/",
            200,
            "",
            now,
        )];
        let attachments: Vec<Artifact> = Vec::new();

        let receipt = notifier
            .notify(AlertContext {
                observations: &observations,
                state: &state,
                decision: &decision,
                attachments: &attachments,
                now,
            })
            .await
            .unwrap();

        assert_eq!(receipt.recipient, "oncall@example.com");
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].digest.subject, "ESCALATION - URGENT NOTIFICATION - acme");
        assert_eq!(sent[0].digest.html, "failed=300");
    }

    #[tokio::test]
    async fn test_failing_notifier_records_nothing() {
        let notifier = MockNotifier::failing("smtp down");
        let state = IncidentState::started(t0(), 6);
        let decision = escalated();

        let result = notifier
            .notify(AlertContext {
                observations: &[],
                state: &state,
                decision: &decision,
                attachments: &[],
                now: t0(),
            })
            .await;

        assert!(matches!(result, Err(NotificationError::Transport(_))));
        assert!(notifier.sent().is_empty());
        assert_eq!(MockNotifier::new().subject, MOCK_SUBJECT);
    }
}
