use crate::config::MailConfig;
use crate::error::NotificationError;
use crate::evidence::Artifact;
use crate::notify::digest::{load_template, Digest};
use crate::notify::{AlertContext, DeliveryReceipt, Notifier};
use log::{info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Response body of the Mailgun messages API
#[derive(Debug, Deserialize)]
struct MailgunResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    message: Option<String>,
}

/// Delivers alert digests through the Mailgun HTTP API
///
/// Messages are posted as multipart forms to `{api_base}/{domain}/messages`
/// with HTTP basic auth, and evidence artifacts are attached as files.
pub struct MailgunNotifier {
    client: Client,
    config: MailConfig,
    template: String,
}

impl MailgunNotifier {
    /// Create a notifier from mail settings
    ///
    /// A configured template that cannot be read is replaced by the built-in
    /// template with a warning.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::NotConfigured` when required settings are
    /// missing and `NotificationError::Transport` if the HTTP client cannot
    /// be built.
    pub fn new(config: MailConfig) -> Result<Self, NotificationError> {
        if !config.is_complete() {
            return Err(NotificationError::NotConfigured(
                "mail.domain, mail.api_key, mail.from and mail.alerts_to are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                NotificationError::Transport(format!("Failed to create HTTP client: {}", e))
            })?;

        let template = load_template(config.template.as_deref());

        Ok(Self {
            client,
            config,
            template,
        })
    }

    fn api_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.config.api_base.trim_end_matches('/'),
            self.config.domain
        )
    }

    /// Build the multipart form, skipping attachments that cannot be read
    fn build_form(&self, recipient: &str, digest: &Digest, attachments: &[Artifact]) -> Form {
        let mut form = Form::new()
            .text("from", self.config.from.clone())
            .text("to", recipient.to_string())
            .text("subject", digest.subject.clone())
            .text("html", digest.html.clone())
            .text("text", digest.text.clone());

        for artifact in attachments {
            match Self::attachment_part(artifact) {
                Ok(part) => form = form.part("attachment", part),
                Err(e) => warn!("Skipping attachment: {}", e),
            }
        }

        form
    }

    fn attachment_part(artifact: &Artifact) -> Result<Part, NotificationError> {
        let bytes = std::fs::read(&artifact.path).map_err(|e| {
            NotificationError::Attachment(format!("{}: {}", artifact.path.display(), e))
        })?;

        Part::bytes(bytes)
            .file_name(artifact.file_name())
            .mime_str(artifact.kind.content_type())
            .map_err(|e| NotificationError::Attachment(e.to_string()))
    }

    /// Post one message to the Mailgun API
    pub async fn send_message(
        &self,
        recipient: &str,
        digest: &Digest,
        attachments: &[Artifact],
    ) -> Result<DeliveryReceipt, NotificationError> {
        let form = self.build_form(recipient, digest, attachments);

        let response = self
            .client
            .post(self.api_url())
            .basic_auth("api", Some(&self.config.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        // A 2xx means the message was accepted; the id is informational.
        let message_id = match response.json::<MailgunResponse>().await {
            Ok(parsed) => parsed.id,
            Err(e) => {
                warn!("Mail accepted but response was not understood: {}", e);
                None
            }
        };

        Ok(DeliveryReceipt {
            recipient: recipient.to_string(),
            message_id,
        })
    }
}

impl Notifier for MailgunNotifier {
    fn notify<'a>(
        &'a self,
        alert: AlertContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryReceipt, NotificationError>> + Send + 'a>> {
        Box::pin(async move {
            let digest = Digest::build(&alert, &self.config.subject, &self.template);
            info!(
                "Posting alert '{}' for {} to {}",
                digest.subject,
                alert.recipient(),
                self.api_url()
            );

            let receipt = self
                .send_message(alert.recipient(), &digest, alert.attachments)
                .await?;

            info!(
                "Alert accepted for {} (id: {})",
                receipt.recipient,
                receipt.message_id.as_deref().unwrap_or("n/a")
            );
            Ok(receipt)
        })
    }
}
