//! Alert digest formatting
//!
//! The digest is rendered from structured data only. HTML output is produced
//! by substituting placeholders in a template; every substituted value is
//! escaped first.

use crate::notify::AlertContext;
use crate::observation::Observation;
use log::warn;
use std::path::Path;

pub const PLACEHOLDER_ALERTS: &str = "{{replace_alerts}}";
pub const PLACEHOLDER_FAILURE_COUNT: &str = "{{failure_count}}";
pub const PLACEHOLDER_DURATION: &str = "{{incident_start_timestamp_delta}}";
pub const PLACEHOLDER_STARTED: &str = "{{incident_start_timestamp_pretty}}";

/// Built-in HTML template
pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; padding: 20px; }
        .container { max-width: 640px; margin: 0 auto; }
        h1 { color: #dc2626; }
        .summary { background: #fef2f2; padding: 12px; border-radius: 6px; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Monitoring alert</h1>
        <div class="summary">
            <strong>Incident started:</strong> {{incident_start_timestamp_pretty}}<br>
            <strong>Incident duration:</strong> {{incident_start_timestamp_delta}}<br>
            <strong>Failed checks so far:</strong> {{failure_count}}
        </div>
        <h2>Failing checks</h2>
        {{replace_alerts}}
    </div>
</body>
</html>
"#;

/// Rendered notification content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl Digest {
    /// Render a digest for one run
    ///
    /// `subject` is the configured base subject; escalated notifications get
    /// an `ESCALATION - ` prefix.
    pub fn build(context: &AlertContext<'_>, subject: &str, template: &str) -> Self {
        let subject = if context.decision.is_escalated() {
            format!("ESCALATION - {}", subject)
        } else {
            subject.to_string()
        };

        let failures: Vec<&Observation> =
            context.observations.iter().filter(|o| o.is_failure()).collect();

        let started = context
            .state
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let duration = context
            .state
            .duration(context.now)
            .map(|d| format_duration(d.num_seconds()))
            .unwrap_or_else(|| format_duration(0));
        let failure_count = context.state.cumulative_failures.to_string();

        // Alerts go in last so placeholder-like text in a URL is left alone.
        let html = template
            .replace(PLACEHOLDER_FAILURE_COUNT, &escape_html(&failure_count))
            .replace(PLACEHOLDER_DURATION, &escape_html(&duration))
            .replace(PLACEHOLDER_STARTED, &escape_html(&started))
            .replace(PLACEHOLDER_ALERTS, &render_alerts_html(&failures));

        let mut text = format!(
            "Incident started: {}\nIncident duration: {}\nFailed checks so far: {}\n\n",
            started, duration, failure_count
        );
        for observation in &failures {
            text.push_str(&render_alert_text(observation));
            text.push('\n');
        }
        if !context.attachments.is_empty() {
            text.push_str(&format!(
                "{} evidence file(s) attached.\n",
                context.attachments.len()
            ));
        }

        Self {
            subject,
            html,
            text,
        }
    }
}

/// Read the configured HTML template, falling back to the built-in one
///
/// An unreadable template file is logged and replaced by `DEFAULT_TEMPLATE`
/// so a bad path never blocks an alert.
pub fn load_template(path: Option<&Path>) -> String {
    match path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(template) => template,
            Err(e) => {
                warn!(
                    "Cannot read mail template {}, using built-in template: {}",
                    path.display(),
                    e
                );
                DEFAULT_TEMPLATE.to_string()
            }
        },
        None => DEFAULT_TEMPLATE.to_string(),
    }
}

/// Format a duration as `Xh Ym Zs`, with a leading `Nd` from one day on
///
/// Negative durations are treated as zero.
pub fn format_duration(seconds: i64) -> String {
    let total = seconds.max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let secs = total % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, secs)
    } else {
        format!("{}h {}m {}s", hours, minutes, secs)
    }
}

/// Escape text for inclusion in HTML
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn render_alerts_html(failures: &[&Observation]) -> String {
    let mut html = String::new();
    for observation in failures {
        html.push_str(&format!(
            "<strong>Site:</strong> {} <br>",
            escape_html(&observation.site)
        ));
        html.push_str(&format!(
            "<strong>Endpoint:</strong> {} <br>",
            escape_html(&observation.path)
        ));
        html.push_str(&format!(
            "<strong>Expected Code:</strong> {} <br>",
            observation.expected_status
        ));
        html.push_str(&format!(
            "<strong>Response Code:</strong> {} <br>",
            observation.received_status
        ));
        html.push_str(&format!(
            "<strong>Exception:</strong> {} <br>",
            escape_html(&exception_text(observation))
        ));
        html.push_str(&format!(
            "<strong>Evidence:</strong> {} <br>",
            escape_html(observation.evidence_key.as_str())
        ));
        html.push_str("<br>");
    }
    html
}

fn render_alert_text(observation: &Observation) -> String {
    format!(
        "Site: {}\nEndpoint: {}\nExpected Code: {}\nResponse Code: {}\nException: {}\nEvidence: {}\n",
        observation.site,
        observation.path,
        observation.expected_status,
        observation.received_status,
        exception_text(observation),
        observation.evidence_key
    )
}

fn exception_text(observation: &Observation) -> String {
    match &observation.detail {
        Some(detail) => format!("{}: {}", observation.reason.label(), detail),
        None => observation.reason.label().to_string(),
    }
}
