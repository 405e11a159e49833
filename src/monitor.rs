//! One monitoring pass
//!
//! `Monitor` wires the collaborators together for a single run: probe every
//! configured endpoint, feed the observations to the incident tracker, send a
//! notification with evidence when the tracker says so, then clean up.
//! Nothing in a run is fatal; collaborator failures are logged and reported
//! in the `RunReport`.

use crate::config::{Config, MailConfig};
use crate::error::ProbeError;
use crate::evidence::EvidenceCollector;
use crate::incident::{FileStateStore, IncidentTracker, TrackerOutcome};
use crate::notify::digest::load_template;
use crate::notify::{AlertContext, DeliveryReceipt, MailgunNotifier, MockNotifier, Notifier};
use crate::observation::{failure_count, Observation, Timestamp};
use crate::probe::{probe_all, HttpProber, Prober};
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;

/// What happened to this run's notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationStatus {
    /// The tracker did not ask for a notification
    NotDue,
    /// Delivered to the mail provider
    Sent(DeliveryReceipt),
    /// Delivery failed; incident state is unaffected
    Failed(String),
}

/// Summary of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub observations: Vec<Observation>,
    pub outcome: TrackerOutcome,
    pub notification: NotificationStatus,
    /// Evidence files captured for the notification
    pub evidence_files: usize,
}

impl RunReport {
    pub fn failures(&self) -> u64 {
        failure_count(&self.observations)
    }
}

/// Orchestrates a single monitoring run
pub struct Monitor {
    config: Config,
    prober: Arc<dyn Prober>,
    tracker: IncidentTracker,
    notifier: Box<dyn Notifier>,
    evidence: EvidenceCollector,
}

impl Monitor {
    pub fn new(
        config: Config,
        prober: Arc<dyn Prober>,
        tracker: IncidentTracker,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let evidence = EvidenceCollector::new(
            config.monitor.evidence_dir.clone(),
            config.screenshot.clone(),
        );
        Self {
            config,
            prober,
            tracker,
            notifier,
            evidence,
        }
    }

    /// Build a monitor with the real HTTP prober, file store and mail notifier
    ///
    /// With `dry_run`, or when mail settings are incomplete, notifications
    /// are logged instead of delivered.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError` if the HTTP client cannot be created.
    pub fn from_config(config: Config, dry_run: bool) -> Result<Self, ProbeError> {
        let user_agent = format!("{}/{}", config.monitor.name, env!("CARGO_PKG_VERSION"));
        let prober = Arc::new(HttpProber::new(&user_agent)?);
        let tracker = Self::tracker_for(&config);

        let notifier: Box<dyn Notifier> = if dry_run {
            info!("Dry run: notifications will be logged, not sent");
            Box::new(Self::logging_notifier(&config.mail))
        } else {
            match MailgunNotifier::new(config.mail.clone()) {
                Ok(notifier) => Box::new(notifier),
                Err(e) => {
                    warn!("Mail delivery disabled, notifications will only be logged: {}", e);
                    Box::new(Self::logging_notifier(&config.mail))
                }
            }
        };

        Ok(Self::new(config, prober, tracker, notifier))
    }

    /// Notifier that logs the digest the mail notifier would send
    fn logging_notifier(mail: &MailConfig) -> MockNotifier {
        MockNotifier::new()
            .with_subject(&mail.subject)
            .with_template(load_template(mail.template.as_deref()))
    }

    /// The file-backed tracker described by `config`
    pub fn tracker_for(config: &Config) -> IncidentTracker {
        IncidentTracker::new(
            Box::new(FileStateStore::new(config.monitor.state_file.clone())),
            config.policy,
            config.recipients(),
        )
    }

    /// Probe, decide and notify, reading the clock once probing is done
    pub async fn run_once(&self) -> RunReport {
        let observations = probe_all(Arc::clone(&self.prober), &self.config).await;
        self.process(observations, Utc::now()).await
    }

    /// Probe, decide and notify with an explicit decision time
    pub async fn run_once_at(&self, now: Timestamp) -> RunReport {
        let observations = probe_all(Arc::clone(&self.prober), &self.config).await;
        self.process(observations, now).await
    }

    async fn process(&self, observations: Vec<Observation>, now: Timestamp) -> RunReport {
        let failures = failure_count(&observations);
        info!(
            "{} of {} check(s) failed",
            failures,
            observations.len()
        );

        let outcome = self.tracker.update(&observations, now);

        if !outcome.decision.should_send {
            return RunReport {
                observations,
                outcome,
                notification: NotificationStatus::NotDue,
                evidence_files: 0,
            };
        }

        let artifacts = self.evidence.collect(&observations).await;

        let alert = AlertContext {
            observations: &observations,
            state: &outcome.state,
            decision: &outcome.decision,
            attachments: &artifacts,
            now,
        };

        info!("Sending an alert to {}", outcome.decision.address);
        let notification = match self.notifier.notify(alert).await {
            Ok(receipt) => NotificationStatus::Sent(receipt),
            Err(e) => {
                error!("Failed to deliver alert: {}", e);
                NotificationStatus::Failed(e.to_string())
            }
        };

        let evidence_files = artifacts.len();
        if !self.config.monitor.keep_evidence {
            self.evidence.cleanup(&artifacts);
        }

        RunReport {
            observations,
            outcome,
            notification,
            evidence_files,
        }
    }
}
