//! Failure evidence capture
//!
//! For every failing observation the collector stores the raw response body,
//! the response headers and, when enabled, a screenshot taken by an external
//! headless browser. All files are named after the observation's evidence key.
//! Capture is best-effort: failures are logged and the artifact is skipped.

use crate::config::ScreenshotConfig;
use crate::error::EvidenceError;
use crate::observation::{EvidenceKey, Observation};
use log::{debug, info, warn};
use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// What an artifact file contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Body,
    Headers,
    Screenshot,
}

impl ArtifactKind {
    fn suffix(&self) -> &'static str {
        match self {
            ArtifactKind::Body => "body.html",
            ArtifactKind::Headers => "headers.txt",
            ArtifactKind::Screenshot => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Body => "text/html",
            ArtifactKind::Headers => "text/plain",
            ArtifactKind::Screenshot => "image/png",
        }
    }
}

/// A stored piece of evidence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: EvidenceKey,
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.{}", self.key, self.kind.suffix()))
    }
}

/// Captures and cleans up evidence files in a scratch directory
#[derive(Debug, Clone)]
pub struct EvidenceCollector {
    dir: PathBuf,
    screenshot: ScreenshotConfig,
}

impl EvidenceCollector {
    pub fn new(dir: impl Into<PathBuf>, screenshot: ScreenshotConfig) -> Self {
        Self {
            dir: dir.into(),
            screenshot,
        }
    }

    fn path_for(&self, key: &EvidenceKey, kind: ArtifactKind) -> PathBuf {
        self.dir.join(format!("{}.{}", key, kind.suffix()))
    }

    /// Capture evidence for every failing observation
    ///
    /// Passing observations are skipped. Each failing observation yields a
    /// body dump and a header dump when the response carried them, plus a
    /// screenshot when screenshots are enabled.
    ///
    /// # Arguments
    ///
    /// * `observations` - All observations of the current run
    ///
    /// # Returns
    ///
    /// The artifacts that were written, in observation order. Artifacts that
    /// could not be captured are logged and left out.
    pub async fn collect(&self, observations: &[Observation]) -> Vec<Artifact> {
        let mut artifacts = Vec::new();
        for observation in observations.iter().filter(|o| o.is_failure()) {
            artifacts.extend(self.capture_evidence(observation).await);
        }

        if !artifacts.is_empty() {
            info!(
                "Captured {} evidence file(s) in {}",
                artifacts.len(),
                self.dir.display()
            );
        }
        artifacts
    }

    /// Capture whatever evidence is available for one observation
    pub async fn capture_evidence(&self, observation: &Observation) -> Vec<Artifact> {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!(
                "Cannot create evidence directory {}: {}",
                self.dir.display(),
                e
            );
            return Vec::new();
        }

        let key = &observation.evidence_key;
        let mut artifacts = Vec::new();

        if let Some(body) = &observation.body {
            match self.write_artifact(key, ArtifactKind::Body, body.as_bytes()) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => warn!("Failed to store response body for {}: {}", key, e),
            }
        }

        if let Some(headers) = &observation.headers {
            let mut text = format!("GET {}\nHTTP {}\n", observation.url, observation.received_status);
            for (name, value) in headers {
                text.push_str(&format!("{}: {}\n", name, value));
            }
            match self.write_artifact(key, ArtifactKind::Headers, text.as_bytes()) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => warn!("Failed to store response headers for {}: {}", key, e),
            }
        }

        if self.screenshot.enabled {
            match self.capture_screenshot(key, &observation.url).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => warn!("Failed to capture screenshot for {}: {}", observation.url, e),
            }
        }

        artifacts
    }

    fn write_artifact(
        &self,
        key: &EvidenceKey,
        kind: ArtifactKind,
        contents: &[u8],
    ) -> Result<Artifact, EvidenceError> {
        let path = self.path_for(key, kind);
        fs::write(&path, contents)?;
        debug!("Wrote {}", path.display());
        Ok(Artifact {
            key: key.clone(),
            kind,
            path,
        })
    }

    /// Run the configured screenshot command against `url`
    pub async fn capture_screenshot(
        &self,
        key: &EvidenceKey,
        url: &str,
    ) -> Result<Artifact, EvidenceError> {
        let output = self.path_for(key, ArtifactKind::Screenshot);
        let output_str = output.to_string_lossy();
        let args: Vec<String> = self
            .screenshot
            .args
            .iter()
            .map(|arg| arg.replace("{url}", url).replace("{output}", &output_str))
            .collect();

        debug!("Running {} {:?}", self.screenshot.command, args);

        let child = Command::new(&self.screenshot.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EvidenceError::ScreenshotFailed(format!(
                    "failed to start '{}': {}",
                    self.screenshot.command, e
                ))
            })?;

        let timeout = Duration::from_secs(self.screenshot.timeout_seconds);
        let result = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| EvidenceError::ScreenshotTimeout(self.screenshot.timeout_seconds))??;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(EvidenceError::ScreenshotFailed(format!(
                "'{}' exited with {}: {}",
                self.screenshot.command,
                result.status,
                stderr.trim()
            )));
        }

        if !output.exists() {
            return Err(EvidenceError::ScreenshotFailed(format!(
                "'{}' did not produce {}",
                self.screenshot.command,
                output.display()
            )));
        }

        Ok(Artifact {
            key: key.clone(),
            kind: ArtifactKind::Screenshot,
            path: output,
        })
    }

    /// Delete artifacts, returning how many were removed
    pub fn cleanup(&self, artifacts: &[Artifact]) -> usize {
        let mut removed = 0;
        for artifact in artifacts {
            match fs::remove_file(&artifact.path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "Failed to remove evidence file {}: {}",
                    artifact.path.display(),
                    e
                ),
            }
        }
        debug!("Removed {} evidence file(s)", removed);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{FailureReason, Timestamp};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn at() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn failing_with_body() -> Observation {
        let mut headers = BTreeMap::new();
        headers.insert("server".to_string(), "nginx".to_string());
        Observation {
            site: "example.com".to_string(),
            path: "/".to_string(),
            url: "https://example.com/".to_string(),
            expected_status: 200,
            received_status: 502,
            reason: FailureReason::StatusMismatch,
            detail: Some("Expected status 200, received 502".to_string()),
            body: Some("<h1>Bad Gateway</h1>".to_string()),
            headers: Some(headers),
            evidence_key: EvidenceKey::new("example.com", "/", at()),
            observed_at: at(),
        }
    }

    fn no_screenshots() -> ScreenshotConfig {
        ScreenshotConfig {
            enabled: false,
            ..ScreenshotConfig::default()
        }
    }

    #[tokio::test]
    async fn test_collect_writes_body_and_headers() {
        let dir = TempDir::new().unwrap();
        let collector = EvidenceCollector::new(dir.path().join("evidence"), no_screenshots());
        let passing = Observation::passed("example.com", "/ok", "https://example.com/ok", 200, at());

        let artifacts = collector.collect(&[failing_with_body(), passing]).await;

        assert_eq!(artifacts.len(), 2);
        let body = fs::read_to_string(&artifacts[0].path).unwrap();
        assert_eq!(body, "<h1>Bad Gateway</h1>");
        let headers = fs::read_to_string(&artifacts[1].path).unwrap();
        assert!(headers.contains("HTTP 502"));
        assert!(headers.contains("server: nginx"));
        assert!(artifacts[0].file_name().ends_with(".body.html"));
    }

    #[tokio::test]
    async fn test_similar_paths_in_same_instant_keep_separate_evidence() {
        let dir = TempDir::new().unwrap();
        let collector = EvidenceCollector::new(dir.path(), no_screenshots());

        let mut first = failing_with_body();
        first.path = "/api/v1".to_string();
        first.body = Some("BODY-A".to_string());
        first.evidence_key = EvidenceKey::new("example.com", "/api/v1", at());
        let mut second = failing_with_body();
        second.path = "/api?v1".to_string();
        second.body = Some("BODY-B".to_string());
        second.evidence_key = EvidenceKey::new("example.com", "/api?v1", at());

        let artifacts = collector.collect(&[first, second]).await;

        assert_eq!(artifacts.len(), 4);
        let distinct: std::collections::HashSet<&PathBuf> =
            artifacts.iter().map(|a| &a.path).collect();
        assert_eq!(distinct.len(), 4);
        assert_eq!(fs::read_to_string(&artifacts[0].path).unwrap(), "BODY-A");
        assert_eq!(fs::read_to_string(&artifacts[2].path).unwrap(), "BODY-B");
    }

    #[tokio::test]
    async fn test_unreachable_has_no_body_artifacts() {
        let dir = TempDir::new().unwrap();
        let collector = EvidenceCollector::new(dir.path(), no_screenshots());
        let obs = Observation::unreachable("example.com", "/", "https://example.com/", 200, "dns", at());

        assert!(collector.capture_evidence(&obs).await.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_files() {
        let dir = TempDir::new().unwrap();
        let collector = EvidenceCollector::new(dir.path(), no_screenshots());
        let artifacts = collector.collect(&[failing_with_body()]).await;

        assert_eq!(collector.cleanup(&artifacts), 2);
        assert!(artifacts.iter().all(|a| !a.path.exists()));
        // Already gone, nothing to do
        assert_eq!(collector.cleanup(&artifacts), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_screenshot_command_placeholders() {
        let dir = TempDir::new().unwrap();
        let screenshot = ScreenshotConfig {
            enabled: true,
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "printf '%s' \"$0\" > \"$1\"".to_string(),
                "{url}".to_string(),
                "{output}".to_string(),
            ],
            timeout_seconds: 5,
        };
        let collector = EvidenceCollector::new(dir.path(), screenshot);
        let key = EvidenceKey::new("example.com", "/", at());

        let artifact = collector
            .capture_screenshot(&key, "https://example.com/")
            .await
            .unwrap();

        assert_eq!(artifact.kind, ArtifactKind::Screenshot);
        assert_eq!(fs::read_to_string(&artifact.path).unwrap(), "https://example.com/");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_screenshot_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let screenshot = ScreenshotConfig {
            enabled: true,
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            timeout_seconds: 5,
        };
        let collector = EvidenceCollector::new(dir.path(), screenshot);
        let key = EvidenceKey::new("example.com", "/", at());

        let result = collector.capture_screenshot(&key, "https://example.com/").await;
        match result {
            Err(EvidenceError::ScreenshotFailed(message)) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {:?}", other),
        }

        // Best-effort: the body and headers are still captured
        let artifacts = collector.capture_evidence(&failing_with_body()).await;
        assert_eq!(artifacts.len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_screenshot_timeout() {
        let dir = TempDir::new().unwrap();
        let screenshot = ScreenshotConfig {
            enabled: true,
            command: "sleep".to_string(),
            args: vec!["10".to_string()],
            timeout_seconds: 1,
        };
        let collector = EvidenceCollector::new(dir.path(), screenshot);
        let key = EvidenceKey::new("example.com", "/", at());

        let result = collector.capture_screenshot(&key, "https://example.com/").await;
        assert!(matches!(result, Err(EvidenceError::ScreenshotTimeout(1))));
    }

    #[tokio::test]
    async fn test_missing_screenshot_binary() {
        let dir = TempDir::new().unwrap();
        let screenshot = ScreenshotConfig {
            enabled: true,
            command: "/nonexistent/headless-browser".to_string(),
            ..ScreenshotConfig::default()
        };
        let collector = EvidenceCollector::new(dir.path(), screenshot);
        let key = EvidenceKey::new("example.com", "/", at());

        let result = collector.capture_screenshot(&key, "https://example.com/").await;
        assert!(matches!(result, Err(EvidenceError::ScreenshotFailed(_))));
    }
}
