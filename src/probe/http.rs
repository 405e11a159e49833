use crate::config::{EndpointSpec, SiteConfig};
use crate::error::ProbeError;
use crate::observation::{EvidenceKey, FailureReason, Observation, Timestamp};
use crate::probe::Prober;
use chrono::Utc;
use log::{info, warn};
use reqwest::Client;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// What came back from a successful HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Prober issuing real HTTP GET requests
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    /// Create a prober identifying itself with the given user agent
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::Transport` if the HTTP client cannot be built
    /// (e.g. TLS backend initialisation failure).
    pub fn new(user_agent: &str) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| ProbeError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Use a preconfigured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// GET a URL, bounding the whole exchange (connect, headers, body) by `timeout`
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<HttpResponse, ProbeError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;

        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout.as_secs())
            } else {
                ProbeError::Body(error_chain(&e))
            }
        })?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    /// Compare a response against the endpoint's expectations
    ///
    /// A status mismatch takes precedence over a content mismatch; when both
    /// fail the content result is kept in the detail text.
    pub fn evaluate(
        site: &SiteConfig,
        endpoint: &EndpointSpec,
        response: HttpResponse,
        observed_at: Timestamp,
    ) -> Observation {
        let url = site.url(endpoint);
        let status_ok = response.status == endpoint.status;
        let missing_content = endpoint
            .content_match()
            .filter(|needle| !response.body.contains(needle));

        let (reason, detail) = match (status_ok, missing_content) {
            (true, None) => {
                return Observation::passed(
                    &site.host,
                    &endpoint.path,
                    &url,
                    response.status,
                    observed_at,
                );
            }
            (false, missing) => {
                let mut detail = format!(
                    "Expected status {}, received {}",
                    endpoint.status, response.status
                );
                if let Some(needle) = missing {
                    detail.push_str(&format!("; response text does not contain '{}'", needle));
                }
                (FailureReason::StatusMismatch, detail)
            }
            (true, Some(needle)) => (
                FailureReason::ContentMismatch,
                format!("Response text does not contain '{}'", needle),
            ),
        };

        Observation {
            site: site.host.clone(),
            path: endpoint.path.clone(),
            url,
            expected_status: endpoint.status,
            received_status: response.status,
            reason,
            detail: Some(detail),
            body: Some(response.body),
            headers: Some(response.headers),
            evidence_key: EvidenceKey::new(&site.host, &endpoint.path, observed_at),
            observed_at,
        }
    }
}

impl Prober for HttpProber {
    fn check<'a>(
        &'a self,
        site: &'a SiteConfig,
        endpoint: &'a EndpointSpec,
    ) -> Pin<Box<dyn Future<Output = Observation> + Send + 'a>> {
        Box::pin(async move {
            let url = site.url(endpoint);
            info!(
                "Checking {} for a status code {}",
                url, endpoint.status
            );

            let timeout = Duration::from_secs(endpoint.timeout_seconds);
            match self.fetch(&url, timeout).await {
                Ok(response) => {
                    let observation = Self::evaluate(site, endpoint, response, Utc::now());
                    if let Some(detail) = &observation.detail {
                        warn!("{}: {}", url, detail);
                    }
                    observation
                }
                Err(e) => {
                    warn!("{} seems to be unreachable: {}", url, e);
                    Observation::unreachable(
                        &site.host,
                        &endpoint.path,
                        &url,
                        endpoint.status,
                        e.to_string(),
                        Utc::now(),
                    )
                }
            }
        })
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> ProbeError {
    if error.is_timeout() {
        ProbeError::Timeout(timeout.as_secs())
    } else {
        ProbeError::Transport(error_chain(&error))
    }
}

/// reqwest's top-level message rarely names the cause; include the sources
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
