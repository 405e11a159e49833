use crate::config::{EndpointSpec, SiteConfig};
use crate::observation::Observation;
use crate::probe::http::{HttpProber, HttpResponse};
use crate::probe::Prober;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted behaviour for one URL
#[derive(Debug, Clone)]
enum Scripted {
    Status(u16),
    Body(u16, String),
    Unreachable(String),
}

/// Mock prober for tests and dry runs without network access
///
/// URLs without a script answer with the expected status and an empty body.
#[derive(Debug, Clone, Default)]
pub struct MockProber {
    scripts: HashMap<String, Scripted>,
    delays: HashMap<String, Duration>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with the given status and an empty body
    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.scripts.insert(url.to_string(), Scripted::Status(status));
        self
    }

    /// Answer `url` with the given status and body
    pub fn with_body(mut self, url: &str, status: u16, body: &str) -> Self {
        self.scripts
            .insert(url.to_string(), Scripted::Body(status, body.to_string()));
        self
    }

    /// Report `url` as unreachable
    pub fn unreachable(mut self, url: &str, detail: &str) -> Self {
        self.scripts
            .insert(url.to_string(), Scripted::Unreachable(detail.to_string()));
        self
    }

    /// Delay the answer for `url`
    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// Number of checks performed so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    /// URLs checked so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

impl Prober for MockProber {
    fn check<'a>(
        &'a self,
        site: &'a SiteConfig,
        endpoint: &'a EndpointSpec,
    ) -> Pin<Box<dyn Future<Output = Observation> + Send + 'a>> {
        Box::pin(async move {
            let url = site.url(endpoint);
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(url.clone());
            }

            if let Some(delay) = self.delays.get(&url) {
                tokio::time::sleep(*delay).await;
            }

            let now = Utc::now();
            let (status, body) = match self.scripts.get(&url) {
                None => (endpoint.status, String::new()),
                Some(Scripted::Status(status)) => (*status, String::new()),
                Some(Scripted::Body(status, body)) => (*status, body.clone()),
                Some(Scripted::Unreachable(detail)) => {
                    return Observation::unreachable(
                        &site.host,
                        &endpoint.path,
                        &url,
                        endpoint.status,
                        detail.clone(),
                        now,
                    );
                }
            };

            let mut headers = BTreeMap::new();
            headers.insert("x-mock".to_string(), "true".to_string());

            HttpProber::evaluate(
                site,
                endpoint,
                HttpResponse {
                    status,
                    headers,
                    body,
                },
                now,
            )
        })
    }
}
