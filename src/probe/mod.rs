/// Endpoint probing
pub mod http;
pub mod mock;

pub use http::HttpProber;
pub use mock::MockProber;

use crate::config::{Config, EndpointSpec, SiteConfig};
use crate::observation::Observation;
use chrono::Utc;
use log::{error, info};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Trait for endpoint checkers
///
/// Implementations never fail: every network problem is reported as an
/// unreachable `Observation`, and a check never outlives the endpoint's
/// timeout.
pub trait Prober: Send + Sync {
    fn check<'a>(
        &'a self,
        site: &'a SiteConfig,
        endpoint: &'a EndpointSpec,
    ) -> Pin<Box<dyn Future<Output = Observation> + Send + 'a>>;
}

/// Probe every endpoint of every enabled site
///
/// Each probe owns one slot of the result, so the returned observations are
/// in configuration order however the probes complete. Probes run as
/// separate tokio tasks when `monitor.concurrent` is set and one after
/// another otherwise.
///
/// # Arguments
///
/// * `prober` - Checker shared by all probe tasks
/// * `config` - Configuration listing the sites and endpoints to check
///
/// # Returns
///
/// One observation per endpoint of every site with `check = true`. A probe
/// task that panics is reported as an unreachable observation.
pub async fn probe_all(prober: Arc<dyn Prober>, config: &Config) -> Vec<Observation> {
    let targets: Vec<(SiteConfig, EndpointSpec)> = config
        .active_sites()
        .flat_map(|site| {
            site.endpoints
                .iter()
                .map(move |endpoint| (site.clone(), endpoint.clone()))
        })
        .collect();

    info!("Probing {} endpoint(s)", targets.len());

    if !config.monitor.concurrent {
        let mut observations = Vec::with_capacity(targets.len());
        for (site, endpoint) in &targets {
            observations.push(prober.check(site, endpoint).await);
        }
        return observations;
    }

    let handles: Vec<_> = targets
        .iter()
        .cloned()
        .map(|(site, endpoint)| {
            let prober = Arc::clone(&prober);
            tokio::spawn(async move { prober.check(&site, &endpoint).await })
        })
        .collect();

    let mut observations = Vec::with_capacity(handles.len());
    for (handle, (site, endpoint)) in handles.into_iter().zip(targets.iter()) {
        match handle.await {
            Ok(observation) => observations.push(observation),
            Err(e) => {
                error!(
                    "Probe task for {}{} failed: {}",
                    site.host, endpoint.path, e
                );
                observations.push(Observation::unreachable(
                    &site.host,
                    &endpoint.path,
                    &site.url(endpoint),
                    endpoint.status,
                    format!("probe task failed: {}", e),
                    Utc::now(),
                ));
            }
        }
    }

    observations
}
