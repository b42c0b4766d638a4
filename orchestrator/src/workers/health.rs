//! Health worker running periodic health rounds

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::deploy::executor::{HealthOutcome, Orchestrator};
use crate::deploy::fsm::ResourceStatus;
use crate::models::context::RequestContext;
use crate::utils::jitter;

/// Health worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between rounds
    pub interval: Duration,

    /// Upper bound of the random delay before each probe
    pub jitter: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            jitter: Duration::from_secs(5),
        }
    }
}

/// Run the health worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: Arc<Orchestrator>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Health worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health worker shutting down...");
                return;
            }
            _ = round(options, orchestrator.as_ref()) => {}
        }
    }
}

/// Probe every deployed resource once, in parallel
pub async fn round(options: &Options, orchestrator: &Orchestrator) {
    orchestrator.registry().refresh_reachability().await;

    let resources = match orchestrator.store().list_resources().await {
        Ok(resources) => resources,
        Err(e) => {
            error!("Failed to list resources for health round: {}", e);
            return;
        }
    };

    let ids: Vec<String> = resources
        .into_iter()
        .filter(|r| matches!(r.status(), ResourceStatus::Running | ResourceStatus::Deploying))
        .map(|r| r.id)
        .collect();
    debug!("Health round over {} resources", ids.len());

    let checks = ids.iter().map(|id| async move {
        tokio::time::sleep(jitter(options.jitter)).await;
        let ctx = RequestContext::system();
        match orchestrator.check_health(&ctx, id).await {
            Ok(HealthOutcome::Down) => warn!("Resource {} is down", id),
            Ok(outcome) => debug!("Resource {}: {:?}", id, outcome),
            Err(e) => error!("Health check of {} failed: {}", id, e),
        }
    });
    join_all(checks).await;
}
