//! Deployer worker draining the submission queue

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::deploy::executor::{DeployAction, DeployRequest, Orchestrator};
use crate::errors::OrchestratorError;

/// Run the deployer worker.
///
/// Each request runs as its own task so resources provision in parallel;
/// the per-resource lock rejects a second request for a busy resource.
pub async fn run(
    orchestrator: Arc<Orchestrator>,
    mut queue: mpsc::Receiver<DeployRequest>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Deployer worker starting...");
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployer worker shutting down...");
                break;
            }
            request = queue.recv() => {
                let Some(request) = request else {
                    info!("Deploy queue closed");
                    break;
                };
                let orchestrator = orchestrator.clone();
                tasks.spawn(async move { execute(orchestrator.as_ref(), request).await });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("Deploy task panicked: {}", e);
                }
            }
        }
    }

    if !tasks.is_empty() {
        info!("Waiting for {} deploy tasks to finish...", tasks.len());
    }
    while tasks.join_next().await.is_some() {}
}

async fn execute(orchestrator: &Orchestrator, request: DeployRequest) {
    let DeployRequest {
        resource_id,
        action,
        context,
    } = request;
    debug!("Handling {:?} of {} for {}", action, resource_id, context);

    let result = match action {
        DeployAction::Deploy => orchestrator.deploy(&context, &resource_id).await,
        DeployAction::Redeploy => orchestrator.redeploy(&context, &resource_id).await,
    };

    match result {
        Ok(status) => info!(
            request_id = %context.request_id,
            "Resource {} settled in {}",
            resource_id,
            status
        ),
        Err(OrchestratorError::InFlight(id)) => {
            warn!("Resource {} is busy, dropping {:?} request", id, action)
        }
        Err(e) => error!(
            request_id = %context.request_id,
            "{:?} of {} failed: {}",
            action,
            resource_id,
            e
        ),
    }
}
