//! Resource orchestrator
//!
//! Accepts submissions and drives provisioning, teardown and health rounds.
//! Every operation on a resource holds that resource's lock, and every
//! status change goes through the [`StatusTracker`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::deploy::fsm::{ResourceFsm, ResourceStatus, StatusEvent, TrackerSettings};
use crate::deploy::locks::{ResourceGuard, ResourceLocks};
use crate::deploy::provisioner::{Provisioner, SelectProvisioner};
use crate::deploy::tracker::StatusTracker;
use crate::env::injector::{EffectiveEnv, EnvironmentInjector};
use crate::env::secrets::SecretStore;
use crate::errors::{OrchestratorError, StoreError, TeardownError, ValidationError};
use crate::models::context::RequestContext;
use crate::models::definition::{ProjectDefinition, ResourceDefinition};
use crate::models::project::Project;
use crate::models::resource::Resource;
use crate::models::validate::{validate, validate_project};
use crate::models::view::{ProjectView, ResourceView};
use crate::models::workload::{Health, ProvisionHandle, TeardownReport};
use crate::registry::servers::ServerRegistry;
use crate::registry::target::RemoteTarget;
use crate::storage::store::Store;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Capacity of the submission queue
pub const QUEUE_CAPACITY: usize = 256;

const MAX_HEALTH_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    Deploy,
    Redeploy,
}

/// Work item for the deployer worker
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub resource_id: String,
    pub action: DeployAction,
    pub context: RequestContext,
}

/// Bounded queue between submissions and the deployer worker
pub fn deploy_queue() -> (mpsc::Sender<DeployRequest>, mpsc::Receiver<DeployRequest>) {
    mpsc::channel(QUEUE_CAPACITY)
}

/// Result of one health round for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// Locked, not deployed, or nothing to probe
    Skipped,
    Up,
    /// A probe could not tell; status unchanged
    Inconclusive,
    /// Moved to error
    Down,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    injector: EnvironmentInjector,
    registry: Arc<ServerRegistry>,
    provisioners: Arc<dyn SelectProvisioner>,
    tracker: StatusTracker,
    locks: ResourceLocks,
    settings: TrackerSettings,
    queue: Option<mpsc::Sender<DeployRequest>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        secrets: Arc<dyn SecretStore>,
        registry: Arc<ServerRegistry>,
        provisioners: Arc<dyn SelectProvisioner>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            tracker: StatusTracker::new(store.clone()),
            store,
            injector: EnvironmentInjector::new(secrets),
            registry,
            provisioners,
            locks: ResourceLocks::new(),
            settings,
            queue: None,
        }
    }

    /// Send accepted submissions to a deployer worker.
    ///
    /// Without a queue, callers drive [`deploy`](Self::deploy) themselves.
    pub fn with_queue(mut self, queue: mpsc::Sender<DeployRequest>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn is_busy(&self, resource_id: &str) -> bool {
        self.locks.is_locked(resource_id)
    }

    // --- Submissions and queries

    /// Validate a project, seal its secrets and save it
    pub async fn submit_project(
        &self,
        ctx: &RequestContext,
        definition: &ProjectDefinition,
    ) -> Result<String, OrchestratorError> {
        let mut project = validate_project(definition)?;
        self.injector.seal_project(&mut project).await?;
        self.store.save_project(&project).await?;
        info!(
            request_id = %ctx.request_id,
            actor = ctx.actor(),
            "Created project {} ({})",
            project.id,
            project.name
        );
        Ok(project.id)
    }

    pub async fn project(&self, id: &str) -> Result<ProjectView, OrchestratorError> {
        let project = self.store.load_project(id).await?;
        Ok(ProjectView::from(&project))
    }

    /// Accept a resource definition.
    ///
    /// The resource is saved in created status and queued; its id is
    /// returned before anything is provisioned.
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        definition: &ResourceDefinition,
    ) -> Result<String, OrchestratorError> {
        let mut resource = validate(definition)?;
        match self.store.load_project(&resource.project_id).await {
            Ok(_) => {}
            Err(StoreError::NotFound { .. }) => {
                return Err(ValidationError::new("projectId", "project does not exist").into())
            }
            Err(e) => return Err(e.into()),
        }

        self.injector.seal(&mut resource).await?;
        if let Err(e) = self.tracker.save(&resource).await {
            self.injector.release(&mut resource).await;
            return Err(e);
        }
        self.tracker
            .attach(&resource.project_id, &resource.id)
            .await?;

        info!(
            request_id = %ctx.request_id,
            actor = ctx.actor(),
            "Accepted {} resource {} ({})",
            resource.kind.type_name(),
            resource.id,
            resource.name
        );
        self.enqueue(ctx, &resource.id, DeployAction::Deploy).await?;
        Ok(resource.id)
    }

    pub async fn status(&self, id: &str) -> Result<ResourceView, OrchestratorError> {
        let resource = self.store.load_resource(id).await?;
        Ok(ResourceView::from(&resource))
    }

    pub async fn list(&self) -> Result<Vec<ResourceView>, OrchestratorError> {
        let resources = self.store.list_resources().await?;
        Ok(resources.iter().map(ResourceView::from).collect())
    }

    /// Queue a redeploy for the deployer worker
    pub async fn schedule_redeploy(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<(), OrchestratorError> {
        self.store.load_resource(id).await?;
        if self.locks.is_locked(id) {
            return Err(OrchestratorError::InFlight(id.to_string()));
        }
        if self.queue.is_none() {
            return Err(OrchestratorError::ServerError(
                "deploy queue is not running".to_string(),
            ));
        }
        self.enqueue(ctx, id, DeployAction::Redeploy).await
    }

    /// Queue every resource still waiting for its first deploy
    pub async fn resume_pending(&self, ctx: &RequestContext) -> Result<usize, OrchestratorError> {
        let pending: Vec<String> = self
            .store
            .list_resources()
            .await?
            .into_iter()
            .filter(|r| r.status() == ResourceStatus::Created)
            .map(|r| r.id)
            .collect();
        for id in &pending {
            self.enqueue(ctx, id, DeployAction::Deploy).await?;
        }
        if !pending.is_empty() {
            info!("Queued {} pending resources", pending.len());
        }
        Ok(pending.len())
    }

    async fn enqueue(
        &self,
        ctx: &RequestContext,
        id: &str,
        action: DeployAction,
    ) -> Result<(), OrchestratorError> {
        let Some(queue) = &self.queue else {
            return Ok(());
        };
        let request = DeployRequest {
            resource_id: id.to_string(),
            action,
            context: ctx.clone(),
        };
        queue
            .send(request)
            .await
            .map_err(|_| OrchestratorError::ShutdownError("deploy queue is closed".to_string()))
    }

    // --- Lifecycle operations

    /// First deploy of a created resource
    pub async fn deploy(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<ResourceStatus, OrchestratorError> {
        let guard = self.locks.try_acquire(id)?;
        let resource = self.store.load_resource(id).await?;
        // Anything past created needs an explicit redeploy
        ResourceFsm::from_status(resource.status()).process(StatusEvent::Deploy)?;
        self.provision(ctx, &guard, resource, StatusEvent::Deploy)
            .await
    }

    /// Tear down the current workload, if any, and provision again
    pub async fn redeploy(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<ResourceStatus, OrchestratorError> {
        let guard = self.locks.try_acquire(id)?;
        let mut resource = self.store.load_resource(id).await?;

        if let Some(handle) = resource.handle.clone() {
            info!(
                request_id = %ctx.request_id,
                actor = ctx.actor(),
                "Tearing down workload {} before redeploying {}",
                handle.workload,
                resource.id
            );
            if let Err(e) = self.teardown(&resource, &handle).await {
                self.tracker
                    .note_error(ctx, &mut resource, e.to_string())
                    .await?;
                return Err(e);
            }
            resource.handle = None;
            self.tracker.save(&resource).await?;
        }

        self.provision(ctx, &guard, resource, StatusEvent::Redeploy)
            .await
    }

    /// Tear down a running resource.
    ///
    /// When teardown leaves anything behind the resource stays running with
    /// the error recorded.
    pub async fn stop(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<TeardownReport, OrchestratorError> {
        let _guard = self.locks.try_acquire(id)?;
        let mut resource = self.store.load_resource(id).await?;
        ResourceFsm::from_status(resource.status()).process(StatusEvent::Stop)?;

        let report = match resource.handle.clone() {
            Some(handle) => match self.teardown(&resource, &handle).await {
                Ok(report) => report,
                Err(e) => {
                    self.tracker
                        .note_error(ctx, &mut resource, e.to_string())
                        .await?;
                    return Err(e);
                }
            },
            None => TeardownReport::new(),
        };

        resource.handle = None;
        self.tracker
            .apply(ctx, &mut resource, StatusEvent::Stop)
            .await?;
        Ok(report)
    }

    /// Tear down and forget a resource, releasing its secrets
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<TeardownReport, OrchestratorError> {
        let guard = self.locks.try_acquire(id)?;
        let mut resource = self.store.load_resource(id).await?;

        let report = match resource.handle.clone() {
            Some(handle) => match self.teardown(&resource, &handle).await {
                Ok(report) => report,
                Err(e) => {
                    self.tracker
                        .note_error(ctx, &mut resource, e.to_string())
                        .await?;
                    return Err(e);
                }
            },
            None if resource.status() != ResourceStatus::Created => {
                // Failed provisioning may have left a checkout or image behind
                self.cleanup_planned(&resource).await;
                TeardownReport::new()
            }
            None => TeardownReport::new(),
        };

        self.injector.release(&mut resource).await;
        self.store.delete_resource(id).await?;
        self.tracker.detach(&resource.project_id, id).await?;
        info!(
            request_id = %ctx.request_id,
            actor = ctx.actor(),
            "Deleted resource {} ({})",
            resource.id,
            resource.name
        );
        self.locks.forget(guard);
        Ok(report)
    }

    /// One health round for one resource
    pub async fn check_health(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<HealthOutcome, OrchestratorError> {
        let _guard = match self.locks.try_acquire(id) {
            Ok(guard) => guard,
            Err(OrchestratorError::InFlight(_)) => return Ok(HealthOutcome::Skipped),
            Err(e) => return Err(e),
        };
        let mut resource = self.store.load_resource(id).await?;
        let status = resource.status();
        if !matches!(status, ResourceStatus::Running | ResourceStatus::Deploying) {
            return Ok(HealthOutcome::Skipped);
        }

        let Some(handle) = resource.handle.clone() else {
            if status == ResourceStatus::Deploying {
                // Deploying, unlocked and without a handle: the provision
                // that owned it is gone
                self.tracker
                    .apply(
                        ctx,
                        &mut resource,
                        StatusEvent::TimedOut("provisioning was interrupted".to_string()),
                    )
                    .await?;
                return Ok(HealthOutcome::Down);
            }
            return Ok(HealthOutcome::Skipped);
        };

        let target = match self.registry.select(&resource) {
            Ok((_, target)) => target,
            Err(e) => {
                debug!("Skipping health check of {}: {}", resource.id, e);
                return Ok(HealthOutcome::Inconclusive);
            }
        };
        let provisioner = self.provisioners.for_handle(&handle);

        let attempts = self.settings.health.attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt - 1)).await;
            }
            match self.probe(provisioner.as_ref(), &handle, target.as_ref()).await {
                Health::Up => {
                    if status == ResourceStatus::Deploying {
                        self.tracker
                            .apply(ctx, &mut resource, StatusEvent::Healthy)
                            .await?;
                    }
                    return Ok(HealthOutcome::Up);
                }
                Health::Unknown => return Ok(HealthOutcome::Inconclusive),
                Health::Down => {
                    debug!(
                        "Resource {} reported down ({}/{})",
                        resource.id,
                        attempt + 1,
                        attempts
                    );
                }
            }
        }

        let reason = format!("health check reported down {} times in a row", attempts);
        self.tracker
            .apply(ctx, &mut resource, StatusEvent::Unhealthy(reason))
            .await?;
        Ok(HealthOutcome::Down)
    }

    // --- Internals

    async fn provision(
        &self,
        ctx: &RequestContext,
        _guard: &ResourceGuard,
        mut resource: Resource,
        event: StatusEvent,
    ) -> Result<ResourceStatus, OrchestratorError> {
        let provisioner = self.provisioners.select(&resource);

        // Failures before the transition leave the status untouched
        let (server, target) = match self.registry.select(&resource) {
            Ok(selected) => selected,
            Err(e) => {
                self.tracker
                    .note_error(ctx, &mut resource, e.to_string())
                    .await?;
                return Err(e.into());
            }
        };
        match provisioner.prepare(&mut resource).await {
            Ok(true) => self.tracker.save(&resource).await?,
            Ok(false) => {}
            Err(e) => {
                self.tracker
                    .note_error(ctx, &mut resource, e.to_string())
                    .await?;
                return Err(e.into());
            }
        }
        let env = match self.resolve_env(&resource).await {
            Ok(env) => env,
            Err(e) => {
                self.tracker
                    .note_error(ctx, &mut resource, e.to_string())
                    .await?;
                return Err(e);
            }
        };

        self.tracker.apply(ctx, &mut resource, event).await?;
        info!(
            request_id = %ctx.request_id,
            actor = ctx.actor(),
            "Provisioning {} on {} with the {} provisioner",
            resource.id,
            server.id,
            provisioner.kind().as_str()
        );

        let provision_timeout = self.settings.provision_timeout;
        let outcome = tokio::time::timeout(
            provision_timeout,
            provisioner.provision(&resource, &server, target.as_ref(), &env),
        )
        .await;

        let handle = match outcome {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                let e = e.map_text(|text| env.scrub(text));
                self.tracker
                    .apply(ctx, &mut resource, StatusEvent::ProvisionFailed(e.detail()))
                    .await?;
                return Err(e.into());
            }
            Err(_) => {
                warn!(
                    "Provisioning {} timed out after {:?}, cleaning up",
                    resource.id, provision_timeout
                );
                let planned = provisioner.planned_handle(&resource, &server);
                self.teardown_quietly(provisioner.as_ref(), &planned, target.as_ref())
                    .await;
                let e = OrchestratorError::Timeout {
                    operation: "provisioning",
                    after: provision_timeout,
                };
                self.tracker
                    .apply(ctx, &mut resource, StatusEvent::TimedOut(e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        if handle.adopted {
            info!(
                "Adopted existing workload {} for {}",
                handle.workload, resource.id
            );
        }
        resource.handle = Some(handle.clone());
        self.tracker.save(&resource).await?;

        match self
            .await_first_health(provisioner.as_ref(), &handle, target.as_ref())
            .await
        {
            Health::Up => {
                self.tracker
                    .apply(ctx, &mut resource, StatusEvent::Healthy)
                    .await?;
            }
            last => {
                let reason = format!(
                    "workload did not report up after {} health checks (last: {})",
                    self.settings.health.attempts, last
                );
                self.tracker
                    .apply(ctx, &mut resource, StatusEvent::Unhealthy(reason))
                    .await?;
            }
        }
        Ok(resource.status())
    }

    async fn resolve_env(&self, resource: &Resource) -> Result<EffectiveEnv, OrchestratorError> {
        let project: Project = self.store.load_project(&resource.project_id).await?;
        Ok(self.injector.resolve(&project, resource).await?)
    }

    /// Values to scrub from teardown output; empty when they cannot be resolved
    async fn scrub_env(&self, resource: &Resource) -> EffectiveEnv {
        self.resolve_env(resource)
            .await
            .unwrap_or_else(|_| EffectiveEnv::empty())
    }

    async fn teardown(
        &self,
        resource: &Resource,
        handle: &ProvisionHandle,
    ) -> Result<TeardownReport, OrchestratorError> {
        let (_, target) = self.registry.select(resource)?;
        let provisioner = self.provisioners.for_handle(handle);
        let timeout = self.settings.teardown_timeout;

        match tokio::time::timeout(timeout, provisioner.teardown(handle, target.as_ref())).await {
            Ok(Ok(report)) => {
                info!("Tore down {} of {}: {}", handle.workload, resource.id, report);
                Ok(report)
            }
            Ok(Err(e)) => {
                let env = self.scrub_env(resource).await;
                Err(TeardownError {
                    report: e.report.map_reasons(|reason| env.scrub(reason)),
                }
                .into())
            }
            Err(_) => Err(OrchestratorError::Timeout {
                operation: "teardown",
                after: timeout,
            }),
        }
    }

    /// Best-effort removal of whatever a provision of `resource` creates
    async fn cleanup_planned(&self, resource: &Resource) {
        match self.registry.select(resource) {
            Ok((server, target)) => {
                let provisioner = self.provisioners.select(resource);
                let planned = provisioner.planned_handle(resource, &server);
                self.teardown_quietly(provisioner.as_ref(), &planned, target.as_ref())
                    .await;
            }
            Err(e) => warn!("Skipping cleanup of {}: {}", resource.id, e),
        }
    }

    async fn teardown_quietly(
        &self,
        provisioner: &dyn Provisioner,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
    ) {
        let timeout = self.settings.teardown_timeout;
        match tokio::time::timeout(timeout, provisioner.teardown(handle, target)).await {
            Ok(Ok(_)) => debug!("Cleaned up {}", handle.workload),
            Ok(Err(e)) => warn!("Cleanup of {} incomplete: {}", handle.workload, e),
            Err(_) => warn!("Cleanup of {} timed out after {:?}", handle.workload, timeout),
        }
    }

    /// Probe until Up or the retry budget is spent; Unknown uses up an attempt
    async fn await_first_health(
        &self,
        provisioner: &dyn Provisioner,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
    ) -> Health {
        let mut last = Health::Unknown;
        for attempt in 0..self.settings.health.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt - 1)).await;
            }
            last = self.probe(provisioner, handle, target).await;
            debug!(
                "Health of {} is {} (attempt {}/{})",
                handle.workload,
                last,
                attempt + 1,
                self.settings.health.attempts
            );
            if last == Health::Up {
                break;
            }
        }
        last
    }

    async fn probe(
        &self,
        provisioner: &dyn Provisioner,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
    ) -> Health {
        let timeout = self.settings.health.probe_timeout;
        tokio::time::timeout(timeout, provisioner.health_check(handle, target, timeout))
            .await
            .unwrap_or(Health::Unknown)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let options = CooldownOptions {
            base_delay: self.settings.health.base_delay,
            max_delay: MAX_HEALTH_BACKOFF,
            multiplier: 2.0,
        };
        calc_exp_backoff(&options, attempt)
    }
}
