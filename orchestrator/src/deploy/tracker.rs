//! Status tracker, the only writer of resource and project status

use std::sync::Arc;

use tracing::{info, warn};

use crate::deploy::fsm::{ResourceFsm, StatusEvent, Transition};
use crate::errors::{OrchestratorError, StoreError};
use crate::models::context::RequestContext;
use crate::models::resource::Resource;
use crate::storage::store::{project_resources, Store};

#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn Store>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Run `event` through the FSM, persist the resource and refresh its
    /// project. An invalid transition leaves everything untouched.
    pub async fn apply(
        &self,
        ctx: &RequestContext,
        resource: &mut Resource,
        event: StatusEvent,
    ) -> Result<Transition, OrchestratorError> {
        let mut fsm = ResourceFsm::from_status(resource.status());
        let transition = fsm.process(event)?;
        resource.apply(&transition);
        self.store.save_resource(resource).await?;

        info!(
            request_id = %ctx.request_id,
            actor = ctx.actor(),
            "Resource {} {} -> {} ({})",
            resource.id,
            transition.from(),
            transition.to(),
            transition.event()
        );
        self.refresh_project(&resource.project_id).await?;
        Ok(transition)
    }

    /// Record an error without changing status
    pub async fn note_error(
        &self,
        ctx: &RequestContext,
        resource: &mut Resource,
        message: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        let message = message.into();
        warn!(
            request_id = %ctx.request_id,
            actor = ctx.actor(),
            "Resource {} ({}): {}",
            resource.id,
            resource.status(),
            message
        );
        resource.record_error(message);
        self.store.save_resource(resource).await?;
        Ok(())
    }

    /// Persist non-status changes of a resource
    pub async fn save(&self, resource: &Resource) -> Result<(), OrchestratorError> {
        self.store.save_resource(resource).await?;
        Ok(())
    }

    pub async fn attach(&self, project_id: &str, resource_id: &str) -> Result<(), OrchestratorError> {
        let mut project = self.store.load_project(project_id).await?;
        project.attach(resource_id);
        self.store.save_project(&project).await?;
        self.refresh_project(project_id).await
    }

    pub async fn detach(&self, project_id: &str, resource_id: &str) -> Result<(), OrchestratorError> {
        let mut project = match self.store.load_project(project_id).await {
            Ok(project) => project,
            Err(StoreError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        project.detach(resource_id);
        self.store.save_project(&project).await?;
        self.refresh_project(project_id).await
    }

    /// Recompute a project's aggregate status from its resources
    pub async fn refresh_project(&self, project_id: &str) -> Result<(), OrchestratorError> {
        let mut project = match self.store.load_project(project_id).await {
            Ok(project) => project,
            Err(StoreError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let resources = project_resources(self.store.as_ref(), project_id).await?;
        if project.refresh_status(resources.iter().map(|r| r.status())) {
            info!("Project {} is now {}", project.id, project.status());
            self.store.save_project(&project).await?;
        }
        Ok(())
    }
}
