//! Provisioning strategies

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::deploy::compose::ComposeProvisioner;
use crate::deploy::database::DatabaseProvisioner;
use crate::deploy::dockerfile::DockerfileProvisioner;
use crate::deploy::git::GitServiceProvisioner;
use crate::deploy::image::ImageProvisioner;
use crate::env::injector::EffectiveEnv;
use crate::env::secrets::SecretStore;
use crate::errors::{ProvisionError, TeardownError};
use crate::models::resource::{Resource, ResourceKind, ServiceEngine, ServiceSource, ServiceSpec};
use crate::models::server::Server;
use crate::models::workload::{Health, ProvisionHandle, ProvisionerKind, TeardownReport};
use crate::registry::target::RemoteTarget;

/// Provisioner settings
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    /// Directory on targets holding checkouts, compose files and env files
    pub build_dir: String,

    /// Bytes of build output kept on a failed build
    pub build_log_limit: usize,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            build_dir: "/var/lib/orchestrator/builds".to_string(),
            build_log_limit: 16 * 1024,
        }
    }
}

impl ProvisionSettings {
    /// Working directory of a resource on its target
    pub fn work_dir(&self, resource_id: &str) -> String {
        format!(
            "{}/{}",
            self.build_dir.trim_end_matches('/'),
            crate::deploy::docker::workload_name(resource_id)
        )
    }

    /// Env file path of a resource on its target, outside the build context
    pub fn env_file(&self, resource_id: &str) -> String {
        format!(
            "{}/.{}.env",
            self.build_dir.trim_end_matches('/'),
            crate::deploy::docker::workload_name(resource_id)
        )
    }
}

/// Turns a resource into a running workload on a target and removes it again.
///
/// Provisioning is idempotent: running it again for an unchanged definition
/// converges on the same workload instead of creating a second one.
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn kind(&self) -> ProvisionerKind;

    /// Fill in generated values before provisioning.
    ///
    /// Returns true when the resource changed and must be saved.
    async fn prepare(&self, _resource: &mut Resource) -> Result<bool, ProvisionError> {
        Ok(false)
    }

    async fn provision(
        &self,
        resource: &Resource,
        server: &Server,
        target: &dyn RemoteTarget,
        env: &EffectiveEnv,
    ) -> Result<ProvisionHandle, ProvisionError>;

    /// Remove every sub-resource of the workload, best effort.
    ///
    /// Anything left behind turns the report into a [`TeardownError`].
    async fn teardown(
        &self,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
    ) -> Result<TeardownReport, TeardownError>;

    async fn health_check(
        &self,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
        timeout: Duration,
    ) -> Health;

    /// The handle a provision of `resource` creates, used to clean up after
    /// a provision that was cancelled before it returned one
    fn planned_handle(&self, resource: &Resource, server: &Server) -> ProvisionHandle;
}

/// Base handle every provisioner starts from
pub fn base_handle(
    kind: ProvisionerKind,
    resource: &Resource,
    server: &Server,
) -> ProvisionHandle {
    ProvisionHandle {
        resource_id: resource.id.clone(),
        provisioner: kind,
        workload: crate::deploy::docker::workload_name(&resource.id),
        volume: None,
        work_dir: None,
        image: None,
        endpoint: endpoint(resource, server),
        fingerprint: resource.definition_fingerprint(),
        adopted: false,
        created_at: Utc::now(),
    }
}

/// Fail when any sub-resource was retained
pub fn conclude(report: TeardownReport) -> Result<TeardownReport, TeardownError> {
    if report.is_complete() {
        Ok(report)
    } else {
        Err(TeardownError { report })
    }
}

/// HTTP endpoint probed for a resource publishing a port
pub fn endpoint(resource: &Resource, server: &Server) -> Option<String> {
    let port = resource.port?;
    if let ResourceKind::Database(_) = resource.kind {
        return None;
    }
    let path = resource.health_path.as_deref().unwrap_or("/");
    Some(format!("http://{}:{}{}", server.host, port, path))
}

/// Picks the provisioner for a resource
pub trait SelectProvisioner: Send + Sync {
    fn select(&self, resource: &Resource) -> Arc<dyn Provisioner>;

    /// Provisioner owning an existing workload
    fn for_handle(&self, handle: &ProvisionHandle) -> Arc<dyn Provisioner>;
}

/// Provisioner factory
pub struct ProvisionerFactory {
    database: Arc<dyn Provisioner>,
    git_service: Arc<dyn Provisioner>,
    dockerfile: Arc<dyn Provisioner>,
    compose: Arc<dyn Provisioner>,
    image: Arc<dyn Provisioner>,
}

impl ProvisionerFactory {
    pub fn new(settings: ProvisionSettings, secrets: Arc<dyn SecretStore>) -> Self {
        let dockerfile = DockerfileProvisioner::new(settings.clone());
        Self {
            database: Arc::new(DatabaseProvisioner::new(settings.clone(), secrets)),
            git_service: Arc::new(GitServiceProvisioner::new(dockerfile.clone())),
            dockerfile: Arc::new(dockerfile),
            compose: Arc::new(ComposeProvisioner::new(settings.clone())),
            image: Arc::new(ImageProvisioner::new(settings)),
        }
    }

    fn by_kind(&self, kind: ProvisionerKind) -> Arc<dyn Provisioner> {
        match kind {
            ProvisionerKind::Database => self.database.clone(),
            ProvisionerKind::GitService => self.git_service.clone(),
            ProvisionerKind::Dockerfile => self.dockerfile.clone(),
            ProvisionerKind::Compose => self.compose.clone(),
            ProvisionerKind::Image => self.image.clone(),
        }
    }
}

/// Provisioner kind for a resource
pub fn provisioner_kind(resource: &Resource) -> ProvisionerKind {
    match &resource.kind {
        ResourceKind::Database(_) => ProvisionerKind::Database,
        ResourceKind::Service(ServiceSpec { source, engine }) => match source {
            ServiceSource::Compose { .. } => ProvisionerKind::Compose,
            ServiceSource::Image { .. } => ProvisionerKind::Image,
            // Docker services bring their own Dockerfile
            ServiceSource::Repository(_) if *engine == ServiceEngine::Docker => {
                ProvisionerKind::Dockerfile
            }
            ServiceSource::Repository(_) => ProvisionerKind::GitService,
        },
        ResourceKind::Website(_)
        | ResourceKind::Github(_)
        | ResourceKind::Gitlab(_)
        | ResourceKind::Bitbucket(_) => ProvisionerKind::GitService,
    }
}

impl SelectProvisioner for ProvisionerFactory {
    fn select(&self, resource: &Resource) -> Arc<dyn Provisioner> {
        self.by_kind(provisioner_kind(resource))
    }

    fn for_handle(&self, handle: &ProvisionHandle) -> Arc<dyn Provisioner> {
        self.by_kind(handle.provisioner)
    }
}
