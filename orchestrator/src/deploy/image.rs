//! Prebuilt image provisioner

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::deploy::docker::{self, Docker, RunSpec};
use crate::deploy::provisioner::{base_handle, conclude, ProvisionSettings, Provisioner};
use crate::env::injector::EffectiveEnv;
use crate::errors::{ProvisionError, TeardownError};
use crate::models::resource::{Resource, ResourceKind, ServiceSource, ServiceSpec};
use crate::models::server::Server;
use crate::models::validate::parse_image_reference;
use crate::models::workload::{Health, ProvisionHandle, ProvisionerKind, SubResource, TeardownReport};
use crate::registry::target::RemoteTarget;

/// Secret variable holding a registry token for private images
pub const REGISTRY_TOKEN: &str = "REGISTRY_TOKEN";

/// Registry user name, defaults to `orchestrator`
pub const REGISTRY_USER: &str = "REGISTRY_USER";

const DEFAULT_REGISTRY: &str = "docker.io";

/// Start a container for `image` and publish the resource's port.
///
/// Shared by every provisioner whose workload is a single container.
pub(crate) async fn start_container(
    docker: &Docker<'_>,
    settings: &ProvisionSettings,
    resource: &Resource,
    handle: &ProvisionHandle,
    image: &str,
    container_port: Option<u16>,
    env: &EffectiveEnv,
) -> Result<(), ProvisionError> {
    let mut spec = RunSpec::new(&handle.workload, image).owned_by(&resource.id, &handle.fingerprint);
    let mut extra = Vec::new();
    if let Some(port) = resource.port {
        let container_port = container_port.unwrap_or(port);
        spec.ports.push((port, container_port));
        extra.push(("PORT", container_port.to_string()));
    }

    let env_file = docker::env_file_with(env, &extra)?;
    docker
        .run(&spec, &settings.env_file(&resource.id), &env_file)
        .await
}

#[derive(Debug, Clone)]
pub struct ImageProvisioner {
    settings: ProvisionSettings,
}

impl ImageProvisioner {
    pub fn new(settings: ProvisionSettings) -> Self {
        Self { settings }
    }

    async fn login(
        &self,
        docker: &Docker<'_>,
        reference: &str,
        env: &EffectiveEnv,
    ) -> Result<(), ProvisionError> {
        let token = match env.get(REGISTRY_TOKEN) {
            Some(token) if env.is_secret(REGISTRY_TOKEN) => token,
            _ => return Ok(()),
        };
        let registry = parse_image_reference(reference)
            .map_err(ProvisionError::Config)?
            .registry
            .unwrap_or_else(|| DEFAULT_REGISTRY.to_string());
        let user = env
            .get(REGISTRY_USER)
            .map(|u| u.expose_secret().to_owned())
            .unwrap_or_else(|| "orchestrator".to_string());

        docker
            .login(
                &registry,
                &user,
                SecretString::from(token.expose_secret().to_owned()),
            )
            .await
    }
}

fn image_reference(resource: &Resource) -> Result<&str, ProvisionError> {
    match &resource.kind {
        ResourceKind::Service(ServiceSpec {
            source: ServiceSource::Image { reference },
            ..
        }) => Ok(reference),
        other => Err(ProvisionError::Config(format!(
            "{} resource has no image source",
            other.type_name()
        ))),
    }
}

#[async_trait]
impl Provisioner for ImageProvisioner {
    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::Image
    }

    async fn provision(
        &self,
        resource: &Resource,
        server: &Server,
        target: &dyn RemoteTarget,
        env: &EffectiveEnv,
    ) -> Result<ProvisionHandle, ProvisionError> {
        let reference = image_reference(resource)?;
        let docker = Docker::new(target);
        let mut handle = self.planned_handle(resource, server);

        if docker
            .adopt_or_clear(&handle.workload, &handle.fingerprint)
            .await?
        {
            handle.adopted = true;
            return Ok(handle);
        }

        self.login(&docker, reference, env).await?;
        docker.pull(reference).await?;
        start_container(&docker, &self.settings, resource, &handle, reference, None, env).await?;

        info!("Image {} running as {}", reference, handle.workload);
        Ok(handle)
    }

    async fn teardown(
        &self,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
    ) -> Result<TeardownReport, TeardownError> {
        let docker = Docker::new(target);
        let mut report = TeardownReport::new();
        docker::record(
            &mut report,
            SubResource::Container,
            docker.remove_container(&handle.workload).await,
        );
        conclude(report)
    }

    async fn health_check(
        &self,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
        timeout: Duration,
    ) -> Health {
        Docker::new(target)
            .health(&handle.workload, handle.endpoint.as_deref(), timeout)
            .await
    }

    fn planned_handle(&self, resource: &Resource, server: &Server) -> ProvisionHandle {
        let mut handle = base_handle(ProvisionerKind::Image, resource, server);
        handle.image = image_reference(resource).ok().map(str::to_string);
        handle
    }
}
