//! Image builds from a repository Dockerfile

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::deploy::docker::{self, remove_dir, Docker, LABEL_FINGERPRINT, LABEL_RESOURCE};
use crate::deploy::git;
use crate::deploy::image::start_container;
use crate::deploy::provisioner::{base_handle, conclude, ProvisionSettings, Provisioner};
use crate::env::injector::EffectiveEnv;
use crate::errors::{ProvisionError, TeardownError};
use crate::models::resource::Resource;
use crate::models::server::Server;
use crate::models::workload::{Health, ProvisionHandle, ProvisionerKind, SubResource, TeardownReport};
use crate::registry::target::{RemoteCommand, RemoteTarget};
use crate::utils::tail;

/// Builds the repository's own Dockerfile and runs the result
#[derive(Debug, Clone)]
pub struct DockerfileProvisioner {
    settings: ProvisionSettings,
}

impl DockerfileProvisioner {
    pub fn new(settings: ProvisionSettings) -> Self {
        Self { settings }
    }

    pub(crate) fn handle_for(
        &self,
        kind: ProvisionerKind,
        resource: &Resource,
        server: &Server,
    ) -> ProvisionHandle {
        let mut handle = base_handle(kind, resource, server);
        handle.work_dir = Some(self.settings.work_dir(&resource.id));
        handle.image = Some(docker::image_tag(&resource.id, &handle.fingerprint));
        handle
    }

    /// Check out, build and start. With `generate` a missing Dockerfile is
    /// replaced by one derived from the resource.
    pub(crate) async fn build_and_run(
        &self,
        kind: ProvisionerKind,
        resource: &Resource,
        server: &Server,
        target: &dyn RemoteTarget,
        env: &EffectiveEnv,
        generate: bool,
    ) -> Result<ProvisionHandle, ProvisionError> {
        let source = resource.kind.git_source().ok_or_else(|| {
            ProvisionError::Config(format!(
                "{} resource has no repository",
                resource.kind.type_name()
            ))
        })?;
        let docker = Docker::new(target);
        let mut handle = self.handle_for(kind, resource, server);

        if docker
            .adopt_or_clear(&handle.workload, &handle.fingerprint)
            .await?
        {
            handle.adopted = true;
            return Ok(handle);
        }

        let work_dir = self.settings.work_dir(&resource.id);
        git::checkout(target, source, &work_dir).await?;

        let (dockerfile, container_port) =
            match git::locate_dockerfile(target, &work_dir, source).await? {
                Some(path) => (path, None),
                None if generate => {
                    let generated = git::generated_dockerfile(resource).ok_or_else(|| {
                        ProvisionError::Config("repository has no Dockerfile".to_string())
                    })?;
                    let path = git::write_generated(target, &work_dir, &generated).await?;
                    (path, generated.container_port)
                }
                None => {
                    return Err(ProvisionError::Config(
                        "repository has no Dockerfile".to_string(),
                    ))
                }
            };

        let tag = docker::image_tag(&resource.id, &handle.fingerprint);
        self.build(target, &work_dir, &dockerfile, &tag, resource, &handle.fingerprint)
            .await?;
        start_container(
            &docker,
            &self.settings,
            resource,
            &handle,
            &tag,
            container_port,
            env,
        )
        .await?;

        info!("Built and started {} from {}", handle.workload, tag);
        Ok(handle)
    }

    async fn build(
        &self,
        target: &dyn RemoteTarget,
        work_dir: &str,
        dockerfile: &str,
        tag: &str,
        resource: &Resource,
        fingerprint: &str,
    ) -> Result<(), ProvisionError> {
        info!("Building {} with {}", tag, dockerfile);
        let command = RemoteCommand::new("docker")
            .args(["build", "-t", tag, "-f", dockerfile])
            .arg("--label")
            .arg(format!("{}={}", LABEL_RESOURCE, resource.id))
            .arg("--label")
            .arg(format!("{}={}", LABEL_FINGERPRINT, fingerprint))
            .arg(".")
            .current_dir(work_dir);

        let output = target
            .exec(&command)
            .await
            .map_err(|e| ProvisionError::Remote(e.to_string()))?;
        if !output.success() {
            let log = output.combined();
            return Err(ProvisionError::Build {
                status: output.status,
                log: tail(&log, self.settings.build_log_limit).to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for DockerfileProvisioner {
    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::Dockerfile
    }

    async fn provision(
        &self,
        resource: &Resource,
        server: &Server,
        target: &dyn RemoteTarget,
        env: &EffectiveEnv,
    ) -> Result<ProvisionHandle, ProvisionError> {
        self.build_and_run(self.kind(), resource, server, target, env, false)
            .await
    }

    async fn teardown(
        &self,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
    ) -> Result<TeardownReport, TeardownError> {
        let docker = Docker::new(target);
        let mut report = TeardownReport::new();

        let container = docker.remove_container(&handle.workload).await;
        let container_removed = container.is_ok();
        docker::record(&mut report, SubResource::Container, container);

        if let Some(image) = &handle.image {
            // The image cannot go while its container still exists
            let result = if container_removed {
                docker.remove_image(image).await
            } else {
                Err("container still present".to_string())
            };
            docker::record(&mut report, SubResource::Image, result);
        }
        if let Some(work_dir) = &handle.work_dir {
            docker::record(
                &mut report,
                SubResource::BuildCache,
                remove_dir(target, work_dir).await,
            );
        }
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
        self.handle_for(self.kind(), resource, server)
    }
}
