//! Docker Compose provisioner

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::deploy::docker::{self, remove_dir};
use crate::deploy::provisioner::{base_handle, conclude, ProvisionSettings, Provisioner};
use crate::env::injector::EffectiveEnv;
use crate::errors::{ProvisionError, TargetError, TeardownError};
use crate::models::resource::{Resource, ResourceKind, ServiceSource, ServiceSpec};
use crate::models::server::Server;
use crate::models::workload::{Health, ProvisionHandle, ProvisionerKind, SubResource, TeardownReport};
use crate::registry::target::{ExecOutput, RemoteCommand, RemoteTarget};

const COMPOSE_FILE: &str = "docker-compose.yml";
const FINGERPRINT_FILE: &str = ".orchestrator-fingerprint";

/// Runs a compose project named after the resource
#[derive(Debug, Clone)]
pub struct ComposeProvisioner {
    settings: ProvisionSettings,
}

/// `docker compose` when the plugin is installed, `docker-compose` otherwise
struct Compose<'a> {
    target: &'a dyn RemoteTarget,
    program: &'static str,
    prefix: &'static [&'static str],
    project: String,
    work_dir: String,
}

impl<'a> Compose<'a> {
    async fn detect(
        target: &'a dyn RemoteTarget,
        project: String,
        work_dir: String,
    ) -> Result<Compose<'a>, TargetError> {
        let plugin = target
            .exec(&RemoteCommand::new("docker").args(["compose", "version"]))
            .await?;
        let (program, prefix): (&'static str, &'static [&'static str]) = if plugin.success() {
            ("docker", &["compose"])
        } else {
            debug!("docker compose plugin missing, falling back to docker-compose");
            ("docker-compose", &[])
        };
        Ok(Compose {
            target,
            program,
            prefix,
            project,
            work_dir,
        })
    }

    async fn run(&self, args: &[&str]) -> Result<ExecOutput, TargetError> {
        let command = RemoteCommand::new(self.program)
            .args(self.prefix.iter().copied())
            .args(["-p", self.project.as_str(), "-f", COMPOSE_FILE])
            .args(args.iter().copied())
            .current_dir(self.work_dir.as_str());
        self.target.exec(&command).await
    }

    /// (all, running) container ids of the project
    async fn containers(&self) -> Result<(usize, usize), TargetError> {
        let count = |out: ExecOutput| out.stdout.lines().filter(|l| !l.trim().is_empty()).count();
        let all = self.run(&["ps", "-a", "-q"]).await?;
        let running = self.run(&["ps", "-q", "--status", "running"]).await?;
        if !all.success() || !running.success() {
            return Err(TargetError::Unreachable(all.message().to_string()));
        }
        Ok((count(all), count(running)))
    }
}

impl ComposeProvisioner {
    pub fn new(settings: ProvisionSettings) -> Self {
        Self { settings }
    }

    async fn is_current(
        &self,
        compose: &Compose<'_>,
        fingerprint: &str,
    ) -> Result<bool, ProvisionError> {
        let recorded = compose
            .target
            .exec(&RemoteCommand::new("cat").arg(format!("{}/{}", compose.work_dir, FINGERPRINT_FILE)))
            .await
            .map_err(|e| ProvisionError::Remote(e.to_string()))?;
        if !recorded.success() || recorded.stdout.trim() != fingerprint {
            return Ok(false);
        }
        match compose.containers().await {
            Ok((all, running)) => Ok(all > 0 && all == running),
            Err(_) => Ok(false),
        }
    }
}

fn compose_content(resource: &Resource) -> Result<&str, ProvisionError> {
    match &resource.kind {
        ResourceKind::Service(ServiceSpec {
            source: ServiceSource::Compose { content },
            ..
        }) => Ok(content),
        other => Err(ProvisionError::Config(format!(
            "{} resource has no compose content",
            other.type_name()
        ))),
    }
}

#[async_trait]
impl Provisioner for ComposeProvisioner {
    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::Compose
    }

    async fn provision(
        &self,
        resource: &Resource,
        server: &Server,
        target: &dyn RemoteTarget,
        env: &EffectiveEnv,
    ) -> Result<ProvisionHandle, ProvisionError> {
        let content = compose_content(resource)?;
        let mut handle = self.planned_handle(resource, server);
        let work_dir = self.settings.work_dir(&resource.id);
        let compose = Compose::detect(target, handle.workload.clone(), work_dir.clone())
            .await
            .map_err(|e| ProvisionError::Remote(e.to_string()))?;

        if self.is_current(&compose, &handle.fingerprint).await? {
            info!("Adopting running compose project {}", handle.workload);
            handle.adopted = true;
            return Ok(handle);
        }

        let write = |name: &str, contents: SecretString, mode: u32| {
            let path = format!("{}/{}", work_dir, name);
            async move {
                target
                    .write_file(&path, &contents, mode)
                    .await
                    .map_err(|e| ProvisionError::Remote(e.to_string()))
            }
        };
        write(COMPOSE_FILE, SecretString::from(content.to_string()), 0o644).await?;
        // Compose reads .env for variable interpolation
        write(".env", env.to_env_file()?, 0o600).await?;

        info!("Starting compose project {}", handle.workload);
        let result = compose.run(&["up", "-d", "--remove-orphans"]).await;
        let env_file = format!("{}/.env", work_dir);
        if let Err(e) = remove_dir(target, &env_file).await {
            warn!("Failed to remove env file {}: {}", env_file, e);
        }

        let output = result.map_err(|e| ProvisionError::Remote(e.to_string()))?;
        if !output.success() {
            return Err(ProvisionError::Runtime(format!(
                "compose up failed: {}",
                output.message()
            )));
        }

        write(
            FINGERPRINT_FILE,
            SecretString::from(handle.fingerprint.clone()),
            0o644,
        )
        .await?;
        Ok(handle)
    }

    async fn teardown(
        &self,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
    ) -> Result<TeardownReport, TeardownError> {
        let mut report = TeardownReport::new();
        let work_dir = handle
            .work_dir
            .clone()
            .unwrap_or_else(|| self.settings.work_dir(&handle.resource_id));

        let down = match Compose::detect(target, handle.workload.clone(), work_dir.clone()).await {
            Ok(compose) => match compose.run(&["down", "-v", "--remove-orphans"]).await {
                Ok(output) if output.success() => Ok(()),
                Ok(output) => Err(output.message().to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        };
        let project_removed = down.is_ok();
        docker::record(&mut report, SubResource::ComposeProject, down);

        // The compose file is needed to retry `down`
        let cleanup = if project_removed {
            remove_dir(target, &work_dir).await
        } else {
            Err("compose project still present".to_string())
        };
        docker::record(&mut report, SubResource::BuildCache, cleanup);
        conclude(report)
    }

    async fn health_check(
        &self,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
        timeout: Duration,
    ) -> Health {
        let work_dir = handle
            .work_dir
            .clone()
            .unwrap_or_else(|| self.settings.work_dir(&handle.resource_id));
        let compose = match Compose::detect(target, handle.workload.clone(), work_dir).await {
            Ok(compose) => compose,
            Err(_) => return Health::Unknown,
        };
        let containers = match compose.containers().await {
            Ok((0, _)) => Health::Down,
            Ok((all, running)) if all == running => Health::Up,
            Ok(_) => Health::Down,
            Err(_) => Health::Unknown,
        };
        match (containers, handle.endpoint.as_deref()) {
            (Health::Up, Some(endpoint)) => target.health_check(endpoint, timeout).await,
            (health, _) => health,
        }
    }

    fn planned_handle(&self, resource: &Resource, server: &Server) -> ProvisionHandle {
        let mut handle = base_handle(ProvisionerKind::Compose, resource, server);
        handle.work_dir = Some(self.settings.work_dir(&resource.id));
        handle
    }
}
