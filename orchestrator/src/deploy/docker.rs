//! Docker helpers shared by the container provisioners

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::env::injector::EffectiveEnv;
use crate::errors::{ProvisionError, TargetError};
use crate::models::workload::{Health, SubResource, TeardownReport};
use crate::registry::target::{ExecOutput, RemoteCommand, RemoteTarget};

/// Label carrying the owning resource id
pub const LABEL_RESOURCE: &str = "orchestrator.resource-id";

/// Label carrying the definition fingerprint a workload was created from
pub const LABEL_FINGERPRINT: &str = "orchestrator.fingerprint";

/// Label naming the administrator contact of a managed database
pub const LABEL_ADMIN_EMAIL: &str = "orchestrator.admin-email";

/// Deterministic workload name of a resource
pub fn workload_name(resource_id: &str) -> String {
    format!("orc-{}", resource_id)
}

pub fn volume_name(resource_id: &str) -> String {
    format!("orc-{}-data", resource_id)
}

/// Image tag for locally built images
pub fn image_tag(resource_id: &str, fingerprint: &str) -> String {
    let short = fingerprint.get(..12).unwrap_or(fingerprint);
    format!("{}:{}", workload_name(resource_id), short)
}

/// What `docker inspect` reports about a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub status: String,
    pub fingerprint: String,
    /// Healthcheck status, empty when the image defines none
    pub health: String,
}

impl ContainerState {
    fn parse(line: &str) -> Self {
        let mut parts = line.trim().splitn(3, '|');
        let mut next = || parts.next().unwrap_or("").trim().to_string();
        Self {
            status: next(),
            fingerprint: next(),
            health: next(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn health(&self) -> Health {
        match (self.status.as_str(), self.health.as_str()) {
            ("running", "" | "healthy") => Health::Up,
            ("running", "starting") => Health::Unknown,
            ("running", _) => Health::Down,
            ("created" | "restarting", _) => Health::Unknown,
            _ => Health::Down,
        }
    }
}

fn is_missing(output: &ExecOutput) -> bool {
    let message = output.message().to_ascii_lowercase();
    message.contains("no such") || message.contains("not found")
}

/// Container to start
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub labels: Vec<(String, String)>,
    /// (host port, container port)
    pub ports: Vec<(u16, u16)>,
    /// (volume, mount point)
    pub volumes: Vec<(String, String)>,
    pub health_cmd: Option<String>,
}

impl RunSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Attach the ownership labels
    pub fn owned_by(mut self, resource_id: &str, fingerprint: &str) -> Self {
        self.labels
            .push((LABEL_RESOURCE.to_string(), resource_id.to_string()));
        self.labels
            .push((LABEL_FINGERPRINT.to_string(), fingerprint.to_string()));
        self
    }

    fn command(&self, env_file: &str) -> RemoteCommand {
        let mut cmd = RemoteCommand::new("docker").args([
            "run",
            "-d",
            "--name",
            self.name.as_str(),
            "--restart",
            "unless-stopped",
            "--env-file",
            env_file,
        ]);
        for (key, value) in &self.labels {
            cmd = cmd.arg("--label").arg(format!("{}={}", key, value));
        }
        for (host, container) in &self.ports {
            cmd = cmd.arg("-p").arg(format!("{}:{}", host, container));
        }
        for (volume, mount) in &self.volumes {
            cmd = cmd.arg("-v").arg(format!("{}:{}", volume, mount));
        }
        if let Some(health_cmd) = &self.health_cmd {
            cmd = cmd.args([
                "--health-cmd",
                health_cmd.as_str(),
                "--health-interval",
                "5s",
                "--health-retries",
                "5",
            ]);
        }
        cmd.arg(&self.image)
    }
}

/// The docker CLI on a deploy target
pub struct Docker<'a> {
    target: &'a dyn RemoteTarget,
}

impl<'a> Docker<'a> {
    pub fn new(target: &'a dyn RemoteTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &'a dyn RemoteTarget {
        self.target
    }

    async fn exec(&self, command: RemoteCommand) -> Result<ExecOutput, ProvisionError> {
        self.target
            .exec(&command)
            .await
            .map_err(|e| ProvisionError::Remote(e.to_string()))
    }

    /// State of the named container, None when it does not exist
    pub async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, TargetError> {
        let format = format!(
            "{{{{.State.Status}}}}|{{{{index .Config.Labels \"{}\"}}}}|{{{{if .State.Health}}}}{{{{.State.Health.Status}}}}{{{{end}}}}",
            LABEL_FINGERPRINT
        );
        let output = self
            .target
            .exec(&RemoteCommand::new("docker").args(["inspect", "-f", format.as_str(), name]))
            .await?;
        if output.success() {
            return Ok(Some(ContainerState::parse(&output.stdout)));
        }
        if is_missing(&output) {
            return Ok(None);
        }
        Err(TargetError::Unreachable(format!(
            "docker inspect {}: {}",
            name,
            output.message()
        )))
    }

    /// Reuse a running container built from the same definition.
    ///
    /// A stale container with the same name is removed so the caller can
    /// recreate it. Returns true when the existing container was adopted.
    pub async fn adopt_or_clear(&self, name: &str, fingerprint: &str) -> Result<bool, ProvisionError> {
        let state = self
            .inspect(name)
            .await
            .map_err(|e| ProvisionError::Remote(e.to_string()))?;
        match state {
            Some(state) if state.is_running() && state.fingerprint == fingerprint => {
                info!("Adopting existing container {}", name);
                Ok(true)
            }
            Some(state) => {
                info!(
                    "Replacing stale container {} (status {}, fingerprint {})",
                    name, state.status, state.fingerprint
                );
                self.remove_container(name)
                    .await
                    .map_err(ProvisionError::Runtime)?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Log into a registry, the token goes over stdin
    pub async fn login(
        &self,
        registry: &str,
        user: &str,
        token: SecretString,
    ) -> Result<(), ProvisionError> {
        debug!("Logging into registry {}", registry);
        let output = self
            .exec(
                RemoteCommand::new("docker")
                    .args(["login", registry, "-u", user, "--password-stdin"])
                    .stdin(token),
            )
            .await?;
        if !output.success() {
            return Err(ProvisionError::Config(format!(
                "registry login to {} failed: {}",
                registry,
                output.message()
            )));
        }
        Ok(())
    }

    pub async fn pull(&self, image: &str) -> Result<(), ProvisionError> {
        info!("Pulling image {}", image);
        let output = self
            .exec(RemoteCommand::new("docker").args(["pull", image]))
            .await?;
        if !output.success() {
            return Err(ProvisionError::Source(format!(
                "docker pull {} failed: {}",
                image,
                output.message()
            )));
        }
        Ok(())
    }

    /// Start a container with its environment passed through an owner-only
    /// env file that is removed once docker has read it
    pub async fn run(
        &self,
        spec: &RunSpec,
        env_file_path: &str,
        env_file: &SecretString,
    ) -> Result<(), ProvisionError> {
        self.target
            .write_file(env_file_path, env_file, 0o600)
            .await
            .map_err(|e| ProvisionError::Remote(e.to_string()))?;

        info!("Starting container {} from {}", spec.name, spec.image);
        let result = self.exec(spec.command(env_file_path)).await;

        if let Err(e) = self
            .target
            .exec(&RemoteCommand::new("rm").args(["-f", env_file_path]))
            .await
        {
            warn!("Failed to remove env file {}: {}", env_file_path, e);
        }

        let output = result?;
        if !output.success() {
            return Err(ProvisionError::Runtime(format!(
                "docker run {} failed: {}",
                spec.name,
                output.message()
            )));
        }
        Ok(())
    }

    /// Remove a container; an already missing one counts as removed
    pub async fn remove_container(&self, name: &str) -> Result<(), String> {
        self.remove(RemoteCommand::new("docker").args(["rm", "-f", name]))
            .await
    }

    pub async fn remove_volume(&self, name: &str) -> Result<(), String> {
        self.remove(RemoteCommand::new("docker").args(["volume", "rm", name]))
            .await
    }

    pub async fn remove_image(&self, tag: &str) -> Result<(), String> {
        self.remove(RemoteCommand::new("docker").args(["rmi", tag]))
            .await
    }

    async fn remove(&self, command: RemoteCommand) -> Result<(), String> {
        match self.target.exec(&command).await {
            Ok(output) if output.success() || is_missing(&output) => Ok(()),
            Ok(output) => Err(output.message().to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Container state combined with the HTTP endpoint when there is one
    pub async fn health(
        &self,
        name: &str,
        endpoint: Option<&str>,
        timeout: std::time::Duration,
    ) -> Health {
        let container = match self.inspect(name).await {
            Ok(Some(state)) => state.health(),
            Ok(None) => Health::Down,
            Err(e) => {
                debug!("Health inspect of {} failed: {}", name, e);
                Health::Unknown
            }
        };
        match (container, endpoint) {
            (Health::Up, Some(endpoint)) => self.target.health_check(endpoint, timeout).await,
            (health, _) => health,
        }
    }
}

/// Render the env file for a container, adding `extra` entries whose keys
/// the effective environment does not define
pub fn env_file_with(
    env: &EffectiveEnv,
    extra: &[(&str, String)],
) -> Result<SecretString, ProvisionError> {
    let rendered = env.to_env_file()?;
    let mut contents = rendered.expose_secret().to_owned();
    for (key, value) in extra {
        if env.get(key).is_none() {
            contents.push_str(&format!("{}={}\n", key, value));
        }
    }
    Ok(SecretString::from(contents))
}

/// Record the outcome of removing one sub-resource
pub fn record(report: &mut TeardownReport, sub_resource: SubResource, result: Result<(), String>) {
    match result {
        Ok(()) => report.removed(sub_resource),
        Err(reason) => {
            warn!("Retaining {}: {}", sub_resource.as_str(), reason);
            report.retained(sub_resource, reason)
        }
    }
}

/// Remove a directory on the target
pub async fn remove_dir(target: &dyn RemoteTarget, dir: &str) -> Result<(), String> {
    match target
        .exec(&RemoteCommand::new("rm").args(["-rf", dir]))
        .await
    {
        Ok(output) if output.success() => Ok(()),
        Ok(output) => Err(output.message().to_string()),
        Err(e) => Err(e.to_string()),
    }
}
