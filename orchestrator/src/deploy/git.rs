//! Git checkouts and repository-built services

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{debug, info};

use crate::deploy::docker::remove_dir;
use crate::deploy::dockerfile::DockerfileProvisioner;
use crate::deploy::provisioner::Provisioner;
use crate::env::injector::EffectiveEnv;
use crate::errors::{ProvisionError, TeardownError};
use crate::models::resource::{GitSource, Resource, ResourceKind, ServiceEngine, ServiceSpec};
use crate::models::server::Server;
use crate::models::workload::{Health, ProvisionHandle, ProvisionerKind, TeardownReport};
use crate::registry::target::{RemoteCommand, RemoteTarget};

/// Name of a Dockerfile written by the orchestrator
pub const GENERATED_DOCKERFILE: &str = "Dockerfile.orchestrator";

const NODE_DOCKERFILE: &str = r#"FROM node:20-alpine
WORKDIR /app
COPY package*.json ./
RUN if [ -f package-lock.json ]; then npm ci --omit=dev; else npm install --omit=dev; fi
COPY . .
ENV NODE_ENV=production
CMD ["npm", "start"]
"#;

const PYTHON_DOCKERFILE: &str = r#"FROM python:3.12-slim
WORKDIR /app
COPY . .
RUN if [ -f requirements.txt ]; then pip install --no-cache-dir -r requirements.txt; fi
CMD ["sh", "-c", "if [ -f main.py ]; then exec python main.py; else exec python app.py; fi"]
"#;

const STATIC_SITE_DOCKERFILE: &str = r#"FROM nginx:alpine
COPY . /usr/share/nginx/html
"#;

/// Dockerfile generated for a repository that has none
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDockerfile {
    pub contents: &'static str,
    /// Port the generated image listens on, None when it honours PORT
    pub container_port: Option<u16>,
}

/// Dockerfile for a resource without one, None when the engine needs its own
pub fn generated_dockerfile(resource: &Resource) -> Option<GeneratedDockerfile> {
    match &resource.kind {
        ResourceKind::Service(ServiceSpec { engine, .. }) => match engine {
            ServiceEngine::Node => Some(GeneratedDockerfile {
                contents: NODE_DOCKERFILE,
                container_port: None,
            }),
            ServiceEngine::Python => Some(GeneratedDockerfile {
                contents: PYTHON_DOCKERFILE,
                container_port: None,
            }),
            ServiceEngine::Docker => None,
        },
        ResourceKind::Website(_)
        | ResourceKind::Github(_)
        | ResourceKind::Gitlab(_)
        | ResourceKind::Bitbucket(_) => Some(GeneratedDockerfile {
            contents: STATIC_SITE_DOCKERFILE,
            container_port: Some(80),
        }),
        ResourceKind::Database(_) => None,
    }
}

async fn git(target: &dyn RemoteTarget, command: RemoteCommand) -> Result<(), ProvisionError> {
    let output = target
        .exec(&command)
        .await
        .map_err(|e| ProvisionError::Remote(e.to_string()))?;
    if !output.success() {
        return Err(ProvisionError::Source(format!(
            "{} failed: {}",
            command.args.first().map(String::as_str).unwrap_or("git"),
            output.message()
        )));
    }
    Ok(())
}

/// Fresh shallow checkout of `source` into `work_dir`
pub async fn checkout(
    target: &dyn RemoteTarget,
    source: &GitSource,
    work_dir: &str,
) -> Result<(), ProvisionError> {
    info!(
        "Checking out {} ({}) into {}",
        source.repository_url,
        source.commit.as_deref().unwrap_or(&source.branch),
        work_dir
    );
    remove_dir(target, work_dir)
        .await
        .map_err(ProvisionError::Remote)?;

    match &source.commit {
        Some(commit) => {
            git(target, RemoteCommand::new("git").args(["init", "-q", "--", work_dir])).await?;
            let in_repo = |args: &[&str]| {
                RemoteCommand::new("git")
                    .args(["-C", work_dir])
                    .args(args.iter().copied())
            };
            git(target, in_repo(&["remote", "add", "origin", "--", source.repository_url.as_str()])).await?;
            git(target, in_repo(&["fetch", "-q", "--depth", "1", "origin", commit.as_str()])).await?;
            git(target, in_repo(&["checkout", "-q", "--detach", "FETCH_HEAD"])).await
        }
        None => {
            git(
                target,
                RemoteCommand::new("git").args([
                    "clone",
                    "-q",
                    "--depth",
                    "1",
                    "--branch",
                    source.branch.as_str(),
                    "--",
                    source.repository_url.as_str(),
                    work_dir,
                ]),
            )
            .await
        }
    }
}

pub(crate) async fn file_exists(
    target: &dyn RemoteTarget,
    path: &str,
) -> Result<bool, ProvisionError> {
    let output = target
        .exec(&RemoteCommand::new("test").args(["-f", path]))
        .await
        .map_err(|e| ProvisionError::Remote(e.to_string()))?;
    Ok(output.success())
}

/// Dockerfile path relative to the checkout: the configured one, then
/// `Dockerfile` at the repository root
pub async fn locate_dockerfile(
    target: &dyn RemoteTarget,
    work_dir: &str,
    source: &GitSource,
) -> Result<Option<String>, ProvisionError> {
    if let Some(path) = &source.dockerfile_path {
        if file_exists(target, &format!("{}/{}", work_dir, path)).await? {
            return Ok(Some(path.clone()));
        }
        return Err(ProvisionError::Config(format!(
            "dockerfile '{}' not found in repository",
            path
        )));
    }
    if file_exists(target, &format!("{}/Dockerfile", work_dir)).await? {
        return Ok(Some("Dockerfile".to_string()));
    }
    Ok(None)
}

/// Write the generated Dockerfile into the checkout
pub async fn write_generated(
    target: &dyn RemoteTarget,
    work_dir: &str,
    generated: &GeneratedDockerfile,
) -> Result<String, ProvisionError> {
    debug!("Generating {} in {}", GENERATED_DOCKERFILE, work_dir);
    target
        .write_file(
            &format!("{}/{}", work_dir, GENERATED_DOCKERFILE),
            &SecretString::from(generated.contents),
            0o644,
        )
        .await
        .map_err(|e| ProvisionError::Remote(e.to_string()))?;
    Ok(GENERATED_DOCKERFILE.to_string())
}

/// Repository services and websites; generates a Dockerfile when the
/// repository has none
#[derive(Clone)]
pub struct GitServiceProvisioner {
    builder: DockerfileProvisioner,
}

impl GitServiceProvisioner {
    pub fn new(builder: DockerfileProvisioner) -> Self {
        Self { builder }
    }
}

#[async_trait]
impl Provisioner for GitServiceProvisioner {
    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::GitService
    }

    async fn provision(
        &self,
        resource: &Resource,
        server: &Server,
        target: &dyn RemoteTarget,
        env: &EffectiveEnv,
    ) -> Result<ProvisionHandle, ProvisionError> {
        self.builder
            .build_and_run(self.kind(), resource, server, target, env, true)
            .await
    }

    async fn teardown(
        &self,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
    ) -> Result<TeardownReport, TeardownError> {
        self.builder.teardown(handle, target).await
    }

    async fn health_check(
        &self,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
        timeout: Duration,
    ) -> Health {
        self.builder.health_check(handle, target, timeout).await
    }

    fn planned_handle(&self, resource: &Resource, server: &Server) -> ProvisionHandle {
        self.builder.handle_for(self.kind(), resource, server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TargetError;
    use crate::models::resource::ServiceSource;
    use crate::registry::target::ExecOutput;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTarget {
        commands: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl RemoteTarget for RecordingTarget {
        fn describe(&self) -> String {
            "recording".to_string()
        }

        async fn exec(&self, command: &RemoteCommand) -> Result<ExecOutput, TargetError> {
            let mut argv = vec![command.program.clone()];
            argv.extend(command.args.iter().cloned());
            self.commands.lock().unwrap().push(argv);
            Ok(ExecOutput::ok(""))
        }

        async fn write_file(
            &self,
            _path: &str,
            _contents: &SecretString,
            _mode: u32,
        ) -> Result<(), TargetError> {
            Ok(())
        }
    }

    impl RecordingTarget {
        fn git_commands(&self) -> Vec<Vec<String>> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .filter(|argv| argv[0] == "git")
                .cloned()
                .collect()
        }
    }

    fn ends_with_operands(argv: &[String], operands: &[&str]) {
        let split = argv.len() - operands.len() - 1;
        assert_eq!(argv[split], "--", "{:?}", argv);
        assert_eq!(&argv[split + 1..], operands, "{:?}", argv);
    }

    fn git_source() -> GitSource {
        GitSource {
            repository_url: "https://github.com/acme/site".to_string(),
            branch: "main".to_string(),
            commit: None,
            dockerfile_path: None,
        }
    }

    #[test]
    fn test_generated_dockerfiles() {
        let website = Resource::new("r1", "site", "p1", "s1", ResourceKind::Website(git_source()));
        let generated = generated_dockerfile(&website).unwrap();
        assert!(generated.contents.starts_with("FROM nginx"));
        assert_eq!(generated.container_port, Some(80));

        let node = Resource::new(
            "r2",
            "api",
            "p1",
            "s1",
            ResourceKind::Service(ServiceSpec {
                engine: ServiceEngine::Node,
                source: ServiceSource::Repository(git_source()),
            }),
        );
        assert!(generated_dockerfile(&node).unwrap().contents.contains("npm"));

        let docker = Resource::new(
            "r3",
            "api",
            "p1",
            "s1",
            ResourceKind::Service(ServiceSpec {
                engine: ServiceEngine::Docker,
                source: ServiceSource::Repository(git_source()),
            }),
        );
        assert!(generated_dockerfile(&docker).is_none());
    }

    #[tokio::test]
    async fn test_clone_keeps_url_and_dir_after_separator() {
        let target = RecordingTarget::default();
        checkout(&target, &git_source(), "/srv/builds/orc-x").await.unwrap();

        let commands = target.git_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0][1], "clone");
        ends_with_operands(
            &commands[0],
            &["https://github.com/acme/site", "/srv/builds/orc-x"],
        );
    }

    #[tokio::test]
    async fn test_commit_checkout_keeps_operands_after_separator() {
        let target = RecordingTarget::default();
        let source = GitSource {
            commit: Some("0123abcd".to_string()),
            ..git_source()
        };
        checkout(&target, &source, "/srv/builds/orc-x").await.unwrap();

        let commands = target.git_commands();
        assert_eq!(commands.len(), 4);
        ends_with_operands(&commands[0], &["/srv/builds/orc-x"]);
        ends_with_operands(&commands[1], &["https://github.com/acme/site"]);
        assert_eq!(commands[2].last().map(String::as_str), Some("0123abcd"));
    }
}
