//! Server registry

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::NoTargetError;
use crate::models::resource::Resource;
use crate::models::server::{Server, Transport};
use crate::registry::local::LocalTarget;
use crate::registry::ssh::SshTarget;
use crate::registry::target::{RemoteCommand, RemoteTarget};

/// Registry options
#[derive(Debug, Clone)]
pub struct Options {
    /// Upper bound for one reachability probe
    pub probe_timeout: Duration,

    /// ssh ConnectTimeout for ssh targets
    pub connect_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Reachability {
    /// Not probed yet; selectable
    Unknown,
    Reachable,
    Unreachable { reason: String },
}

/// A registered server with its last probe result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    #[serde(flatten)]
    pub server: Server,
    pub reachability: Reachability,
    pub last_checked_at: Option<DateTime<Utc>>,
}

struct Entry {
    server: Server,
    target: Arc<dyn RemoteTarget>,
    reachability: Reachability,
    last_checked_at: Option<DateTime<Utc>>,
}

/// Known deploy targets
pub struct ServerRegistry {
    options: Options,
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl ServerRegistry {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a server, picking the target from its transport.
    ///
    /// Re-registering an id replaces the previous entry.
    pub fn register(&self, server: Server) {
        let target: Arc<dyn RemoteTarget> = match server.transport {
            Transport::Local => Arc::new(LocalTarget::new()),
            Transport::Ssh => Arc::new(SshTarget::new(&server, self.options.connect_timeout)),
        };
        self.register_with_target(server, target);
    }

    pub fn register_with_target(&self, server: Server, target: Arc<dyn RemoteTarget>) {
        info!(
            "Registering server {} ({}) via {}",
            server.id,
            server.name,
            target.describe()
        );
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            server.id.clone(),
            Entry {
                server,
                target,
                reachability: Reachability::Unknown,
                last_checked_at: None,
            },
        );
    }

    pub fn remove(&self, id: &str) -> Option<Server> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(id).map(|e| e.server)
    }

    pub fn get(&self, id: &str) -> Option<Server> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(id).map(|e| e.server.clone())
    }

    pub fn list(&self) -> Vec<ServerStatus> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .map(|e| ServerStatus {
                server: e.server.clone(),
                reachability: e.reachability.clone(),
                last_checked_at: e.last_checked_at,
            })
            .collect()
    }

    /// Target for a resource's server, refusing servers marked unreachable
    pub fn select(
        &self,
        resource: &Resource,
    ) -> Result<(Server, Arc<dyn RemoteTarget>), NoTargetError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .get(&resource.server_id)
            .ok_or_else(|| NoTargetError::Unknown(resource.server_id.clone()))?;
        if let Reachability::Unreachable { .. } = entry.reachability {
            return Err(NoTargetError::Unreachable(resource.server_id.clone()));
        }
        Ok((entry.server.clone(), entry.target.clone()))
    }

    /// Probe every server with a no-op command and record the outcome
    pub async fn refresh_reachability(&self) {
        let snapshot: Vec<(String, Arc<dyn RemoteTarget>)> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .iter()
                .map(|(id, e)| (id.clone(), e.target.clone()))
                .collect()
        };

        let timeout = self.options.probe_timeout;
        let probes = snapshot.into_iter().map(|(id, target)| async move {
            let command = RemoteCommand::new("true");
            let reachability = match tokio::time::timeout(timeout, target.exec(&command)).await {
                Ok(Ok(output)) if output.success() => Reachability::Reachable,
                Ok(Ok(output)) => Reachability::Unreachable {
                    reason: format!("probe exited with {:?}", output.status),
                },
                Ok(Err(e)) => Reachability::Unreachable {
                    reason: e.to_string(),
                },
                Err(_) => Reachability::Unreachable {
                    reason: format!("probe timed out after {:?}", timeout),
                },
            };
            (id, reachability)
        });
        let results = join_all(probes).await;

        let now = Utc::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for (id, reachability) in results {
            // Removed while probing
            let Some(entry) = entries.get_mut(&id) else {
                continue;
            };
            if let Reachability::Unreachable { reason } = &reachability {
                warn!("Server {} is unreachable: {}", id, reason);
            } else if entry.reachability != reachability {
                info!("Server {} is reachable", id);
            }
            entry.reachability = reachability;
            entry.last_checked_at = Some(now);
        }
    }
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TargetError;
    use crate::models::resource::{GitSource, ResourceKind};
    use crate::registry::target::ExecOutput;
    use async_trait::async_trait;
    use secrecy::SecretString;

    struct DownTarget;

    #[async_trait]
    impl RemoteTarget for DownTarget {
        fn describe(&self) -> String {
            "down".to_string()
        }

        async fn exec(&self, _command: &RemoteCommand) -> Result<ExecOutput, TargetError> {
            Err(TargetError::Unreachable("connection refused".to_string()))
        }

        async fn write_file(
            &self,
            _path: &str,
            _contents: &SecretString,
            _mode: u32,
        ) -> Result<(), TargetError> {
            Err(TargetError::Unreachable("connection refused".to_string()))
        }
    }

    fn resource_on(server_id: &str) -> Resource {
        Resource::new(
            "r1",
            "site",
            "p1",
            server_id,
            ResourceKind::Website(GitSource {
                repository_url: "https://github.com/acme/site".to_string(),
                branch: "main".to_string(),
                commit: None,
                dockerfile_path: None,
            }),
        )
    }

    #[test]
    fn test_select_unknown_server() {
        let registry = ServerRegistry::default();
        assert_eq!(
            registry.select(&resource_on("nope")).err(),
            Some(NoTargetError::Unknown("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unreachable_servers_are_not_selected() {
        let registry = ServerRegistry::default();
        registry.register_with_target(Server::local("s1", "edge"), Arc::new(DownTarget));
        assert!(registry.select(&resource_on("s1")).is_ok());

        registry.refresh_reachability().await;

        let status = &registry.list()[0];
        assert!(matches!(status.reachability, Reachability::Unreachable { .. }));
        assert!(status.last_checked_at.is_some());
        assert_eq!(
            registry.select(&resource_on("s1")).err(),
            Some(NoTargetError::Unreachable("s1".to_string()))
        );
    }

    #[test]
    fn test_remove() {
        let registry = ServerRegistry::default();
        registry.register(Server::local("s1", "edge"));
        assert!(registry.get("s1").is_some());
        assert_eq!(registry.remove("s1").map(|s| s.id), Some("s1".to_string()));
        assert!(registry.list().is_empty());
    }
}
