//! Resource models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{ResourceStatus, Transition};
use crate::models::environment::{EnvironmentVariable, SecretSlot, VariableValue};
use crate::models::workload::ProvisionHandle;
use crate::utils::sha256_hash;

/// Number of status changes kept on a resource
pub const HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Postgres,
    Mysql,
    Mongodb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceEngine {
    Node,
    Python,
    Docker,
}

/// Managed database payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    pub engine: DatabaseEngine,
    pub database_name: String,
    pub admin_email: String,
    #[serde(default)]
    pub initial_database: Option<String>,
    /// Generated during provisioning when absent
    #[serde(default)]
    pub password: Option<SecretSlot>,
}

/// Git checkout coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub repository_url: String,
    pub branch: String,
    #[serde(default)]
    pub commit: Option<String>,
    /// Dockerfile path relative to the repository root
    #[serde(default)]
    pub dockerfile_path: Option<String>,
}

/// Where a service's workload comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "lowercase")]
pub enum ServiceSource {
    Repository(GitSource),
    Compose { content: String },
    Image { reference: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub engine: ServiceEngine,
    pub source: ServiceSource,
}

/// Kind-specific payload, keyed by the resource type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceKind {
    Database(DatabaseSpec),
    Service(ServiceSpec),
    Website(GitSource),
    Github(GitSource),
    Gitlab(GitSource),
    Bitbucket(GitSource),
}

impl ResourceKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::Database(_) => "database",
            ResourceKind::Service(_) => "service",
            ResourceKind::Website(_) => "website",
            ResourceKind::Github(_) => "github",
            ResourceKind::Gitlab(_) => "gitlab",
            ResourceKind::Bitbucket(_) => "bitbucket",
        }
    }

    /// Git coordinates when the workload is built from a repository
    pub fn git_source(&self) -> Option<&GitSource> {
        match self {
            ResourceKind::Website(g)
            | ResourceKind::Github(g)
            | ResourceKind::Gitlab(g)
            | ResourceKind::Bitbucket(g) => Some(g),
            ResourceKind::Service(ServiceSpec {
                source: ServiceSource::Repository(g),
                ..
            }) => Some(g),
            _ => None,
        }
    }
}

/// A recorded status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: ResourceStatus,
    pub to: ResourceStatus,
    pub event: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// A single deployable unit belonging to a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub server_id: String,

    /// Name of the project environment whose variables apply
    #[serde(default)]
    pub environment: Option<String>,

    pub kind: ResourceKind,

    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,

    /// Published port probed over HTTP by health checks
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub health_path: Option<String>,

    status: ResourceStatus,

    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    pub handle: Option<ProvisionHandle>,

    #[serde(default)]
    history: Vec<StatusChange>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Create a resource in created status
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        project_id: impl Into<String>,
        server_id: impl Into<String>,
        kind: ResourceKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            project_id: project_id.into(),
            server_id: server_id.into(),
            environment: None,
            kind,
            environment_variables: Vec::new(),
            port: None,
            health_path: None,
            status: ResourceStatus::Created,
            error: None,
            handle: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    /// Apply a transition produced by the status FSM
    pub fn apply(&mut self, transition: &Transition) {
        let now = Utc::now();
        self.status = transition.to();
        self.error = transition.error().map(str::to_string);
        self.history.push(StatusChange {
            from: transition.from(),
            to: transition.to(),
            event: transition.event().to_string(),
            reason: transition.error().map(str::to_string),
            at: now,
        });
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
        self.updated_at = now;
    }

    /// Record an error without changing status
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.updated_at = Utc::now();
    }

    /// Every secret slot owned by this resource
    pub fn secret_slots_mut(&mut self) -> Vec<&mut SecretSlot> {
        let mut slots: Vec<&mut SecretSlot> = self
            .environment_variables
            .iter_mut()
            .filter_map(|v| match &mut v.value {
                VariableValue::Secret(slot) => Some(slot),
                VariableValue::Plain(_) => None,
            })
            .collect();
        if let ResourceKind::Database(DatabaseSpec {
            password: Some(slot),
            ..
        }) = &mut self.kind
        {
            slots.push(slot);
        }
        slots
    }

    /// Hash of everything that shapes the remote workload.
    ///
    /// Two provisioning calls with the same fingerprint must converge on the
    /// same workload.
    pub fn definition_fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "kind": serde_json::to_value(&self.kind).unwrap_or_default(),
            "variables": serde_json::to_value(&self.environment_variables).unwrap_or_default(),
            "environment": self.environment,
            "port": self.port,
            "healthPath": self.health_path,
        });
        sha256_hash(canonical.to_string().as_bytes())
    }
}
