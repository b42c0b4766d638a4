//! Provisioned workload models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provisioning strategy that owns a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionerKind {
    Database,
    GitService,
    Dockerfile,
    Compose,
    Image,
}

impl ProvisionerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionerKind::Database => "database",
            ProvisionerKind::GitService => "git_service",
            ProvisionerKind::Dockerfile => "dockerfile",
            ProvisionerKind::Compose => "compose",
            ProvisionerKind::Image => "image",
        }
    }
}

/// Opaque reference to a provisioned workload, used for teardown and health checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionHandle {
    pub resource_id: String,
    pub provisioner: ProvisionerKind,

    /// Container name, or compose project name
    pub workload: String,

    /// Named data volume owned by the workload
    #[serde(default)]
    pub volume: Option<String>,

    /// Working directory on the target (checkout, compose file, build context)
    #[serde(default)]
    pub work_dir: Option<String>,

    /// Locally built image tag
    #[serde(default)]
    pub image: Option<String>,

    /// HTTP endpoint probed by health checks
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Fingerprint of the definition this workload was created from
    pub fingerprint: String,

    /// Reused an existing workload instead of creating one
    #[serde(default)]
    pub adopted: bool,

    pub created_at: DateTime<Utc>,
}

/// Result of a health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Up,
    Down,
    /// The probe itself failed; not evidence that the workload is down
    Unknown,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Health::Up => "up",
            Health::Down => "down",
            Health::Unknown => "unknown",
        })
    }
}

/// Piece of remote state a teardown is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubResource {
    Container,
    ComposeProject,
    Volume,
    Image,
    BuildCache,
}

impl SubResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubResource::Container => "container",
            SubResource::ComposeProject => "compose_project",
            SubResource::Volume => "volume",
            SubResource::Image => "image",
            SubResource::BuildCache => "build_cache",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Removal {
    Removed,
    Retained { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownEntry {
    pub sub_resource: SubResource,
    #[serde(flatten)]
    pub removal: Removal,
}

/// What a teardown removed and what it left behind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub entries: Vec<TeardownEntry>,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed(&mut self, sub_resource: SubResource) {
        self.entries.push(TeardownEntry {
            sub_resource,
            removal: Removal::Removed,
        });
    }

    pub fn retained(&mut self, sub_resource: SubResource, reason: impl Into<String>) {
        self.entries.push(TeardownEntry {
            sub_resource,
            removal: Removal::Retained {
                reason: reason.into(),
            },
        });
    }

    pub fn outcome(&self, sub_resource: SubResource) -> Option<&Removal> {
        self.entries
            .iter()
            .find(|e| e.sub_resource == sub_resource)
            .map(|e| &e.removal)
    }

    /// Rewrite every retention reason through `scrub`
    pub fn map_reasons(mut self, scrub: impl Fn(&str) -> String) -> Self {
        for entry in &mut self.entries {
            if let Removal::Retained { reason } = &mut entry.removal {
                *reason = scrub(reason);
            }
        }
        self
    }

    pub fn is_complete(&self) -> bool {
        self.entries
            .iter()
            .all(|e| matches!(e.removal, Removal::Removed))
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|e| match &e.removal {
                Removal::Removed => format!("{}=removed", e.sub_resource.as_str()),
                Removal::Retained { .. } => format!("{}=retained", e.sub_resource.as_str()),
            })
            .collect();
        f.write_str(&parts.join(", "))
    }
}
