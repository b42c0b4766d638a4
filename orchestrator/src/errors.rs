//! Error types for the orchestrator

use std::time::Duration;

use thiserror::Error;

use crate::deploy::fsm::ResourceStatus;
use crate::models::workload::TeardownReport;

/// A resource definition was rejected before anything was created
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Provisioning failed for a reason the caller can fix and resubmit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("source checkout failed: {0}")]
    Source(String),

    #[error("build failed (exit code {status:?})")]
    Build { status: Option<i32>, log: String },

    #[error("workload failed to start: {0}")]
    Runtime(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("secret store error: {0}")]
    Secret(String),

    #[error("remote execution failed: {0}")]
    Remote(String),
}

impl ProvisionError {
    /// Rewrite every message through `scrub`, including captured build logs
    pub fn map_text(self, scrub: impl Fn(&str) -> String) -> Self {
        match self {
            ProvisionError::Source(m) => ProvisionError::Source(scrub(&m)),
            ProvisionError::Build { status, log } => ProvisionError::Build {
                status,
                log: scrub(&log),
            },
            ProvisionError::Runtime(m) => ProvisionError::Runtime(scrub(&m)),
            ProvisionError::Config(m) => ProvisionError::Config(scrub(&m)),
            ProvisionError::Secret(m) => ProvisionError::Secret(scrub(&m)),
            ProvisionError::Remote(m) => ProvisionError::Remote(scrub(&m)),
        }
    }

    /// Message stored on the resource, with the build log tail when there is one
    pub fn detail(&self) -> String {
        match self {
            ProvisionError::Build { log, .. } if !log.is_empty() => {
                format!("{}\n{}", self, log)
            }
            _ => self.to_string(),
        }
    }
}

/// Teardown left some sub-resources behind
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("teardown incomplete: {report}")]
pub struct TeardownError {
    pub report: TeardownReport,
}

/// The effective environment could not be built
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("secret for variable '{key}' is missing from the secret store")]
    MissingSecret { key: String },

    #[error("secret store unavailable while resolving '{key}': {message}")]
    Store { key: String, message: String },

    #[error("environment '{name}' does not exist in project '{project}'")]
    UnknownEnvironment { name: String, project: String },
}

/// No deploy target is available for a resource
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NoTargetError {
    #[error("server '{0}' is not registered")]
    Unknown(String),

    #[error("server '{0}' is unreachable")]
    Unreachable(String),
}

/// Transport-level failure talking to a deploy target
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("target unreachable: {0}")]
    Unreachable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("secret '{0}' not found")]
    NotFound(String),

    #[error("secret store IO error: {0}")]
    Io(String),

    #[error("secret store is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid record id '{0}'")]
    InvalidId(String),

    #[error("store IO error: {0}")]
    Io(String),

    #[error("store serialization error: {0}")]
    Serde(String),
}

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    ValidationError(#[from] ValidationError),

    #[error(transparent)]
    ProvisionError(#[from] ProvisionError),

    #[error(transparent)]
    TeardownError(#[from] TeardownError),

    #[error(transparent)]
    ResolutionError(#[from] ResolutionError),

    #[error(transparent)]
    NoTargetError(#[from] NoTargetError),

    #[error(transparent)]
    SecretStoreError(#[from] SecretStoreError),

    #[error(transparent)]
    StoreError(#[from] StoreError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("resource {0} already has an operation in flight")]
    InFlight(String),

    #[error("invalid transition: {from} on {event}")]
    InvalidTransition {
        from: ResourceStatus,
        event: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
