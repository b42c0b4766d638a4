//! Finite State Machine for resource status

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// Tracker settings
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Timeout for provisioning operations
    pub provision_timeout: Duration,

    /// Timeout for teardown operations
    pub teardown_timeout: Duration,

    /// Health check retry budget
    pub health: HealthPolicy,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            provision_timeout: Duration::from_secs(300),
            teardown_timeout: Duration::from_secs(60),
            health: HealthPolicy::default(),
        }
    }
}

/// Bounded retry budget for health checks
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Number of probes before giving up
    pub attempts: u32,

    /// Delay before the second probe, doubled for each further probe
    pub base_delay: Duration,

    /// Upper bound for a single probe
    pub probe_timeout: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Resource status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Definition accepted, nothing provisioned yet
    Created,

    /// Provisioning in progress
    Deploying,

    /// Provisioned and healthy
    Running,

    /// Torn down on request
    Stopped,

    /// Provisioning rejected the definition
    Failed,

    /// Infrastructure anomaly
    Error,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Created => "created",
            ResourceStatus::Deploying => "deploying",
            ResourceStatus::Running => "running",
            ResourceStatus::Stopped => "stopped",
            ResourceStatus::Failed => "failed",
            ResourceStatus::Error => "error",
        }
    }

    /// Rank used to derive a project's aggregate status, higher is worse
    pub fn severity(&self) -> u8 {
        match self {
            ResourceStatus::Running => 0,
            ResourceStatus::Created => 1,
            ResourceStatus::Stopped => 2,
            ResourceStatus::Deploying => 3,
            ResourceStatus::Failed => 4,
            ResourceStatus::Error => 5,
        }
    }

    /// Statuses only left through an explicit user action
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResourceStatus::Stopped | ResourceStatus::Failed | ResourceStatus::Error
        )
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Provision request accepted
    Deploy,

    /// Explicit redeploy, allowed from any status
    Redeploy,

    /// First health check came back Up
    Healthy,

    /// Provisioner rejected the definition
    ProvisionFailed(String),

    /// Health stayed down or never came up within the retry budget
    Unhealthy(String),

    /// Provisioning exceeded its timeout
    TimedOut(String),

    /// Explicit stop, teardown succeeded
    Stop,
}

impl StatusEvent {
    fn name(&self) -> &'static str {
        match self {
            StatusEvent::Deploy => "deploy",
            StatusEvent::Redeploy => "redeploy",
            StatusEvent::Healthy => "healthy",
            StatusEvent::ProvisionFailed(_) => "provision_failed",
            StatusEvent::Unhealthy(_) => "unhealthy",
            StatusEvent::TimedOut(_) => "timed_out",
            StatusEvent::Stop => "stop",
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            StatusEvent::ProvisionFailed(r)
            | StatusEvent::Unhealthy(r)
            | StatusEvent::TimedOut(r) => Some(r),
            _ => None,
        }
    }
}

/// An accepted state change. Only [`ResourceFsm::process`] produces one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    from: ResourceStatus,
    to: ResourceStatus,
    event: &'static str,
    error: Option<String>,
}

impl Transition {
    pub fn from(&self) -> ResourceStatus {
        self.from
    }

    pub fn to(&self) -> ResourceStatus {
        self.to
    }

    pub fn event(&self) -> &'static str {
        self.event
    }

    /// Error message the resource should carry after this transition
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Resource status FSM
#[derive(Debug, Clone)]
pub struct ResourceFsm {
    status: ResourceStatus,
}

impl ResourceFsm {
    /// Create a new FSM in created state
    pub fn new() -> Self {
        Self::from_status(ResourceStatus::Created)
    }

    /// Rehydrate from a stored status
    pub fn from_status(status: ResourceStatus) -> Self {
        Self { status }
    }

    /// Get current status
    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: StatusEvent) -> Result<Transition, OrchestratorError> {
        use ResourceStatus::*;

        let next = match (self.status, &event) {
            (_, StatusEvent::Redeploy) => Deploying,

            // From Created
            (Created, StatusEvent::Deploy) => Deploying,

            // From Deploying
            (Deploying, StatusEvent::Healthy) => Running,
            (Deploying, StatusEvent::ProvisionFailed(_)) => Failed,
            (Deploying, StatusEvent::Unhealthy(_)) => Error,
            (Deploying, StatusEvent::TimedOut(_)) => Error,

            // From Running
            (Running, StatusEvent::Stop) => Stopped,
            (Running, StatusEvent::Unhealthy(_)) => Error,

            // Invalid transitions
            (status, event) => {
                return Err(OrchestratorError::InvalidTransition {
                    from: status,
                    event: event.name().to_string(),
                });
            }
        };

        let transition = Transition {
            from: self.status,
            to: next,
            event: event.name(),
            error: event.reason().map(str::to_string),
        };
        self.status = next;
        Ok(transition)
    }
}

impl Default for ResourceFsm {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate status of a project from the statuses of its resources.
///
/// The most severe status wins. A deploying resource shows through only
/// while nothing is failed or errored, so the aggregate never drops below
/// the worst resource.
pub fn derive_project_status<I>(statuses: I) -> ResourceStatus
where
    I: IntoIterator<Item = ResourceStatus>,
{
    statuses
        .into_iter()
        .max_by_key(ResourceStatus::severity)
        .unwrap_or(ResourceStatus::Created)
}
