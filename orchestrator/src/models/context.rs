//! Per-request context

use std::fmt;

/// Identifies who asked for an operation; passed explicitly into every
/// orchestrator call and attached to its log lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub actor: Option<String>,
}

impl RequestContext {
    pub fn new(actor: Option<String>) -> Self {
        Self {
            request_id: crate::utils::generate_uuid(),
            actor,
        }
    }

    /// Context for operations the orchestrator starts on its own
    pub fn system() -> Self {
        Self {
            request_id: crate::utils::generate_uuid(),
            actor: Some("system".to_string()),
        }
    }

    pub fn actor(&self) -> &str {
        self.actor.as_deref().unwrap_or("anonymous")
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.request_id, self.actor())
    }
}
