//! Project models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{derive_project_status, ResourceStatus};
use crate::models::environment::{Environment, EnvironmentVariable, SecretSlot, VariableValue};

/// A group of resources owned by one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub owner_id: String,
    pub server_id: String,

    /// Derived from the resources, see [`Project::refresh_status`]
    status: ResourceStatus,

    #[serde(default)]
    pub environments: Vec<Environment>,

    #[serde(default)]
    pub resource_ids: Vec<String>,

    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        owner_id: impl Into<String>,
        server_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            owner_id: owner_id.into(),
            server_id: server_id.into(),
            status: ResourceStatus::Created,
            environments: Vec::new(),
            resource_ids: Vec::new(),
            environment_variables: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    /// Recompute the aggregate status, returns true when it changed
    pub fn refresh_status<I>(&mut self, statuses: I) -> bool
    where
        I: IntoIterator<Item = ResourceStatus>,
    {
        let next = derive_project_status(statuses);
        if next == self.status {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.name == name)
    }

    pub fn attach(&mut self, resource_id: &str) {
        if !self.resource_ids.iter().any(|id| id == resource_id) {
            self.resource_ids.push(resource_id.to_string());
            self.updated_at = Utc::now();
        }
    }

    pub fn detach(&mut self, resource_id: &str) {
        self.resource_ids.retain(|id| id != resource_id);
        self.updated_at = Utc::now();
    }

    /// Secret slots of the project and of every environment
    pub fn secret_slots_mut(&mut self) -> Vec<&mut SecretSlot> {
        let environments = self.environments.iter_mut().flat_map(|e| e.variables.iter_mut());
        self.environment_variables
            .iter_mut()
            .chain(environments)
            .filter_map(|v| match &mut v.value {
                VariableValue::Secret(slot) => Some(slot),
                VariableValue::Plain(_) => None,
            })
            .collect()
    }
}
