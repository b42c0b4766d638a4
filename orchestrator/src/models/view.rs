//! API projections of resources and projects

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::deploy::fsm::ResourceStatus;
use crate::models::environment::{EnvironmentKind, EnvironmentVariable, VariableValue};
use crate::models::project::Project;
use crate::models::resource::{
    DatabaseEngine, GitSource, Resource, ResourceKind, ServiceEngine, ServiceSource, StatusChange,
};
use crate::models::workload::ProvisionerKind;

/// Variable as shown to callers, secret values are always null
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableView {
    pub key: String,
    pub value: Option<String>,
    pub is_secret: bool,
}

impl From<&EnvironmentVariable> for VariableView {
    fn from(variable: &EnvironmentVariable) -> Self {
        match &variable.value {
            VariableValue::Plain(value) => VariableView {
                key: variable.key.clone(),
                value: Some(value.clone()),
                is_secret: false,
            },
            VariableValue::Secret(_) => VariableView {
                key: variable.key.clone(),
                value: None,
                is_secret: true,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseView {
    pub engine: DatabaseEngine,
    pub database_name: String,
    pub admin_email: String,
    pub initial_database: Option<String>,
    pub has_password: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    pub engine: ServiceEngine,
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadView {
    pub provisioner: ProvisionerKind,
    pub workload: String,
    pub endpoint: Option<String>,
    pub adopted: bool,
    pub created_at: DateTime<Utc>,
}

/// Resource view returned by status queries
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceView {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub project_id: String,
    pub server_id: String,
    pub environment: Option<String>,
    pub status: ResourceStatus,
    pub error: Option<String>,
    pub port: Option<u16>,
    pub health_path: Option<String>,
    pub environment_variables: Vec<VariableView>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<GitSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<WorkloadView>,

    pub history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Resource> for ResourceView {
    fn from(resource: &Resource) -> Self {
        let environment_variables = resource
            .environment_variables
            .iter()
            .map(VariableView::from)
            .collect();

        let database = match &resource.kind {
            ResourceKind::Database(spec) => Some(DatabaseView {
                engine: spec.engine,
                database_name: spec.database_name.clone(),
                admin_email: spec.admin_email.clone(),
                initial_database: spec.initial_database.clone(),
                has_password: spec.password.is_some(),
            }),
            _ => None,
        };

        let service = match &resource.kind {
            ResourceKind::Service(spec) => Some(match &spec.source {
                ServiceSource::Repository(_) => ServiceView {
                    engine: spec.engine,
                    source: "repository",
                    image: None,
                },
                ServiceSource::Compose { .. } => ServiceView {
                    engine: spec.engine,
                    source: "compose",
                    image: None,
                },
                ServiceSource::Image { reference } => ServiceView {
                    engine: spec.engine,
                    source: "image",
                    image: Some(reference.clone()),
                },
            }),
            _ => None,
        };

        let workload = resource.handle.as_ref().map(|h| WorkloadView {
            provisioner: h.provisioner,
            workload: h.workload.clone(),
            endpoint: h.endpoint.clone(),
            adopted: h.adopted,
            created_at: h.created_at,
        });

        ResourceView {
            id: resource.id.clone(),
            name: resource.name.clone(),
            kind: resource.kind.type_name(),
            project_id: resource.project_id.clone(),
            server_id: resource.server_id.clone(),
            environment: resource.environment.clone(),
            status: resource.status(),
            error: resource.error().map(str::to_string),
            port: resource.port,
            health_path: resource.health_path.clone(),
            environment_variables,
            database,
            service,
            repository: resource.kind.git_source().cloned(),
            workload,
            history: resource.history().to_vec(),
            created_at: resource.created_at,
            updated_at: resource.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentView {
    pub name: String,
    pub kind: EnvironmentKind,
    pub variables: Vec<VariableView>,
}

/// Project view with its aggregate status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner_id: String,
    pub server_id: String,
    pub status: ResourceStatus,
    pub resource_ids: Vec<String>,
    pub environment_variables: Vec<VariableView>,
    pub environments: Vec<EnvironmentView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Project> for ProjectView {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            description: project.description.clone(),
            owner_id: project.owner_id.clone(),
            server_id: project.server_id.clone(),
            status: project.status(),
            resource_ids: project.resource_ids.clone(),
            environment_variables: project
                .environment_variables
                .iter()
                .map(VariableView::from)
                .collect(),
            environments: project
                .environments
                .iter()
                .map(|e| EnvironmentView {
                    name: e.name.clone(),
                    kind: e.kind,
                    variables: e.variables.iter().map(VariableView::from).collect(),
                })
                .collect(),
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}
