//! Resource definitions as submitted by callers
//!
//! A definition is the loose, all-optional record the API receives. It only
//! becomes a [`Resource`](crate::models::resource::Resource) after
//! [`validate`](crate::models::validate::validate) has checked that exactly
//! the payload of the declared type is present.

use std::fmt;

use serde::Deserialize;

use crate::models::environment::EnvironmentKind;

/// A variable as submitted; secret values are still plaintext here
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDefinition {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub is_secret: bool,
}

impl VariableDefinition {
    pub fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            is_secret: false,
        }
    }

    pub fn secret(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            is_secret: true,
        }
    }
}

impl fmt::Debug for VariableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = if self.is_secret {
            "[REDACTED]"
        } else {
            self.value.as_str()
        };
        f.debug_struct("VariableDefinition")
            .field("key", &self.key)
            .field("value", &value)
            .field("is_secret", &self.is_secret)
            .finish()
    }
}

/// Resource definition
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub project_id: String,
    pub server_id: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub environment_variables: Vec<VariableDefinition>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub health_path: Option<String>,

    // Database
    #[serde(default)]
    pub database_type: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub admin_email: Option<String>,
    #[serde(default)]
    pub initial_database: Option<String>,
    #[serde(default)]
    pub db_password: Option<String>,

    // Service
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub docker_compose_content: Option<String>,
    #[serde(default)]
    pub docker_image_url: Option<String>,

    // Git checkout
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub dockerfile_path: Option<String>,
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("project_id", &self.project_id)
            .field("server_id", &self.server_id)
            .field("environment", &self.environment)
            .field("environment_variables", &self.environment_variables)
            .field("port", &self.port)
            .field("database_type", &self.database_type)
            .field("database_name", &self.database_name)
            .field(
                "db_password",
                &self.db_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("service_type", &self.service_type)
            .field("repository_url", &self.repository_url)
            .field("docker_image_url", &self.docker_image_url)
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

/// A named environment as submitted with its project
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDefinition {
    pub name: String,
    pub kind: EnvironmentKind,
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
}

/// Project definition
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner_id: String,
    pub server_id: String,
    #[serde(default)]
    pub environment_variables: Vec<VariableDefinition>,
    #[serde(default)]
    pub environments: Vec<EnvironmentDefinition>,
}
