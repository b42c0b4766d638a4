//! Persistent record storage

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::project::Project;
use crate::models::resource::Resource;
use crate::models::server::Server;

/// Durable storage for resources, projects and servers.
///
/// Records are persisted in serialized form, so a resource still holding
/// unsealed secrets is refused.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_resource(&self, id: &str) -> Result<Resource, StoreError>;

    async fn save_resource(&self, resource: &Resource) -> Result<(), StoreError>;

    async fn delete_resource(&self, id: &str) -> Result<(), StoreError>;

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError>;

    async fn load_project(&self, id: &str) -> Result<Project, StoreError>;

    async fn save_project(&self, project: &Project) -> Result<(), StoreError>;

    async fn list_projects(&self) -> Result<Vec<Project>, StoreError>;

    async fn load_server(&self, id: &str) -> Result<Server, StoreError>;

    async fn save_server(&self, server: &Server) -> Result<(), StoreError>;

    async fn list_servers(&self) -> Result<Vec<Server>, StoreError>;
}

/// Record ids become file names, so only a safe alphabet is accepted
pub fn check_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Resources of one project
pub async fn project_resources(
    store: &dyn Store,
    project_id: &str,
) -> Result<Vec<Resource>, StoreError> {
    Ok(store
        .list_resources()
        .await?
        .into_iter()
        .filter(|r| r.project_id == project_id)
        .collect())
}
