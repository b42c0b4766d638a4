//! In-memory store

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::StoreError;
use crate::models::project::Project;
use crate::models::resource::Resource;
use crate::models::server::Server;
use crate::storage::store::{check_id, Store};

type Table = RwLock<BTreeMap<String, String>>;

/// Keeps serialized records in memory, with the same serialization rules as
/// the file-backed store
#[derive(Default)]
pub struct MemoryStore {
    resources: Table,
    projects: Table,
    servers: Table,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn put<T: Serialize>(table: &Table, id: &str, record: &T) -> Result<(), StoreError> {
    check_id(id)?;
    let json = serde_json::to_string(record).map_err(|e| StoreError::Serde(e.to_string()))?;
    let mut table = table.write().unwrap_or_else(|e| e.into_inner());
    table.insert(id.to_string(), json);
    Ok(())
}

fn get<T: DeserializeOwned>(table: &Table, kind: &'static str, id: &str) -> Result<T, StoreError> {
    check_id(id)?;
    let table = table.read().unwrap_or_else(|e| e.into_inner());
    let json = table.get(id).ok_or_else(|| StoreError::NotFound {
        kind,
        id: id.to_string(),
    })?;
    serde_json::from_str(json).map_err(|e| StoreError::Serde(e.to_string()))
}

fn all<T: DeserializeOwned>(table: &Table) -> Result<Vec<T>, StoreError> {
    let table = table.read().unwrap_or_else(|e| e.into_inner());
    table
        .values()
        .map(|json| serde_json::from_str(json).map_err(|e| StoreError::Serde(e.to_string())))
        .collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_resource(&self, id: &str) -> Result<Resource, StoreError> {
        get(&self.resources, "resource", id)
    }

    async fn save_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        put(&self.resources, &resource.id, resource)
    }

    async fn delete_resource(&self, id: &str) -> Result<(), StoreError> {
        let mut table = self.resources.write().unwrap_or_else(|e| e.into_inner());
        table.remove(id);
        Ok(())
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        all(&self.resources)
    }

    async fn load_project(&self, id: &str) -> Result<Project, StoreError> {
        get(&self.projects, "project", id)
    }

    async fn save_project(&self, project: &Project) -> Result<(), StoreError> {
        put(&self.projects, &project.id, project)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        all(&self.projects)
    }

    async fn load_server(&self, id: &str) -> Result<Server, StoreError> {
        get(&self.servers, "server", id)
    }

    async fn save_server(&self, server: &Server) -> Result<(), StoreError> {
        put(&self.servers, &server.id, server)
    }

    async fn list_servers(&self) -> Result<Vec<Server>, StoreError> {
        all(&self.servers)
    }
}
