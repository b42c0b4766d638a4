//! File-backed store, one JSON document per record

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::errors::{OrchestratorError, StoreError};
use crate::filesys::dir::Dir;
use crate::models::project::Project;
use crate::models::resource::Resource;
use crate::models::server::Server;
use crate::storage::store::{check_id, Store};

/// Records under `<data_dir>/{resources,projects,servers}/<id>.json`
pub struct JsonStore {
    resources: Dir,
    projects: Dir,
    servers: Dir,
}

fn store_error(e: OrchestratorError) -> StoreError {
    match e {
        OrchestratorError::JsonError(e) => StoreError::Serde(e.to_string()),
        other => StoreError::Io(other.to_string()),
    }
}

impl JsonStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let root = Dir::new(data_dir);
        Self {
            resources: root.subdir("resources"),
            projects: root.subdir("projects"),
            servers: root.subdir("servers"),
        }
    }

    async fn write<T: Serialize>(dir: &Dir, id: &str, record: &T) -> Result<(), StoreError> {
        check_id(id)?;
        // Serialize first so a refused record leaves the old file untouched
        let contents =
            serde_json::to_vec_pretty(record).map_err(|e| StoreError::Serde(e.to_string()))?;
        dir.file(&format!("{}.json", id))
            .write_atomic(&contents)
            .await
            .map_err(store_error)
    }

    async fn read<T: DeserializeOwned>(
        dir: &Dir,
        kind: &'static str,
        id: &str,
    ) -> Result<T, StoreError> {
        check_id(id)?;
        let file = dir.file(&format!("{}.json", id));
        if !file.exists().await {
            return Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        file.read_json().await.map_err(store_error)
    }

    /// Every readable record; unreadable files are skipped with a warning
    async fn read_all<T: DeserializeOwned>(dir: &Dir) -> Result<Vec<T>, StoreError> {
        let files = dir.list_files("json").await.map_err(store_error)?;
        let mut records = Vec::with_capacity(files.len());
        for path in files {
            match crate::filesys::file::File::new(&path).read_json().await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn load_resource(&self, id: &str) -> Result<Resource, StoreError> {
        Self::read(&self.resources, "resource", id).await
    }

    async fn save_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        Self::write(&self.resources, &resource.id, resource).await
    }

    async fn delete_resource(&self, id: &str) -> Result<(), StoreError> {
        check_id(id)?;
        self.resources
            .file(&format!("{}.json", id))
            .delete()
            .await
            .map_err(store_error)
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        Self::read_all(&self.resources).await
    }

    async fn load_project(&self, id: &str) -> Result<Project, StoreError> {
        Self::read(&self.projects, "project", id).await
    }

    async fn save_project(&self, project: &Project) -> Result<(), StoreError> {
        Self::write(&self.projects, &project.id, project).await
    }

    async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        Self::read_all(&self.projects).await
    }

    async fn load_server(&self, id: &str) -> Result<Server, StoreError> {
        Self::read(&self.servers, "server", id).await
    }

    async fn save_server(&self, server: &Server) -> Result<(), StoreError> {
        Self::write(&self.servers, &server.id, server).await
    }

    async fn list_servers(&self) -> Result<Vec<Server>, StoreError> {
        Self::read_all(&self.servers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_ids_never_touch_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        assert!(matches!(
            store.load_resource("../etc/passwd").await,
            Err(StoreError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store
            .save_server(&Server::local("s1", "edge"))
            .await
            .unwrap();
        std::fs::write(dir.path().join("servers").join("bad.json"), "{").unwrap();

        let servers = store.list_servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, "s1");
    }
}
