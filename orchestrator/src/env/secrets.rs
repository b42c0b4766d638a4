//! Secret storage
//!
//! Secret values live only here. Everything else holds a [`SecretRef`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::errors::{OrchestratorError, SecretStoreError};
use crate::filesys::file::File;
use crate::models::environment::SecretRef;

/// Storage for secret values
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, reference: &SecretRef) -> Result<SecretString, SecretStoreError>;

    async fn put(&self, value: &SecretString) -> Result<SecretRef, SecretStoreError>;

    /// Deleting an unknown reference is not an error
    async fn delete(&self, reference: &SecretRef) -> Result<(), SecretStoreError>;
}

/// In-memory secret store
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<SecretRef, SecretString>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, reference: &SecretRef) -> Result<SecretString, SecretStoreError> {
        let secrets = self.secrets.read().unwrap_or_else(|e| e.into_inner());
        secrets
            .get(reference)
            .map(|s| SecretString::from(s.expose_secret().to_owned()))
            .ok_or_else(|| SecretStoreError::NotFound(reference.to_string()))
    }

    async fn put(&self, value: &SecretString) -> Result<SecretRef, SecretStoreError> {
        let reference = SecretRef::generate();
        let mut secrets = self.secrets.write().unwrap_or_else(|e| e.into_inner());
        secrets.insert(
            reference.clone(),
            SecretString::from(value.expose_secret().to_owned()),
        );
        Ok(reference)
    }

    async fn delete(&self, reference: &SecretRef) -> Result<(), SecretStoreError> {
        let mut secrets = self.secrets.write().unwrap_or_else(|e| e.into_inner());
        secrets.remove(reference);
        Ok(())
    }
}

/// Secret store backed by a single owner-only JSON file.
///
/// The file is read on every lookup and replaced atomically on every write.
pub struct FileSecretStore {
    file: File,
    write_lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: File::new(path),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, SecretStoreError> {
        if !self.file.exists().await {
            return Ok(BTreeMap::new());
        }
        self.file.read_json().await.map_err(|e| match e {
            OrchestratorError::JsonError(e) => SecretStoreError::Corrupt(e.to_string()),
            other => SecretStoreError::Io(other.to_string()),
        })
    }

    async fn persist(&self, secrets: &BTreeMap<String, String>) -> Result<(), SecretStoreError> {
        let contents =
            serde_json::to_vec(secrets).map_err(|e| SecretStoreError::Corrupt(e.to_string()))?;
        self.file
            .write_private(&contents)
            .await
            .map_err(|e| SecretStoreError::Io(e.to_string()))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, reference: &SecretRef) -> Result<SecretString, SecretStoreError> {
        let mut secrets = self.load().await?;
        secrets
            .remove(reference.as_str())
            .map(SecretString::from)
            .ok_or_else(|| SecretStoreError::NotFound(reference.to_string()))
    }

    async fn put(&self, value: &SecretString) -> Result<SecretRef, SecretStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut secrets = self.load().await?;
        let reference = SecretRef::generate();
        secrets.insert(
            reference.as_str().to_string(),
            value.expose_secret().to_owned(),
        );
        self.persist(&secrets).await?;
        Ok(reference)
    }

    async fn delete(&self, reference: &SecretRef) -> Result<(), SecretStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut secrets = self.load().await?;
        if secrets.remove(reference.as_str()).is_some() {
            self.persist(&secrets).await?;
        }
        Ok(())
    }
}
