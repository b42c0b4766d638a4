//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::OrchestratorError;

/// A file on the orchestrator host
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    pub async fn read_string(&self) -> Result<String, OrchestratorError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, OrchestratorError> {
        let contents = self.read_string().await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write to a sibling temp file, then rename over the target.
    ///
    /// Readers see either the old or the new contents, never a torn write.
    /// A target that is already owner-only stays owner-only.
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), OrchestratorError> {
        let private = self.is_private().await;
        self.replace(contents, private).await
    }

    /// Atomic write that leaves the file readable by its owner only
    pub async fn write_private(&self, contents: &[u8]) -> Result<(), OrchestratorError> {
        self.replace(contents, true).await
    }

    async fn replace(&self, contents: &[u8], private: bool) -> Result<(), OrchestratorError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = File::new(self.path.with_extension(format!(
            "tmp-{}",
            uuid::Uuid::new_v4().simple()
        )));

        let mut file = fs::File::create(temp.path()).await?;
        if private {
            temp.set_permissions_600().await?;
        }
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(temp.path(), &self.path).await {
            let _ = temp.delete().await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn delete(&self) -> Result<(), OrchestratorError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Set file permissions to owner-read/write only (0o600) on Unix.
    ///
    /// A no-op on non-Unix platforms.
    pub async fn set_permissions_600(&self) -> Result<(), OrchestratorError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }

    async fn is_private(&self) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = fs::metadata(&self.path).await {
                return meta.permissions().mode() & 0o077 == 0;
            }
        }
        false
    }
}
