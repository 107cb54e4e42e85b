//! Local filesystem storage implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{Document, RunState};
use crate::storage::{RunGuard, SyncStore};

/// Name of the per-site lock file.
const LOCK_FILE: &str = ".sitesync.lock";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root_dir: PathBuf,
}

impl LocalStore {
    /// Create a new LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Directory holding everything for one site.
    pub fn site_dir(&self, site: &str) -> PathBuf {
        self.root_dir.join(site)
    }

    fn state_path(&self, site: &str) -> PathBuf {
        self.site_dir(site).join("state.json")
    }

    fn document_path(&self, site: &str, slug: &str) -> PathBuf {
        self.pages_dir(site).join(Document::file_name(slug))
    }

    fn index_path(&self, site: &str) -> PathBuf {
        self.site_dir(site).join("SKILL.md")
    }

    /// Ensure the parent directory of a path exists.
    async fn ensure_dir(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &PathBuf, bytes: &[u8]) -> Result<()> {
        self.ensure_dir(path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read bytes, returning None if the file doesn't exist.
    async fn read_bytes(&self, path: &PathBuf) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, path: &PathBuf, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(path, &bytes).await
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &PathBuf) -> Result<Option<T>> {
        match self.read_bytes(path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SyncStore for LocalStore {
    async fn acquire_lock(&self, site: &str) -> Result<RunGuard> {
        let dir = self.site_dir(site);
        tokio::fs::create_dir_all(&dir).await?;

        let lock_path = dir.join(LOCK_FILE);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => Ok(RunGuard::held(lock_path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(AppError::RunInProgress {
                    site: site.to_string(),
                })
            }
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn load_state(&self, site: &str) -> Result<Option<RunState>> {
        self.read_json(&self.state_path(site)).await
    }

    async fn save_state(&self, site: &str, state: &RunState) -> Result<()> {
        self.write_json(&self.state_path(site), state).await
    }

    async fn write_document(&self, site: &str, slug: &str, content: &str) -> Result<()> {
        self.write_bytes(&self.document_path(site, slug), content.as_bytes())
            .await
    }

    async fn delete_document(&self, site: &str, slug: &str) -> Result<()> {
        match tokio::fs::remove_file(self.document_path(site, slug)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn write_index(&self, site: &str, content: &str) -> Result<()> {
        self.write_bytes(&self.index_path(site), content.as_bytes())
            .await
    }

    fn pages_dir(&self, site: &str) -> PathBuf {
        self.site_dir(site).join("pages")
    }
}
