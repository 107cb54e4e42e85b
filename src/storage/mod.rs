//! Storage abstractions for run state and document persistence.
//!
//! ## Directory Structure
//!
//! ```text
//! {root}/
//! └── {domain}/
//!     ├── state.json        # Durable Run State for the site
//!     ├── SKILL.md          # Rendered index document
//!     ├── .sitesync.lock    # Run-level lock, held for a run's duration
//!     └── pages/            # One document per active resource
//!         └── {slug}.md
//! ```
//!
//! All writes are atomic (temp file + rename), so a crash at any point
//! leaves every file either absent or fully written.

pub mod local;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::RunState;

// Re-export for convenience
pub use local::LocalStore;

/// Guard for a site's run-level lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct RunGuard {
    lock_path: Option<PathBuf>,
}

impl RunGuard {
    /// Guard holding an on-disk lock file.
    pub fn held(lock_path: PathBuf) -> Self {
        Self {
            lock_path: Some(lock_path),
        }
    }

    /// Guard for stores without a real lock (tests, in-memory backends).
    pub fn noop() -> Self {
        Self { lock_path: None }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(path) = self.lock_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to release run lock {}: {}", path.display(), e);
            }
        }
    }
}

/// Trait for sync storage backends.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Take the run-level lock for a site. Fails with `RunInProgress`
    /// when another run already holds it.
    async fn acquire_lock(&self, site: &str) -> Result<RunGuard>;

    /// Load the persisted Run State, or `None` on first contact.
    async fn load_state(&self, site: &str) -> Result<Option<RunState>>;

    /// Persist the Run State atomically.
    async fn save_state(&self, site: &str, state: &RunState) -> Result<()>;

    /// Write one document atomically.
    async fn write_document(&self, site: &str, slug: &str, content: &str) -> Result<()>;

    /// Delete one document. Deleting an absent document is not an error.
    async fn delete_document(&self, site: &str, slug: &str) -> Result<()>;

    /// Write the site index document atomically.
    async fn write_index(&self, site: &str, content: &str) -> Result<()>;

    /// Location of the site's document set.
    fn pages_dir(&self, site: &str) -> PathBuf;
}
