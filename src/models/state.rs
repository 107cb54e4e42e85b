// src/models/state.rs

//! Durable per-site run state.
//!
//! One `RunState` record per site is the sole source of truth for
//! incremental decisions: which resources are known, how fresh they are,
//! how many consecutive discovery runs have missed them, and whether a
//! batch job submitted by a previous invocation is still awaiting
//! reconciliation. It is persisted as JSON and must survive the process
//! being killed at any point.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle status of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Present in the last successful discovery; document on disk.
    Active,
    /// Missed by one or more discoveries, below the deletion threshold.
    /// The document stays on disk while the miss counter climbs.
    PendingDelete,
    /// Reached the deletion threshold. Terminal; the record is dropped.
    Deleted,
}

/// One tracked resource within a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Canonical source URL, unique within the site.
    pub identifier: String,

    /// Filesystem-safe document name, derived from the identifier.
    pub slug: String,

    /// Freshness fingerprint from the last completed fetch. `None` forces
    /// a re-fetch on the next run.
    #[serde(default)]
    pub fingerprint: Option<String>,

    /// Consecutive successful discoveries in which this identifier was
    /// absent. Reset to 0 the moment it reappears.
    #[serde(default)]
    pub miss_count: u32,

    /// Current lifecycle status.
    pub status: ResourceStatus,

    /// When this resource last had a job result reconciled.
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// A submitted-but-not-yet-reconciled batch job.
///
/// Persisted before the first poll so that a process killed right after
/// submission resumes the same job instead of resubmitting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightJob {
    /// Opaque job handle from the batch endpoint.
    pub job_id: String,

    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,

    /// The exact identifier set submitted with the job.
    pub identifiers: Vec<String>,

    /// Last-seen pagination cursor, when result delivery was interrupted
    /// mid-page-chain.
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Durable record for one site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Format version for forward-compatible reloads.
    #[serde(default)]
    pub version: u32,

    /// All known resources, keyed by identifier.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,

    /// Timestamp of the last run that completed cleanly.
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,

    /// Set between job submission and full reconciliation; cleared only
    /// once reconciliation has committed.
    #[serde(default)]
    pub in_flight: Option<InFlightJob>,
}

/// Current state format version.
pub const STATE_VERSION: u32 = 1;

impl RunState {
    /// Create an empty state record.
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            ..Self::default()
        }
    }

    /// All known identifiers, sorted.
    pub fn identifiers(&self) -> BTreeSet<String> {
        self.resources.keys().cloned().collect()
    }

    /// Number of resources currently considered active.
    pub fn active_count(&self) -> usize {
        self.resources
            .values()
            .filter(|r| r.status == ResourceStatus::Active)
            .count()
    }
}

/// Fingerprint a freshness signal reported by discovery.
pub fn signal_fingerprint(signal: &str) -> String {
    hash_with_tag("signal", signal)
}

/// Fingerprint fetched content, used when discovery carries no signal.
pub fn content_fingerprint(content: &str) -> String {
    hash_with_tag("content", content)
}

// The tag keeps signal hashes and content hashes from ever comparing
// equal, since they fingerprint different things.
fn hash_with_tag(tag: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
