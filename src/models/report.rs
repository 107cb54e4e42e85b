// src/models/report.rs

//! Per-run outcome reporting.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Discovery, fetching and reconciliation all committed.
    Completed,
    /// The batch job exceeded its poll budget and was abandoned; the
    /// affected resources keep their previous documents.
    TimedOut,
    /// The run was cancelled mid-poll; the in-flight job remains
    /// resumable by the next invocation.
    Cancelled,
}

/// Counters and diagnostics for one sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Site domain this run operated on.
    pub site: String,

    /// Terminal status.
    pub status: RunStatus,

    /// Documents created for resources seen for the first time.
    pub created: usize,

    /// Documents overwritten with changed content.
    pub updated: usize,

    /// Documents (and records) removed by the deletion policy.
    pub deleted: usize,

    /// Resources confirmed fresh and skipped.
    pub skipped_unchanged: usize,

    /// Resources that failed to update this run and keep their prior state.
    pub failed: usize,

    /// Where the finalized document set lives.
    pub docs_dir: PathBuf,

    /// Job handle left in flight, when the run ended resumable.
    pub resumable_job: Option<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Total resources whose state advanced this run.
    pub fn changed_count(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}
