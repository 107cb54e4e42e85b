// src/models/mod.rs

//! Domain models for the sync pipeline.
//!
//! This module contains all data structures used throughout the
//! application, organized by their primary purpose.

mod config;
mod document;
mod report;
mod site;
mod state;

// Re-export all public types
pub use config::{ApiConfig, Config, DiscoveryConfig, OutputConfig, SyncConfig};
pub use document::{Document, clean_markdown};
pub use report::{RunReport, RunStatus};
pub use site::SiteInput;
pub use state::{
    InFlightJob, ResourceRecord, ResourceStatus, RunState, STATE_VERSION, content_fingerprint,
    signal_fingerprint,
};
