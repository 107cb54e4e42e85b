// src/lib.rs

//! sitesync: incremental website-to-document-set synchronizer.
//!
//! Discovers the pages of a site via a remote listing endpoint, submits
//! only the new or changed subset to a remote batch scrape job, polls
//! that job to completion, and reconciles the results into a durable,
//! versioned local document set.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
