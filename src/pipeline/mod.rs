//! The synchronization engine.
//!
//! - `diff`: classify discovered resources against Run State
//! - `orchestrator`: drive one remote batch job to a terminal state
//! - `reconcile`: apply results and deletion hysteresis to durable state
//! - `assemble`: render the site index document
//! - `run`: the `run_site` entry point sequencing a full run

pub mod assemble;
pub mod diff;
pub mod orchestrator;
pub mod reconcile;
pub mod run;

#[cfg(test)]
pub(crate) mod testutil;

pub use diff::{DiffEngine, DiffOutcome};
pub use orchestrator::{JobDisposition, JobOrchestrator, JobOutcome};
pub use reconcile::{ReconcileTally, Reconciler};
pub use run::{RunOptions, run_site, run_sites};
