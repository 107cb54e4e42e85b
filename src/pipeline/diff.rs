//! Diff calculation for incremental synchronization.
//!
//! Classifies the freshly discovered resource set against the persisted
//! Run State to decide what must be (re)fetched. The classification is
//! read-only: all state mutation happens in the reconciler after job
//! results are known.

use std::collections::{HashMap, HashSet};

use crate::error::{AppError, Result};
use crate::models::{RunState, signal_fingerprint};
use crate::services::DiscoveredPage;
use crate::utils::url_to_slug;

/// Disjoint classification of one discovery run.
///
/// Every discovered identifier lands in exactly one of `new`, `unchanged`
/// or `possibly_changed`; every known identifier absent from discovery
/// lands in `missing`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOutcome {
    /// In discovery, absent from Run State.
    pub new: Vec<String>,
    /// Known, and the discovery freshness signal matches the stored
    /// fingerprint. No re-fetch needed.
    pub unchanged: Vec<String>,
    /// Known, but the signal differs or is unavailable. Ambiguity lands
    /// here: favor re-fetch over staleness.
    pub possibly_changed: Vec<String>,
    /// Known, absent from discovery.
    pub missing: Vec<String>,
}

impl DiffOutcome {
    /// Identifiers that need a remote fetch, capped at `limit`.
    pub fn fetch_set(&self, limit: usize) -> Vec<String> {
        let mut set: Vec<String> = self
            .new
            .iter()
            .chain(self.possibly_changed.iter())
            .cloned()
            .collect();
        set.sort();
        set.truncate(limit);
        set
    }

    /// Whether anything at all changed relative to the Run State.
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.possibly_changed.is_empty() || !self.missing.is_empty()
    }
}

/// Calculator for classifying a discovered set against Run State.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine {
    /// Reclassify UNCHANGED as POSSIBLY-CHANGED for the whole run.
    force_refresh: bool,
}

impl DiffEngine {
    /// Create a diff engine honoring the stored fingerprints.
    pub fn new() -> Self {
        Self {
            force_refresh: false,
        }
    }

    /// Create a diff engine that re-fetches everything discovered.
    pub fn force_refresh() -> Self {
        Self {
            force_refresh: true,
        }
    }

    /// Classify `discovered` against `state`.
    ///
    /// Fails with `SlugCollision` when two distinct discovered
    /// identifiers normalize to the same document slug; neither can be
    /// written without clobbering the other, so the run aborts before
    /// any submission.
    pub fn classify(&self, discovered: &[DiscoveredPage], state: &RunState) -> Result<DiffOutcome> {
        check_slug_collisions(discovered)?;

        let mut outcome = DiffOutcome::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(discovered.len());

        for page in discovered {
            if !seen.insert(page.url.as_str()) {
                continue;
            }

            let Some(record) = state.resources.get(&page.url) else {
                outcome.new.push(page.url.clone());
                continue;
            };

            let fresh = match (&page.last_modified, &record.fingerprint) {
                (Some(signal), Some(fingerprint)) => signal_fingerprint(signal) == *fingerprint,
                // No signal from discovery, or nothing stored to compare
                // against: cannot prove freshness.
                _ => false,
            };

            if fresh && !self.force_refresh {
                outcome.unchanged.push(page.url.clone());
            } else {
                outcome.possibly_changed.push(page.url.clone());
            }
        }

        outcome.missing = state
            .resources
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned()
            .collect();

        outcome.new.sort();
        outcome.unchanged.sort();
        outcome.possibly_changed.sort();
        outcome.missing.sort();
        Ok(outcome)
    }
}

/// Reject discovered sets in which two identifiers share a slug.
fn check_slug_collisions(discovered: &[DiscoveredPage]) -> Result<()> {
    let mut slugs: HashMap<String, &str> = HashMap::with_capacity(discovered.len());
    for page in discovered {
        let slug = url_to_slug(&page.url);
        if let Some(first) = slugs.insert(slug.clone(), page.url.as_str()) {
            if first != page.url {
                return Err(AppError::SlugCollision {
                    slug,
                    first: first.to_string(),
                    second: page.url.clone(),
                });
            }
        }
    }
    Ok(())
}
