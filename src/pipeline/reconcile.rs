// src/pipeline/reconcile.rs

//! Result reconciliation and deletion hysteresis.
//!
//! Applies batch job results and the discovery snapshot to the Run State
//! and the on-disk document set. Reconciliation is idempotent per
//! resource: replaying the same result twice produces the same end
//! state, which is what makes crash-and-re-poll recovery safe.
//!
//! Deletion is hysteresis-based. A resource absent from a successful
//! discovery has its miss counter incremented; only when the counter
//! reaches the configured threshold are the document and the record
//! removed. A single flaky listing therefore never destroys
//! previously-acquired content.

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::error::Result;
use crate::models::{
    Document, ResourceRecord, ResourceStatus, RunState, clean_markdown, content_fingerprint,
    signal_fingerprint,
};
use crate::services::{DiscoveredPage, ScrapedPage};
use crate::storage::SyncStore;
use crate::utils::url_to_slug;

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileTally {
    /// Documents created for first-seen resources.
    pub created: usize,
    /// Documents overwritten with changed content.
    pub updated: usize,
    /// Re-fetched resources whose content turned out identical.
    pub unchanged: usize,
    /// Resources removed by the deletion policy.
    pub deleted: usize,
    /// Resources whose document write or delete failed; left in their
    /// pre-run state for the next attempt.
    pub failed: usize,
}

/// Applies job results and discovery outcomes to durable state.
pub struct Reconciler<'a> {
    store: &'a dyn SyncStore,
    miss_threshold: u32,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn SyncStore, miss_threshold: u32) -> Self {
        Self {
            store,
            miss_threshold,
        }
    }

    /// Apply `results` (and, for discovery runs, the discovered set) to
    /// the Run State and document set.
    ///
    /// `discovered` is `None` when resuming a previously submitted job:
    /// no discovery happened this run, so miss counters must not move.
    ///
    /// The Run State is mutated in memory only; the caller commits it in
    /// a single write after all per-resource document operations are
    /// done. A crash before that commit leaves already-written documents
    /// in place (each is individually atomic) while the state still
    /// points at the pre-run fingerprints, so the next run simply
    /// re-fetches and rewrites them.
    pub async fn apply(
        &self,
        site: &str,
        state: &mut RunState,
        discovered: Option<&[DiscoveredPage]>,
        results: &HashMap<String, ScrapedPage>,
    ) -> Result<ReconcileTally> {
        let mut tally = ReconcileTally::default();

        let signals: HashMap<&str, &str> = discovered
            .unwrap_or_default()
            .iter()
            .filter_map(|p| {
                p.last_modified
                    .as_deref()
                    .map(|signal| (p.url.as_str(), signal))
            })
            .collect();

        // Deterministic processing order.
        let mut ids: Vec<&String> = results.keys().collect();
        ids.sort();

        for id in ids {
            let page = &results[id.as_str()];
            let slug = state
                .resources
                .get(id.as_str())
                .map(|r| r.slug.clone())
                .unwrap_or_else(|| url_to_slug(id));

            let document = Document {
                title: page
                    .title
                    .clone()
                    .unwrap_or_else(|| "Untitled".to_string()),
                description: page.description.clone(),
                url: page.canonical_url.clone(),
                summary: page.summary.clone(),
                body: clean_markdown(&page.markdown),
            };
            let content = document.render();

            let fingerprint = match signals.get(id.as_str()) {
                Some(signal) => signal_fingerprint(signal),
                None => content_fingerprint(&content),
            };

            let previous = state.resources.get(id.as_str());
            let first_seen = previous.is_none();
            let content_same = previous
                .and_then(|r| r.fingerprint.as_deref())
                .is_some_and(|fp| fp == fingerprint);

            if let Err(e) = self.write_with_retry(site, &slug, &content).await {
                log::error!("Giving up on document {slug} for {site}: {e}");
                tally.failed += 1;
                continue;
            }

            state.resources.insert(
                id.to_string(),
                ResourceRecord {
                    identifier: id.to_string(),
                    slug,
                    fingerprint: Some(fingerprint),
                    miss_count: 0,
                    status: ResourceStatus::Active,
                    last_synced_at: Some(Utc::now()),
                },
            );

            if first_seen {
                tally.created += 1;
            } else if content_same {
                tally.unchanged += 1;
            } else {
                tally.updated += 1;
            }
        }

        if let Some(discovered) = discovered {
            self.apply_presence(site, state, discovered, results, &mut tally)
                .await?;
        }

        Ok(tally)
    }

    /// Miss counting and confirm-present resets, driven by a successful
    /// discovery snapshot.
    async fn apply_presence(
        &self,
        site: &str,
        state: &mut RunState,
        discovered: &[DiscoveredPage],
        results: &HashMap<String, ScrapedPage>,
        tally: &mut ReconcileTally,
    ) -> Result<()> {
        let present: HashSet<&str> = discovered.iter().map(|p| p.url.as_str()).collect();

        // Confirm presence for everything discovered, whether or not it
        // was re-fetched this run.
        for (id, record) in state.resources.iter_mut() {
            if present.contains(id.as_str()) && !results.contains_key(id.as_str()) {
                record.miss_count = 0;
                record.status = ResourceStatus::Active;
            }
        }

        // Miss bookkeeping for everything known but not discovered.
        let missing: Vec<String> = state
            .resources
            .keys()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();

        for id in missing {
            let Some(record) = state.resources.get_mut(&id) else {
                continue;
            };
            record.miss_count += 1;

            if record.miss_count >= self.miss_threshold {
                let slug = record.slug.clone();
                if let Err(e) = self.store.delete_document(site, &slug).await {
                    log::error!("Failed to delete document {slug} for {site}: {e}");
                    tally.failed += 1;
                    continue;
                }
                log::info!(
                    "Deleted {} after {} consecutive discovery misses",
                    id,
                    record.miss_count
                );
                state.resources.remove(&id);
                tally.deleted += 1;
            } else {
                log::debug!(
                    "{} missing from discovery ({}/{})",
                    id,
                    record.miss_count,
                    self.miss_threshold
                );
                record.status = ResourceStatus::PendingDelete;
            }
        }

        Ok(())
    }

    /// Write a document, retrying once immediately on failure.
    async fn write_with_retry(&self, site: &str, slug: &str, content: &str) -> Result<()> {
        if let Err(first) = self.store.write_document(site, slug, content).await {
            log::warn!("Document write for {slug} failed, retrying once: {first}");
            self.store.write_document(site, slug, content).await?;
        }
        Ok(())
    }
}
