// src/pipeline/run.rs

//! Top-level sync run for one site.
//!
//! Sequences the pipeline: acquire the run lock, load Run State, resume
//! any in-flight job from a previous invocation, otherwise discover →
//! diff → submit → poll → reconcile, then commit state and render the
//! index document. No two runs for the same site execute concurrently;
//! runs for different sites are independent.

use std::collections::HashMap;

use chrono::Utc;
use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{Config, RunReport, RunState, RunStatus, SiteInput};
use crate::pipeline::assemble;
use crate::pipeline::diff::DiffEngine;
use crate::pipeline::orchestrator::{JobDisposition, JobOrchestrator, JobOutcome};
use crate::pipeline::reconcile::{ReconcileTally, Reconciler};
use crate::services::{DiscoveryApi, ScrapeJobApi};
use crate::storage::SyncStore;

/// Caller-facing options for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Re-fetch everything discovered, ignoring stored fingerprints.
    pub force_refresh: bool,

    /// Cap on resources submitted this run, further bounded by the
    /// configured batch limit.
    pub max_resources: Option<usize>,

    /// Cooperative cancellation for the poll loop.
    pub cancel: CancellationToken,
}

/// Maximum concurrency for multi-site runs.
const SITE_CONCURRENCY: usize = 4;

/// Run several sites concurrently.
///
/// Sites are fully independent: each takes its own lock and owns its own
/// state and documents, so runs proceed in parallel with no shared
/// mutable state. A failure for one site never affects the others.
pub async fn run_sites(
    store: &dyn SyncStore,
    discovery: &dyn DiscoveryApi,
    scraper: &dyn ScrapeJobApi,
    config: &Config,
    sites: &[SiteInput],
    options: &RunOptions,
) -> Vec<(String, Result<RunReport>)> {
    stream::iter(sites)
        .map(|site| async move {
            let outcome = run_site(store, discovery, scraper, config, site, options).await;
            (site.domain.clone(), outcome)
        })
        .buffer_unordered(SITE_CONCURRENCY)
        .collect()
        .await
}

/// Execute one sync run for a site.
pub async fn run_site(
    store: &dyn SyncStore,
    discovery: &dyn DiscoveryApi,
    scraper: &dyn ScrapeJobApi,
    config: &Config,
    site: &SiteInput,
    options: &RunOptions,
) -> Result<RunReport> {
    let started_at = Utc::now();
    let _guard = store.acquire_lock(&site.domain).await?;

    let mut state = store
        .load_state(&site.domain)
        .await?
        .unwrap_or_else(RunState::new);

    let orchestrator = JobOrchestrator::new(scraper, store, &config.sync)
        .with_cancellation(options.cancel.clone());
    let reconciler = Reconciler::new(store, config.sync.miss_threshold);

    // A leftover in-flight job means the previous run was interrupted
    // after submission. Resume it instead of submitting new work; the
    // normal discovery pipeline runs again on the next invocation.
    if let Some(job) = &state.in_flight {
        log::info!(
            "Resuming in-flight job {} for {} ({} identifiers)",
            job.job_id,
            site.domain,
            job.identifiers.len()
        );
        let outcome = orchestrator
            .poll_to_completion(&site.domain, &mut state)
            .await?;
        return finish_run(
            store,
            site,
            &reconciler,
            &mut state,
            None,
            outcome,
            0,
            started_at,
        )
        .await;
    }

    // Discovery. Failures abort here, before any state mutation.
    let discovered = discovery.discover(site, &config.discovery).await?;

    let engine = if options.force_refresh {
        DiffEngine::force_refresh()
    } else {
        DiffEngine::new()
    };
    let diff = engine.classify(&discovered, &state)?;
    log::info!(
        "Diff for {}: {} new, {} unchanged, {} possibly changed, {} missing",
        site.domain,
        diff.new.len(),
        diff.unchanged.len(),
        diff.possibly_changed.len(),
        diff.missing.len()
    );

    let cap = options
        .max_resources
        .map_or(config.sync.batch_limit, |m| m.min(config.sync.batch_limit));
    let fetch = diff.fetch_set(cap);
    let skipped = diff.unchanged.len();

    if fetch.is_empty() {
        // Nothing to fetch: presence bookkeeping only.
        let tally = reconciler
            .apply(&site.domain, &mut state, Some(&discovered), &HashMap::new())
            .await?;
        state.last_run_at = Some(Utc::now());
        store.save_state(&site.domain, &state).await?;
        assemble::write_index(store, site).await?;
        return Ok(report(
            site,
            store,
            RunStatus::Completed,
            &tally,
            0,
            skipped,
            &state,
            started_at,
        ));
    }

    orchestrator.submit(&site.domain, &mut state, fetch).await?;
    let outcome = orchestrator
        .poll_to_completion(&site.domain, &mut state)
        .await?;

    finish_run(
        store,
        site,
        &reconciler,
        &mut state,
        Some(&discovered),
        outcome,
        skipped,
        started_at,
    )
    .await
}

/// Reconcile a terminal job outcome, commit state, and render the index.
#[allow(clippy::too_many_arguments)]
async fn finish_run(
    store: &dyn SyncStore,
    site: &SiteInput,
    reconciler: &Reconciler<'_>,
    state: &mut RunState,
    discovered: Option<&[crate::services::DiscoveredPage]>,
    outcome: JobOutcome,
    skipped: usize,
    started_at: chrono::DateTime<Utc>,
) -> Result<RunReport> {
    let (status, tally) = match outcome.disposition {
        JobDisposition::Completed => {
            let tally = reconciler
                .apply(&site.domain, state, discovered, &outcome.results)
                .await?;
            // Clearing the in-flight record rides in the same state
            // commit as the reconciliation results: a crash before the
            // commit re-polls the finished job and reconciles again.
            state.in_flight = None;
            state.last_run_at = Some(Utc::now());
            (RunStatus::Completed, tally)
        }
        JobDisposition::TimedOut => {
            // The job was abandoned and its record already cleared. The
            // discovery snapshot still counts for presence bookkeeping.
            let tally = match discovered {
                Some(snapshot) => {
                    reconciler
                        .apply(&site.domain, state, Some(snapshot), &HashMap::new())
                        .await?
                }
                None => ReconcileTally::default(),
            };
            (RunStatus::TimedOut, tally)
        }
        JobDisposition::Cancelled => {
            // Leave everything untouched; the in-flight record survives.
            (RunStatus::Cancelled, ReconcileTally::default())
        }
    };

    store.save_state(&site.domain, state).await?;
    assemble::write_index(store, site).await?;

    Ok(report(
        site,
        store,
        status,
        &tally,
        outcome.failed.len(),
        skipped,
        state,
        started_at,
    ))
}

#[allow(clippy::too_many_arguments)]
fn report(
    site: &SiteInput,
    store: &dyn SyncStore,
    status: RunStatus,
    tally: &ReconcileTally,
    unfetched: usize,
    skipped: usize,
    state: &RunState,
    started_at: chrono::DateTime<Utc>,
) -> RunReport {
    let report = RunReport {
        site: site.domain.clone(),
        status,
        created: tally.created,
        updated: tally.updated,
        deleted: tally.deleted,
        skipped_unchanged: skipped + tally.unchanged,
        failed: tally.failed + unfetched,
        docs_dir: store.pages_dir(&site.domain),
        resumable_job: state.in_flight.as_ref().map(|j| j.job_id.clone()),
        started_at,
        finished_at: Utc::now(),
    };
    log::info!(
        "Run for {} finished: {:?} ({} created, {} updated, {} deleted, {} unchanged, {} failed)",
        report.site,
        report.status,
        report.created,
        report.updated,
        report.deleted,
        report.skipped_unchanged,
        report.failed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::SyncConfig;
    use crate::pipeline::testutil::{MockDiscovery, MockScraper, completed_page, scraped};
    use crate::services::DiscoveredPage;
    use crate::storage::{LocalStore, SyncStore};
    use tempfile::TempDir;

    fn test_config() -> Config {
        Config {
            sync: SyncConfig {
                poll_interval_secs: 0,
                max_poll_secs: 30,
                poll_retry_limit: 3,
                batch_limit: 100,
                miss_threshold: 3,
            },
            ..Config::default()
        }
    }

    fn site() -> SiteInput {
        SiteInput::parse("site.test").unwrap()
    }

    fn signed(url: &str, signal: &str) -> DiscoveredPage {
        DiscoveredPage::new(url).with_last_modified(signal)
    }

    fn abc_pages() -> Vec<DiscoveredPage> {
        vec![
            signed("https://site.test/a", "sig-a"),
            signed("https://site.test/b", "sig-b"),
            signed("https://site.test/c", "sig-c"),
        ]
    }

    #[tokio::test]
    async fn test_scenario_four_runs_with_deletion_hysteresis() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let config = test_config();
        let site = site();

        // Run 1: {A, B, C} all NEW; job completes with all three.
        let discovery = MockDiscovery::returning(abc_pages());
        let scraper = MockScraper::new(vec![Ok(completed_page(vec![
            scraped("https://site.test/a", "# A"),
            scraped("https://site.test/b", "# B"),
            scraped("https://site.test/c", "# C"),
        ]))]);
        let report = run_site(
            &store,
            &discovery,
            &scraper,
            &config,
            &site,
            &RunOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.created, 3);
        let state = store.load_state("site.test").await.unwrap().unwrap();
        assert_eq!(state.active_count(), 3);
        let b_doc = store.pages_dir("site.test").join("b.md");
        assert!(b_doc.exists());

        // Runs 2-4: B disappears from discovery; A and C are unchanged,
        // so nothing is submitted.
        let shrunk = vec![
            signed("https://site.test/a", "sig-a"),
            signed("https://site.test/c", "sig-c"),
        ];
        for run in 2..=4 {
            discovery.set_pages(shrunk.clone());
            let report = run_site(
                &store,
                &discovery,
                &scraper,
                &config,
                &site,
                &RunOptions::default(),
            )
            .await
            .unwrap();
            assert_eq!(report.status, RunStatus::Completed);
            assert_eq!(report.skipped_unchanged, 2, "run {run}");
            // Only run 1 ever submitted a batch.
            assert_eq!(scraper.submissions().len(), 1, "run {run}");

            let state = store.load_state("site.test").await.unwrap().unwrap();
            if run < 4 {
                assert_eq!(report.deleted, 0, "run {run}");
                assert_eq!(
                    state.resources["https://site.test/b"].miss_count,
                    run as u32 - 1
                );
                assert!(b_doc.exists(), "run {run}");
            } else {
                // Third consecutive miss: B's document and record gone.
                assert_eq!(report.deleted, 1);
                assert!(!state.resources.contains_key("https://site.test/b"));
                assert!(!b_doc.exists());
                assert_eq!(state.resources.len(), 2);
            }
        }
    }

    #[tokio::test]
    async fn test_pipeline_is_idempotent_without_upstream_changes() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let config = test_config();
        let site = site();

        let discovery = MockDiscovery::returning(abc_pages());
        let scraper = MockScraper::new(vec![Ok(completed_page(vec![
            scraped("https://site.test/a", "# A"),
            scraped("https://site.test/b", "# B"),
            scraped("https://site.test/c", "# C"),
        ]))]);

        run_site(&store, &discovery, &scraper, &config, &site, &RunOptions::default())
            .await
            .unwrap();
        let state_one = store.load_state("site.test").await.unwrap().unwrap();
        let doc_one =
            std::fs::read_to_string(store.pages_dir("site.test").join("a.md")).unwrap();

        let report = run_site(
            &store,
            &discovery,
            &scraper,
            &config,
            &site,
            &RunOptions::default(),
        )
        .await
        .unwrap();
        let state_two = store.load_state("site.test").await.unwrap().unwrap();

        // Nothing was re-submitted, documents are byte-identical, and
        // state matches apart from the run timestamp.
        assert_eq!(scraper.submissions().len(), 1);
        assert_eq!(report.created + report.updated + report.deleted, 0);
        assert_eq!(state_two.resources, state_one.resources);
        assert_eq!(
            std::fs::read_to_string(store.pages_dir("site.test").join("a.md")).unwrap(),
            doc_one
        );
    }

    #[tokio::test]
    async fn test_resume_polls_existing_job_instead_of_resubmitting() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let config = test_config();
        let site = site();

        // First invocation dies right after submission: only the
        // submit-side effects exist.
        {
            let scraper = MockScraper::new(vec![]);
            let orchestrator = JobOrchestrator::new(&scraper, &store, &config.sync);
            let mut state = RunState::new();
            orchestrator
                .submit(
                    "site.test",
                    &mut state,
                    vec!["https://site.test/a".to_string()],
                )
                .await
                .unwrap();
        }

        // Next invocation resumes job-1 rather than submitting anew.
        let discovery = MockDiscovery::returning(abc_pages());
        let scraper = MockScraper::new(vec![Ok(completed_page(vec![scraped(
            "https://site.test/a",
            "# A",
        )]))]);
        let report = run_site(
            &store,
            &discovery,
            &scraper,
            &config,
            &site,
            &RunOptions::default(),
        )
        .await
        .unwrap();

        assert!(scraper.submissions().is_empty());
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.created, 1);
        let state = store.load_state("site.test").await.unwrap().unwrap();
        assert!(state.in_flight.is_none());
        assert!(store.pages_dir("site.test").join("a.md").exists());
    }

    #[tokio::test]
    async fn test_discovery_failure_aborts_without_state_mutation() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let config = test_config();
        let site = site();

        // Seed a known state.
        let discovery = MockDiscovery::returning(abc_pages());
        let scraper = MockScraper::new(vec![Ok(completed_page(vec![
            scraped("https://site.test/a", "# A"),
            scraped("https://site.test/b", "# B"),
            scraped("https://site.test/c", "# C"),
        ]))]);
        run_site(&store, &discovery, &scraper, &config, &site, &RunOptions::default())
            .await
            .unwrap();
        let before = store.load_state("site.test").await.unwrap().unwrap();

        // A failed discovery aborts the run and touches nothing, miss
        // counters included.
        let failing = MockDiscovery::failing();
        let result = run_site(
            &store,
            &failing,
            &scraper,
            &config,
            &site,
            &RunOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(AppError::Discovery(_))));

        let after = store.load_state("site.test").await.unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_force_refresh_resubmits_unchanged_resources() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let config = test_config();
        let site = site();

        let discovery = MockDiscovery::returning(vec![signed("https://site.test/a", "sig-a")]);
        let scraper = MockScraper::new(vec![
            Ok(completed_page(vec![scraped("https://site.test/a", "# A")])),
            Ok(completed_page(vec![scraped("https://site.test/a", "# A")])),
        ]);

        run_site(&store, &discovery, &scraper, &config, &site, &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(scraper.submissions().len(), 1);

        let options = RunOptions {
            force_refresh: true,
            ..RunOptions::default()
        };
        run_site(&store, &discovery, &scraper, &config, &site, &options)
            .await
            .unwrap();
        assert_eq!(scraper.submissions().len(), 2);
    }

    #[tokio::test]
    async fn test_max_resources_caps_submission() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let config = test_config();
        let site = site();

        let discovery = MockDiscovery::returning(abc_pages());
        let scraper = MockScraper::new(vec![Ok(completed_page(vec![
            scraped("https://site.test/a", "# A"),
            scraped("https://site.test/b", "# B"),
        ]))]);

        let options = RunOptions {
            max_resources: Some(2),
            ..RunOptions::default()
        };
        let report = run_site(&store, &discovery, &scraper, &config, &site, &options)
            .await
            .unwrap();

        assert_eq!(scraper.submissions().len(), 1);
        assert_eq!(scraper.submissions()[0].len(), 2);
        assert_eq!(report.created, 2);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let config = test_config();
        let site = site();

        let _held = store.acquire_lock("site.test").await.unwrap();

        let discovery = MockDiscovery::returning(vec![]);
        let scraper = MockScraper::new(vec![]);
        let result = run_site(
            &store,
            &discovery,
            &scraper,
            &config,
            &site,
            &RunOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(AppError::RunInProgress { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_job_resumable() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let config = test_config();
        let site = site();

        let discovery = MockDiscovery::returning(abc_pages());
        let scraper = MockScraper::new(vec![]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = RunOptions {
            cancel,
            ..RunOptions::default()
        };
        let report = run_site(&store, &discovery, &scraper, &config, &site, &options)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.resumable_job.as_deref(), Some("job-1"));
        assert_eq!(report.created, 0);

        let state = store.load_state("site.test").await.unwrap().unwrap();
        assert!(state.in_flight.is_some());
        // No documents were written and no misses were counted.
        assert!(state.resources.is_empty());
    }

    #[tokio::test]
    async fn test_run_sites_are_independent() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let config = test_config();

        let sites = vec![
            SiteInput::parse("one.test").unwrap(),
            SiteInput::parse("two.test").unwrap(),
        ];
        let discovery = MockDiscovery::returning(vec![signed("https://one.test/a", "sig-a")]);
        let scraper = MockScraper::new(vec![
            Ok(completed_page(vec![scraped("https://one.test/a", "# A")])),
            Ok(completed_page(vec![scraped("https://one.test/a", "# A")])),
        ]);

        let outcomes = run_sites(
            &store,
            &discovery,
            &scraper,
            &config,
            &sites,
            &RunOptions::default(),
        )
        .await;

        assert_eq!(outcomes.len(), 2);
        for (_, outcome) in &outcomes {
            assert!(outcome.is_ok());
        }
        // Each site has its own state record and document directory.
        assert!(store.load_state("one.test").await.unwrap().is_some());
        assert!(store.load_state("two.test").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_fetch_set_still_renders_index() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let config = test_config();
        let site = site();

        let discovery = MockDiscovery::returning(vec![]);
        let scraper = MockScraper::new(vec![]);
        let report = run_site(
            &store,
            &discovery,
            &scraper,
            &config,
            &site,
            &RunOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert!(tmp.path().join("site.test").join("SKILL.md").exists());
    }
}
