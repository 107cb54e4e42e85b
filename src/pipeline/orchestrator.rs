// src/pipeline/orchestrator.rs

//! Batch job orchestration.
//!
//! Drives one remote batch job from submission to a terminal state:
//!
//! ```text
//! NOT_SUBMITTED → SUBMITTED → POLLING → {COMPLETED, FAILED, TIMED_OUT}
//! ```
//!
//! The job handle and the exact submitted identifier set are persisted to
//! Run State before the first poll, so a process killed right after
//! submission resumes the same job on the next invocation instead of
//! resubmitting it. Result pages accumulate into a map keyed by
//! identifier, last result wins, which makes reordering and duplicate
//! delivery across pages harmless.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{InFlightJob, RunState, SyncConfig};
use crate::services::{JobStatus, JobStatusPage, ScrapeJobApi, ScrapedPage};
use crate::storage::SyncStore;

/// Base delay for poll retry backoff.
const BACKOFF_BASE_MS: u64 = 500;

/// Exponent cap for poll retry backoff (500ms * 2^4 = 8s).
const BACKOFF_MAX_EXP: u32 = 4;

/// Terminal disposition of one driven job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// The provider reported the job terminal and all result pages were
    /// collected. Results may still be partial if the provider failed
    /// individual URLs.
    Completed,
    /// The poll budget was exhausted. The job is abandoned and its
    /// in-flight record cleared; submitted resources keep their prior
    /// documents and fingerprints.
    TimedOut,
    /// Cancellation was requested. The in-flight record is preserved so
    /// the next invocation resumes the same job.
    Cancelled,
}

/// Accumulated outcome of driving a job to a terminal state.
#[derive(Debug)]
pub struct JobOutcome {
    pub disposition: JobDisposition,

    /// Results keyed by submitted identifier; for duplicates across
    /// pages, the later page wins.
    pub results: HashMap<String, ScrapedPage>,

    /// Submitted identifiers with no usable result this run.
    pub failed: Vec<String>,
}

/// Orchestrator for one site's batch job.
pub struct JobOrchestrator<'a> {
    api: &'a dyn ScrapeJobApi,
    store: &'a dyn SyncStore,
    config: &'a SyncConfig,
    cancel: CancellationToken,
}

enum Tick {
    Ready,
    Cancelled,
    DeadlineExceeded,
}

enum PollAttempt {
    Page(JobStatusPage),
    Cancelled,
}

impl<'a> JobOrchestrator<'a> {
    pub fn new(api: &'a dyn ScrapeJobApi, store: &'a dyn SyncStore, config: &'a SyncConfig) -> Self {
        Self {
            api,
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a cancellation token; the poll loop stops at its next
    /// suspension point once the token fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Submit a batch job and persist the in-flight record.
    ///
    /// Submission failures abort before anything is persisted. On
    /// success the in-flight record is written to the state store before
    /// this function returns, and strictly before any polling.
    pub async fn submit(
        &self,
        site: &str,
        state: &mut RunState,
        identifiers: Vec<String>,
    ) -> Result<()> {
        if identifiers.is_empty() {
            return Err(AppError::submission("refusing to submit an empty batch"));
        }

        let job_id = self.api.submit(&identifiers).await?;
        log::info!(
            "Submitted batch job {} with {} URLs for {}",
            job_id,
            identifiers.len(),
            site
        );

        state.in_flight = Some(InFlightJob {
            job_id,
            submitted_at: Utc::now(),
            identifiers,
            cursor: None,
        });
        self.store.save_state(site, state).await?;
        Ok(())
    }

    /// Drive the in-flight job to a terminal state.
    ///
    /// Resumption always re-polls from the job root rather than from the
    /// persisted cursor: the reconciler is idempotent, so replaying
    /// result pages that were already seen is safe, while skipping pages
    /// that were seen but never reconciled would not be. The cursor is
    /// still tracked in the in-flight record as it moves, for
    /// diagnostics and crash-time visibility.
    pub async fn poll_to_completion(&self, site: &str, state: &mut RunState) -> Result<JobOutcome> {
        let job = state
            .in_flight
            .clone()
            .ok_or_else(|| AppError::validation("no in-flight job to poll"))?;
        let submitted = job.identifiers.clone();

        let interval = Duration::from_secs(self.config.poll_interval_secs);
        let deadline = Instant::now() + Duration::from_secs(self.config.max_poll_secs);

        let mut results: HashMap<String, ScrapedPage> = HashMap::new();
        let mut cursor: Option<String> = None;

        log::info!("Polling job {} for {}", job.job_id, site);

        loop {
            match self.wait_interval(interval, deadline).await {
                Tick::Ready => {}
                Tick::Cancelled => return self.cancelled(site, state, submitted).await,
                Tick::DeadlineExceeded => return self.timed_out(site, state, submitted).await,
            }

            // One status poll, then drain any continuation pages before
            // the next interval: cursors paginate results, not status.
            let mut page = match self.poll_with_retry(&job.job_id, cursor.as_deref()).await? {
                PollAttempt::Page(page) => page,
                PollAttempt::Cancelled => return self.cancelled(site, state, submitted).await,
            };

            let mut round_status = page.status;
            loop {
                self.absorb(&submitted, &mut results, &mut page);

                let Some(next) = page.next_cursor.take() else {
                    break;
                };
                if Instant::now() >= deadline {
                    return self.timed_out(site, state, submitted).await;
                }

                cursor = Some(next.clone());
                self.record_cursor(site, state, &job.job_id, Some(next.clone()))
                    .await?;

                page = match self.poll_with_retry(&job.job_id, Some(&next)).await? {
                    PollAttempt::Page(page) => page,
                    PollAttempt::Cancelled => {
                        return self.cancelled(site, state, submitted).await;
                    }
                };
                // Continuation pages do not always repeat the status.
                if page.status.is_some() {
                    round_status = page.status;
                }
            }
            cursor = None;

            match round_status {
                Some(JobStatus::Completed) => {
                    let failed: Vec<String> = submitted
                        .iter()
                        .filter(|id| !results.contains_key(*id))
                        .cloned()
                        .collect();
                    log::info!(
                        "Job {} completed: {} results, {} without result",
                        job.job_id,
                        results.len(),
                        failed.len()
                    );
                    return Ok(JobOutcome {
                        disposition: JobDisposition::Completed,
                        results,
                        failed,
                    });
                }
                Some(JobStatus::Failed) => {
                    // Provider-side terminal failure. Collected results
                    // are still reconciled; the remainder retries on the
                    // next run.
                    let failed: Vec<String> = submitted
                        .iter()
                        .filter(|id| !results.contains_key(*id))
                        .cloned()
                        .collect();
                    log::warn!(
                        "Job {} reported failed by provider; keeping {} collected results",
                        job.job_id,
                        results.len()
                    );
                    return Ok(JobOutcome {
                        disposition: JobDisposition::Completed,
                        results,
                        failed,
                    });
                }
                _ => {
                    if let (Some(done), Some(total)) = (page.completed, page.total) {
                        log::debug!("Job {}: {}/{} scraped", job.job_id, done, total);
                    }
                }
            }
        }
    }

    /// One poll request with bounded exponential backoff on failure.
    async fn poll_with_retry(&self, job_id: &str, cursor: Option<&str>) -> Result<PollAttempt> {
        let mut attempt: u32 = 0;
        loop {
            match self.api.poll(job_id, cursor).await {
                Ok(page) => return Ok(PollAttempt::Page(page)),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.poll_retry_limit {
                        return Err(AppError::poll_exhausted(job_id, attempt, e));
                    }
                    let delay = backoff_delay(attempt);
                    log::warn!(
                        "Poll attempt {} for job {} failed: {}. Retrying in {:?}",
                        attempt,
                        job_id,
                        e,
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Ok(PollAttempt::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Sleep one poll interval, honoring cancellation and the deadline.
    async fn wait_interval(&self, interval: Duration, deadline: Instant) -> Tick {
        let now = Instant::now();
        if now >= deadline {
            return Tick::DeadlineExceeded;
        }

        let sleep_for = interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Tick::Cancelled,
            _ = tokio::time::sleep(sleep_for) => {
                if Instant::now() >= deadline && sleep_for < interval {
                    Tick::DeadlineExceeded
                } else {
                    Tick::Ready
                }
            }
        }
    }

    /// Merge a result page into the accumulated map, keyed by submitted
    /// identifier. Last write wins.
    fn absorb(
        &self,
        submitted: &[String],
        results: &mut HashMap<String, ScrapedPage>,
        page: &mut JobStatusPage,
    ) {
        for result in page.pages.drain(..) {
            // Match results back to the submitted identifier; providers
            // sometimes return a normalized form of the URL.
            let identifier = if submitted.contains(&result.identifier) {
                result.identifier.clone()
            } else if let Some(original) = submitted
                .iter()
                .find(|id| id.trim_end_matches('/') == result.identifier.trim_end_matches('/'))
            {
                original.clone()
            } else {
                log::debug!(
                    "Dropping result for unsubmitted identifier {}",
                    result.identifier
                );
                continue;
            };
            results.insert(identifier, result);
        }
    }

    /// Persist the last-seen cursor into the in-flight record.
    async fn record_cursor(
        &self,
        site: &str,
        state: &mut RunState,
        job_id: &str,
        cursor: Option<String>,
    ) -> Result<()> {
        if let Some(job) = state.in_flight.as_mut() {
            if job.job_id == job_id {
                job.cursor = cursor;
                self.store.save_state(site, state).await?;
            }
        }
        Ok(())
    }

    /// Terminal: poll budget exhausted. The job is abandoned.
    async fn timed_out(
        &self,
        site: &str,
        state: &mut RunState,
        submitted: Vec<String>,
    ) -> Result<JobOutcome> {
        log::warn!(
            "Job poll budget ({}s) exhausted for {}; abandoning job",
            self.config.max_poll_secs,
            site
        );
        state.in_flight = None;
        self.store.save_state(site, state).await?;
        Ok(JobOutcome {
            disposition: JobDisposition::TimedOut,
            results: HashMap::new(),
            failed: submitted,
        })
    }

    /// Terminal: cancelled. The in-flight record survives for resumption.
    async fn cancelled(
        &self,
        site: &str,
        state: &mut RunState,
        submitted: Vec<String>,
    ) -> Result<JobOutcome> {
        log::warn!("Run cancelled while polling job for {}; job left resumable", site);
        self.store.save_state(site, state).await?;
        Ok(JobOutcome {
            disposition: JobDisposition::Cancelled,
            results: HashMap::new(),
            failed: submitted,
        })
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(BACKOFF_MAX_EXP);
    Duration::from_millis(BACKOFF_BASE_MS << exp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::pipeline::testutil::{
        MockScraper, completed_page, page_with_cursor, running_page, scraped,
    };
    use crate::storage::{LocalStore, SyncStore};
    use tempfile::TempDir;

    const SITE: &str = "example.com";

    fn fast_config() -> SyncConfig {
        SyncConfig {
            poll_interval_secs: 0,
            max_poll_secs: 30,
            poll_retry_limit: 3,
            batch_limit: 100,
            miss_threshold: 3,
        }
    }

    fn urls(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    async fn submitted_state(
        orchestrator: &JobOrchestrator<'_>,
        identifiers: &[&str],
    ) -> RunState {
        let mut state = RunState::new();
        orchestrator
            .submit(SITE, &mut state, urls(identifiers))
            .await
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_submit_persists_in_flight_before_polling() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let api = MockScraper::new(vec![]);
        let config = fast_config();
        let orchestrator = JobOrchestrator::new(&api, &store, &config);

        let state = submitted_state(&orchestrator, &["https://e.com/a"]).await;
        assert_eq!(state.in_flight.as_ref().unwrap().job_id, "job-1");

        // The durable copy carries the job handle and the exact set.
        let persisted = store.load_state(SITE).await.unwrap().unwrap();
        let job = persisted.in_flight.unwrap();
        assert_eq!(job.job_id, "job-1");
        assert_eq!(job.identifiers, urls(&["https://e.com/a"]));
        // And no poll has happened yet.
        assert!(api.polled_cursors().is_empty());
    }

    #[tokio::test]
    async fn test_submit_failure_leaves_no_state() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let api = MockScraper::failing_submit();
        let config = fast_config();
        let orchestrator = JobOrchestrator::new(&api, &store, &config);

        let mut state = RunState::new();
        let result = orchestrator
            .submit(SITE, &mut state, urls(&["https://e.com/a"]))
            .await;
        assert!(matches!(result, Err(AppError::Submission(_))));
        assert!(state.in_flight.is_none());
        assert!(store.load_state(SITE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_polls_until_completed() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let api = MockScraper::new(vec![
            Ok(running_page(vec![])),
            Ok(running_page(vec![])),
            Ok(completed_page(vec![scraped("https://e.com/a", "# A")])),
        ]);
        let config = fast_config();
        let orchestrator = JobOrchestrator::new(&api, &store, &config);

        let mut state = submitted_state(&orchestrator, &["https://e.com/a"]).await;
        let outcome = orchestrator
            .poll_to_completion(SITE, &mut state)
            .await
            .unwrap();

        assert_eq!(outcome.disposition, JobDisposition::Completed);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.failed.is_empty());
        assert_eq!(api.polled_cursors().len(), 3);
    }

    #[tokio::test]
    async fn test_pagination_last_page_wins_per_identifier() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let api = MockScraper::new(vec![
            Ok(page_with_cursor(
                vec![
                    scraped("https://e.com/a", "# A v1"),
                    scraped("https://e.com/b", "# B"),
                ],
                crate::services::JobStatus::Completed,
                "https://api.test/next/2",
            )),
            Ok(completed_page(vec![scraped("https://e.com/a", "# A v2")])),
        ]);
        let config = fast_config();
        let orchestrator = JobOrchestrator::new(&api, &store, &config);

        let mut state =
            submitted_state(&orchestrator, &["https://e.com/a", "https://e.com/b"]).await;
        let outcome = orchestrator
            .poll_to_completion(SITE, &mut state)
            .await
            .unwrap();

        assert_eq!(outcome.results["https://e.com/a"].markdown, "# A v2");
        assert_eq!(outcome.results["https://e.com/b"].markdown, "# B");
        // The continuation page was fetched with the provider cursor.
        assert_eq!(
            api.polled_cursors(),
            vec![None, Some("https://api.test/next/2".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_failures_are_retried() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let api = MockScraper::new(vec![
            Err(AppError::discovery("connection reset")),
            Ok(completed_page(vec![scraped("https://e.com/a", "# A")])),
        ]);
        let config = fast_config();
        let orchestrator = JobOrchestrator::new(&api, &store, &config);

        let mut state = submitted_state(&orchestrator, &["https://e.com/a"]).await;
        let outcome = orchestrator
            .poll_to_completion(SITE, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, JobDisposition::Completed);
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_retry_ceiling_keeps_job_resumable() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let api = MockScraper::new(vec![
            Err(AppError::discovery("boom 1")),
            Err(AppError::discovery("boom 2")),
            Err(AppError::discovery("boom 3")),
        ]);
        let config = fast_config();
        let orchestrator = JobOrchestrator::new(&api, &store, &config);

        let mut state = submitted_state(&orchestrator, &["https://e.com/a"]).await;
        let result = orchestrator.poll_to_completion(SITE, &mut state).await;
        assert!(matches!(
            result,
            Err(AppError::PollRetriesExhausted { attempts: 3, .. })
        ));

        // The in-flight record survives for the next invocation.
        let persisted = store.load_state(SITE).await.unwrap().unwrap();
        assert!(persisted.in_flight.is_some());
    }

    #[tokio::test]
    async fn test_timeout_abandons_job_and_clears_in_flight() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let api = MockScraper::new(vec![Ok(running_page(vec![]))]);
        let mut config = fast_config();
        config.max_poll_secs = 0;
        let orchestrator = JobOrchestrator::new(&api, &store, &config);

        let mut state =
            submitted_state(&orchestrator, &["https://e.com/a", "https://e.com/b"]).await;
        let outcome = orchestrator
            .poll_to_completion(SITE, &mut state)
            .await
            .unwrap();

        assert_eq!(outcome.disposition, JobDisposition::TimedOut);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.failed.len(), 2);
        assert!(state.in_flight.is_none());
        let persisted = store.load_state(SITE).await.unwrap().unwrap();
        assert!(persisted.in_flight.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_preserves_in_flight() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let api = MockScraper::new(vec![Ok(running_page(vec![]))]);
        let config = fast_config();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let orchestrator =
            JobOrchestrator::new(&api, &store, &config).with_cancellation(cancel);

        let mut state = submitted_state(&orchestrator, &["https://e.com/a"]).await;
        let outcome = orchestrator
            .poll_to_completion(SITE, &mut state)
            .await
            .unwrap();

        assert_eq!(outcome.disposition, JobDisposition::Cancelled);
        assert!(state.in_flight.is_some());
        let persisted = store.load_state(SITE).await.unwrap().unwrap();
        assert!(persisted.in_flight.is_some());
    }

    #[tokio::test]
    async fn test_resume_re_polls_existing_job_from_root() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let api = MockScraper::new(vec![Ok(completed_page(vec![scraped(
            "https://e.com/a",
            "# A",
        )]))]);
        let config = fast_config();
        let orchestrator = JobOrchestrator::new(&api, &store, &config);

        // State recovered from a previous invocation, cursor and all.
        let mut state = RunState::new();
        state.in_flight = Some(InFlightJob {
            job_id: "job-1".to_string(),
            submitted_at: Utc::now(),
            identifiers: urls(&["https://e.com/a"]),
            cursor: Some("https://api.test/next/9".to_string()),
        });

        let outcome = orchestrator
            .poll_to_completion(SITE, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, JobDisposition::Completed);
        assert_eq!(outcome.results.len(), 1);
        // The first poll ignored the stale cursor and hit the job root.
        assert_eq!(api.polled_cursors()[0], None);
    }

    #[tokio::test]
    async fn test_trailing_slash_results_match_submitted_identifier() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let mut result = scraped("https://e.com/a/", "# A");
        result.identifier = "https://e.com/a/".to_string();
        let api = MockScraper::new(vec![Ok(completed_page(vec![result]))]);
        let config = fast_config();
        let orchestrator = JobOrchestrator::new(&api, &store, &config);

        let mut state = submitted_state(&orchestrator, &["https://e.com/a"]).await;
        let outcome = orchestrator
            .poll_to_completion(SITE, &mut state)
            .await
            .unwrap();
        assert!(outcome.results.contains_key("https://e.com/a"));
    }

    #[test]
    fn test_backoff_is_bounded() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(5), Duration::from_millis(8000));
        assert_eq!(backoff_delay(50), Duration::from_millis(8000));
    }
}
