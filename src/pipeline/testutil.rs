// src/pipeline/testutil.rs

//! Scripted mock clients shared by the pipeline tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{DiscoveryConfig, SiteInput};
use crate::services::{
    DiscoveredPage, DiscoveryApi, JobStatus, JobStatusPage, ScrapeJobApi, ScrapedPage,
};

/// Discovery client returning a pre-programmed page list.
pub struct MockDiscovery {
    pages: Mutex<Vec<DiscoveredPage>>,
    fail: bool,
}

impl MockDiscovery {
    pub fn returning(pages: Vec<DiscoveredPage>) -> Self {
        Self {
            pages: Mutex::new(pages),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            pages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn set_pages(&self, pages: Vec<DiscoveredPage>) {
        *self.pages.lock().unwrap() = pages;
    }
}

#[async_trait]
impl DiscoveryApi for MockDiscovery {
    async fn discover(
        &self,
        _site: &SiteInput,
        _config: &DiscoveryConfig,
    ) -> Result<Vec<DiscoveredPage>> {
        if self.fail {
            return Err(AppError::discovery("listing endpoint unreachable"));
        }
        Ok(self.pages.lock().unwrap().clone())
    }
}

/// Scrape client replaying a scripted sequence of poll responses.
///
/// `submit` always succeeds and records the submitted set; `poll` pops
/// the next scripted response, falling back to an empty completed page
/// once the script is exhausted.
pub struct MockScraper {
    pub job_id: String,
    responses: Mutex<VecDeque<Result<JobStatusPage>>>,
    submissions: Mutex<Vec<Vec<String>>>,
    polls: Mutex<Vec<Option<String>>>,
    fail_submit: bool,
}

impl MockScraper {
    pub fn new(responses: Vec<Result<JobStatusPage>>) -> Self {
        Self {
            job_id: "job-1".to_string(),
            responses: Mutex::new(responses.into()),
            submissions: Mutex::new(Vec::new()),
            polls: Mutex::new(Vec::new()),
            fail_submit: false,
        }
    }

    pub fn failing_submit() -> Self {
        let mut mock = Self::new(Vec::new());
        mock.fail_submit = true;
        mock
    }

    pub fn submissions(&self) -> Vec<Vec<String>> {
        self.submissions.lock().unwrap().clone()
    }

    /// Cursors observed across poll calls, in order.
    pub fn polled_cursors(&self) -> Vec<Option<String>> {
        self.polls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScrapeJobApi for MockScraper {
    async fn submit(&self, urls: &[String]) -> Result<String> {
        if self.fail_submit {
            return Err(AppError::submission("job could not be created"));
        }
        self.submissions.lock().unwrap().push(urls.to_vec());
        Ok(self.job_id.clone())
    }

    async fn poll(&self, _job_id: &str, cursor: Option<&str>) -> Result<JobStatusPage> {
        self.polls.lock().unwrap().push(cursor.map(String::from));
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(completed_page(Vec::new())),
        }
    }
}

/// Build a scraped page result for an identifier.
pub fn scraped(identifier: &str, body: &str) -> ScrapedPage {
    ScrapedPage {
        identifier: identifier.to_string(),
        canonical_url: identifier.to_string(),
        title: Some(format!("Title of {identifier}")),
        description: "A page.".to_string(),
        summary: "Describes what the page contains.".to_string(),
        markdown: body.to_string(),
    }
}

/// A terminal completed poll response carrying the given results.
pub fn completed_page(pages: Vec<ScrapedPage>) -> JobStatusPage {
    JobStatusPage {
        status: Some(JobStatus::Completed),
        completed: None,
        total: None,
        pages,
        next_cursor: None,
    }
}

/// An in-progress poll response.
pub fn running_page(pages: Vec<ScrapedPage>) -> JobStatusPage {
    JobStatusPage {
        status: Some(JobStatus::Scraping),
        completed: None,
        total: None,
        pages,
        next_cursor: None,
    }
}

/// A result page with a continuation cursor.
pub fn page_with_cursor(pages: Vec<ScrapedPage>, status: JobStatus, next: &str) -> JobStatusPage {
    JobStatusPage {
        status: Some(status),
        completed: None,
        total: None,
        pages,
        next_cursor: Some(next.to_string()),
    }
}
