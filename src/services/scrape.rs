// src/services/scrape.rs

//! Batch scrape job interface.
//!
//! The remote provider fetches submitted URLs asynchronously: submission
//! returns an opaque job handle, and status polls return accumulated
//! results, possibly split across continuation pages.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;

/// Natural-language instruction for the provider's structured extraction.
/// The summary field is the load-bearing one: it must describe what
/// information is on the page, like a card catalog entry, so that an
/// agent reading only the summary can decide whether to load the page.
pub const EXTRACT_PROMPT: &str = "Extract structured metadata from this web page. This metadata \
     will serve as frontmatter in a reference file that AI agents search through to find \
     relevant pages. The summary field is critical - it must describe WHAT INFORMATION IS ON \
     THIS PAGE, like a card catalog entry. Do not repeat the page content. Instead, tell the \
     reader what they would find if they loaded the full page: what topics are covered, what \
     questions are answered, what data points are available (e.g. pricing, recovery timelines, \
     before-and-after photos, credentials, FAQs). An AI agent reading only the summary should \
     be able to decide whether this page is relevant to their current task.";

/// Output schema for the structured extraction request.
pub fn extract_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {
                "type": "string",
                "description": "The page title, clean and concise (without the site name suffix)"
            },
            "description": {
                "type": "string",
                "description": "A concise 1-2 sentence description of what this page is"
            },
            "summary": {
                "type": "string",
                "description": "A 3-5 sentence content manifest. Describe what information \
                     this page contains as if answering: 'If I loaded this page, what would \
                     I find?' Mention specific topics covered, data available, and any \
                     unique content."
            }
        },
        "required": ["title", "description", "summary"]
    })
}

/// Remote job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Scraping,
    Completed,
    Failed,
}

impl JobStatus {
    /// Map a provider status string; unknown strings count as in-progress.
    pub fn from_wire(status: &str) -> Self {
        match status {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "failed" | "cancelled" => Self::Failed,
            _ => Self::Scraping,
        }
    }

    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One scraped resource from a result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedPage {
    /// The submitted identifier this result answers for.
    pub identifier: String,

    /// Canonical URL signal from page metadata, falling back to the
    /// identifier when absent.
    pub canonical_url: String,

    /// Extracted title, when the structured extraction produced one.
    pub title: Option<String>,

    /// Extracted one/two-sentence description.
    pub description: String,

    /// Extracted content-manifest summary.
    pub summary: String,

    /// Markdown body.
    pub markdown: String,
}

/// One page of a job status poll.
#[derive(Debug, Clone, Default)]
pub struct JobStatusPage {
    /// Provider-reported job status.
    pub status: Option<JobStatus>,

    /// Items finished so far, when reported.
    pub completed: Option<u64>,

    /// Total items in the job, when reported.
    pub total: Option<u64>,

    /// Results delivered on this page.
    pub pages: Vec<ScrapedPage>,

    /// Continuation cursor for the next result page, if any.
    pub next_cursor: Option<String>,
}

/// Client for the remote batch scrape endpoint.
#[async_trait]
pub trait ScrapeJobApi: Send + Sync {
    /// Submit a batch of URLs. Returns the opaque job handle.
    async fn submit(&self, urls: &[String]) -> Result<String>;

    /// Poll job status. With a cursor, fetches that continuation page
    /// instead of the job root.
    async fn poll(&self, job_id: &str, cursor: Option<&str>) -> Result<JobStatusPage>;
}
