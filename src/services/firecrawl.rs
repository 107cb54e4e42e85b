// src/services/firecrawl.rs

//! Firecrawl-backed implementations of the discovery and batch scrape
//! interfaces.
//!
//! Discovery uses the Map endpoint (one request per run); scraping uses
//! the asynchronous batch scrape endpoint, whose results are collected by
//! the job orchestrator via `poll`.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::{ApiConfig, DiscoveryConfig, SiteInput};
use crate::services::discovery::{DiscoveredPage, DiscoveryApi};
use crate::services::scrape::{
    EXTRACT_PROMPT, JobStatus, JobStatusPage, ScrapeJobApi, ScrapedPage, extract_schema,
};
use crate::utils::http;

/// Firecrawl API client.
pub struct FirecrawlClient {
    client: Client,
    base_url: String,
    api_key: String,
}

// --- Wire types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MapRequest {
    url: String,
    include_subdomains: bool,
    ignore_query_parameters: bool,
    limit: usize,
}

#[derive(Deserialize)]
struct MapResponse {
    success: bool,
    #[serde(default)]
    links: Vec<MapLink>,
    #[serde(default)]
    error: Option<String>,
}

/// The Map endpoint returns either bare URL strings or link objects,
/// depending on provider version.
#[derive(Deserialize)]
#[serde(untagged)]
enum MapLink {
    Plain(String),
    Detailed {
        url: String,
        #[serde(default, rename = "lastModified")]
        last_modified: Option<String>,
    },
}

#[derive(Deserialize)]
struct BatchSubmitResponse {
    success: bool,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct BatchStatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    data: Vec<BatchPageData>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct BatchPageData {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    json: Option<ExtractedFields>,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

#[derive(Deserialize)]
struct ExtractedFields {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Deserialize)]
struct PageMetadata {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "ogUrl")]
    og_url: Option<String>,
    #[serde(default, rename = "sourceURL")]
    source_url: Option<String>,
}

impl FirecrawlClient {
    /// Create a client from resolved API configuration.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let api_key = config.resolve_key()?;
        let client = http::create_client(config)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post_json<R: for<'de> Deserialize<'de>>(&self, path: &str, body: &Value) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn get_json<R: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<R> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/v2/batch/scrape/{}", self.base_url, job_id)
    }
}

/// Deduplicate discovered links, preserving first occurrence.
fn dedup_links(links: Vec<MapLink>) -> Vec<DiscoveredPage> {
    let mut seen = HashSet::new();
    let mut pages = Vec::new();
    for link in links {
        let (url, last_modified) = match link {
            MapLink::Plain(url) => (url, None),
            MapLink::Detailed { url, last_modified } => (url, last_modified),
        };
        if url.is_empty() || !seen.insert(url.clone()) {
            continue;
        }
        pages.push(DiscoveredPage { url, last_modified });
    }
    pages
}

/// Convert a result-page entry to a `ScrapedPage`, skipping entries with
/// no body or no source URL.
fn to_scraped_page(data: BatchPageData) -> Option<ScrapedPage> {
    let markdown = data.markdown?;
    if markdown.trim().is_empty() {
        return None;
    }

    let metadata = data.metadata;
    let identifier = metadata.as_ref().and_then(|m| m.source_url.clone())?;
    let canonical_url = metadata
        .as_ref()
        .and_then(|m| m.og_url.clone())
        .unwrap_or_else(|| identifier.clone());

    let extracted = data.json;
    let title = extracted
        .as_ref()
        .and_then(|j| j.title.clone())
        .or_else(|| metadata.as_ref().and_then(|m| m.title.clone()));

    Some(ScrapedPage {
        identifier,
        canonical_url,
        title,
        description: extracted
            .as_ref()
            .and_then(|j| j.description.clone())
            .unwrap_or_default(),
        summary: extracted
            .as_ref()
            .and_then(|j| j.summary.clone())
            .unwrap_or_default(),
        markdown,
    })
}

#[async_trait]
impl DiscoveryApi for FirecrawlClient {
    async fn discover(
        &self,
        site: &SiteInput,
        config: &DiscoveryConfig,
    ) -> Result<Vec<DiscoveredPage>> {
        let request = MapRequest {
            url: site.root_url.clone(),
            include_subdomains: config.include_subdomains,
            ignore_query_parameters: config.ignore_query_parameters,
            limit: config.limit,
        };
        let body = serde_json::to_value(&request)?;

        let response: MapResponse = self
            .post_json("/v1/map", &body)
            .await
            .map_err(|e| AppError::discovery(format!("map request for {}: {e}", site.domain)))?;

        if !response.success {
            return Err(AppError::discovery(format!(
                "map request for {} rejected: {}",
                site.domain,
                response.error.unwrap_or_else(|| "unknown error".into())
            )));
        }

        let pages = dedup_links(response.links);
        log::info!("Discovered {} URLs for {}", pages.len(), site.domain);
        Ok(pages)
    }
}

#[async_trait]
impl ScrapeJobApi for FirecrawlClient {
    async fn submit(&self, urls: &[String]) -> Result<String> {
        let body = json!({
            "urls": urls,
            "formats": [
                "markdown",
                {
                    "type": "json",
                    "prompt": EXTRACT_PROMPT,
                    "schema": extract_schema(),
                }
            ],
            "onlyMainContent": true,
        });

        let response: BatchSubmitResponse = self
            .post_json("/v2/batch/scrape", &body)
            .await
            .map_err(|e| AppError::submission(format!("batch submit: {e}")))?;

        if !response.success {
            return Err(AppError::submission(format!(
                "batch submit rejected: {}",
                response.error.unwrap_or_else(|| "unknown error".into())
            )));
        }

        response
            .id
            .ok_or_else(|| AppError::submission("batch submit returned no job id"))
    }

    async fn poll(&self, job_id: &str, cursor: Option<&str>) -> Result<JobStatusPage> {
        // A cursor is a complete continuation URL handed back by the
        // provider; without one we poll the job root.
        let url = match cursor {
            Some(next) => next.to_string(),
            None => self.job_url(job_id),
        };

        let response: BatchStatusResponse = self.get_json(&url).await?;

        Ok(JobStatusPage {
            status: response.status.as_deref().map(JobStatus::from_wire),
            completed: response.completed,
            total: response.total,
            pages: response.data.into_iter().filter_map(to_scraped_page).collect(),
            next_cursor: response.next,
        })
    }
}
