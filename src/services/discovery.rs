// src/services/discovery.rs

//! Resource discovery interface.
//!
//! Discovery asks the remote listing endpoint for the complete, current
//! set of resource URLs belonging to a site. The response is a full
//! replacement set: the diff engine computes MISSING against it, so a
//! truncated or failed listing must surface as an error rather than an
//! empty list.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{DiscoveryConfig, SiteInput};

/// One discovered resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPage {
    /// Canonical resource URL.
    pub url: String,

    /// Optional freshness signal (e.g. a sitemap lastmod). Absent more
    /// often than present; absence means the caller cannot prove the
    /// resource unchanged.
    pub last_modified: Option<String>,
}

impl DiscoveredPage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            last_modified: None,
        }
    }

    pub fn with_last_modified(mut self, signal: impl Into<String>) -> Self {
        self.last_modified = Some(signal.into());
        self
    }
}

/// Client for the remote listing endpoint.
#[async_trait]
pub trait DiscoveryApi: Send + Sync {
    /// Discover all resource URLs for a site.
    ///
    /// Returns a deduplicated list. Errors abort the run before any
    /// state mutation.
    async fn discover(
        &self,
        site: &SiteInput,
        config: &DiscoveryConfig,
    ) -> Result<Vec<DiscoveredPage>>;
}
