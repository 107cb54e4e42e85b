//! Service layer: clients for the remote collaborators.
//!
//! - `discovery`: listing endpoint interface (`DiscoveryApi`)
//! - `scrape`: batch scrape job interface (`ScrapeJobApi`)
//! - `firecrawl`: Firecrawl-backed implementation of both

pub mod discovery;
pub mod firecrawl;
pub mod scrape;

pub use discovery::{DiscoveredPage, DiscoveryApi};
pub use firecrawl::FirecrawlClient;
pub use scrape::{JobStatus, JobStatusPage, ScrapeJobApi, ScrapedPage};
