// src/models/site.rs

//! Site input validation and normalization.
//!
//! Accepts any URL-like string and resolves it to a clean domain. The
//! domain is the single key that drives everything: the per-site state
//! record, the output directory, the discovery root URL, and the
//! `{domain}` variable of the index template.
//!
//! Subdomain handling:
//! - `www.example.com`  → `example.com` (www. is cosmetic, stripped)
//! - `blog.example.com` → `blog.example.com` (different website, kept)

use url::Url;

use crate::error::{AppError, Result};

/// A validated, normalized site identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteInput {
    /// Normalized domain, e.g. `docs.example.com`
    pub domain: String,

    /// Root URL submitted to discovery, always `https://{domain}`
    pub root_url: String,

    /// One-line site description used by the index document
    pub description: String,
}

impl SiteInput {
    /// Parse a URL-like string (`https://example.com/about`, `example.com`,
    /// `www.example.com`) into a normalized site input.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation(
                "URL cannot be empty. Pass a website URL like: https://example.com",
            ));
        }

        // Add scheme if missing (bare domain like "example.com")
        let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        let parsed = Url::parse(&with_scheme)
            .map_err(|_| AppError::validation(format!("Could not parse domain from '{raw}'")))?;

        let host = parsed
            .host_str()
            .ok_or_else(|| AppError::validation(format!("Could not parse domain from '{raw}'")))?;

        // Reject obvious non-website inputs
        if !host.contains('.') {
            return Err(AppError::validation(format!(
                "'{host}' doesn't look like a domain. Expected something like: example.com"
            )));
        }

        let mut domain = host.to_lowercase();
        if let Some(stripped) = domain.strip_prefix("www.") {
            domain = stripped.to_string();
        }

        let root_url = format!("https://{domain}");
        let description = format!("a website at {domain}.");

        Ok(Self {
            domain,
            root_url,
            description,
        })
    }

    /// Replace the default description with a caller-supplied one.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        if !description.trim().is_empty() {
            self.description = description;
        }
        self
    }
}
