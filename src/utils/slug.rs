// src/utils/slug.rs

//! Identifier normalization.
//!
//! Maps a resource URL to a stable, filesystem-safe slug. The slug is a
//! pure function of the URL path, so the same resource always lands in the
//! same document file across runs.

use url::Url;

/// Convert a resource URL to a filesystem-safe slug.
///
/// The path is lowercased, path separators become `--`, and everything
/// outside `[a-z0-9-]` is stripped. An empty path (the site root) maps to
/// `index`.
///
/// # Examples
/// ```
/// use sitesync::utils::slug::url_to_slug;
///
/// assert_eq!(url_to_slug("https://example.com/"), "index");
/// assert_eq!(
///     url_to_slug("https://example.com/services/pricing/"),
///     "services--pricing"
/// );
/// ```
pub fn url_to_slug(identifier: &str) -> String {
    let path = match Url::parse(identifier.trim_end_matches('/')) {
        Ok(parsed) => parsed.path().trim_matches('/').to_string(),
        Err(_) => identifier.trim_matches('/').to_string(),
    };

    if path.is_empty() {
        return "index".to_string();
    }

    let slug: String = path
        .to_lowercase()
        .replace('/', "--")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();

    if slug.is_empty() {
        // Nothing survived the filter (e.g. an all-unicode path). Fall back
        // to "index"; the per-run collision check surfaces any clash.
        "index".to_string()
    } else {
        slug
    }
}
