// src/pipeline/assemble.rs

//! Index document assembly.
//!
//! Renders the site index (`SKILL.md`) from a fixed template and the
//! current document set. The template is the single source of truth for
//! the index content; only `{domain}` and `{site_description}` are
//! substituted.

use crate::error::Result;
use crate::models::SiteInput;
use crate::storage::SyncStore;

/// Embedded index template.
const INDEX_TEMPLATE: &str = include_str!("../../templates/skill-md.template");

/// Render the index document for a site.
pub fn render_index(site: &SiteInput) -> String {
    INDEX_TEMPLATE
        .replace("{domain}", &site.domain)
        .replace("{site_description}", &site.description)
}

/// Render and write the index document next to the document set.
pub async fn write_index(store: &dyn SyncStore, site: &SiteInput) -> Result<()> {
    store.write_index(&site.domain, &render_index(site)).await
}
