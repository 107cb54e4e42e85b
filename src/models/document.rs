// src/models/document.rs

//! The persisted output artifact for one resource.
//!
//! A document is a markdown file with YAML frontmatter carrying exactly
//! four fields: title, description, canonical URL, and a content-manifest
//! summary. Documents are created and overwritten only by the reconciler,
//! and every write is atomic, so a crash never leaves a half-written
//! document visible.

/// A renderable document for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Page title, clean and concise.
    pub title: String,

    /// One/two-sentence description of the page.
    pub description: String,

    /// Canonical source URL.
    pub url: String,

    /// Content manifest: what a reader would find on the full page.
    pub summary: String,

    /// Freeform markdown body.
    pub body: String,
}

impl Document {
    /// Render the document to its on-disk representation.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("---\n");
        out.push_str(&format!("title: \"{}\"\n", yaml_escape(&self.title)));
        out.push_str(&format!(
            "description: \"{}\"\n",
            yaml_escape(&self.description)
        ));
        out.push_str(&format!("url: \"{}\"\n", self.url));
        out.push_str("summary: |\n");
        out.push_str(&wrap_summary(&self.summary, 2, 80));
        out.push_str("\n---\n\n");
        out.push_str(&self.body);
        out
    }

    /// File name for a document with the given slug.
    pub fn file_name(slug: &str) -> String {
        format!("{slug}.md")
    }
}

/// Escape a string for a YAML double-quoted scalar.
fn yaml_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', " ")
}

/// Word-wrap summary text with the given indent.
fn wrap_summary(summary: &str, indent: usize, width: usize) -> String {
    let prefix = " ".repeat(indent);
    let mut lines = Vec::new();
    let mut line = prefix.clone();

    for word in summary.split_whitespace() {
        if line.len() + word.len() + 1 > width {
            lines.push(line.trim_end().to_string());
            line = format!("{prefix}{word} ");
        } else {
            line.push_str(word);
            line.push(' ');
        }
    }
    if !line.trim().is_empty() {
        lines.push(line.trim_end().to_string());
    }
    lines.join("\n")
}

/// Strip leading navigation junk from a scraped markdown body.
///
/// Remote extraction often prepends breadcrumb links and button text
/// before the real content. Scan forward to the first heading or the
/// first substantial prose line and drop everything above it; if neither
/// is found the body is returned unchanged.
pub fn clean_markdown(md: &str) -> String {
    let lines: Vec<&str> = md.split('\n').collect();
    for (i, line) in lines.iter().enumerate() {
        let stripped = line.trim();
        if stripped.starts_with('#') {
            return lines[i..].join("\n");
        }
        if stripped.len() > 80 && stripped.contains(' ') && !stripped.starts_with('!') {
            return lines[i..].join("\n");
        }
    }
    md.to_string()
}
