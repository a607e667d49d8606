//! Article lookup through the MediaWiki action API.
//!
//! Uses `prop=extracts` with `explaintext` so the server strips HTML, then
//! turns `== Heading ==` markers into spoken headings and drops the
//! reference-style sections at the end of most articles.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::WikipediaConfig;
use crate::error::{Error, Result};
use crate::usage::{CallContext, UsageKind, UsageRecord, UsageSink};

/// Sections that are never narrated, along with their subsections.
const SKIPPED_SECTIONS: &[&str] = &[
    "see also",
    "references",
    "notes",
    "notes and references",
    "footnotes",
    "external links",
    "further reading",
    "bibliography",
    "sources",
    "citations",
];

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(={2,6})\s*(.*?)\s*={2,6}\s*$").expect("heading regex"));
static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank-run regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub topic: String,
    pub raw_text: String,
    pub exists: bool,
}

#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn page_exists(&self, topic: &str) -> Result<bool>;

    /// Fails with [`Error::NotFound`] when the page does not exist.
    async fn fetch_article(&self, topic: &str, ctx: &CallContext) -> Result<Article>;
}

pub struct WikipediaClient {
    endpoint: String,
    client: Client,
    usage: Arc<dyn UsageSink>,
}

// --- MediaWiki response (formatversion=2) ---

#[derive(Deserialize)]
struct QueryResponse {
    query: Option<QueryBody>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct QueryBody {
    #[serde(default)]
    pages: Vec<PageEntry>,
}

#[derive(Deserialize)]
struct PageEntry {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    extract: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    code: String,
    info: String,
}

impl WikipediaClient {
    pub fn new(
        config: &WikipediaConfig,
        timeout: Duration,
        usage: Arc<dyn UsageSink>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: format!("{}/w/api.php", config.base_url.trim_end_matches('/')),
            client,
            usage,
        })
    }

    async fn query_page(&self, title: &str, with_extract: bool) -> Result<Option<PageEntry>> {
        let mut params = vec![
            ("action", "query"),
            ("format", "json"),
            ("formatversion", "2"),
            ("redirects", "1"),
            ("titles", title),
        ];
        if with_extract {
            params.extend([
                ("prop", "extracts"),
                ("explaintext", "1"),
                ("exsectionformat", "wiki"),
            ]);
        }

        debug!("MediaWiki query for '{title}' (extract={with_extract})");
        let resp = self.client.get(&self.endpoint).query(&params).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Upstream(format!("MediaWiki returned status {}", resp.status())));
        }

        let body: QueryResponse = resp.json().await?;
        if let Some(err) = body.error {
            return Err(Error::Upstream(format!("MediaWiki error {}: {}", err.code, err.info)));
        }

        let page = body
            .query
            .and_then(|q| q.pages.into_iter().next())
            .filter(|p| !p.missing && !p.invalid);
        Ok(page)
    }
}

#[async_trait]
impl ArticleSource for WikipediaClient {
    async fn page_exists(&self, topic: &str) -> Result<bool> {
        let title = normalize_topic(topic);
        Ok(self.query_page(&title, false).await?.is_some())
    }

    async fn fetch_article(&self, topic: &str, ctx: &CallContext) -> Result<Article> {
        let title = normalize_topic(topic);
        let page = self
            .query_page(&title, true)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Wikipedia page '{topic}' does not exist")))?;

        let raw = page.extract.unwrap_or_default();
        let text = clean_extract(&raw);
        info!("Fetched '{}': {} chars", page.title, text.chars().count());

        self.usage.record(UsageRecord::now(
            UsageKind::Fetch,
            text.chars().count() as u64,
            0.0,
            ctx,
        ));

        Ok(Article {
            topic: page.title,
            raw_text: text,
            exists: true,
        })
    }
}

/// Normalize user input to MediaWiki title form.
pub fn normalize_topic(topic: &str) -> String {
    let collapsed = topic
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut chars = collapsed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Turn a plain-text extract into narration-ready text.
pub fn clean_extract(extract: &str) -> String {
    let mut out = String::with_capacity(extract.len());
    let mut skip_level: Option<usize> = None;

    for line in extract.lines() {
        let line = line.trim_end();

        if let Some(caps) = HEADING.captures(line) {
            let level = caps[1].len();
            let title = caps[2].trim();

            if skip_level.is_some_and(|skip| level > skip) {
                continue;
            }
            skip_level = None;

            if SKIPPED_SECTIONS.contains(&title.to_lowercase().as_str()) {
                skip_level = Some(level);
                continue;
            }
            if title.is_empty() {
                continue;
            }

            out.push_str("\n\n");
            out.push_str(title);
            if !title.ends_with(&['.', '!', '?'][..]) {
                out.push('.');
            }
            out.push_str("\n\n");
            continue;
        }

        if skip_level.is_some() {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }

    BLANK_RUNS.replace_all(&out, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn topic_normalization_follows_title_rules() {
        assert_eq!(normalize_topic("  cornbread "), "Cornbread");
        assert_eq!(normalize_topic("new_york   city"), "New york city");
        assert_eq!(normalize_topic("éclair"), "Éclair");
        assert_eq!(normalize_topic("   "), "");
    }

    #[test]
    fn headings_become_spoken_lines() {
        let extract = "Cornbread is bread.\n\n\n== History ==\nIt is old.\n\n=== Origins ===\nNative roots.";
        assert_eq!(
            clean_extract(extract),
            "Cornbread is bread.\n\nHistory.\n\nIt is old.\n\nOrigins.\n\nNative roots."
        );
    }

    #[test]
    fn reference_sections_and_their_children_are_dropped() {
        let extract = "Lead.\n\n== Variants ==\nSkillet.\n\n== See also ==\nJohnnycake\n\n=== Related ===\nHoecake\n\n== Legacy ==\nStill eaten.\n\n== References ==\n[1] Someone (1999).";
        let cleaned = clean_extract(extract);
        assert_eq!(cleaned, "Lead.\n\nVariants.\n\nSkillet.\n\nLegacy.\n\nStill eaten.");
    }

    #[test]
    fn empty_extract_stays_empty() {
        assert_eq!(clean_extract(""), "");
    }
}
