//! Scraper facade: resolve a target, fetch it through the engine, extract, and assemble.

mod client;
mod error;

pub use client::{ReqwestTransport, ReqwestTransportBuilder};
pub use error::ScraperError;

use crate::assemble::assemble;
use crate::extract::{parse_search_results, FieldExtractor};
use crate::fetch::{FetchEngine, Resource};
use crate::model::{BookRecord, SearchHit};
use reqwest::Url;
use std::sync::Arc;

pub const DOUBAN_BOOK_BASE: &str = "https://book.douban.com";
pub const DOUBAN_SEARCH_ENDPOINT: &str = "https://book.douban.com/j/search";
/// Search category for books.
const SEARCH_CATEGORY: &str = "1001";

/// Book URL for a numeric subject id.
pub fn subject_url(subject_id: &str) -> String {
    format!("{}/subject/{}/", DOUBAN_BOOK_BASE, subject_id)
}

/// Turn user input into a fetchable resource.
///
/// A bare digit string is a subject id. Otherwise the input must be an http(s) URL on
/// douban.com; `api.` hosts are fetched as JSON, everything else as HTML.
pub fn resolve_target(input: &str) -> Result<Resource, ScraperError> {
    let input = input.trim();
    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(Resource::html(subject_url(input)));
    }
    let invalid = |reason: String| ScraperError::InvalidUrl {
        input: input.to_string(),
        reason,
    };
    let url = Url::parse(input).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    let host = url
        .host_str()
        .ok_or_else(|| invalid("URL has no host".to_string()))?
        .to_ascii_lowercase();
    if host != "douban.com" && !host.ends_with(".douban.com") {
        return Err(ScraperError::UnrecognizedHost { host });
    }
    if host.starts_with("api.") {
        Ok(Resource::json(url))
    } else {
        Ok(Resource::html(url))
    }
}

/// Fetch → extract → assemble. Cheap to clone; clones share the engine and rules.
#[derive(Debug, Clone)]
pub struct Scraper {
    engine: Arc<FetchEngine>,
    extractor: Arc<FieldExtractor>,
    search_endpoint: String,
}

impl Scraper {
    pub fn new(engine: FetchEngine, extractor: FieldExtractor) -> Self {
        Self {
            engine: Arc::new(engine),
            extractor: Arc::new(extractor),
            search_endpoint: DOUBAN_SEARCH_ENDPOINT.to_string(),
        }
    }

    /// Point searches at a different endpoint (mirrors, local fixtures).
    pub fn with_search_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.search_endpoint = endpoint.into();
        self
    }

    pub fn engine(&self) -> &FetchEngine {
        &self.engine
    }

    /// Fetch one book page and turn it into a record. An empty record is a success.
    pub fn scrape_book(&self, resource: &Resource) -> Result<BookRecord, ScraperError> {
        let payload = self.engine.fetch_default(resource)?;
        let mut partial = self.extractor.extract(&payload.body, payload.content_type);
        partial.source_url = Some(payload.url.clone());
        let record = assemble(partial);
        if record.is_empty() {
            tracing::warn!(url = %payload.url, "page yielded no extractable metadata");
        } else {
            tracing::info!(
                url = %payload.url,
                attempts = payload.attempts,
                fields = record.populated_fields(),
                "scraped book"
            );
        }
        Ok(record)
    }

    /// One page of search results, `start` being the result offset.
    pub fn search(&self, query: &str, start: u32) -> Result<Vec<SearchHit>, ScraperError> {
        let resource = Resource::json(self.search_endpoint.as_str())
            .with_query("search_text", query)
            .with_query("start", start.to_string())
            .with_query("cat", SEARCH_CATEGORY);
        let payload = self.engine.fetch_default(&resource)?;
        let hits = parse_search_results(&payload.body, payload.content_type);
        tracing::info!(query, start, hits = hits.len(), "search complete");
        Ok(hits)
    }

    /// Extract from already-fetched HTML without touching the network.
    pub fn extract_html(&self, html: &str) -> BookRecord {
        assemble(self.extractor.extract_html(html))
    }
}
