//! Data model for scraped book metadata.
//!
//! The extractor fills a [PartialBookRecord]; the assembler turns it into the [BookRecord]
//! callers see. Every field is optional: a record with nothing populated is a valid
//! "no extractable metadata" result, not an error.

use serde::{Deserialize, Serialize};

/// Extractor output. Same fields as [BookRecord], before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialBookRecord {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub pubdate: Option<String>,
    pub pages: Option<u32>,
    pub isbn: Option<String>,
    pub cover_url: Option<String>,
    pub description: Option<String>,
    pub subject_id: Option<String>,
    pub tags: Vec<String>,
    pub source_url: Option<String>,
}

/// One book's metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Document order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// Free-form, as printed on the page (e.g. "2003-8" or "2015年10月").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubdate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    /// Digit groups joined by hyphens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Page the record was scraped from. Provenance only; not counted by [BookRecord::is_empty].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl BookRecord {
    /// True when no metadata field was extracted.
    pub fn is_empty(&self) -> bool {
        self.populated_fields() == 0
    }

    /// Number of metadata fields present (source URL excluded).
    pub fn populated_fields(&self) -> usize {
        [
            self.title.is_some(),
            !self.authors.is_empty(),
            self.publisher.is_some(),
            self.pubdate.is_some(),
            self.pages.is_some(),
            self.isbn.is_some(),
            self.cover_url.is_some(),
            self.description.is_some(),
            self.subject_id.is_some(),
            !self.tags.is_empty(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}

/// One entry of a search result list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchHit {
    pub subject_id: String,
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<String>,
}
