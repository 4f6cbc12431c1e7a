//! Error type for the scraper facade.

use crate::fetch::FetchFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Unsupported host '{host}'. Expected a douban.com book URL or a numeric subject id.")]
    UnrecognizedHost { host: String },

    #[error("{0}")]
    Fetch(#[from] FetchFailure),

    #[error("Failed to create HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },
}

impl ScraperError {
    /// True when retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScraperError::Fetch(f) if f.is_transient())
    }
}
