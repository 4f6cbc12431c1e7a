//! bookscrape: resilient book metadata scraper for Douban.
//!
//! The core is the [fetch] engine (throttle detection, backoff, identity rotation) and the
//! [extract] layer (tolerant field extraction). Everything else is shell.

pub mod assemble;
pub mod cli;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod model;
pub mod scraper;

// Re-exports for CLI and consumers.
pub use assemble::assemble;
pub use config::{load_config, Config, ConfigError, EngineSettings};
pub use extract::{FieldExtractor, RuleSet};
pub use fetch::{
    cancel_pair, Backoff, CancelHandle, CancelSignal, ContentKind, FailureKind, FetchEngine,
    FetchFailure, FetchResult, Identity, IdentityPool, Payload, RateLimitDetector, Resource,
    Transport,
};
pub use formats::{write_json, write_text, FormatError, OutputFormat};
pub use model::{BookRecord, PartialBookRecord, SearchHit};
pub use scraper::{resolve_target, ReqwestTransport, Scraper, ScraperError};
