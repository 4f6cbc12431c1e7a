//! Per-attempt causes and the terminal failure value returned by the fetch engine.

use super::{AttemptOutcome, ContentKind, FetchAttempt};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [Transport](super::Transport) before any response was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    BodyRead(String),

    /// Not retryable: the same URL will be rejected on every attempt.
    #[error("invalid request URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Why a single attempt did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("throttled (HTTP {status}): {reason}")]
    Throttled { status: u16, reason: String },

    #[error("server error: HTTP {status}")]
    ServerError { status: u16 },

    #[error("request rejected: HTTP {status}")]
    Rejected { status: u16 },

    #[error("could not decode {expected} payload: {reason}")]
    Decode { expected: ContentKind, reason: String },
}

impl AttemptError {
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            AttemptError::Transport(_) => AttemptOutcome::TransportError,
            AttemptError::Throttled { .. } => AttemptOutcome::Throttled,
            AttemptError::ServerError { .. } => AttemptOutcome::ServerError,
            AttemptError::Rejected { .. } => AttemptOutcome::Rejected,
            AttemptError::Decode { .. } => AttemptOutcome::DecodeError,
        }
    }
}

/// Terminal classification of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Every attempt ended in a transport error or a 5xx response.
    TransportExhausted,
    /// The last attempt was throttled and no attempts remain.
    RateLimited,
    /// The site answered with a non-retryable status (4xx other than 429).
    HttpStatus,
    /// A 2xx payload did not decode as the expected content kind.
    Decode,
    /// The cancel signal fired before the fetch finished.
    Cancelled,
    /// The resource could not be turned into a request URL.
    InvalidRequest,
    /// The attempt loop ended without deciding; indicates a bug.
    InvariantViolation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::TransportExhausted => "transport retries exhausted",
            FailureKind::RateLimited => "rate limited",
            FailureKind::HttpStatus => "rejected by server",
            FailureKind::Decode => "undecodable payload",
            FailureKind::Cancelled => "cancelled",
            FailureKind::InvalidRequest => "invalid request",
            FailureKind::InvariantViolation => "retry loop invariant violated",
        };
        f.write_str(s)
    }
}

/// The only error value that crosses the fetch engine boundary.
#[derive(Debug, Clone, Error)]
#[error("{kind} after {attempts} attempt(s) fetching {url}{}", last_error_suffix(.last_error))]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub url: String,
    /// Requests actually issued; never exceeds the configured maximum.
    pub attempts: u32,
    pub last_error: Option<AttemptError>,
    /// Every failed attempt in order, for callers that want to report them.
    pub history: Vec<FetchAttempt>,
}

fn last_error_suffix(last_error: &Option<AttemptError>) -> String {
    match last_error {
        Some(e) => format!(": {}", e),
        None => String::new(),
    }
}

impl FetchFailure {
    pub(crate) fn new(
        kind: FailureKind,
        url: impl Into<String>,
        attempts: u32,
        last_error: Option<AttemptError>,
        history: Vec<FetchAttempt>,
    ) -> Self {
        Self {
            kind,
            url: url.into(),
            attempts,
            last_error,
            history,
        }
    }

    /// True when retrying the same fetch later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::TransportExhausted | FailureKind::RateLimited | FailureKind::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_includes_kind_attempts_and_cause() {
        let failure = FetchFailure::new(
            FailureKind::RateLimited,
            "https://book.douban.com/j/search",
            3,
            Some(AttemptError::Throttled {
                status: 200,
                reason: "marker".to_string(),
            }),
            Vec::new(),
        );
        let msg = failure.to_string();
        assert!(msg.starts_with("rate limited after 3 attempt(s)"));
        assert!(msg.contains("https://book.douban.com/j/search"));
        assert!(msg.ends_with("throttled (HTTP 200): marker"));
    }

    #[test]
    fn transport_errors_map_to_transport_outcome() {
        let err: AttemptError = TransportError::Connect("refused".into()).into();
        assert_eq!(err.outcome(), AttemptOutcome::TransportError);
        assert_eq!(
            AttemptError::ServerError { status: 503 }.outcome(),
            AttemptOutcome::ServerError
        );
    }

    #[test]
    fn only_retryable_kinds_are_transient() {
        let transient = FetchFailure::new(FailureKind::RateLimited, "u", 3, None, Vec::new());
        let terminal = FetchFailure::new(FailureKind::Decode, "u", 1, None, Vec::new());
        assert!(transient.is_transient());
        assert!(!terminal.is_transient());
    }
}
