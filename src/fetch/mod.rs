//! Resilient fetch engine: attempt, detect throttling, back off, rotate identity, retry.
//!
//! One [FetchEngine::fetch] call is self-contained: attempt counters and timers are locals,
//! the identity pool and detector are shared read-only, and the only suspension point (the
//! backoff sleep) is cancellable through a [CancelSignal].

mod backoff;
mod cancel;
mod detect;
mod error;
mod identity;
mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use backoff::{Backoff, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_UNIT};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal, Cancelled};
pub use detect::{RateLimitDetector, Verdict, DEFAULT_THROTTLE_MARKER};
pub use error::{AttemptError, FailureKind, FetchFailure, TransportError};
pub use identity::{
    browser_headers, Identity, IdentityPool, BROWSER_USER_AGENTS, DEFAULT_ACCEPT_LANGUAGE,
    DEFAULT_REFERER,
};
pub use transport::{HttpRequest, HttpResponse, Transport};

use reqwest::Url;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminal outcome of one fetch.
pub type FetchResult = Result<Payload, FetchFailure>;

/// Content kind a resource is expected to decode as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Html,
    Json,
}

impl ContentKind {
    /// Kind implied by a `Content-Type` header value, if recognizable.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next()?.trim().to_ascii_lowercase();
        if essence == "application/json" || essence.ends_with("+json") || essence == "text/json" {
            Some(ContentKind::Json)
        } else if essence == "text/html" || essence == "application/xhtml+xml" {
            Some(ContentKind::Html)
        } else {
            None
        }
    }

    /// `Accept` header a browser sends for this kind of request.
    pub fn accept_header(self) -> &'static str {
        match self {
            ContentKind::Html => {
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
            }
            ContentKind::Json => "application/json, text/plain, */*",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContentKind::Html => "HTML",
            ContentKind::Json => "JSON",
        })
    }
}

/// What to fetch: a URL, extra query parameters, and the expected content kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub expect: ContentKind,
}

impl Resource {
    pub fn html(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            expect: ContentKind::Html,
        }
    }

    pub fn json(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            expect: ContentKind::Json,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Absolute http(s) URL with the query parameters percent-encoded and appended.
    pub fn request_url(&self) -> Result<String, TransportError> {
        let invalid = |reason: String| TransportError::InvalidUrl {
            url: self.url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url.into())
    }
}

/// A response classified as a non-throttled success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub body: Vec<u8>,
    /// The kind the body was verified to decode as.
    pub content_type: ContentKind,
    /// Raw `Content-Type` header, if any.
    pub mime: Option<String>,
    pub status: u16,
    /// Number of requests it took, including the successful one.
    pub attempts: u32,
    pub url: String,
}

impl Payload {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Throttled,
    TransportError,
    ServerError,
    Rejected,
    DecodeError,
}

/// Record of one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Position of the identity used in the pool.
    pub identity: usize,
    /// Backoff applied before this attempt (zero for the first).
    pub delay: Duration,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

enum Step {
    Done(HttpResponse),
    Retry(FailureKind, AttemptError),
    Stop(FailureKind, AttemptError),
}

/// Orchestrates attempts for one resource. Cheap to clone; clones share pool and transport.
#[derive(Clone)]
pub struct FetchEngine {
    transport: Arc<dyn Transport>,
    identities: Arc<IdentityPool>,
    detector: Arc<RateLimitDetector>,
    backoff: Backoff,
    timeout: Duration,
    max_attempts: u32,
    cancel: CancelSignal,
}

impl fmt::Debug for FetchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchEngine")
            .field("identities", &self.identities.len())
            .field("detector", &self.detector)
            .field("backoff", &self.backoff)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl FetchEngine {
    pub fn builder<T: Transport + 'static>(transport: T) -> FetchEngineBuilder {
        FetchEngineBuilder::new(Arc::new(transport))
    }

    /// Same engine, observing a different cancel signal (e.g. a per-call deadline).
    pub fn with_cancel_signal(&self, cancel: CancelSignal) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Fetch with the configured default attempt ceiling.
    pub fn fetch_default(&self, resource: &Resource) -> FetchResult {
        self.fetch(resource, self.max_attempts)
    }

    /// Fetch `resource`, making at most `max_attempts` requests (0 is treated as 1).
    ///
    /// Throttled responses, transport errors, and 5xx are retried with the next identity
    /// after `backoff.delay_for(retry)`; rejections and undecodable payloads end the fetch
    /// at once. Success returns immediately without further attempts.
    pub fn fetch(&self, resource: &Resource, max_attempts: u32) -> FetchResult {
        let max_attempts = max_attempts.max(1);
        let url = resource.request_url().map_err(|e| {
            FetchFailure::new(
                FailureKind::InvalidRequest,
                resource.url.clone(),
                0,
                Some(e.into()),
                Vec::new(),
            )
        })?;

        let mut history: Vec<FetchAttempt> = Vec::with_capacity(max_attempts as usize);
        let mut last_error: Option<AttemptError> = None;

        for index in 0..max_attempts {
            let attempt = index + 1;
            let identity_index = self.identities.index_for(index);
            let identity = self.identities.next(index);
            let (delay, cancelled) = if index > 0 {
                let delay = self.backoff.delay_for(index);
                tracing::debug!(
                    url = %url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "backing off before retry"
                );
                (delay, self.cancel.sleep(delay).is_err())
            } else {
                (Duration::ZERO, self.cancel.is_cancelled())
            };
            if cancelled {
                tracing::info!(url = %url, attempt, "fetch cancelled");
                return Err(FetchFailure::new(
                    FailureKind::Cancelled,
                    url,
                    index,
                    last_error,
                    history,
                ));
            }

            let request = HttpRequest {
                url: url.clone(),
                headers: self.headers_for(identity, resource.expect),
                timeout: self.timeout,
            };
            tracing::debug!(
                url = %url,
                attempt,
                max_attempts,
                identity = identity_index,
                "sending request"
            );
            let started = Instant::now();
            let step = match self.transport.send(&request) {
                Ok(response) => self.judge(response, resource.expect),
                Err(e @ TransportError::InvalidUrl { .. }) => {
                    Step::Stop(FailureKind::InvalidRequest, e.into())
                }
                Err(e) => Step::Retry(FailureKind::TransportExhausted, e.into()),
            };
            let elapsed = started.elapsed();
            let record = |outcome: AttemptOutcome| FetchAttempt {
                attempt,
                identity: identity_index,
                delay,
                elapsed,
                outcome,
            };

            match step {
                Step::Done(response) => {
                    tracing::info!(
                        url = %url,
                        attempt,
                        status = response.status,
                        elapsed_ms = elapsed.as_millis() as u64,
                        bytes = response.body.len(),
                        "fetched"
                    );
                    return Ok(Payload {
                        body: response.body,
                        content_type: resource.expect,
                        mime: response.content_type,
                        status: response.status,
                        attempts: attempt,
                        url,
                    });
                }
                Step::Stop(kind, error) => {
                    tracing::warn!(url = %url, attempt, error = %error, "not retrying: {}", kind);
                    history.push(record(error.outcome()));
                    return Err(FetchFailure::new(kind, url, attempt, Some(error), history));
                }
                Step::Retry(kind, error) => {
                    history.push(record(error.outcome()));
                    if attempt == max_attempts {
                        tracing::warn!(
                            url = %url,
                            attempts = attempt,
                            error = %error,
                            "giving up: {}",
                            kind
                        );
                        return Err(FetchFailure::new(kind, url, attempt, Some(error), history));
                    }
                    tracing::warn!(
                        url = %url,
                        attempt,
                        max_attempts,
                        error = %error,
                        "attempt failed; retrying with next identity"
                    );
                    last_error = Some(error);
                }
            }
        }

        tracing::error!(url = %url, "retry loop ended without a decision");
        Err(FetchFailure::new(
            FailureKind::InvariantViolation,
            url,
            max_attempts,
            last_error,
            history,
        ))
    }

    fn judge(&self, response: HttpResponse, expected: ContentKind) -> Step {
        let status = response.status;
        match self
            .detector
            .classify(status, &response.body, expected)
        {
            Verdict::Success => Step::Done(response),
            Verdict::Throttled { reason } => Step::Retry(
                FailureKind::RateLimited,
                AttemptError::Throttled { status, reason },
            ),
            Verdict::ServerError => Step::Retry(
                FailureKind::TransportExhausted,
                AttemptError::ServerError { status },
            ),
            Verdict::Rejected => {
                Step::Stop(FailureKind::HttpStatus, AttemptError::Rejected { status })
            }
            Verdict::Undecodable { reason } => Step::Stop(
                FailureKind::Decode,
                AttemptError::Decode { expected, reason },
            ),
        }
    }

    fn headers_for(&self, identity: &Identity, expect: ContentKind) -> Vec<(String, String)> {
        let mut headers = identity.request_headers();
        if !identity.has_header("Accept") {
            headers.push(("Accept".to_string(), expect.accept_header().to_string()));
        }
        headers
    }
}

/// Builder for [FetchEngine]. Defaults: browser identities, default marker, base-2 backoff
/// in seconds, 10s timeout, 3 attempts, never cancelled.
pub struct FetchEngineBuilder {
    transport: Arc<dyn Transport>,
    identities: Option<Arc<IdentityPool>>,
    detector: Option<Arc<RateLimitDetector>>,
    backoff: Backoff,
    timeout: Duration,
    max_attempts: u32,
    cancel: CancelSignal,
}

impl FetchEngineBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            identities: None,
            detector: None,
            backoff: Backoff::default(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cancel: CancelSignal::never(),
        }
    }

    pub fn identities(mut self, pool: impl Into<Arc<IdentityPool>>) -> Self {
        self.identities = Some(pool.into());
        self
    }

    pub fn detector(mut self, detector: impl Into<Arc<RateLimitDetector>>) -> Self {
        self.detector = Some(detector.into());
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Default attempt ceiling for [FetchEngine::fetch_default]. At least 1.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> FetchEngine {
        FetchEngine {
            transport: self.transport,
            identities: self
                .identities
                .unwrap_or_else(|| Arc::new(IdentityPool::browser_defaults())),
            detector: self
                .detector
                .unwrap_or_else(|| Arc::new(RateLimitDetector::default())),
            backoff: self.backoff,
            timeout: self.timeout,
            max_attempts: self.max_attempts,
            cancel: self.cancel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{html, json, throttled_json, timeout, ScriptedTransport};
    use super::*;
    use crate::config::ConfigError;
    use std::thread;

    const SEARCH_URL: &str = "https://book.douban.com/j/search";

    fn fast_backoff() -> Backoff {
        Backoff::new(2, Duration::from_millis(1)).expect("base 2 is valid")
    }

    fn engine(transport: &Arc<ScriptedTransport>) -> FetchEngine {
        FetchEngine::builder(Arc::clone(transport))
            .backoff(fast_backoff())
            .build()
    }

    fn search() -> Resource {
        Resource::json(SEARCH_URL)
            .with_query("search_text", "三体")
            .with_query("start", "0")
    }

    #[test]
    fn persistent_throttling_exhausts_exactly_max_attempts() {
        let transport = Arc::new(ScriptedTransport::always(throttled_json()));
        let failure = engine(&transport)
            .fetch(&search(), 3)
            .expect_err("throttling never clears");
        assert_eq!(failure.kind, FailureKind::RateLimited);
        assert_eq!(failure.attempts, 3);
        assert_eq!(transport.sent(), 3);
        assert!(matches!(
            failure.last_error,
            Some(AttemptError::Throttled { status: 200, .. })
        ));
        assert!(failure
            .history
            .iter()
            .all(|a| a.outcome == AttemptOutcome::Throttled));
    }

    #[test]
    fn success_on_second_attempt_stops_immediately() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            throttled_json(),
            json(200, r#"{"total": 1, "items": []}"#),
            json(200, r#"{"total": 2, "items": []}"#),
        ]));
        let payload = engine(&transport)
            .fetch(&search(), 3)
            .expect("second attempt succeeds");
        assert_eq!(payload.attempts, 2);
        assert_eq!(payload.content_type, ContentKind::Json);
        assert!(payload.text().contains("\"total\": 1"));
        assert_eq!(transport.sent(), 2);
    }

    #[test]
    fn backoff_is_applied_only_between_attempts() {
        let transport = Arc::new(ScriptedTransport::always(throttled_json()));
        let failure = engine(&transport)
            .fetch(&search(), 4)
            .expect_err("throttling never clears");
        let delays: Vec<Duration> = failure.history.iter().map(|a| a.delay).collect();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_millis(2),
                Duration::from_millis(4),
                Duration::from_millis(8),
            ]
        );
        let numbers: Vec<u32> = failure.history.iter().map(|a| a.attempt).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[test]
    fn identities_rotate_per_attempt() -> Result<(), ConfigError> {
        let transport = Arc::new(ScriptedTransport::always(throttled_json()));
        let pool = IdentityPool::from_user_agents(["ua-0", "ua-1"], &[])?;
        let engine = FetchEngine::builder(Arc::clone(&transport))
            .identities(pool)
            .backoff(fast_backoff())
            .build();
        let failure = engine
            .fetch(&search(), 3)
            .expect_err("throttling never clears");
        let agents: Vec<String> = transport
            .requests()
            .iter()
            .filter_map(|r| r.header("user-agent").map(String::from))
            .collect();
        assert_eq!(agents, ["ua-0", "ua-1", "ua-0"]);
        let used: Vec<usize> = failure.history.iter().map(|a| a.identity).collect();
        assert_eq!(used, vec![0, 1, 0]);
        Ok(())
    }

    #[test]
    fn transport_errors_exhaust_as_transport_failure() {
        let transport = Arc::new(ScriptedTransport::always(timeout()));
        let failure = engine(&transport)
            .fetch(&search(), 3)
            .expect_err("transport never recovers");
        assert_eq!(failure.kind, FailureKind::TransportExhausted);
        assert_eq!(failure.attempts, 3);
        assert!(matches!(
            failure.last_error,
            Some(AttemptError::Transport(TransportError::Timeout(_)))
        ));
    }

    #[test]
    fn server_errors_are_retried_like_transport_errors() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            html(503, "unavailable"),
            html(200, "<html><h1><span>ok</span></h1></html>"),
        ]));
        let payload = engine(&transport)
            .fetch(&Resource::html("https://book.douban.com/subject/1/"), 3)
            .expect("recovers after 503");
        assert_eq!(payload.attempts, 2);

        let transport = Arc::new(ScriptedTransport::always(html(502, "bad gateway")));
        let failure = engine(&transport)
            .fetch(&Resource::html("https://book.douban.com/subject/1/"), 2)
            .expect_err("502 forever");
        assert_eq!(failure.kind, FailureKind::TransportExhausted);
        assert!(matches!(
            failure.last_error,
            Some(AttemptError::ServerError { status: 502 })
        ));
    }

    #[test]
    fn kind_reflects_the_last_attempt() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            timeout(),
            html(500, "oops"),
            throttled_json(),
        ]));
        let failure = engine(&transport)
            .fetch(&search(), 3)
            .expect_err("all attempts fail");
        assert_eq!(failure.kind, FailureKind::RateLimited);
        let outcomes: Vec<AttemptOutcome> = failure.history.iter().map(|a| a.outcome).collect();
        assert_eq!(
            outcomes,
            [
                AttemptOutcome::TransportError,
                AttemptOutcome::ServerError,
                AttemptOutcome::Throttled
            ]
        );
    }

    #[test]
    fn decode_errors_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::always(html(200, "<html>not json")));
        let failure = engine(&transport)
            .fetch(&search(), 3)
            .expect_err("body is not JSON");
        assert_eq!(failure.kind, FailureKind::Decode);
        assert_eq!(failure.attempts, 1);
        assert_eq!(transport.sent(), 1);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::always(html(404, "<title>404</title>")));
        let failure = engine(&transport)
            .fetch(&Resource::html("https://book.douban.com/subject/0/"), 3)
            .expect_err("404");
        assert_eq!(failure.kind, FailureKind::HttpStatus);
        assert_eq!(transport.sent(), 1);
    }

    #[test]
    fn zero_max_attempts_still_makes_one_request() {
        let transport = Arc::new(ScriptedTransport::always(throttled_json()));
        let failure = engine(&transport)
            .fetch(&search(), 0)
            .expect_err("throttled");
        assert_eq!(failure.attempts, 1);
        assert_eq!(transport.sent(), 1);
    }

    #[test]
    fn invalid_url_fails_without_sending() {
        let transport = Arc::new(ScriptedTransport::always(throttled_json()));
        for url in ["not a url", "ftp://book.douban.com/"] {
            let failure = engine(&transport)
                .fetch(&Resource::html(url), 3)
                .expect_err("invalid url");
            assert_eq!(failure.kind, FailureKind::InvalidRequest);
            assert_eq!(failure.attempts, 0);
        }
        assert_eq!(transport.sent(), 0);
    }

    #[test]
    fn request_carries_query_accept_and_timeout() {
        let transport = Arc::new(ScriptedTransport::always(json(200, "{}")));
        let engine = FetchEngine::builder(Arc::clone(&transport))
            .timeout(Duration::from_secs(15))
            .build();
        engine.fetch(&search(), 1).expect("ok");
        let requests = transport.requests();
        let request = &requests[0];
        assert!(request.url.starts_with(SEARCH_URL));
        assert!(request
            .url
            .contains("search_text=%E4%B8%89%E4%BD%93&start=0"));
        assert_eq!(request.header("accept"), Some(ContentKind::Json.accept_header()));
        assert_eq!(request.header("Referer"), Some(DEFAULT_REFERER));
        assert_eq!(request.timeout, Duration::from_secs(15));
    }

    #[test]
    fn already_cancelled_signal_sends_nothing() {
        let transport = Arc::new(ScriptedTransport::always(json(200, "{}")));
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let failure = engine(&transport)
            .with_cancel_signal(signal)
            .fetch(&search(), 3)
            .expect_err("cancelled");
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.attempts, 0);
        assert_eq!(transport.sent(), 0);
    }

    #[test]
    fn expired_deadline_sends_nothing() {
        let transport = Arc::new(ScriptedTransport::always(json(200, "{}")));
        let failure = engine(&transport)
            .with_cancel_signal(CancelSignal::never().with_deadline(Instant::now()))
            .fetch(&search(), 3)
            .expect_err("deadline already passed");
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.attempts, 0);
        assert!(failure.history.is_empty());
        assert_eq!(transport.sent(), 0);
    }

    #[test]
    fn first_attempt_is_sent_without_backoff() {
        let transport = Arc::new(ScriptedTransport::always(json(200, "{}")));
        let engine = FetchEngine::builder(Arc::clone(&transport))
            .backoff(Backoff::default().with_max_delay(Duration::from_secs(60)))
            .build();
        let started = Instant::now();
        let payload = engine.fetch(&search(), 3).expect("first attempt succeeds");
        assert_eq!(payload.attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cancel_interrupts_backoff_sleep() {
        let transport = Arc::new(ScriptedTransport::always(throttled_json()));
        let (handle, signal) = cancel_pair();
        let engine = FetchEngine::builder(Arc::clone(&transport))
            .backoff(Backoff::default().with_max_delay(Duration::from_secs(60)))
            .cancel_signal(signal)
            .build();
        let worker = thread::spawn(move || {
            let started = Instant::now();
            let result = engine.fetch(&search(), 3);
            (result, started.elapsed())
        });
        thread::sleep(Duration::from_millis(50));
        handle.cancel();
        let (result, elapsed) = worker.join().expect("worker panicked");
        let failure = result.expect_err("cancelled during backoff");
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.attempts, 1);
        assert!(elapsed < Duration::from_secs(2));
        assert_eq!(transport.sent(), 1);
    }

    #[test]
    fn content_kind_from_mime() {
        assert_eq!(
            ContentKind::from_mime("application/json; charset=utf-8"),
            Some(ContentKind::Json)
        );
        assert_eq!(
            ContentKind::from_mime("text/html;charset=UTF-8"),
            Some(ContentKind::Html)
        );
        assert_eq!(ContentKind::from_mime("image/png"), None);
    }
}
