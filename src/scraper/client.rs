//! Blocking reqwest transport: cookie jar, limited redirects, per-request timeout.

use crate::fetch::{HttpRequest, HttpResponse, Transport, TransportError};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_REDIRECTS: usize = 10;

/// Production [Transport]. Identity headers come with each request; the client adds none of its own.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Transport with default timeouts.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.inner.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder
            .send()
            .map_err(|e| classify(e, request))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(request.timeout)
            } else {
                TransportError::BodyRead(e.to_string())
            }
        })?;
        Ok(HttpResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

fn classify(e: reqwest::Error, request: &HttpRequest) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(request.timeout)
    } else if e.is_builder() {
        TransportError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        }
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

/// Builder for [ReqwestTransport].
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    timeout_secs: u64,
    connect_timeout_secs: u64,
    max_redirects: usize,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            max_redirects: MAX_REDIRECTS,
        }
    }
}

impl ReqwestTransportBuilder {
    /// Client-wide ceiling. Each request still carries its own timeout. Default 10.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn max_redirects(mut self, n: usize) -> Self {
        self.max_redirects = n;
        self
    }

    pub fn build(self) -> Result<ReqwestTransport, reqwest::Error> {
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(self.max_redirects))
            .build()?;
        Ok(ReqwestTransport { inner })
    }
}
