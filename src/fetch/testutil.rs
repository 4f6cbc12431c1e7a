//! Scripted transport for tests: replays canned responses and records every request.

use super::{HttpRequest, HttpResponse, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::Mutex;

pub(crate) type Reply = Result<HttpResponse, TransportError>;

/// Replays `script` in order; once exhausted, repeats `fallback` (if set) forever.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Option<Reply>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A transport that answers every request with `reply`.
    pub(crate) fn always(reply: Reply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::default()
        }
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub(crate) fn sent(&self) -> usize {
        self.requests().len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next.or_else(|| self.fallback.clone()) {
            Some(reply) => reply,
            None => Err(TransportError::Connect("script exhausted".to_string())),
        }
    }
}

pub(crate) fn html(status: u16, body: &str) -> Reply {
    Ok(HttpResponse::new(status, body).with_content_type("text/html; charset=utf-8"))
}

pub(crate) fn json(status: u16, body: &str) -> Reply {
    Ok(HttpResponse::new(status, body).with_content_type("application/json"))
}

pub(crate) fn throttled_json() -> Reply {
    json(200, r#"{"error_info": "搜索访问太频繁"}"#)
}

pub(crate) fn timeout() -> Reply {
    Err(TransportError::Timeout(std::time::Duration::from_secs(10)))
}
