//! Rate-limit detection: classify a response as success, throttled, server error, rejected, or undecodable.
//!
//! The site signals throttling in three ways: HTTP 429, a fixed phrase embedded in an HTML
//! page, and a 200 JSON body whose error field carries the same phrase (possibly
//! `\u`-escaped, so structured fields are inspected after decoding, not just the raw bytes).

use super::ContentKind;
use serde_json::Value;

/// Phrase the search endpoint returns when it is throttling the caller ("searching too often").
pub const DEFAULT_THROTTLE_MARKER: &str = "搜索访问太频繁";

/// JSON fields that may carry a site error message.
const ERROR_FIELDS: [&str; 3] = ["error_info", "error", "msg"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Throttled { reason: String },
    ServerError,
    /// Non-2xx that retrying will not fix (403, 404, ...).
    Rejected,
    Undecodable { reason: String },
}

#[derive(Debug, Clone)]
pub struct RateLimitDetector {
    markers: Vec<String>,
}

impl Default for RateLimitDetector {
    fn default() -> Self {
        Self {
            markers: vec![DEFAULT_THROTTLE_MARKER.to_string()],
        }
    }
}

impl RateLimitDetector {
    /// Detector with custom markers. Blank markers are dropped; with none left only HTTP 429 is detected.
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let markers = markers
            .into_iter()
            .map(Into::into)
            .filter(|m: &String| !m.trim().is_empty())
            .collect();
        Self { markers }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// Classify one response. Throttling signals win over the status code.
    pub fn classify(&self, status: u16, body: &[u8], expected: ContentKind) -> Verdict {
        if status == 429 {
            return Verdict::Throttled {
                reason: "HTTP 429 Too Many Requests".to_string(),
            };
        }

        let text = String::from_utf8_lossy(body);
        if let Some(marker) = self.find_marker(&text) {
            return Verdict::Throttled {
                reason: format!("body contains throttling marker {:?}", marker),
            };
        }

        let json = if expected == ContentKind::Json || looks_like_json(&text) {
            Some(serde_json::from_slice::<Value>(body))
        } else {
            None
        };
        if let Some(Ok(value)) = &json {
            if let Some((field, marker)) = self.find_structured_marker(value) {
                return Verdict::Throttled {
                    reason: format!("field {:?} contains throttling marker {:?}", field, marker),
                };
            }
        }

        if (500..600).contains(&status) {
            return Verdict::ServerError;
        }
        if !(200..300).contains(&status) {
            return Verdict::Rejected;
        }

        match expected {
            ContentKind::Json => match json {
                Some(Err(e)) => Verdict::Undecodable {
                    reason: e.to_string(),
                },
                _ => Verdict::Success,
            },
            ContentKind::Html => match std::str::from_utf8(body) {
                Ok(_) => Verdict::Success,
                Err(e) => Verdict::Undecodable {
                    reason: e.to_string(),
                },
            },
        }
    }

    fn find_marker(&self, text: &str) -> Option<&str> {
        self.markers
            .iter()
            .find(|m| text.contains(m.as_str()))
            .map(String::as_str)
    }

    fn find_structured_marker(&self, value: &Value) -> Option<(&'static str, &str)> {
        let obj = value.as_object()?;
        ERROR_FIELDS.iter().find_map(|field| {
            let message = obj.get(*field)?.as_str()?;
            self.find_marker(message).map(|m| (*field, m))
        })
    }
}

fn looks_like_json(text: &str) -> bool {
    let t = text.trim_start();
    t.starts_with('{') || t.starts_with('[')
}
