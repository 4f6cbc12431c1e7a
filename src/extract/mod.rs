//! Field extraction: turn a fetched HTML or JSON payload into a [PartialBookRecord].
//!
//! Each field runs its strategy chain in order; the first strategy whose values survive the
//! field's coercion wins. A field no strategy can fill is left absent. Extraction never fails
//! as a whole and keeps no state between calls.

pub mod rules;
pub mod search;

pub use rules::{ExtractionRule, Field, RuleSet, Strategy};
pub use search::{extract_subject_id, parse_search_results};

use crate::config::ConfigError;
use crate::fetch::ContentKind;
use crate::model::PartialBookRecord;
use scraper::Html;
use serde_json::Value;
use std::sync::Arc;

/// Applies a [RuleSet] to payloads. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    rules: Arc<RuleSet>,
}

/// Parsed form of one payload, built once per extraction.
enum Document<'a> {
    Html { text: &'a str, dom: Html },
    Json(Value),
    Unreadable,
}

impl FieldExtractor {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    pub fn douban() -> Result<Self, ConfigError> {
        Ok(Self::new(RuleSet::douban()?))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn extract(&self, payload: &[u8], kind: ContentKind) -> PartialBookRecord {
        let text = String::from_utf8_lossy(payload);
        let document = match kind {
            ContentKind::Html => Document::Html {
                text: text.as_ref(),
                dom: Html::parse_document(&text),
            },
            ContentKind::Json => match serde_json::from_str::<Value>(&text) {
                Ok(value) => Document::Json(value),
                Err(e) => {
                    tracing::debug!(error = %e, "payload is not JSON; nothing to extract");
                    Document::Unreadable
                }
            },
        };
        let rules = match kind {
            ContentKind::Html => &self.rules.html,
            ContentKind::Json => &self.rules.json,
        };

        let mut record = PartialBookRecord::default();
        for rule in rules {
            let filled = rule
                .strategies
                .iter()
                .any(|strategy| accept(&mut record, rule.field, run(strategy, &document)));
            if !filled {
                tracing::trace!(field = ?rule.field, "no strategy matched");
            }
        }
        record
    }

    /// Extract from already-fetched HTML text.
    pub fn extract_html(&self, html: &str) -> PartialBookRecord {
        self.extract(html.as_bytes(), ContentKind::Html)
    }
}

fn run(strategy: &Strategy, document: &Document<'_>) -> Vec<String> {
    // Regex captures are raw markup; DOM text and JSON strings are already decoded.
    let markup = matches!(
        strategy,
        Strategy::Capture(_) | Strategy::CaptureAll { .. }
    );
    let raw: Vec<String> = match (strategy, document) {
        (Strategy::Capture(re), Document::Html { text, .. }) => re
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| vec![m.as_str().to_string()])
            .unwrap_or_default(),
        (Strategy::CaptureAll { block, item }, Document::Html { text, .. }) => block
            .find(text)
            .map(|region| {
                item.captures_iter(region.as_str())
                    .filter_map(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default(),
        (Strategy::Select { selector, attr }, Document::Html { dom, .. }) => dom
            .select(selector)
            .next()
            .map(|el| match attr {
                Some(name) => el.value().attr(name).unwrap_or_default().to_string(),
                None => el.text().collect(),
            })
            .into_iter()
            .collect(),
        (Strategy::SelectAll(selector), Document::Html { dom, .. }) => dom
            .select(selector)
            .map(|el| el.text().collect::<String>())
            .collect(),
        (Strategy::Pointer(path), Document::Json(value)) => {
            value.pointer(path).map(json_values).unwrap_or_default()
        }
        _ => Vec::new(),
    };
    raw.iter()
        .map(|s| if markup { clean_text(s) } else { s.trim().to_string() })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Strings and numbers as text; arrays flattened one level; objects by their `name`.
fn json_values(value: &Value) -> Vec<String> {
    fn scalar(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Object(map) => map.get("name").and_then(scalar),
            _ => None,
        }
    }
    match value {
        Value::Array(items) => items.iter().filter_map(scalar).collect(),
        other => scalar(other).into_iter().collect(),
    }
}

/// Decode HTML entities, drop stray tags, and trim.
pub(crate) fn clean_text(raw: &str) -> String {
    if raw.contains('&') || raw.contains('<') {
        let decoded: String = Html::parse_fragment(raw).root_element().text().collect();
        decoded.trim().to_string()
    } else {
        raw.trim().to_string()
    }
}

/// Coerce `values` into `field`. Returns false when nothing usable was found.
fn accept(record: &mut PartialBookRecord, field: Field, values: Vec<String>) -> bool {
    if values.is_empty() {
        return false;
    }
    match field {
        Field::Authors => {
            record.authors = values;
            true
        }
        Field::Tags => {
            record.tags = values;
            true
        }
        Field::Pages => set(
            &mut record.pages,
            values.iter().find_map(|v| v.parse::<u32>().ok()),
        ),
        Field::Isbn => set(
            &mut record.isbn,
            values.into_iter().find(|v| is_isbn_shaped(v)),
        ),
        Field::SubjectId => set(
            &mut record.subject_id,
            values.iter().find_map(|v| {
                if is_digits(v) {
                    Some(v.clone())
                } else {
                    extract_subject_id(v)
                }
            }),
        ),
        Field::Description => set(&mut record.description, Some(values.join("\n"))),
        Field::Title => set(&mut record.title, values.into_iter().next()),
        Field::Publisher => set(&mut record.publisher, values.into_iter().next()),
        Field::Pubdate => set(&mut record.pubdate, values.into_iter().next()),
        Field::Cover => set(&mut record.cover_url, values.into_iter().next()),
    }
}

fn set<T>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match value {
        Some(v) => {
            *slot = Some(v);
            true
        }
        None => false,
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Digit groups joined by single hyphens, optionally ending in an X check digit.
fn is_isbn_shaped(s: &str) -> bool {
    let body = s.strip_suffix(['X', 'x']).map_or(s, |b| b.trim_end_matches('-'));
    !body.is_empty() && body.split('-').all(is_digits)
}
