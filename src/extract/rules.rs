//! Extraction rules: one ordered chain of strategies per target field.
//!
//! Rules are compiled once, hold no mutable state, and are shared across extractions.
//! Labels are the exact Chinese `span.pl` labels the book pages use.

use crate::config::ConfigError;
use regex::Regex;
use scraper::Selector;

/// Target field of a [BookRecord](crate::model::BookRecord).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Authors,
    Publisher,
    Pubdate,
    Pages,
    Isbn,
    Cover,
    Description,
    SubjectId,
    Tags,
}

/// One way of locating a field's value.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// First capture group of a regex over the raw page text.
    Capture(Regex),
    /// `block` isolates a region; every first group of `item` inside it is a value.
    CaptureAll { block: Regex, item: Regex },
    /// Text of the first matching element, or its attribute when `attr` is set.
    Select {
        selector: Selector,
        attr: Option<&'static str>,
    },
    /// Text of every matching element, in document order.
    SelectAll(Selector),
    /// JSON pointer into a decoded JSON document.
    Pointer(&'static str),
}

/// A field plus its primary strategy and fallbacks, tried in order.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    pub field: Field,
    pub strategies: Vec<Strategy>,
}

impl ExtractionRule {
    pub fn new(field: Field, strategies: Vec<Strategy>) -> Self {
        Self { field, strategies }
    }
}

/// Rules for both payload kinds.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub html: Vec<ExtractionRule>,
    pub json: Vec<ExtractionRule>,
}

pub(crate) fn pattern(source: &str) -> Result<Regex, ConfigError> {
    Regex::new(source).map_err(|e| ConfigError::InvalidPattern {
        pattern: source.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn parse_selector(sel: &str) -> Result<Selector, ConfigError> {
    Selector::parse(sel).map_err(|e| ConfigError::InvalidSelector {
        selector: sel.to_string(),
        reason: e.to_string(),
    })
}

/// `<span class="pl">LABEL</span>:` with the colon inside or after the span, any quoting and spacing.
fn label(name: &str) -> String {
    format!(
        r#"<span\s+class=["']pl["']\s*>\s*{}\s*:?\s*</span>\s*:?\s*"#,
        regex::escape(name)
    )
}

fn capture(source: &str) -> Result<Strategy, ConfigError> {
    Ok(Strategy::Capture(pattern(source)?))
}

fn select(sel: &str, attr: Option<&'static str>) -> Result<Strategy, ConfigError> {
    Ok(Strategy::Select {
        selector: parse_selector(sel)?,
        attr,
    })
}

fn select_all(sel: &str) -> Result<Strategy, ConfigError> {
    Ok(Strategy::SelectAll(parse_selector(sel)?))
}

impl RuleSet {
    /// Rules for Douban book subject pages and the Douban book JSON shape.
    pub fn douban() -> Result<Self, ConfigError> {
        let html = vec![
            ExtractionRule::new(
                Field::Title,
                vec![
                    capture(r#"<span\s+property=["']v:itemreviewed["']\s*>([^<]+)</span>"#)?,
                    capture(r"(?s)<h1[^>]*>\s*<span[^>]*>([^<]+)</span>")?,
                    select(r#"meta[property="og:title"]"#, Some("content"))?,
                ],
            ),
            ExtractionRule::new(
                Field::Authors,
                vec![Strategy::CaptureAll {
                    block: pattern(&format!(
                        r#"(?s){}.*?(?:<br\s*/?>|<span\s+class=["']pl["']|</div>|\z)"#,
                        label("作者")
                    ))?,
                    item: pattern(r"<a[^>]*>([^<]+)</a>")?,
                }],
            ),
            ExtractionRule::new(
                Field::Publisher,
                vec![
                    capture(&format!(r"{}<a[^>]*>([^<]+)</a>", label("出版社")))?,
                    capture(&format!(r"{}([^<\r\n]+)", label("出版社")))?,
                ],
            ),
            ExtractionRule::new(
                Field::Pubdate,
                vec![capture(&format!(r"{}([^<\r\n]+)", label("出版年")))?],
            ),
            ExtractionRule::new(
                Field::Pages,
                vec![capture(&format!(r"{}(\d+)", label("页数")))?],
            ),
            ExtractionRule::new(
                Field::Isbn,
                vec![capture(&format!(
                    r"{}(\d+(?:-\d+)*(?:-?[Xx])?)",
                    label("ISBN")
                ))?],
            ),
            ExtractionRule::new(
                Field::Cover,
                vec![
                    select("a.nbg img", Some("src"))?,
                    select(r#"meta[property="og:image"]"#, Some("content"))?,
                ],
            ),
            ExtractionRule::new(
                Field::Description,
                vec![
                    select_all("#link-report .all .intro p")?,
                    select_all("#link-report .intro p")?,
                ],
            ),
            ExtractionRule::new(
                Field::SubjectId,
                vec![
                    select(r#"meta[property="og:url"]"#, Some("content"))?,
                    select(r#"link[rel="canonical"]"#, Some("href"))?,
                ],
            ),
            ExtractionRule::new(Field::Tags, vec![select_all("#db-tags-section a.tag")?]),
        ];

        let json = vec![
            ExtractionRule::new(Field::Title, vec![Strategy::Pointer("/title")]),
            ExtractionRule::new(Field::Authors, vec![Strategy::Pointer("/author")]),
            ExtractionRule::new(Field::Publisher, vec![Strategy::Pointer("/publisher")]),
            ExtractionRule::new(Field::Pubdate, vec![Strategy::Pointer("/pubdate")]),
            ExtractionRule::new(Field::Pages, vec![Strategy::Pointer("/pages")]),
            ExtractionRule::new(
                Field::Isbn,
                vec![Strategy::Pointer("/isbn13"), Strategy::Pointer("/isbn10")],
            ),
            ExtractionRule::new(
                Field::Cover,
                vec![
                    Strategy::Pointer("/image"),
                    Strategy::Pointer("/images/large"),
                ],
            ),
            ExtractionRule::new(Field::Description, vec![Strategy::Pointer("/summary")]),
            ExtractionRule::new(Field::SubjectId, vec![Strategy::Pointer("/id")]),
            ExtractionRule::new(Field::Tags, vec![Strategy::Pointer("/tags")]),
        ];

        Ok(Self { html, json })
    }
}
