//! Search result parsing: HTML result pages and the JSON search endpoint.
//!
//! The JSON endpoint returns `items` either as objects or as HTML snippets of the result
//! cards, so both shapes are accepted. Hits are deduplicated by subject id, keeping the
//! first occurrence.

use super::clean_text;
use crate::fetch::ContentKind;
use crate::model::SearchHit;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;

/// Subject id from a book URL: `/subject/<digits>` followed by `/`, `?`, `#`, or the end.
pub fn extract_subject_id(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/subject/")?;
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (id, tail) = rest.split_at(end);
    let terminated = tail.is_empty() || tail.starts_with(['/', '?', '#']);
    (!id.is_empty() && terminated).then(|| id.to_string())
}

pub fn parse_search_results(payload: &[u8], kind: ContentKind) -> Vec<SearchHit> {
    let text = String::from_utf8_lossy(payload);
    let hits = match kind {
        ContentKind::Html => parse_html_hits(&text),
        ContentKind::Json => match serde_json::from_str::<Value>(&text) {
            Ok(value) => parse_json_hits(&value),
            Err(e) => {
                tracing::debug!(error = %e, "search payload is not JSON");
                Vec::new()
            }
        },
    };
    dedup(hits)
}

fn dedup(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.subject_id.clone()))
        .collect()
}

/// `a.nbg` links carrying a subject id, titled by their image's `alt`.
fn parse_html_hits(html: &str) -> Vec<SearchHit> {
    let (Ok(link_sel), Ok(img_sel)) = (Selector::parse("a.nbg"), Selector::parse("img")) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&link_sel)
        .filter_map(|link| {
            let href = link.value().attr("href")?;
            let subject_id = extract_subject_id(href)?;
            let img = link.select(&img_sel).next();
            let title = img
                .and_then(|i| i.value().attr("alt"))
                .map(clean_text)
                .or_else(|| link.value().attr("title").map(clean_text))
                .filter(|t| !t.is_empty())?;
            Some(SearchHit {
                subject_id,
                title,
                url: href.to_string(),
                cover_url: img
                    .and_then(|i| i.value().attr("src"))
                    .map(str::to_string),
                ..SearchHit::default()
            })
        })
        .collect()
}

fn parse_json_hits(value: &Value) -> Vec<SearchHit> {
    let items = ["items", "books", "subjects"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_array));
    let Some(items) = items else {
        return Vec::new();
    };
    items
        .iter()
        .flat_map(|item| match item {
            Value::String(snippet) => parse_html_hits(snippet),
            Value::Object(_) => json_hit(item).into_iter().collect(),
            _ => Vec::new(),
        })
        .collect()
}

fn json_hit(item: &Value) -> Option<SearchHit> {
    let url = text(item.get("url")).or_else(|| text(item.get("alt")));
    let subject_id = text(item.get("id"))
        .filter(|id| id.bytes().all(|b| b.is_ascii_digit()))
        .or_else(|| url.as_deref().and_then(extract_subject_id))?;
    let title = text(item.get("title"))?;
    let rating = text(item.get("rate"))
        .or_else(|| text(item.get("rating").and_then(|r| r.get("value"))))
        .or_else(|| text(item.get("rating").and_then(|r| r.get("average"))))
        .filter(|r| r != "0" && r != "0.0");
    Some(SearchHit {
        url: url.unwrap_or_else(|| format!("https://book.douban.com/subject/{}/", subject_id)),
        subject_id,
        title,
        cover_url: text(item.get("cover_url")).or_else(|| text(item.get("image"))),
        authors: strings(item.get("author")),
        publisher: text(item.get("publisher")),
        rating,
    })
}

fn text(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| text(Some(v))).collect(),
        other => text(other).into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT_PAGE: &str = r#"<html><body>
<div class="result-list">
  <div class="item-root">
    <a href="https://book.douban.com/subject/1084336/" class="cover-link nbg">
      <img src="https://img1.doubanio.com/view/subject/s/public/s1103152.jpg" alt="小王子" class="cover">
    </a>
  </div>
  <div class="item-root">
    <a href="https://book.douban.com/subject/1084336/?from=dup" class="nbg">
      <img src="https://img1.doubanio.com/dup.jpg" alt="小王子（重复）">
    </a>
  </div>
  <div class="item-root">
    <a href="https://book.douban.com/subject/25834590/" class="nbg">
      <img src="https://img3.doubanio.com/view/subject/s/public/s27237850.jpg" alt="小王子 &amp; 玫瑰">
    </a>
  </div>
  <div class="item-root">
    <a href="https://book.douban.com/author/123/" class="nbg"><img alt="not a book"></a>
  </div>
</div>
</body></html>"#;

    #[test]
    fn subject_id_forms() {
        assert_eq!(
            extract_subject_id("https://book.douban.com/subject/1007241/").as_deref(),
            Some("1007241")
        );
        assert_eq!(extract_subject_id("/subject/1007241").as_deref(), Some("1007241"));
        assert_eq!(
            extract_subject_id("https://book.douban.com/subject/1007241/?source=search").as_deref(),
            Some("1007241")
        );
        assert_eq!(extract_subject_id("https://book.douban.com/subject/abc/"), None);
        assert_eq!(extract_subject_id("https://book.douban.com/subject/12ab/"), None);
        assert_eq!(extract_subject_id("https://book.douban.com/author/1/"), None);
    }

    #[test]
    fn html_results_in_document_order_without_duplicates() {
        let hits = parse_search_results(RESULT_PAGE.as_bytes(), ContentKind::Html);
        let ids: Vec<&str> = hits.iter().map(|h| h.subject_id.as_str()).collect();
        assert_eq!(ids, ["1084336", "25834590"]);
        assert_eq!(hits[0].title, "小王子");
        assert_eq!(
            hits[0].cover_url.as_deref(),
            Some("https://img1.doubanio.com/view/subject/s/public/s1103152.jpg")
        );
        assert_eq!(hits[1].title, "小王子 & 玫瑰");
    }

    #[test]
    fn json_object_items() {
        let body = r#"{"total": 2, "items": [
            {"id": 2567698, "title": "三体", "author": ["刘慈欣"], "publisher": "重庆出版社",
             "rate": "8.9", "url": "https://book.douban.com/subject/2567698/",
             "cover_url": "https://img.example/s.jpg"},
            {"title": "no id or url"},
            {"id": "1007241", "title": "活着", "author": "余华", "rating": {"value": 9.4}}
        ]}"#;
        let hits = parse_search_results(body.as_bytes(), ContentKind::Json);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].subject_id, "2567698");
        assert_eq!(hits[0].authors, vec!["刘慈欣"]);
        assert_eq!(hits[0].rating.as_deref(), Some("8.9"));
        assert_eq!(hits[1].authors, vec!["余华"]);
        assert_eq!(hits[1].rating.as_deref(), Some("9.4"));
        assert_eq!(hits[1].url, "https://book.douban.com/subject/1007241/");
    }

    #[test]
    fn json_html_snippet_items() {
        let body = serde_json::json!({
            "items": [
                "<div class=\"result\"><a class=\"nbg\" href=\"https://book.douban.com/subject/1084336/\"><img src=\"s.jpg\" alt=\"小王子\"></a></div>"
            ],
            "total": 1
        })
        .to_string();
        let hits = parse_search_results(body.as_bytes(), ContentKind::Json);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].subject_id, "1084336");
        assert_eq!(hits[0].title, "小王子");
    }

    #[test]
    fn unexpected_shapes_yield_no_hits() {
        assert!(parse_search_results(b"{\"error_info\": \"x\"}", ContentKind::Json).is_empty());
        assert!(parse_search_results(b"not json", ContentKind::Json).is_empty());
        assert!(parse_search_results(b"<html></html>", ContentKind::Html).is_empty());
    }
}
