//! Record assembly: normalize extractor output into the [BookRecord] handed to callers.

use crate::extract::extract_subject_id;
use crate::model::{BookRecord, PartialBookRecord};

/// Build a [BookRecord] from extracted fields.
///
/// Blank strings become absent and blank or repeated authors and tags are dropped. A missing
/// subject id is recovered from the source URL, but only when the page yielded metadata of its
/// own; a page with nothing extractable stays an empty record.
pub fn assemble(partial: PartialBookRecord) -> BookRecord {
    let mut record = BookRecord {
        title: non_blank(partial.title),
        authors: distinct(partial.authors),
        publisher: non_blank(partial.publisher),
        pubdate: non_blank(partial.pubdate),
        pages: partial.pages,
        isbn: non_blank(partial.isbn),
        cover_url: non_blank(partial.cover_url),
        description: non_blank(partial.description),
        subject_id: non_blank(partial.subject_id),
        tags: distinct(partial.tags),
        source_url: non_blank(partial.source_url),
    };
    if record.subject_id.is_none() && !record.is_empty() {
        record.subject_id = record.source_url.as_deref().and_then(extract_subject_id);
    }
    record
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn distinct(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        let v = v.trim();
        if !v.is_empty() && !out.iter().any(|seen| seen == v) {
            out.push(v.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_partial_assembles_to_empty_record() {
        let record = assemble(PartialBookRecord::default());
        assert!(record.is_empty());
        assert_eq!(record, BookRecord::default());
    }

    #[test]
    fn blanks_are_dropped_and_order_kept() {
        let record = assemble(PartialBookRecord {
            title: Some("  三体 ".to_string()),
            publisher: Some("   ".to_string()),
            authors: vec![
                "刘慈欣".to_string(),
                " ".to_string(),
                "Ken Liu".to_string(),
                "刘慈欣".to_string(),
            ],
            pages: Some(302),
            ..PartialBookRecord::default()
        });
        assert_eq!(record.title.as_deref(), Some("三体"));
        assert_eq!(record.publisher, None);
        assert_eq!(record.authors, vec!["刘慈欣", "Ken Liu"]);
        assert_eq!(record.pages, Some(302));
    }

    #[test]
    fn subject_id_recovered_from_source_url() {
        let record = assemble(PartialBookRecord {
            title: Some("小王子".to_string()),
            source_url: Some("https://book.douban.com/subject/1084336/".to_string()),
            ..PartialBookRecord::default()
        });
        assert_eq!(record.subject_id.as_deref(), Some("1084336"));

        let record = assemble(PartialBookRecord {
            subject_id: Some("42".to_string()),
            source_url: Some("https://book.douban.com/subject/1084336/".to_string()),
            ..PartialBookRecord::default()
        });
        assert_eq!(record.subject_id.as_deref(), Some("42"));
    }

    #[test]
    fn source_url_alone_does_not_populate_a_record() {
        let record = assemble(PartialBookRecord {
            source_url: Some("https://book.douban.com/subject/1084336/".to_string()),
            ..PartialBookRecord::default()
        });
        assert_eq!(record.subject_id, None);
        assert!(record.is_empty());
    }
}
