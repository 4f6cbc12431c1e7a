//! Output formats: pretty JSON or `label: value` text, written to any `io::Write`.

use crate::model::{BookRecord, SearchHit};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Output format selector for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Failed to write output: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output: {0}")]
    Write(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Create (or truncate) the output file.
pub fn create_output(path: &Path) -> Result<File, FormatError> {
    File::create(path).map_err(|source| FormatError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_json<W: Write, T: Serialize + ?Sized>(mut w: W, value: &T) -> Result<(), FormatError> {
    serde_json::to_writer_pretty(&mut w, value)?;
    writeln!(w)?;
    Ok(())
}

/// One `label: value` line per present field.
pub fn write_text<W: Write>(mut w: W, record: &BookRecord) -> Result<(), FormatError> {
    if record.is_empty() {
        writeln!(w, "(no extractable metadata)")?;
    }
    let line = |w: &mut W, label: &str, value: Option<&str>| -> std::io::Result<()> {
        match value {
            Some(v) => writeln!(w, "{}: {}", label, v),
            None => Ok(()),
        }
    };
    line(&mut w, "Title", record.title.as_deref())?;
    if !record.authors.is_empty() {
        writeln!(w, "Authors: {}", record.authors.join(" / "))?;
    }
    line(&mut w, "Publisher", record.publisher.as_deref())?;
    line(&mut w, "Published", record.pubdate.as_deref())?;
    if let Some(pages) = record.pages {
        writeln!(w, "Pages: {}", pages)?;
    }
    line(&mut w, "ISBN", record.isbn.as_deref())?;
    line(&mut w, "Cover", record.cover_url.as_deref())?;
    line(&mut w, "Subject", record.subject_id.as_deref())?;
    if !record.tags.is_empty() {
        writeln!(w, "Tags: {}", record.tags.join(", "))?;
    }
    line(&mut w, "Source", record.source_url.as_deref())?;
    if let Some(ref d) = record.description {
        writeln!(w)?;
        writeln!(w, "{}", d)?;
    }
    Ok(())
}

/// Numbered list, one hit per line.
pub fn write_hits_text<W: Write>(mut w: W, hits: &[SearchHit]) -> Result<(), FormatError> {
    if hits.is_empty() {
        writeln!(w, "(no results)")?;
    }
    for (i, hit) in hits.iter().enumerate() {
        write!(w, "{}. {} [{}]", i + 1, hit.title, hit.subject_id)?;
        if !hit.authors.is_empty() {
            write!(w, " - {}", hit.authors.join(" / "))?;
        }
        if let Some(ref rating) = hit.rating {
            write!(w, " ({})", rating)?;
        }
        writeln!(w)?;
        writeln!(w, "   {}", hit.url)?;
    }
    Ok(())
}
