use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The source a document was retrieved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Regulatory filings from the registry (annual/quarterly reports etc.)
    Filing,
    /// Exchange announcements (results announcements, circulars)
    Announcement,
    /// Earnings call transcripts
    Transcript,
}

impl SourceKind {
    /// Returns a human-readable name for the source.
    pub fn display_name(&self) -> &'static str {
        match self {
            SourceKind::Filing => "regulatory filings",
            SourceKind::Announcement => "exchange announcements",
            SourceKind::Transcript => "call transcripts",
        }
    }
}

/// A single retrieved document.
///
/// Content is populated lazily: listing produces documents with
/// `content: None`, and the analysis step downloads on demand. Sources
/// that bundle content into their listing responses (transcripts,
/// expanded exhibits) fill it in up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Where this document came from.
    pub source: SourceKind,
    /// Document title or headline.
    pub title: String,
    /// Publication date.
    pub date: NaiveDate,
    /// Canonical URL of the document. Together with `source` this is
    /// the document's identity for deduplication.
    pub url: String,
    /// Form type, announcement category, or "transcript".
    pub doc_type: String,
    /// Extracted text content, if already downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Marks documents produced by envelope expansion
    /// ("exhibit" or "exhibit-merged").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Path of the locally written text artifact, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
}

impl Document {
    /// Creates a document with no content yet.
    pub fn new(
        source: SourceKind,
        title: impl Into<String>,
        date: NaiveDate,
        url: impl Into<String>,
        doc_type: impl Into<String>,
    ) -> Self {
        Self {
            source,
            title: title.into(),
            date,
            url: url.into(),
            doc_type: doc_type.into(),
            content: None,
            subtype: None,
            artifact_path: None,
        }
    }

    /// Identity used for cross-source deduplication.
    pub fn identity(&self) -> (SourceKind, &str) {
        (self.source, self.url.as_str())
    }

    /// Returns true once text content has been attached.
    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }
}

/// Removes duplicate documents, keeping the first occurrence of each
/// `(source, url)` pair. The same URL under two different sources is
/// kept twice.
pub fn dedupe(documents: Vec<Document>) -> Vec<Document> {
    let mut seen = std::collections::HashSet::new();
    documents
        .into_iter()
        .filter(|doc| seen.insert((doc.source, doc.url.clone())))
        .collect()
}
