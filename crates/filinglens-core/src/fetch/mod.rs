mod exchange;
mod filings;
mod transcript;

pub use exchange::AnnouncementFetcher;
pub use filings::FilingFetcher;
pub use transcript::TranscriptFetcher;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::cache_key;
use crate::config::DATE_FORMATS;
use crate::document::{Document, SourceKind};

/// Errors that can occur while retrieving documents.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

/// Which sources a query should consult.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceToggles {
    pub filings: bool,
    pub announcements: bool,
    pub transcripts: bool,
}

impl Default for SourceToggles {
    fn default() -> Self {
        Self {
            filings: true,
            announcements: false,
            transcripts: true,
        }
    }
}

impl SourceToggles {
    /// Returns whether the given source is enabled.
    pub fn enabled(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Filing => self.filings,
            SourceKind::Announcement => self.announcements,
            SourceKind::Transcript => self.transcripts,
        }
    }
}

/// Parameters of one retrieval: the entity, the time window, and the
/// source/form selection. Two equal queries are served from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    /// Ticker or stock code identifying the entity.
    pub entity: String,
    /// Whole calendar years to look back.
    pub lookback_years: u32,
    /// Which sources to consult.
    pub sources: SourceToggles,
    /// Include periodic-report and listing forms.
    pub include_report_forms: bool,
    /// Include the non-report form set.
    pub include_other_forms: bool,
}

impl RetrievalQuery {
    pub fn new(entity: impl Into<String>, lookback_years: u32) -> Self {
        Self {
            entity: entity.into(),
            lookback_years,
            sources: SourceToggles::default(),
            include_report_forms: true,
            include_other_forms: false,
        }
    }

    /// Earliest publication date admitted by this query.
    pub fn cutoff(&self, today: NaiveDate) -> NaiveDate {
        cutoff_date(today, self.lookback_years)
    }

    /// Deterministic cache key covering every field that affects the
    /// retrieved document set.
    pub fn digest(&self) -> String {
        cache_key(&[
            "retrieval",
            &self.entity.to_uppercase(),
            &self.lookback_years.to_string(),
            &format!(
                "{}{}{}{}{}",
                self.sources.filings as u8,
                self.sources.announcements as u8,
                self.sources.transcripts as u8,
                self.include_report_forms as u8,
                self.include_other_forms as u8,
            ),
        ])
    }

    /// The form types selected by this query, drawn from the configured
    /// report and other groups.
    pub fn form_types(&self, report_forms: &[String], other_forms: &[String]) -> Vec<String> {
        let mut forms = Vec::new();
        if self.include_report_forms {
            forms.extend(report_forms.iter().cloned());
        }
        if self.include_other_forms {
            forms.extend(other_forms.iter().cloned());
        }
        forms
    }
}

/// January 1st of `(current year - lookback + 1)`: a 3-year lookback in
/// 2026 admits everything from 2024-01-01 on.
pub fn cutoff_date(today: NaiveDate, lookback_years: u32) -> NaiveDate {
    let year = today.year() - lookback_years as i32 + 1;
    NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(today)
}

/// A source of documents. Listing is separate from content download so
/// the pipeline can checkpoint between the two.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// The source this fetcher serves.
    fn kind(&self) -> SourceKind;

    /// Lists documents matching the query, newest first. Pagination
    /// stops early once a page's oldest item predates the query cutoff;
    /// documents older than the cutoff are never returned.
    async fn list(&self, query: &RetrievalQuery) -> Result<Vec<Document>, FetchError>;

    /// Downloads and extracts the text content of one listed document.
    async fn download(&self, doc: &Document) -> Result<String, FetchError>;
}

/// A listing row after shape normalization.
///
/// Listing endpoints return rows in inconsistent shapes: plain JSON
/// objects, or objects serialized again as JSON strings, with varying
/// field names. Everything downstream works on this fixed shape.
#[derive(Debug, Clone)]
pub struct ListingItem {
    pub title: String,
    pub date: NaiveDate,
    pub link: String,
}

/// Normalizes one listing row. Returns None when required fields are
/// missing or unparseable; callers skip such rows.
pub fn normalize_item(value: &serde_json::Value) -> Option<ListingItem> {
    // Some backends double-encode rows as JSON strings.
    if let Some(s) = value.as_str() {
        let inner: serde_json::Value = serde_json::from_str(s).ok()?;
        return normalize_item(&inner);
    }

    let obj = value.as_object()?;

    let field = |names: &[&str]| -> Option<String> {
        names
            .iter()
            .find_map(|n| obj.get(*n))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let title = field(&["TITLE", "title", "headline"])?;
    let link = field(&["FILE_LINK", "link", "url"])?;
    let date = parse_listing_date(&field(&["DATE_TIME", "date", "dateTime"])?)?;

    Some(ListingItem { title, date, link })
}

/// Parses a date in any of the accepted listing formats.
pub fn parse_listing_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    for fmt in DATE_FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.date());
        }
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return Some(d);
        }
    }
    None
}

/// Marker appended to content cut at the length ceiling.
pub const TRUNCATION_MARKER: &str = "\n\n[content truncated]";

/// Cuts `text` to at most `max_len` characters, appending an explicit
/// marker when anything was dropped.
pub fn truncate_content(text: String, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text;
    }
    let mut cut: String = text.chars().take(max_len).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_cutoff_date() {
        assert_eq!(cutoff_date(date("2026-08-31"), 3), date("2024-01-01"));
        assert_eq!(cutoff_date(date("2026-08-31"), 1), date("2026-01-01"));
    }

    #[test]
    fn test_query_digest_covers_toggles() {
        let a = RetrievalQuery::new("ACME", 3);
        let mut b = a.clone();
        assert_eq!(a.digest(), b.digest());

        b.sources.announcements = true;
        assert_ne!(a.digest(), b.digest());

        let mut c = a.clone();
        c.include_other_forms = true;
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_query_digest_case_insensitive_entity() {
        let a = RetrievalQuery::new("acme", 3);
        let b = RetrievalQuery::new("ACME", 3);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_normalize_item_object() {
        let value = json!({
            "TITLE": "Interim Results",
            "FILE_LINK": "/listedco/doc.pdf",
            "DATE_TIME": "14/08/2025 17:30",
        });
        let item = normalize_item(&value).unwrap();
        assert_eq!(item.title, "Interim Results");
        assert_eq!(item.date, date("2025-08-14"));
    }

    #[test]
    fn test_normalize_item_double_encoded() {
        let inner = json!({
            "title": "Annual Report",
            "link": "https://x/a.pdf",
            "date": "2025-03-31",
        });
        let value = json!(inner.to_string());
        let item = normalize_item(&value).unwrap();
        assert_eq!(item.title, "Annual Report");
        assert_eq!(item.date, date("2025-03-31"));
    }

    #[test]
    fn test_normalize_item_missing_fields() {
        assert!(normalize_item(&json!({"TITLE": "x"})).is_none());
        assert!(normalize_item(&json!(42)).is_none());
        assert!(normalize_item(&json!({
            "TITLE": "x", "FILE_LINK": "y", "DATE_TIME": "not a date"
        }))
        .is_none());
    }

    #[test]
    fn test_truncate_content() {
        let short = truncate_content("abc".to_string(), 10);
        assert_eq!(short, "abc");

        let long = truncate_content("abcdefghij".to_string(), 5);
        assert_eq!(long, format!("abcde{TRUNCATION_MARKER}"));
    }

    #[test]
    fn test_form_types_selection() {
        let reports = vec!["10-K".to_string()];
        let others = vec!["8-K".to_string()];

        let q = RetrievalQuery::new("ACME", 3);
        assert_eq!(q.form_types(&reports, &others), vec!["10-K".to_string()]);

        let mut q = RetrievalQuery::new("ACME", 3);
        q.include_other_forms = true;
        assert_eq!(
            q.form_types(&reports, &others),
            vec!["10-K".to_string(), "8-K".to_string()]
        );
    }
}
