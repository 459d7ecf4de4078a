use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::{parse_listing_date, FetchError, RetrievalQuery, SourceFetcher};
use crate::config::RetrievalConfig;
use crate::document::{Document, SourceKind};
use crate::limiter::RateLimiter;
use crate::retry::with_retries;

/// Fetches earnings-call transcripts.
///
/// The provider exposes an index page of quarter links per company;
/// each quarter page embeds the transcript as JSON in a textarea.
/// Quarters are fetched newest first in small concurrent batches (each
/// call still goes through the shared rate limiter), and batching stops
/// once a batch's oldest transcript predates the cutoff. Content is
/// attached at listing time since the quarter page is the content.
pub struct TranscriptFetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    user_agent: String,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    batch_size: usize,
    max_content_length: usize,
}

impl TranscriptFetcher {
    pub fn new(config: &RetrievalConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: Client::new(),
            limiter,
            base_url: config.transcripts_base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            retries: config.fetch_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            batch_size: config.batch_size.max(1),
            max_content_length: config.max_content_length,
        }
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.limiter.acquire().await;
        with_retries(self.retries, self.retry_delay, url, || async {
            let response = self
                .client
                .get(url)
                .header(reqwest::header::USER_AGENT, &self.user_agent)
                .timeout(self.timeout)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Http {
                    status: status.as_u16(),
                    message: status.to_string(),
                });
            }

            Ok(response.text().await?)
        })
        .await
    }

    /// Lists quarter page paths for the entity, newest first.
    async fn list_quarters(&self, ticker: &str) -> Result<Vec<String>, FetchError> {
        let url = format!("{}/company/{}/transcripts/", self.base_url, ticker);
        let body = self.get_text(&url).await?;

        let pattern = Regex::new(&format!(
            r"^/company/{}/transcripts/(\d{{4}})/(\d+)/$",
            regex::escape(ticker)
        ))
        .map_err(|e| FetchError::Parse(e.to_string()))?;

        let mut quarters: Vec<String> = {
            let html = Html::parse_document(&body);
            let Ok(selector) = Selector::parse("a[href]") else {
                return Err(FetchError::Parse("invalid link selector".to_string()));
            };
            html.select(&selector)
                .filter_map(|a| a.value().attr("href"))
                .filter(|href| pattern.is_match(href))
                .map(|href| href.to_string())
                .collect()
        };

        quarters.sort();
        quarters.dedup();
        quarters.reverse();
        Ok(quarters)
    }

    /// Fetches one quarter page and parses it into a document.
    async fn fetch_quarter(&self, ticker: &str, path: &str) -> Option<Document> {
        let url = format!("{}{}", self.base_url, path);
        let body = match self.get_text(&url).await {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, path, "transcript page fetch failed");
                return None;
            }
        };

        let parsed = parse_transcript_page(&body)?;
        let date = parsed.date.or_else(|| {
            warn!(path, "transcript has no parseable date, skipping");
            None
        })?;

        let (year, quarter) = parse_quarter_path(path).unwrap_or((date.format("%Y").to_string(), 0));
        let title = if quarter > 0 {
            format!("{} FY{} Q{} earnings call", ticker, year, quarter)
        } else {
            format!("{} earnings call {}", ticker, date)
        };

        let mut doc = Document::new(SourceKind::Transcript, title, date, url, "transcript");
        doc.content = Some(super::truncate_content(
            parsed.content,
            self.max_content_length,
        ));
        Some(doc)
    }
}

#[async_trait]
impl SourceFetcher for TranscriptFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Transcript
    }

    async fn list(&self, query: &RetrievalQuery) -> Result<Vec<Document>, FetchError> {
        let ticker = query.entity.to_uppercase();
        let cutoff = query.cutoff(Utc::now().date_naive());

        let quarters = self.list_quarters(&ticker).await?;
        debug!(entity = %ticker, quarters = quarters.len(), "found transcript quarters");

        let mut documents = Vec::new();

        for batch in quarters.chunks(self.batch_size) {
            let fetches = batch.iter().map(|path| self.fetch_quarter(&ticker, path));
            let batch_docs: Vec<Document> = futures::future::join_all(fetches)
                .await
                .into_iter()
                .flatten()
                .collect();

            let oldest = batch_docs.iter().map(|d| d.date).min();
            documents.extend(batch_docs.into_iter().filter(|d| d.date >= cutoff));

            if oldest.is_some_and(|d| d < cutoff) {
                debug!("transcript batch reaches past cutoff, stopping");
                break;
            }
        }

        documents.sort_by(|a, b| b.date.cmp(&a.date));
        info!(entity = %ticker, count = documents.len(), "listed call transcripts");
        Ok(documents)
    }

    async fn download(&self, doc: &Document) -> Result<String, FetchError> {
        if let Some(content) = &doc.content {
            return Ok(content.clone());
        }

        let body = self.get_text(&doc.url).await?;
        let parsed = parse_transcript_page(&body)
            .ok_or_else(|| FetchError::Parse("no transcript payload in page".to_string()))?;
        Ok(super::truncate_content(
            parsed.content,
            self.max_content_length,
        ))
    }
}

struct ParsedTranscript {
    date: Option<NaiveDate>,
    content: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptPayload {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    content: String,
}

/// Extracts the transcript JSON embedded in the quarter page, with the
/// date falling back to the small date label next to the title.
fn parse_transcript_page(body: &str) -> Option<ParsedTranscript> {
    let html = Html::parse_document(body);

    let textarea = Selector::parse("textarea#AIInsightsContent").ok()?;
    let payload_text: String = html.select(&textarea).next()?.text().collect();
    let payload: TranscriptPayload = serde_json::from_str(payload_text.trim()).ok()?;

    if payload.content.trim().is_empty() {
        return None;
    }

    let mut date = payload.date.as_deref().and_then(parse_listing_date);
    if date.is_none() {
        if let Ok(label) = Selector::parse("span.text-xs") {
            date = html
                .select(&label)
                .map(|span| span.text().collect::<String>())
                .find_map(|text| parse_listing_date(&text));
        }
    }

    Some(ParsedTranscript {
        date,
        content: payload.content,
    })
}

/// Pulls (year, quarter) out of a quarter path like
/// `/company/ACME/transcripts/2025/2/`.
fn parse_quarter_path(path: &str) -> Option<(String, u32)> {
    let mut segments = path.trim_end_matches('/').rsplit('/');
    let quarter = segments.next()?.parse().ok()?;
    let year = segments.next()?.to_string();
    if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) {
        Some((year, quarter))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quarter_path() {
        assert_eq!(
            parse_quarter_path("/company/ACME/transcripts/2025/2/"),
            Some(("2025".to_string(), 2))
        );
        assert_eq!(parse_quarter_path("/company/ACME/transcripts/"), None);
    }

    #[test]
    fn test_parse_transcript_page() {
        let body = r#"<html><body>
            <span class="text-xs">Aug 5, 2025</span>
            <textarea id="AIInsightsContent">{"content": "Operator: Good morning."}</textarea>
        </body></html>"#;

        let parsed = parse_transcript_page(body).unwrap();
        assert_eq!(parsed.content, "Operator: Good morning.");
        assert_eq!(
            parsed.date,
            Some(NaiveDate::from_ymd_opt(2025, 8, 5).unwrap())
        );
    }

    #[test]
    fn test_parse_transcript_page_prefers_payload_date() {
        let body = r#"<textarea id="AIInsightsContent">{"date": "2025-08-06", "content": "x"}</textarea>"#;
        let parsed = parse_transcript_page(body).unwrap();
        assert_eq!(
            parsed.date,
            Some(NaiveDate::from_ymd_opt(2025, 8, 6).unwrap())
        );
    }

    #[test]
    fn test_parse_transcript_page_empty_content_rejected() {
        let body = r#"<textarea id="AIInsightsContent">{"content": ""}</textarea>"#;
        assert!(parse_transcript_page(body).is_none());
    }
}
