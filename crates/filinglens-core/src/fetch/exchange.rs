use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::{normalize_item, FetchError, ListingItem, RetrievalQuery, SourceFetcher};
use crate::config::RetrievalConfig;
use crate::document::{dedupe, Document, SourceKind};
use crate::extract::{markup_to_text, pdf_to_marked_text};
use crate::limiter::RateLimiter;
use crate::retry::with_retries;

/// Results-announcement categories recognized in headlines, in match
/// priority order.
const RESULT_CATEGORIES: &[(&str, &str)] = &[
    ("Final Results", "Final Results"),
    ("Quarterly Results", "Quarterly Results"),
    ("Interim Results", "Interim Results"),
    ("Offer for Subscription", "Listing Document"),
];

/// Fetches announcements from the exchange disclosure service.
///
/// The listing endpoint pages by row offset and reports a running
/// total. Rows arrive newest first, so paging stops as soon as the last
/// row of a page predates the cutoff.
pub struct AnnouncementFetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    user_agent: String,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    page_size: usize,
    max_content_length: usize,
}

impl AnnouncementFetcher {
    pub fn new(config: &RetrievalConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: Client::new(),
            limiter,
            base_url: config.announcements_base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            retries: config.fetch_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            page_size: config.page_size.max(1),
            max_content_length: config.max_content_length,
        }
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
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

            Ok(response.bytes().await?.to_vec())
        })
        .await
    }

    async fn fetch_page(&self, code: &str, offset: usize) -> Result<ListingPage, FetchError> {
        let url = format!(
            "{}/search/titleSearchServlet?stockId={}&rowRange={}&pageSize={}&sortDir=0",
            self.base_url, code, offset, self.page_size,
        );
        let body = self.get_bytes(&url).await?;
        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| FetchError::Parse(e.to_string()))?;

        let total = value
            .get("total")
            .or_else(|| value.get("TOTAL_COUNT"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;

        // The result array itself is sometimes serialized as a string.
        let rows = match value.get("result") {
            Some(serde_json::Value::Array(rows)) => rows.clone(),
            Some(serde_json::Value::String(s)) => serde_json::from_str(s)
                .map_err(|e| FetchError::Parse(format!("nested result payload: {e}")))?,
            _ => Vec::new(),
        };

        // Offset arithmetic must count raw rows: a malformed row is
        // skipped but still occupies its slot in the server's paging.
        let raw_len = rows.len();
        let items = rows.iter().filter_map(normalize_item).collect();
        Ok(ListingPage {
            total,
            raw_len,
            items,
        })
    }

    fn absolute_link(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}/{}", self.base_url, link.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl SourceFetcher for AnnouncementFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Announcement
    }

    async fn list(&self, query: &RetrievalQuery) -> Result<Vec<Document>, FetchError> {
        let code = normalize_stock_code(&query.entity);
        let cutoff = query.cutoff(Utc::now().date_naive());

        let mut documents = Vec::new();
        let mut offset = 0;

        loop {
            // A failed page keeps what was accumulated so far.
            let page = match self.fetch_page(&code, offset).await {
                Ok(page) => page,
                Err(err) => {
                    if documents.is_empty() {
                        return Err(err);
                    }
                    warn!(%err, offset, "page fetch failed, returning partial listing");
                    break;
                }
            };
            if page.raw_len == 0 {
                break;
            }

            let oldest = page.items.iter().map(|i| i.date).min();

            for item in page.items {
                if item.date < cutoff {
                    continue;
                }
                let category = categorize_headline(&item.title);
                let include = match category {
                    Some(_) => query.include_report_forms,
                    None => query.include_other_forms,
                };
                if !include {
                    continue;
                }
                documents.push(Document::new(
                    SourceKind::Announcement,
                    item.title,
                    item.date,
                    self.absolute_link(&item.link),
                    category.unwrap_or("Announcement"),
                ));
            }

            offset += page.raw_len;
            if oldest.is_some_and(|d| d < cutoff) {
                debug!(offset, "page reaches past cutoff, stopping");
                break;
            }
            if page.raw_len < self.page_size || (page.total > 0 && offset >= page.total) {
                break;
            }
        }

        let mut documents = dedupe(documents);
        documents.sort_by(|a, b| b.date.cmp(&a.date));
        info!(entity = %code, count = documents.len(), "listed exchange announcements");
        Ok(documents)
    }

    async fn download(&self, doc: &Document) -> Result<String, FetchError> {
        let bytes = self.get_bytes(&doc.url).await?;

        let text = if is_pdf(&doc.url, &bytes) {
            pdf_to_marked_text(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?
        } else {
            markup_to_text(&String::from_utf8_lossy(&bytes))
        };

        Ok(super::truncate_content(text, self.max_content_length))
    }
}

struct ListingPage {
    total: usize,
    /// Rows in the raw payload, including ones that failed to normalize.
    raw_len: usize,
    items: Vec<ListingItem>,
}

/// Numeric stock codes are zero-padded to five digits; anything else is
/// passed through uppercased.
pub fn normalize_stock_code(entity: &str) -> String {
    let trimmed = entity.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>5}", trimmed)
    } else {
        trimmed.to_uppercase()
    }
}

fn categorize_headline(title: &str) -> Option<&'static str> {
    RESULT_CATEGORIES
        .iter()
        .find(|(needle, _)| title.contains(needle))
        .map(|(_, category)| *category)
}

fn is_pdf(url: &str, bytes: &[u8]) -> bool {
    url.to_lowercase().ends_with(".pdf") || bytes.starts_with(b"%PDF")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_stock_code() {
        assert_eq!(normalize_stock_code("700"), "00700");
        assert_eq!(normalize_stock_code("09988"), "09988");
        assert_eq!(normalize_stock_code("acme"), "ACME");
    }

    #[test]
    fn test_categorize_headline() {
        assert_eq!(
            categorize_headline("2025 Final Results Announcement"),
            Some("Final Results")
        );
        assert_eq!(
            categorize_headline("Interim Results for the six months"),
            Some("Interim Results")
        );
        assert_eq!(categorize_headline("Change of registered office"), None);
    }
}
