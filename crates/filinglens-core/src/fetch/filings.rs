use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::{FetchError, RetrievalQuery, SourceFetcher};
use crate::cache::TtlCache;
use crate::config::RetrievalConfig;
use crate::document::{dedupe, Document, SourceKind};
use crate::extract::markup_to_text;
use crate::limiter::RateLimiter;
use crate::retry::with_retries;

/// Fetches regulatory filings from the registry.
///
/// Listing works off the per-entity submissions index: a `recent`
/// block of parallel column arrays plus references to historical batch
/// files in the same column shape. Batches are walked newest first and
/// the walk stops at the first batch whose oldest filing predates the
/// query cutoff.
pub struct FilingFetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    user_agent: String,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    max_content_length: usize,
    report_forms: Vec<String>,
    other_forms: Vec<String>,
    // Ticker -> CIK lookups are repeated across runs in one process.
    entity_cache: Mutex<TtlCache<String>>,
}

impl FilingFetcher {
    pub fn new(config: &RetrievalConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: Client::new(),
            limiter,
            base_url: config.filings_base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            retries: config.fetch_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_content_length: config.max_content_length,
            report_forms: config.report_forms.clone(),
            other_forms: config.other_forms.clone(),
            entity_cache: Mutex::new(TtlCache::new(config.cache_ttl_secs)),
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

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Parse(e.to_string()))
    }

    /// Resolves a ticker to its zero-padded registry id. Returns None
    /// when the ticker is not in the registry map.
    async fn resolve_entity(&self, ticker: &str) -> Result<Option<String>, FetchError> {
        let ticker = ticker.to_uppercase();

        {
            let mut cache = self.entity_cache.lock().await;
            if let Some(cik) = cache.get(&ticker) {
                return Ok(Some(cik.clone()));
            }
        }

        let url = format!("{}/files/company_tickers.json", self.base_url);
        let map: HashMap<String, TickerEntry> = self.get_json(&url).await?;

        let found = map
            .values()
            .find(|entry| entry.ticker.eq_ignore_ascii_case(&ticker))
            .map(|entry| format!("{:010}", entry.cik_str));

        if let Some(cik) = &found {
            let mut cache = self.entity_cache.lock().await;
            cache.set(ticker, cik.clone());
        }

        Ok(found)
    }

    /// Extracts filings from one column block, keeping selected forms
    /// and dates on or after the cutoff. Returns the oldest date seen
    /// in the block (regardless of filters) for early-stop decisions.
    fn collect_columns(
        &self,
        columns: &FilingColumns,
        cik: &str,
        forms: &[String],
        cutoff: NaiveDate,
        out: &mut Vec<Document>,
    ) -> Option<NaiveDate> {
        let cik_trimmed = cik.trim_start_matches('0');
        let mut oldest = None;

        for i in 0..columns.form.len() {
            let Some(date) = columns
                .filing_date
                .get(i)
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            else {
                continue;
            };
            oldest = Some(oldest.map_or(date, |d: NaiveDate| d.min(date)));

            if date < cutoff {
                continue;
            }
            let form = &columns.form[i];
            if !forms.iter().any(|f| f == form) {
                continue;
            }
            let (Some(accession), Some(primary)) =
                (columns.accession_number.get(i), columns.primary_document.get(i))
            else {
                continue;
            };

            let url = format!(
                "{}/Archives/edgar/data/{}/{}/{}",
                self.base_url,
                cik_trimmed,
                accession.replace('-', ""),
                primary,
            );
            out.push(Document::new(
                SourceKind::Filing,
                format!("{form} filed {date}"),
                date,
                url,
                form.clone(),
            ));
        }

        oldest
    }
}

#[async_trait]
impl SourceFetcher for FilingFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Filing
    }

    async fn list(&self, query: &RetrievalQuery) -> Result<Vec<Document>, FetchError> {
        let forms = query.form_types(&self.report_forms, &self.other_forms);
        if forms.is_empty() {
            return Ok(Vec::new());
        }

        let Some(cik) = self.resolve_entity(&query.entity).await? else {
            info!(entity = %query.entity, "entity not present in registry map");
            return Ok(Vec::new());
        };

        let cutoff = query.cutoff(Utc::now().date_naive());
        let url = format!("{}/submissions/CIK{}.json", self.base_url, cik);
        let submissions: Submissions = self.get_json(&url).await?;

        let mut documents = Vec::new();
        let oldest_recent = self.collect_columns(
            &submissions.filings.recent,
            &cik,
            &forms,
            cutoff,
            &mut documents,
        );

        // Historical batches only matter when the recent block does not
        // already reach past the cutoff.
        let recent_covers_window = oldest_recent.is_some_and(|d| d < cutoff);
        if !recent_covers_window {
            for batch in &submissions.filings.files {
                let url = format!("{}/submissions/{}", self.base_url, batch.name);
                let columns: FilingColumns = match self.get_json(&url).await {
                    Ok(columns) => columns,
                    Err(err) => {
                        warn!(%err, batch = %batch.name, "skipping unreadable filing batch");
                        continue;
                    }
                };
                let oldest =
                    self.collect_columns(&columns, &cik, &forms, cutoff, &mut documents);
                if oldest.is_some_and(|d| d < cutoff) {
                    debug!(batch = %batch.name, "batch reaches past cutoff, stopping");
                    break;
                }
            }
        }

        let mut documents = dedupe(documents);
        documents.sort_by(|a, b| b.date.cmp(&a.date));
        info!(
            entity = %query.entity,
            count = documents.len(),
            "listed regulatory filings"
        );
        Ok(documents)
    }

    async fn download(&self, doc: &Document) -> Result<String, FetchError> {
        let body = self.get_text(&doc.url).await?;
        let text = if looks_like_markup(&doc.url, &body) {
            markup_to_text(&body)
        } else {
            body
        };
        Ok(super::truncate_content(text, self.max_content_length))
    }
}

fn looks_like_markup(url: &str, body: &str) -> bool {
    let lower_url = url.to_lowercase();
    lower_url.ends_with(".htm")
        || lower_url.ends_with(".html")
        || body.trim_start().starts_with('<')
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    cik_str: u64,
    ticker: String,
}

#[derive(Debug, Deserialize)]
struct Submissions {
    filings: FilingIndex,
}

#[derive(Debug, Deserialize)]
struct FilingIndex {
    recent: FilingColumns,
    #[serde(default)]
    files: Vec<BatchRef>,
}

/// Parallel column arrays, as the registry serves them.
#[derive(Debug, Default, Deserialize)]
struct FilingColumns {
    #[serde(default)]
    form: Vec<String>,
    #[serde(default, rename = "accessionNumber")]
    accession_number: Vec<String>,
    #[serde(default, rename = "filingDate")]
    filing_date: Vec<String>,
    #[serde(default, rename = "primaryDocument")]
    primary_document: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchRef {
    name: String,
}
