mod markup;
mod pdf;

pub use markup::markup_to_text;
pub use pdf::pdf_to_marked_text;

use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::document::Document;
use crate::fetch::{truncate_content, FetchError};
use crate::limiter::RateLimiter;
use crate::llm::{Classifier, ModelClient};
use crate::retry::with_retries;

/// Errors that can occur during attachment extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Malformed attachment index: {0}")]
    Index(String),
}

/// Expands envelope filings into their exhibit documents.
///
/// Envelope forms carry their substance in attached exhibits rather
/// than the primary document. Expansion lists the filing directory,
/// keeps markup/PDF attachments whose filename carries the exhibit
/// marker, extracts text from each, and applies the merge policy:
/// markup exhibits are merged into one document when their combined
/// size stays under the content ceiling, PDFs always stay separate.
pub struct AttachmentExtractor {
    client: Client,
    limiter: Arc<RateLimiter>,
    user_agent: String,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    exhibit_marker: String,
    max_content_length: usize,
    batch_size: usize,
}

impl AttachmentExtractor {
    pub fn new(config: &RetrievalConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: Client::new(),
            limiter,
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            retries: config.fetch_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            exhibit_marker: config.exhibit_marker.to_lowercase(),
            max_content_length: config.max_content_length,
            batch_size: config.batch_size.max(1),
        }
    }

    /// Expands one envelope filing.
    ///
    /// When the attachment index cannot be read the envelope itself is
    /// returned as the sole document. When the index is readable but no
    /// attachment qualifies, the envelope contributes nothing. A failed
    /// attachment download or parse yields an empty-content placeholder
    /// rather than aborting the expansion.
    pub async fn expand<M: ModelClient>(
        &self,
        envelope: &Document,
        classifier: Option<&Classifier<M>>,
    ) -> Vec<Document> {
        let Some(dir_url) = directory_url(&envelope.url) else {
            warn!(url = %envelope.url, "cannot derive filing directory, keeping envelope");
            return vec![envelope.clone()];
        };

        let index_url = format!("{dir_url}index.json");
        let index: AttachmentIndex = match self.get_json(&index_url).await {
            Ok(index) => index,
            Err(err) => {
                warn!(%err, url = %index_url, "attachment index unavailable, keeping envelope");
                return vec![envelope.clone()];
            }
        };

        let candidates: Vec<String> = index
            .directory
            .item
            .into_iter()
            .map(|item| item.name)
            .filter(|name| self.is_exhibit(name))
            .collect();

        if candidates.is_empty() {
            debug!(title = %envelope.title, "no qualifying exhibits in envelope");
            return Vec::new();
        }

        // Attachments download in small concurrent batches; every call
        // still goes through the shared rate limiter.
        let mut markup_docs = Vec::new();
        let mut pdf_docs = Vec::new();

        for batch in candidates.chunks(self.batch_size) {
            let fetches = batch
                .iter()
                .map(|name| self.extract_one(&dir_url, envelope, name));
            for (doc, is_pdf) in futures::future::join_all(fetches).await {
                if is_pdf {
                    pdf_docs.push(doc);
                } else {
                    markup_docs.push(doc);
                }
            }
        }

        let mut documents = self.apply_merge_policy(envelope, markup_docs);
        documents.extend(pdf_docs);

        if let Some(classifier) = classifier {
            let mut kept = Vec::new();
            for doc in documents {
                let accept = match doc.content.as_deref() {
                    Some(content) if !content.is_empty() => {
                        classifier.is_report_material(&doc.title, content).await
                    }
                    // Nothing to classify on; keep the placeholder.
                    _ => true,
                };
                if accept {
                    kept.push(doc);
                } else {
                    debug!(title = %doc.title, "classifier filtered exhibit");
                }
            }
            documents = kept;
        }

        info!(
            title = %envelope.title,
            count = documents.len(),
            "expanded envelope filing"
        );
        documents
    }

    /// Merges markup exhibits into a single document when their
    /// combined size stays under the ceiling.
    fn apply_merge_policy(&self, envelope: &Document, markup_docs: Vec<Document>) -> Vec<Document> {
        if markup_docs.len() < 2 {
            return markup_docs;
        }

        let combined: usize = markup_docs
            .iter()
            .map(|d| d.content.as_deref().map_or(0, |c| c.chars().count()))
            .sum();

        if combined > self.max_content_length {
            return markup_docs;
        }

        let mut content = String::new();
        for doc in &markup_docs {
            content.push_str(&format!("\n\n--- {} ---\n\n", doc.title));
            content.push_str(doc.content.as_deref().unwrap_or(""));
        }

        let mut merged = Document::new(
            envelope.source,
            format!("{} (merged exhibits)", envelope.title),
            envelope.date,
            envelope.url.clone(),
            envelope.doc_type.clone(),
        );
        merged.subtype = Some("exhibit-merged".to_string());
        merged.content = Some(content.trim_start().to_string());
        vec![merged]
    }

    /// Downloads and extracts one attachment, degrading to an
    /// empty-content placeholder on failure. Returns the document and
    /// whether it was PDF-like.
    async fn extract_one(&self, dir_url: &str, envelope: &Document, name: &str) -> (Document, bool) {
        let url = format!("{dir_url}{name}");
        let is_pdf = name.to_lowercase().ends_with(".pdf");
        let content = match self.extract_attachment(&url, is_pdf).await {
            Ok(content) => content,
            Err(err) => {
                warn!(%err, %url, "attachment extraction failed, keeping placeholder");
                String::new()
            }
        };

        let mut doc = Document::new(
            envelope.source,
            format!("{} - {}", envelope.title, name),
            envelope.date,
            url,
            envelope.doc_type.clone(),
        );
        doc.subtype = Some("exhibit".to_string());
        doc.content = Some(content);
        (doc, is_pdf)
    }

    fn is_exhibit(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        let supported = lower.ends_with(".htm") || lower.ends_with(".html") || lower.ends_with(".pdf");
        supported && lower.contains(&self.exhibit_marker)
    }

    async fn extract_attachment(&self, url: &str, is_pdf: bool) -> Result<String, ExtractError> {
        let bytes = self.get_bytes(url).await?;
        let text = if is_pdf {
            pdf_to_marked_text(&bytes)?
        } else {
            markup_to_text(&String::from_utf8_lossy(&bytes))
        };
        Ok(truncate_content(text, self.max_content_length))
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

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let bytes = self.get_bytes(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

/// The directory a filing document lives in, with a trailing slash.
fn directory_url(document_url: &str) -> Option<String> {
    let cut = document_url.rfind('/')?;
    // A bare scheme prefix is not a directory.
    if cut < "https://".len() {
        return None;
    }
    Some(document_url[..=cut].to_string())
}

#[derive(Debug, Deserialize)]
struct AttachmentIndex {
    directory: AttachmentDirectory,
}

#[derive(Debug, Deserialize)]
struct AttachmentDirectory {
    #[serde(default)]
    item: Vec<AttachmentItem>,
}

#[derive(Debug, Deserialize)]
struct AttachmentItem {
    name: String,
}
