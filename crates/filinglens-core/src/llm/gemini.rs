use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{KeyRotator, ModelError, ModelClient, StreamChunk};
use crate::config::{DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MODEL, DEFAULT_MODEL_URL};

/// Generative API client with per-call key rotation.
pub struct GeminiClient {
    rotator: KeyRotator,
    base_url: String,
    model: String,
    max_output_tokens: u32,
    client: Client,
}

impl GeminiClient {
    /// Creates a new client using the given key rotation.
    pub fn new(rotator: KeyRotator) -> Self {
        Self {
            rotator,
            base_url: DEFAULT_MODEL_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            client: Client::new(),
        }
    }

    /// Creates a client with keys from the environment.
    pub fn from_env() -> Result<Self, ModelError> {
        Ok(Self::new(KeyRotator::from_env()?))
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the maximum output tokens for responses.
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Sets the API base URL (for proxies or test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn request_body(&self, system: Option<&str>, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            system_instruction: system.map(|s| Content {
                role: None,
                parts: vec![Part {
                    text: s.to_string(),
                }],
            }),
            generation_config: GenerationConfig {
                max_output_tokens: self.max_output_tokens,
            },
        }
    }

    async fn send_request(&self, request: &GenerateRequest) -> Result<String, ModelError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let key = self.rotator.next_key();

        let response = self
            .client
            .post(&url)
            .query(&[("key", key.as_str())])
            .json(request)
            .send()
            .await?;

        let status = response.status();

        if status == 429 {
            return Err(ModelError::RateLimited);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let generate_response: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelError::ParseError(e.to_string()))?;

        let text = generate_response.text();
        if text.is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        Ok(text)
    }

    /// Send a streaming request and forward chunks through the channel.
    async fn send_streaming_request(
        &self,
        request: &GenerateRequest,
        tx: mpsc::UnboundedSender<StreamChunk>,
    ) -> Result<(), ModelError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent",
            self.base_url, self.model
        );
        let key = self.rotator.next_key();

        let response = self
            .client
            .post(&url)
            .query(&[("alt", "sse"), ("key", key.as_str())])
            .json(request)
            .send()
            .await?;

        let status = response.status();

        if status == 429 {
            return Err(ModelError::RateLimited);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        // Process SSE stream
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| ModelError::Network(e.to_string()))?;
            let chunk_str = String::from_utf8_lossy(&chunk);
            buffer.push_str(&chunk_str);

            // Process complete SSE events from buffer
            while let Some(pos) = buffer.find("\n\n") {
                let event_data = buffer[..pos].to_string();
                buffer = buffer[pos + 2..].to_string();

                if let Some(text) = parse_sse_event(&event_data) {
                    let _ = tx.send(StreamChunk::text(text));
                }
            }
        }

        let _ = tx.send(StreamChunk::done());
        Ok(())
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let request = self.request_body(None, prompt);
        self.send_request(&request).await
    }

    async fn complete_with_system(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<String, ModelError> {
        let request = self.request_body(Some(system), prompt);
        self.send_request(&request).await
    }

    async fn stream_complete(
        &self,
        system: &str,
        prompt: &str,
        tx: mpsc::UnboundedSender<StreamChunk>,
    ) -> Result<(), ModelError> {
        let request = self.request_body(Some(system), prompt);
        self.send_streaming_request(&request, tx).await
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .flat_map(|c| c.content.parts)
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

/// Parse one SSE event and extract the candidate text, if any.
///
/// Streaming format:
/// ```text
/// data: {"candidates":[{"content":{"parts":[{"text":"Hello"}]}}]}
/// ```
fn parse_sse_event(event_data: &str) -> Option<String> {
    let mut data_line = None;

    for line in event_data.lines() {
        if let Some(stripped) = line.strip_prefix("data: ") {
            data_line = Some(stripped.trim());
        }
    }

    let data = data_line?;
    let parsed: GenerateResponse = serde_json::from_str(data).ok()?;
    let text = parsed.text();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
