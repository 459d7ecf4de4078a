mod classify;
mod error;
mod gemini;
mod rotator;

pub use classify::Classifier;
pub use error::ModelError;
pub use gemini::GeminiClient;
pub use rotator::KeyRotator;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A chunk of streamed response from a model.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// The text content of this chunk.
    pub text: String,
    /// Whether this is the final chunk.
    pub is_final: bool,
}

impl StreamChunk {
    /// Create a new text chunk.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    /// Create a final (end of stream) chunk.
    pub fn done() -> Self {
        Self {
            text: String::new(),
            is_final: true,
        }
    }
}

/// Trait for language model backends.
///
/// The pipeline only depends on this trait, so tests can substitute a
/// scripted model and alternative providers can be added without
/// touching the pipeline.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Complete a prompt and return the response.
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;

    /// Complete a prompt with a system message.
    async fn complete_with_system(&self, system: &str, prompt: &str)
        -> Result<String, ModelError>;

    /// Stream a completion with a system message.
    ///
    /// Sends chunks through the provided channel as they arrive.
    /// The final chunk will have `is_final: true`.
    ///
    /// Default implementation falls back to non-streaming and sends
    /// the entire response as a single chunk.
    async fn stream_complete(
        &self,
        system: &str,
        prompt: &str,
        tx: mpsc::UnboundedSender<StreamChunk>,
    ) -> Result<(), ModelError> {
        let response = self.complete_with_system(system, prompt).await?;
        let _ = tx.send(StreamChunk::text(response));
        let _ = tx.send(StreamChunk::done());
        Ok(())
    }

    /// Returns true if this backend supports streaming.
    fn supports_streaming(&self) -> bool {
        false
    }
}

/// Blanket implementation for boxed trait objects.
#[async_trait]
impl ModelClient for Box<dyn ModelClient> {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        (**self).complete(prompt).await
    }

    async fn complete_with_system(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<String, ModelError> {
        (**self).complete_with_system(system, prompt).await
    }

    async fn stream_complete(
        &self,
        system: &str,
        prompt: &str,
        tx: mpsc::UnboundedSender<StreamChunk>,
    ) -> Result<(), ModelError> {
        (**self).stream_complete(system, prompt, tx).await
    }

    fn supports_streaming(&self) -> bool {
        (**self).supports_streaming()
    }
}

/// Blanket implementation for shared clients.
#[async_trait]
impl<M: ModelClient + ?Sized> ModelClient for Arc<M> {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        (**self).complete(prompt).await
    }

    async fn complete_with_system(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<String, ModelError> {
        (**self).complete_with_system(system, prompt).await
    }

    async fn stream_complete(
        &self,
        system: &str,
        prompt: &str,
        tx: mpsc::UnboundedSender<StreamChunk>,
    ) -> Result<(), ModelError> {
        (**self).stream_complete(system, prompt, tx).await
    }

    fn supports_streaming(&self) -> bool {
        (**self).supports_streaming()
    }
}

/// Extracts a JSON object from a model reply.
///
/// Models often wrap JSON in a markdown fence or surround it with
/// prose. This strips a ```json fence when present, otherwise falls
/// back to the outermost brace pair.
pub fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();

    let inner = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    };

    if inner.starts_with('{') {
        return inner;
    }

    match (inner.find('{'), inner.rfind('}')) {
        (Some(start), Some(end)) if start < end => &inner[start..=end],
        _ => inner,
    }
}
