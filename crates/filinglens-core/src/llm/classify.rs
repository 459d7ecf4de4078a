use serde::Deserialize;
use tracing::{debug, warn};

use super::{extract_json, ModelClient};
use crate::prompts;

/// Characters of document text shown to the classifier.
const CLASSIFIER_EXCERPT_CHARS: usize = 4000;

/// Pre-filters exhibit documents with a lightweight model call.
///
/// Fails open: any model or parse failure accepts the document, so a
/// flaky classifier never silently drops disclosures.
pub struct Classifier<M> {
    model: M,
}

impl<M: ModelClient> Classifier<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// Returns true when the document looks like a periodic report or
    /// listing document worth analyzing.
    pub async fn is_report_material(&self, title: &str, content: &str) -> bool {
        let excerpt: String = content.chars().take(CLASSIFIER_EXCERPT_CHARS).collect();
        let prompt = prompts::classifier_prompt(title, &excerpt);

        let reply = match self.model.complete(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%err, title, "classifier call failed, accepting document");
                return true;
            }
        };

        match serde_json::from_str::<Verdict>(extract_json(&reply)) {
            Ok(verdict) => {
                debug!(title, is_report = verdict.is_report, "classified exhibit");
                verdict.is_report
            }
            Err(err) => {
                warn!(%err, title, "unparseable classifier reply, accepting document");
                true
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default = "default_true")]
    is_report: bool,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelError;
    use async_trait::async_trait;

    struct FixedModel {
        reply: Result<&'static str, ()>,
    }

    #[async_trait]
    impl ModelClient for FixedModel {
        async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
            match self.reply {
                Ok(text) => Ok(text.to_string()),
                Err(()) => Err(ModelError::EmptyResponse),
            }
        }

        async fn complete_with_system(
            &self,
            _system: &str,
            prompt: &str,
        ) -> Result<String, ModelError> {
            self.complete(prompt).await
        }
    }

    #[tokio::test]
    async fn test_rejects_on_negative_verdict() {
        let classifier = Classifier::new(FixedModel {
            reply: Ok(r#"{"is_report": false}"#),
        });
        assert!(!classifier.is_report_material("Press release", "...").await);
    }

    #[tokio::test]
    async fn test_accepts_on_positive_verdict() {
        let classifier = Classifier::new(FixedModel {
            reply: Ok("```json\n{\"is_report\": true}\n```"),
        });
        assert!(classifier.is_report_material("Interim report", "...").await);
    }

    #[tokio::test]
    async fn test_fails_open_on_model_error() {
        let classifier = Classifier::new(FixedModel { reply: Err(()) });
        assert!(classifier.is_report_material("Anything", "...").await);
    }

    #[tokio::test]
    async fn test_fails_open_on_garbage_reply() {
        let classifier = Classifier::new(FixedModel {
            reply: Ok("I could not decide, sorry."),
        });
        assert!(classifier.is_report_material("Anything", "...").await);
    }
}
