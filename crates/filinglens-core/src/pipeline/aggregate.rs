use tokio::sync::mpsc;
use tracing::{info, warn};

use super::run::{DocumentResult, PipelineRun};
use crate::config::SYNTHESIS_SYSTEM_PROMPT;
use crate::llm::{ModelClient, StreamChunk};
use crate::prompts;

/// Builds the final report from per-document results.
///
/// Failed documents are excluded from the synthesis prompt and tallied
/// in a trailing note instead. A synthesis failure produces an error
/// report rather than an error: by this point the per-document work is
/// done and checkpointed, and the caller should always get a report.
pub struct Aggregator<M> {
    model: M,
}

impl<M: ModelClient> Aggregator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// Synthesizes the report, streaming chunks through `tx` when
    /// provided, and returns the full text.
    pub async fn synthesize(
        &self,
        run: &PipelineRun,
        tx: Option<&mpsc::UnboundedSender<StreamChunk>>,
    ) -> String {
        let mut report = self.build_report(run, tx).await;

        let failed = run.results.iter().filter(|r| r.failed).count();
        if failed > 0 {
            let note = format!(
                "\n\n---\nNote: {failed} of {total} documents could not be analyzed and were omitted.",
                total = run.results.len(),
            );
            report.push_str(&note);
            if let Some(tx) = tx {
                let _ = tx.send(StreamChunk::text(note));
            }
        }

        if let Some(tx) = tx {
            let _ = tx.send(StreamChunk::done());
        }

        report
    }

    async fn build_report(
        &self,
        run: &PipelineRun,
        tx: Option<&mpsc::UnboundedSender<StreamChunk>>,
    ) -> String {
        let usable: Vec<&DocumentResult> = run.results.iter().filter(|r| !r.failed).collect();

        if usable.is_empty() {
            let report = format!(
                "No documents could be analyzed for: {}\n\
                 {} documents were retrieved but every analysis attempt failed. \
                 Try again, narrow the time window, or check model access.",
                run.question,
                run.results.len(),
            );
            if let Some(tx) = tx {
                let _ = tx.send(StreamChunk::text(report.clone()));
            }
            return report;
        }

        let prompt = prompts::synthesis_prompt(&run.synthesis_goal, &run.question, &usable);

        let result = if self.model.supports_streaming() && tx.is_some() {
            self.stream_report(&prompt, tx).await
        } else {
            match self.model.complete_with_system(SYNTHESIS_SYSTEM_PROMPT, &prompt).await {
                Ok(text) => {
                    if let Some(tx) = tx {
                        let _ = tx.send(StreamChunk::text(text.clone()));
                    }
                    Ok(text)
                }
                Err(err) => Err(err),
            }
        };

        match result {
            Ok(report) => {
                info!(documents = usable.len(), "synthesized report");
                report
            }
            Err(err) => {
                warn!(%err, "synthesis failed, emitting error report");
                let report = format!(
                    "Report generation failed: {err}\n\n\
                     Per-document findings were completed for {} documents and \
                     remain available in the session artifacts.",
                    usable.len(),
                );
                if let Some(tx) = tx {
                    let _ = tx.send(StreamChunk::text(report.clone()));
                }
                report
            }
        }
    }

    /// Streams synthesis chunks, forwarding each to the caller while
    /// collecting the full text.
    async fn stream_report(
        &self,
        prompt: &str,
        tx: Option<&mpsc::UnboundedSender<StreamChunk>>,
    ) -> Result<String, crate::llm::ModelError> {
        let (inner_tx, mut inner_rx) = mpsc::unbounded_channel::<StreamChunk>();
        let forward = tx.cloned();

        let collector = tokio::spawn(async move {
            let mut full = String::new();
            while let Some(chunk) = inner_rx.recv().await {
                if chunk.is_final {
                    break;
                }
                full.push_str(&chunk.text);
                if let Some(tx) = &forward {
                    let _ = tx.send(chunk);
                }
            }
            full
        });

        self.model
            .stream_complete(SYNTHESIS_SYSTEM_PROMPT, prompt, inner_tx)
            .await?;

        Ok(collector.await.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::RetrievalQuery;
    use crate::llm::ModelError;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct EchoModel;

    #[async_trait]
    impl ModelClient for EchoModel {
        async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
            Ok("final report".to_string())
        }

        async fn complete_with_system(
            &self,
            _system: &str,
            _prompt: &str,
        ) -> Result<String, ModelError> {
            Ok("final report".to_string())
        }
    }

    struct BrokenModel;

    #[async_trait]
    impl ModelClient for BrokenModel {
        async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
            Err(ModelError::EmptyResponse)
        }

        async fn complete_with_system(
            &self,
            _system: &str,
            _prompt: &str,
        ) -> Result<String, ModelError> {
            Err(ModelError::EmptyResponse)
        }
    }

    fn run_with_results(results: Vec<DocumentResult>) -> PipelineRun {
        let mut run = PipelineRun::new("question", RetrievalQuery::new("ACME", 3));
        run.results = results;
        run
    }

    fn result(title: &str, failed: bool) -> DocumentResult {
        DocumentResult {
            title: title.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            analysis: if failed { "analysis unavailable".into() } else { "finding".into() },
            failed,
        }
    }

    #[tokio::test]
    async fn test_failed_results_tallied_in_note() {
        let run = run_with_results(vec![result("A", false), result("B", true)]);
        let report = Aggregator::new(EchoModel).synthesize(&run, None).await;
        assert!(report.starts_with("final report"));
        assert!(report.contains("1 of 2 documents could not be analyzed"));
    }

    #[tokio::test]
    async fn test_all_failed_produces_error_report() {
        let run = run_with_results(vec![result("A", true), result("B", true)]);
        let report = Aggregator::new(EchoModel).synthesize(&run, None).await;
        assert!(report.contains("No documents could be analyzed"));
    }

    #[tokio::test]
    async fn test_synthesis_failure_produces_error_report() {
        let run = run_with_results(vec![result("A", false)]);
        let report = Aggregator::new(BrokenModel).synthesize(&run, None).await;
        assert!(report.contains("Report generation failed"));
    }

    #[tokio::test]
    async fn test_streaming_chunks_forwarded() {
        let run = run_with_results(vec![result("A", false), result("B", true)]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = Aggregator::new(EchoModel).synthesize(&run, Some(&tx)).await;
        drop(tx);

        let mut streamed = String::new();
        let mut finished = false;
        while let Some(chunk) = rx.recv().await {
            if chunk.is_final {
                finished = true;
                break;
            }
            streamed.push_str(&chunk.text);
        }

        assert!(finished);
        assert_eq!(streamed, report);
    }
}
