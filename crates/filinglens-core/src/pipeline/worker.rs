use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use crate::llm::{ModelClient, ModelError};

/// Outcome of one supervised analysis attempt.
#[derive(Debug)]
pub enum AnalysisOutcome {
    /// The model returned an analysis.
    Completed(String),
    /// The model call failed.
    Failed(ModelError),
    /// The deadline passed before the model returned.
    TimedOut,
    /// A stop was requested while the call was in flight.
    Cancelled,
}

/// Supervises one model call with a cooperative timeout.
///
/// The call runs in a spawned task; the worker polls it, checking the
/// deadline and the stop flag at every tick. On timeout or cancellation
/// the task is aborted, which drops the in-flight request. An aborted
/// or panicked task counts as a timed-out attempt.
pub struct AnalysisWorker<M> {
    model: M,
    timeout: Duration,
    poll_interval: Duration,
}

impl<M: ModelClient + Clone + Send + 'static> AnalysisWorker<M> {
    pub fn new(model: M, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            model,
            timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Runs one analysis attempt to completion, timeout, or cancellation.
    pub async fn run(&self, system: String, prompt: String, stop: &Arc<AtomicBool>) -> AnalysisOutcome {
        let model = self.model.clone();
        let handle =
            tokio::spawn(async move { model.complete_with_system(&system, &prompt).await });

        let started = Instant::now();

        loop {
            if handle.is_finished() {
                return match handle.await {
                    Ok(Ok(text)) => AnalysisOutcome::Completed(text),
                    Ok(Err(err)) => AnalysisOutcome::Failed(err),
                    Err(join_err) => {
                        warn!(%join_err, "analysis task did not finish cleanly");
                        AnalysisOutcome::TimedOut
                    }
                };
            }

            if stop.load(Ordering::Relaxed) {
                debug!("stop requested, aborting in-flight analysis");
                handle.abort();
                return AnalysisOutcome::Cancelled;
            }

            if started.elapsed() >= self.timeout {
                warn!(timeout_secs = self.timeout.as_secs(), "analysis timed out");
                handle.abort();
                return AnalysisOutcome::TimedOut;
            }

            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Clone)]
    struct SlowModel {
        delay: Duration,
        reply: &'static str,
    }

    #[async_trait]
    impl ModelClient for SlowModel {
        async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
            sleep(self.delay).await;
            Ok(self.reply.to_string())
        }

        async fn complete_with_system(
            &self,
            _system: &str,
            prompt: &str,
        ) -> Result<String, ModelError> {
            self.complete(prompt).await
        }
    }

    #[derive(Clone)]
    struct FailingModel;

    #[async_trait]
    impl ModelClient for FailingModel {
        async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
            Err(ModelError::RateLimited)
        }

        async fn complete_with_system(
            &self,
            _system: &str,
            prompt: &str,
        ) -> Result<String, ModelError> {
            self.complete(prompt).await
        }
    }

    fn not_stopped() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_model_completes() {
        let worker = AnalysisWorker::new(
            SlowModel {
                delay: Duration::from_millis(10),
                reply: "done",
            },
            Duration::from_secs(5),
            Duration::from_millis(50),
        );

        let outcome = worker
            .run("system".into(), "prompt".into(), &not_stopped())
            .await;
        assert!(matches!(outcome, AnalysisOutcome::Completed(text) if text == "done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_model_times_out() {
        let worker = AnalysisWorker::new(
            SlowModel {
                delay: Duration::from_secs(600),
                reply: "never",
            },
            Duration::from_secs(5),
            Duration::from_millis(50),
        );

        let outcome = worker
            .run("system".into(), "prompt".into(), &not_stopped())
            .await;
        assert!(matches!(outcome, AnalysisOutcome::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flag_cancels() {
        let worker = AnalysisWorker::new(
            SlowModel {
                delay: Duration::from_secs(600),
                reply: "never",
            },
            Duration::from_secs(600),
            Duration::from_millis(50),
        );

        let stop = Arc::new(AtomicBool::new(true));
        let outcome = worker.run("system".into(), "prompt".into(), &stop).await;
        assert!(matches!(outcome, AnalysisOutcome::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_error_reported() {
        let worker = AnalysisWorker::new(
            FailingModel,
            Duration::from_secs(5),
            Duration::from_millis(50),
        );

        let outcome = worker
            .run("system".into(), "prompt".into(), &not_stopped())
            .await;
        assert!(matches!(
            outcome,
            AnalysisOutcome::Failed(ModelError::RateLimited)
        ));
    }
}
