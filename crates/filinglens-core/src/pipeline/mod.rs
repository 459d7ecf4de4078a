mod aggregate;
mod run;
mod worker;

pub use aggregate::Aggregator;
pub use run::{DocumentResult, PipelineRun, StatusLog, Step};
pub use worker::{AnalysisOutcome, AnalysisWorker};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, ANALYSIS_SYSTEM_PROMPT, PLAN_SYSTEM_PROMPT};
use crate::document::{dedupe, Document, SourceKind};
use crate::extract::AttachmentExtractor;
use crate::fetch::{
    AnnouncementFetcher, FilingFetcher, RetrievalQuery, SourceFetcher, TranscriptFetcher,
};
use crate::limiter::RateLimiter;
use crate::llm::{extract_json, Classifier, ModelClient, StreamChunk};
use crate::prompts;
use crate::retry::with_retries;
use crate::session::{self, SessionError, SessionState, SessionStore};

/// Errors that can occur while driving the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("No active run. Start one with a question.")]
    NoActiveRun,
}

/// What a single `advance` call did.
#[derive(Debug)]
pub enum StepOutcome {
    /// Goals derived; next step is retrieval.
    Planned,
    /// Documents listed (possibly from the cache).
    Retrieved { documents: usize, from_cache: bool },
    /// Envelope filings expanded; the document list is now fixed.
    Expanded { documents: usize },
    /// One document processed (analyzed, retried, or given up on).
    Analyzed {
        completed: usize,
        total: usize,
        failed: bool,
    },
    /// The final report was produced and the run reset.
    Finished { report: String },
    /// The run was cancelled by a stop request.
    Stopped,
}

/// Drives the pipeline one step at a time over a persisted checkpoint.
///
/// Every step is load → work → persist: a call to [`advance`] reads the
/// session from the store, performs exactly one unit of work (one step,
/// or one document within the analysis step), writes the session back,
/// and returns. The caller re-invokes until `Finished` or `Stopped`;
/// the process may exit and restart between any two calls.
///
/// [`advance`]: PipelineController::advance
pub struct PipelineController<M, S> {
    store: S,
    model: Arc<M>,
    fetchers: Vec<Box<dyn SourceFetcher>>,
    extractor: AttachmentExtractor,
    classifier: Option<Classifier<Box<dyn ModelClient>>>,
    config: Config,
    stop: Arc<AtomicBool>,
}

impl<M, S> PipelineController<M, S>
where
    M: ModelClient + Send + Sync + 'static,
    S: SessionStore,
{
    /// Creates a controller with the standard three fetchers sharing
    /// one rate limiter.
    pub fn new(config: Config, model: M, store: S) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.retrieval.rate_limit_calls,
            Duration::from_secs(config.retrieval.rate_limit_window_secs),
        ));

        let fetchers: Vec<Box<dyn SourceFetcher>> = vec![
            Box::new(FilingFetcher::new(&config.retrieval, Arc::clone(&limiter))),
            Box::new(AnnouncementFetcher::new(&config.retrieval, Arc::clone(&limiter))),
            Box::new(TranscriptFetcher::new(&config.retrieval, Arc::clone(&limiter))),
        ];
        let extractor = AttachmentExtractor::new(&config.retrieval, limiter);

        Self {
            store,
            model: Arc::new(model),
            fetchers,
            extractor,
            classifier: None,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the fetcher set (used by tests and alternative sources).
    pub fn with_fetchers(mut self, fetchers: Vec<Box<dyn SourceFetcher>>) -> Self {
        self.fetchers = fetchers;
        self
    }

    /// Enables exhibit classification with a (typically lighter) model.
    pub fn with_classifier(mut self, model: Box<dyn ModelClient>) -> Self {
        self.classifier = Some(Classifier::new(model));
        self
    }

    /// The in-memory stop flag, shared with the analysis worker so a
    /// signal handler can cancel mid-analysis at the next poll tick.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Starts a new run for a question, replacing any run in flight.
    pub fn start(
        &self,
        question: impl Into<String>,
        query: RetrievalQuery,
    ) -> Result<PipelineRun, PipelineError> {
        let mut state = self.load_state()?;

        if let Some(previous) = &state.run {
            info!(id = %previous.id, "replacing run in flight");
        }

        self.stop.store(false, Ordering::Relaxed);

        let mut run = PipelineRun::new(question, query);
        run.note("question received");
        state.run = Some(run.clone());
        self.store.save(&state)?;

        Ok(run)
    }

    /// Requests cancellation: sets the persisted flag (honored at the
    /// next step boundary) and the in-memory flag (honored at the next
    /// worker poll tick). Returns whether a run was flagged.
    pub fn request_stop(&self) -> Result<bool, PipelineError> {
        self.stop.store(true, Ordering::Relaxed);
        Ok(session::request_stop(&self.store)?)
    }

    /// Returns the current run checkpoint, if any.
    pub fn status(&self) -> Result<Option<PipelineRun>, PipelineError> {
        Ok(self.load_state()?.run)
    }

    /// Removes the persisted session and artifacts.
    pub fn clear(&self) -> Result<(), PipelineError> {
        Ok(self.store.clear()?)
    }

    /// Executes exactly one unit of work and persists the checkpoint.
    pub async fn advance(
        &self,
        report_tx: Option<&mpsc::UnboundedSender<StreamChunk>>,
    ) -> Result<StepOutcome, PipelineError> {
        let mut state = self.load_state()?;
        let Some(mut run) = state.run.take() else {
            return Err(PipelineError::NoActiveRun);
        };

        // Stop is honored at every step boundary. The checkpoint is
        // kept for inspection; only a new question replaces it.
        if run.stop_requested || self.stop.load(Ordering::Relaxed) {
            info!(id = %run.id, "run cancelled");
            if !run.stop_requested {
                run.stop_requested = true;
                run.note("stop requested");
            }
            self.persist(state, run)?;
            return Ok(StepOutcome::Stopped);
        }

        match run.step {
            Step::Idle => Err(PipelineError::NoActiveRun),
            Step::Plan => self.step_plan(run, state).await,
            Step::Retrieve => self.step_retrieve(run, state).await,
            Step::Expand => self.step_expand(run, state).await,
            Step::Analyze => self.step_analyze(run, state).await,
            Step::Synthesize => self.step_synthesize(run, state, report_tx).await,
        }
    }

    /// Drives the run until it finishes or stops.
    pub async fn run_to_completion(
        &self,
        report_tx: Option<&mpsc::UnboundedSender<StreamChunk>>,
    ) -> Result<StepOutcome, PipelineError> {
        loop {
            match self.advance(report_tx).await? {
                outcome @ (StepOutcome::Finished { .. } | StepOutcome::Stopped) => {
                    return Ok(outcome)
                }
                _ => continue,
            }
        }
    }

    fn load_state(&self) -> Result<SessionState, PipelineError> {
        Ok(self
            .store
            .load()?
            .unwrap_or_else(|| SessionState::new(self.config.retrieval.cache_ttl_secs)))
    }

    fn persist(&self, mut state: SessionState, run: PipelineRun) -> Result<(), PipelineError> {
        state.run = Some(run);
        self.store.save(&state)?;
        Ok(())
    }

    async fn step_plan(
        &self,
        mut run: PipelineRun,
        state: SessionState,
    ) -> Result<StepOutcome, PipelineError> {
        let prompt = prompts::plan_prompt(&run.question);
        let reply = with_retries(
            self.config.analysis.max_retries,
            Duration::from_millis(self.config.retrieval.retry_delay_ms),
            "plan",
            || self.model.complete_with_system(PLAN_SYSTEM_PROMPT, &prompt),
        )
        .await;

        let goals = match reply {
            Ok(reply) => serde_json::from_str::<PlanGoals>(extract_json(&reply)).ok(),
            Err(err) => {
                warn!(%err, "plan call failed");
                None
            }
        };

        match goals {
            Some(goals) => {
                run.analysis_goal = goals.analysis_goal;
                run.synthesis_goal = goals.synthesis_goal;
                run.note("derived analysis plan");
            }
            None => {
                // Deterministic fallback so a flaky planner never blocks the run.
                run.analysis_goal = format!(
                    "Extract facts, figures, and risks relevant to: {}",
                    run.question
                );
                run.synthesis_goal =
                    format!("Answer the question using the per-document findings: {}", run.question);
                run.note("plan unavailable, using default goals");
            }
        }

        run.step = Step::Retrieve;
        self.persist(state, run)?;
        Ok(StepOutcome::Planned)
    }

    async fn step_retrieve(
        &self,
        mut run: PipelineRun,
        mut state: SessionState,
    ) -> Result<StepOutcome, PipelineError> {
        let digest = run.query.digest();

        // A cache hit skips expansion too: the cached set is the
        // already-expanded document list from an earlier run.
        if let Some(cached) = state.cache.get(&digest) {
            run.documents = cached.clone();
            run.note(format!("reused {} cached documents", run.documents.len()));
            run.step = Step::Analyze;
            let count = run.documents.len();
            self.persist(state, run)?;
            return Ok(StepOutcome::Retrieved {
                documents: count,
                from_cache: true,
            });
        }

        let mut documents = Vec::new();
        let mut any_source_failed = false;
        for fetcher in &self.fetchers {
            let kind = fetcher.kind();
            if !run.query.sources.enabled(kind) {
                continue;
            }
            // A failing source yields a partial set, not a failed run.
            match fetcher.list(&run.query).await {
                Ok(mut docs) => {
                    run.note(format!("{}: {} documents", kind.display_name(), docs.len()));
                    documents.append(&mut docs);
                }
                Err(err) => {
                    warn!(%err, source = kind.display_name(), "source retrieval failed");
                    run.note(format!("{} unavailable: {err}", kind.display_name()));
                    any_source_failed = true;
                }
            }
        }

        let mut documents = dedupe(documents);
        documents.sort_by(|a, b| b.date.cmp(&a.date));

        let count = documents.len();
        run.documents = documents;
        run.retrieval_incomplete = any_source_failed;
        run.step = Step::Expand;
        self.persist(state, run)?;

        Ok(StepOutcome::Retrieved {
            documents: count,
            from_cache: false,
        })
    }

    async fn step_expand(
        &self,
        mut run: PipelineRun,
        mut state: SessionState,
    ) -> Result<StepOutcome, PipelineError> {
        // Exhibits are pre-filtered only in reports-only mode; when the
        // user asked for everything, everything is analyzed.
        let use_classifier = run.query.include_report_forms && !run.query.include_other_forms;
        let classifier = if use_classifier {
            self.classifier.as_ref()
        } else {
            None
        };

        let envelope_forms = &self.config.retrieval.envelope_forms;
        let mut expanded = Vec::new();

        for doc in std::mem::take(&mut run.documents) {
            let is_envelope = doc.source == SourceKind::Filing
                && doc.subtype.is_none()
                && envelope_forms.contains(&doc.doc_type);

            if is_envelope {
                let exhibits = self.extractor.expand(&doc, classifier).await;
                run.note(format!("{}: {} exhibits", doc.title, exhibits.len()));
                expanded.extend(exhibits);
            } else {
                expanded.push(doc);
            }
        }

        run.documents = dedupe(expanded);
        run.step = Step::Analyze;
        let count = run.documents.len();
        // An incomplete retrieval is never cached: the next identical
        // query retries the failed sources instead of replaying a gap.
        if run.retrieval_incomplete {
            warn!(id = %run.id, "retrieval was incomplete, skipping cache");
        } else {
            state
                .cache
                .set(run.query.digest(), run.documents.clone());
        }
        self.persist(state, run)?;

        Ok(StepOutcome::Expanded { documents: count })
    }

    async fn step_analyze(
        &self,
        mut run: PipelineRun,
        state: SessionState,
    ) -> Result<StepOutcome, PipelineError> {
        let total = run.documents.len();

        if run.completed >= total {
            run.step = Step::Synthesize;
            run.note("all documents processed");
            self.persist(state, run)?;
            return Ok(StepOutcome::Analyzed {
                completed: total,
                total,
                failed: false,
            });
        }

        let index = run.completed;
        let mut doc = run.documents[index].clone();

        // Lazy content download for sources that list without content.
        if !doc.has_content() {
            match self.download(&doc).await {
                Ok(content) => doc.content = Some(content),
                Err(reason) => {
                    let failed = self.record_attempt_failure(&mut run, &doc, &reason);
                    let completed = run.completed;
                    self.persist(state, run)?;
                    return Ok(StepOutcome::Analyzed {
                        completed,
                        total,
                        failed,
                    });
                }
            }
        }

        if let Some(content) = &doc.content {
            match self.store.write_artifact(&artifact_name(index, &doc), content) {
                Ok(path) => doc.artifact_path = Some(path),
                Err(err) => warn!(%err, "could not write document artifact"),
            }
        }
        run.documents[index] = doc.clone();

        let worker = AnalysisWorker::new(
            Arc::clone(&self.model),
            Duration::from_secs(self.config.analysis.timeout_secs),
            Duration::from_millis(self.config.analysis.poll_interval_ms),
        );
        let prompt = prompts::analysis_prompt(&run.analysis_goal, &run.question, &doc);

        match worker
            .run(ANALYSIS_SYSTEM_PROMPT.to_string(), prompt, &self.stop)
            .await
        {
            AnalysisOutcome::Completed(analysis) => {
                run.results.push(DocumentResult::completed(&doc, analysis));
                run.retry_counts.remove(&doc.url);
                run.completed += 1;
                run.note(format!("analyzed {} ({}/{})", doc.title, run.completed, total));
                let completed = run.completed;
                self.persist(state, run)?;
                Ok(StepOutcome::Analyzed {
                    completed,
                    total,
                    failed: false,
                })
            }
            AnalysisOutcome::Cancelled => {
                run.stop_requested = true;
                run.note("analysis cancelled");
                self.persist(state, run)?;
                Ok(StepOutcome::Stopped)
            }
            AnalysisOutcome::TimedOut => {
                let failed = self.record_attempt_failure(&mut run, &doc, "timed out");
                let completed = run.completed;
                self.persist(state, run)?;
                Ok(StepOutcome::Analyzed {
                    completed,
                    total,
                    failed,
                })
            }
            AnalysisOutcome::Failed(err) => {
                let failed = self.record_attempt_failure(&mut run, &doc, &err.to_string());
                let completed = run.completed;
                self.persist(state, run)?;
                Ok(StepOutcome::Analyzed {
                    completed,
                    total,
                    failed,
                })
            }
        }
    }

    async fn step_synthesize(
        &self,
        mut run: PipelineRun,
        mut state: SessionState,
        report_tx: Option<&mpsc::UnboundedSender<StreamChunk>>,
    ) -> Result<StepOutcome, PipelineError> {
        let aggregator = Aggregator::new(Arc::clone(&self.model));
        let report = aggregator.synthesize(&run, report_tx).await;

        run.note("report complete");
        info!(id = %run.id, documents = run.results.len(), "run finished");

        // The run is done; only the retrieval cache carries over.
        state.run = None;
        self.store.save(&state)?;

        Ok(StepOutcome::Finished { report })
    }

    async fn download(&self, doc: &Document) -> Result<String, String> {
        let fetcher = self
            .fetchers
            .iter()
            .find(|f| f.kind() == doc.source)
            .ok_or_else(|| format!("no fetcher for {}", doc.source.display_name()))?;

        fetcher.download(doc).await.map_err(|e| e.to_string())
    }

    /// Bumps the persisted attempt counter for a document; once
    /// attempts are exhausted, records a failure placeholder and moves
    /// on. Returns true when the document was given up on.
    fn record_attempt_failure(&self, run: &mut PipelineRun, doc: &Document, reason: &str) -> bool {
        let max_attempts = self.config.analysis.max_retries.max(1);
        let attempts = {
            let counter = run.retry_counts.entry(doc.url.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        if attempts >= max_attempts {
            warn!(title = %doc.title, reason, attempts, "document analysis exhausted");
            run.results.push(DocumentResult::failure(doc, reason));
            run.retry_counts.remove(&doc.url);
            run.completed += 1;
            run.note(format!("gave up on {} after {attempts} attempts", doc.title));
            true
        } else {
            run.note(format!(
                "attempt {attempts}/{max_attempts} failed for {}: {reason}",
                doc.title
            ));
            false
        }
    }
}

fn artifact_name(index: usize, doc: &Document) -> String {
    format!("{:03}-{}.txt", index + 1, doc.title)
}

#[derive(Debug, Deserialize)]
struct PlanGoals {
    analysis_goal: String,
    synthesis_goal: String,
}
