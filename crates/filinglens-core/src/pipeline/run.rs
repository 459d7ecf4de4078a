use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Document;
use crate::fetch::RetrievalQuery;

/// The pipeline steps, in execution order.
///
/// Steps only ever advance (or reset to Idle when a run finishes or is
/// cancelled). Each step reads the checkpoint, does its work, and
/// writes the checkpoint back, so execution can resume from any step
/// after a restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// No run in flight.
    #[default]
    Idle,
    /// Derive analysis and synthesis goals from the question.
    Plan,
    /// List documents from the enabled sources.
    Retrieve,
    /// Expand envelope filings into exhibits.
    Expand,
    /// Analyze documents one at a time.
    Analyze,
    /// Combine per-document findings into the final report.
    Synthesize,
}

impl Step {
    /// Returns the next step in the pipeline.
    /// Returns None from Idle and from the final step.
    pub fn next(&self) -> Option<Step> {
        match self {
            Step::Idle => None,
            Step::Plan => Some(Step::Retrieve),
            Step::Retrieve => Some(Step::Expand),
            Step::Expand => Some(Step::Analyze),
            Step::Analyze => Some(Step::Synthesize),
            Step::Synthesize => None,
        }
    }

    /// Returns a human-readable name for the step.
    pub fn display_name(&self) -> &'static str {
        match self {
            Step::Idle => "Idle",
            Step::Plan => "Planning",
            Step::Retrieve => "Retrieving",
            Step::Expand => "Expanding attachments",
            Step::Analyze => "Analyzing",
            Step::Synthesize => "Synthesizing",
        }
    }
}

/// Outcome recorded for one analyzed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    pub title: String,
    pub date: NaiveDate,
    /// The model's analysis, or a placeholder when `failed` is set.
    pub analysis: String,
    /// Set when every attempt for this document was exhausted.
    pub failed: bool,
}

impl DocumentResult {
    pub fn completed(doc: &Document, analysis: String) -> Self {
        Self {
            title: doc.title.clone(),
            date: doc.date,
            analysis,
            failed: false,
        }
    }

    pub fn failure(doc: &Document, reason: &str) -> Self {
        Self {
            title: doc.title.clone(),
            date: doc.date,
            analysis: format!("analysis unavailable: {reason}"),
            failed: true,
        }
    }
}

/// Maximum status messages kept in the checkpoint.
const MAX_STATUS_ENTRIES: usize = 20;

/// Bounded ring of timestamped progress messages, surfaced by the CLI
/// `status` command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusLog {
    entries: VecDeque<String>,
}

impl StatusLog {
    /// Appends a message, dropping the oldest once full.
    pub fn push(&mut self, message: impl AsRef<str>) {
        let stamped = format!("[{}] {}", Utc::now().format("%H:%M:%S"), message.as_ref());
        self.entries.push_back(stamped);
        while self.entries.len() > MAX_STATUS_ENTRIES {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The checkpoint for one question's pipeline execution.
///
/// Persisted after every mutation. Invariants:
/// - `completed <= documents.len()` once the document list is fixed
/// - `results` holds one entry per completed document, in order
/// - `step` only moves forward (reset to Idle ends the run)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run id.
    pub id: String,
    /// The user's question.
    pub question: String,
    /// Retrieval parameters derived from the user's selections.
    pub query: RetrievalQuery,
    /// Current pipeline step.
    pub step: Step,
    /// Per-document analysis goal, set by the plan step.
    pub analysis_goal: String,
    /// Report synthesis goal, set by the plan step.
    pub synthesis_goal: String,
    /// The retrieved (and, after Expand, expanded) document list.
    pub documents: Vec<Document>,
    /// Number of documents fully processed (analyzed or given up on).
    pub completed: usize,
    /// One result per completed document.
    pub results: Vec<DocumentResult>,
    /// Analysis attempts per document URL, persisted so retries survive
    /// restarts.
    pub retry_counts: HashMap<String, u32>,
    /// Set when an enabled source failed during retrieval; incomplete
    /// document sets are never cached.
    #[serde(default)]
    pub retrieval_incomplete: bool,
    /// Set by a stop request; honored at every step boundary.
    pub stop_requested: bool,
    /// Progress messages.
    pub status: StatusLog,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    /// Creates a fresh run positioned at the plan step.
    pub fn new(question: impl Into<String>, query: RetrievalQuery) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            question: question.into(),
            query,
            step: Step::Plan,
            analysis_goal: String::new(),
            synthesis_goal: String::new(),
            documents: Vec::new(),
            completed: 0,
            results: Vec::new(),
            retry_counts: HashMap::new(),
            retrieval_incomplete: false,
            stop_requested: false,
            status: StatusLog::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a status message and refreshes the update time.
    pub fn note(&mut self, message: impl AsRef<str>) {
        self.status.push(message);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Documents still awaiting analysis.
    pub fn remaining(&self) -> usize {
        self.documents.len().saturating_sub(self.completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order() {
        let mut step = Step::Plan;
        let mut seen = vec![step];
        while let Some(next) = step.next() {
            step = next;
            seen.push(step);
        }
        assert_eq!(
            seen,
            vec![Step::Plan, Step::Retrieve, Step::Expand, Step::Analyze, Step::Synthesize]
        );
        assert_eq!(Step::Idle.next(), None);
    }

    #[test]
    fn test_status_log_bounded() {
        let mut log = StatusLog::default();
        for i in 0..30 {
            log.push(format!("message {i}"));
        }
        assert_eq!(log.len(), 20);
        // Oldest entries dropped.
        assert!(log.entries().next().unwrap().contains("message 10"));
    }

    #[test]
    fn test_new_run_starts_at_plan() {
        let run = PipelineRun::new("question", RetrievalQuery::new("ACME", 3));
        assert_eq!(run.step, Step::Plan);
        assert_eq!(run.completed, 0);
        assert!(!run.stop_requested);
        assert_eq!(run.remaining(), 0);
    }
}
