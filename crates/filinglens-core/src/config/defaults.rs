//! Default values for filinglens configuration.
//!
//! All hardcoded defaults are centralized here for easy maintenance.

// ============================================================================
// Model Defaults
// ============================================================================

/// Default model for per-document analysis and synthesis.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Default lightweight model for exhibit classification.
pub const DEFAULT_CLASSIFIER_MODEL: &str = "gemini-2.5-flash-lite";

/// Default generative API base URL.
pub const DEFAULT_MODEL_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default max output tokens for model responses.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

// ============================================================================
// Retrieval Defaults
// ============================================================================

/// Default User-Agent for outbound requests. The filing registry
/// rejects requests without an identifying agent.
pub const DEFAULT_USER_AGENT: &str = "filinglens/0.1 (research tool; contact: ops@filinglens.dev)";

/// Default per-request timeout (seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default retry attempts for a single HTTP fetch.
pub const DEFAULT_FETCH_RETRIES: u32 = 3;

/// Default base delay between fetch retries (milliseconds).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Ceiling on extracted document text, in characters. Longer content
/// is cut and marked as truncated.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 900_000;

/// Default page size for paged announcement listings.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default number of transcripts fetched concurrently per batch.
pub const DEFAULT_BATCH_SIZE: usize = 4;

/// Default rate limit: calls allowed per window.
pub const DEFAULT_RATE_LIMIT_CALLS: usize = 30;

/// Default rate limit window (seconds).
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Default TTL for cached document sets (seconds).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Periodic-report and listing form types.
pub const DEFAULT_REPORT_FORMS: &[&str] = &["10-K", "10-Q", "20-F", "6-K", "424B4"];

/// Non-report form types, included on request.
pub const DEFAULT_OTHER_FORMS: &[&str] = &["8-K", "S-8", "DEF 14A", "F-3"];

/// Form types treated as envelopes whose exhibits carry the substance.
pub const DEFAULT_ENVELOPE_FORMS: &[&str] = &["6-K"];

/// Filename marker identifying substantive exhibits inside an envelope.
pub const DEFAULT_EXHIBIT_MARKER: &str = "ex99";

/// Default base URL of the regulatory filing registry.
pub const DEFAULT_FILINGS_URL: &str = "https://www.sec.gov";

/// Default base URL of the exchange announcement service.
pub const DEFAULT_ANNOUNCEMENTS_URL: &str = "https://www1.hkexnews.hk";

/// Default base URL of the transcript provider.
pub const DEFAULT_TRANSCRIPTS_URL: &str = "https://discountingcashflows.com";

/// Date formats accepted when parsing listing and transcript dates.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y %H:%M", "%d/%m/%Y", "%b %d, %Y", "%B %d, %Y"];

// ============================================================================
// Analysis Defaults
// ============================================================================

/// Default wall-clock timeout for one document analysis (seconds).
pub const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 120;

/// Default interval between worker progress polls (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default attempts per document before recording a failure placeholder.
pub const DEFAULT_ANALYSIS_RETRIES: u32 = 3;

// ============================================================================
// Session Defaults
// ============================================================================

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = ".filinglens";

/// Default session checkpoint file name.
pub const DEFAULT_SESSION_FILE: &str = "session.json";

/// Default artifacts subdirectory.
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

// ============================================================================
// System Prompts
// ============================================================================

/// System prompt for the planning step.
pub const PLAN_SYSTEM_PROMPT: &str = r#"You are a financial research planner. Given a user question about a company, derive two working goals:

1. An analysis goal: what to look for when reading each individual disclosure document.
2. A synthesis goal: how to combine per-document findings into one answer.

IMPORTANT: Output your answer as valid JSON matching this exact structure:
{
  "analysis_goal": "What to extract from each document",
  "synthesis_goal": "How to combine the findings"
}

Only output the JSON, no additional text."#;

/// System prompt for per-document analysis.
pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are a financial analyst. Read the document and answer the analysis goal precisely. Cite figures and dates from the document. If the document is irrelevant to the goal, say so in one sentence.";

/// System prompt for the synthesis step.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a financial analyst writing a final report. Combine the per-document findings into a coherent answer to the user's question. Order findings by relevance, note disagreements between documents, and state what the evidence does not cover.";
