pub mod cache;
pub mod config;
pub mod document;
pub mod extract;
pub mod fetch;
pub mod limiter;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod session;

pub use cache::TtlCache;
pub use config::Config;
pub use document::{Document, SourceKind};
pub use limiter::RateLimiter;
pub use pipeline::{PipelineController, PipelineRun, Step, StepOutcome};
pub use session::{FileSessionStore, SessionState, SessionStore};
