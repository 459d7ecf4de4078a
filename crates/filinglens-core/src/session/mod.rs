mod error;
mod file;

pub use error::SessionError;
pub use file::FileSessionStore;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cache::TtlCache;
use crate::document::Document;
use crate::pipeline::PipelineRun;

/// Everything persisted between invocations: the active run checkpoint
/// (if any) and the cache of retrieved document sets. The host process
/// may exit and restart between any two pipeline steps; this is the
/// only state that survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// The active pipeline run, if one is in flight.
    pub run: Option<PipelineRun>,

    /// Retrieved document sets keyed by query digest.
    pub cache: TtlCache<Vec<Document>>,
}

impl SessionState {
    /// Creates an empty session whose cache entries live `cache_ttl_secs`.
    pub fn new(cache_ttl_secs: u64) -> Self {
        Self {
            run: None,
            cache: TtlCache::new(cache_ttl_secs),
        }
    }
}

/// Flags the persisted run, if any, for cancellation. The pipeline
/// honors the flag at the next step boundary. Returns whether a run
/// was flagged.
pub fn request_stop<S: SessionStore + ?Sized>(store: &S) -> Result<bool, SessionError> {
    let Some(mut state) = store.load()? else {
        return Ok(false);
    };
    let Some(run) = state.run.as_mut() else {
        return Ok(false);
    };

    run.stop_requested = true;
    run.note("stop requested");
    store.save(&state)?;
    Ok(true)
}

/// Trait for session persistence backends.
pub trait SessionStore: Send + Sync {
    /// Loads the persisted session, or None if nothing was saved yet.
    fn load(&self) -> Result<Option<SessionState>, SessionError>;

    /// Persists the session, replacing any previous checkpoint.
    fn save(&self, state: &SessionState) -> Result<(), SessionError>;

    /// Removes the persisted session and its artifacts.
    fn clear(&self) -> Result<(), SessionError>;

    /// Writes a document text artifact for manual inspection and
    /// returns its path.
    fn write_artifact(&self, name: &str, content: &str) -> Result<PathBuf, SessionError>;
}
