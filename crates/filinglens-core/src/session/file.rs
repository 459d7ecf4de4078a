use std::fs;
use std::path::PathBuf;

use crate::config::SessionConfig;

use super::error::SessionError;
use super::{SessionState, SessionStore};

/// File-based session persistence.
///
/// Stores everything under the data directory:
/// ```text
/// .filinglens/
///   session.json        # Run checkpoint + retrieval cache
///   artifacts/          # Extracted document texts, one file each
/// ```
pub struct FileSessionStore {
    config: SessionConfig,
}

impl FileSessionStore {
    /// Creates a store with default config.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    /// Creates a store with custom configuration.
    pub fn with_config(config: SessionConfig) -> Self {
        Self { config }
    }

    fn session_file(&self) -> PathBuf {
        self.config.session_path()
    }

    fn artifacts_dir(&self) -> PathBuf {
        self.config.artifacts_path()
    }

    /// Ensures the data directory exists.
    fn ensure_data_dir(&self) -> Result<(), SessionError> {
        let dir = PathBuf::from(&self.config.data_dir);
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| SessionError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Ensures the artifacts directory exists.
    fn ensure_artifacts_dir(&self) -> Result<(), SessionError> {
        let dir = self.artifacts_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| SessionError::io(&dir, e))?;
        }
        Ok(())
    }
}

impl Default for FileSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<SessionState>, SessionError> {
        let path = self.session_file();
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path).map_err(|e| SessionError::io(&path, e))?;
        let state: SessionState = serde_json::from_str(&json)?;

        Ok(Some(state))
    }

    fn save(&self, state: &SessionState) -> Result<(), SessionError> {
        self.ensure_data_dir()?;

        let path = self.session_file();
        let json = serde_json::to_string_pretty(state)?;

        // Write-then-rename so a crash mid-write never corrupts the
        // checkpoint the next invocation resumes from.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| SessionError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| SessionError::io(&path, e))?;

        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        let path = self.session_file();
        if path.exists() {
            fs::remove_file(&path).map_err(|e| SessionError::io(&path, e))?;
        }

        let artifacts = self.artifacts_dir();
        if artifacts.exists() {
            fs::remove_dir_all(&artifacts).map_err(|e| SessionError::io(&artifacts, e))?;
        }

        Ok(())
    }

    fn write_artifact(&self, name: &str, content: &str) -> Result<PathBuf, SessionError> {
        self.ensure_artifacts_dir()?;

        let path = self.artifacts_dir().join(sanitize_file_name(name));
        fs::write(&path, content).map_err(|e| SessionError::io(&path, e))?;

        Ok(path)
    }
}

/// Keeps artifact names filesystem-safe.
fn sanitize_file_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(120);
    if out.is_empty() {
        out.push_str("artifact");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("10-K filed 2025.txt"), "10-K_filed_2025.txt");
        assert_eq!(sanitize_file_name(""), "artifact");
    }
}
