// crates/conduit-cli/src/session.rs
// ============================================================================
// Module: CLI Session
// Description: Saved server URL between CLI invocations.
// Purpose: Let `conduit connect` pick the server later commands use.
// Dependencies: dirs, serde_json
// ============================================================================

//! ## Overview
//! The session file is `session.json` under `$CONDUIT_HOME` when set, else
//! under `<platform config dir>/conduit`. URL resolution order is the
//! `--url` flag (or `CONDUIT_URL`), then the saved session, then
//! [`DEFAULT_URL`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Server URL used when nothing else is configured.
pub const DEFAULT_URL: &str = "http://127.0.0.1:7410";
/// Environment variable overriding the session directory.
pub const HOME_ENV: &str = "CONDUIT_HOME";
/// Session file name.
const SESSION_FILE: &str = "session.json";
/// Largest session file read back.
const MAX_SESSION_BYTES: u64 = 64 * 1024;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Session persistence failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No directory could hold the session file.
    #[error("no config directory available; set {HOME_ENV}")]
    NoHome,
    /// Reading or writing failed.
    #[error("session file {path}: {message}")]
    Io {
        /// File involved.
        path: String,
        /// Failure detail.
        message: String,
    },
}

/// Persisted CLI session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Server base URL.
    pub url: String,
}

impl Session {
    /// Loads the session from `dir`, returning `None` when absent or
    /// unreadable.
    #[must_use]
    pub fn load_from(dir: &Path) -> Option<Self> {
        let path = dir.join(SESSION_FILE);
        let metadata = fs::metadata(&path).ok()?;
        if metadata.len() > MAX_SESSION_BYTES {
            return None;
        }
        let bytes = fs::read(&path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Writes the session into `dir`, creating it when needed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] when the directory or file cannot be
    /// written.
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf, SessionError> {
        let path = dir.join(SESSION_FILE);
        let io_error = |err: std::io::Error| SessionError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        };
        fs::create_dir_all(dir).map_err(io_error)?;
        let bytes = serde_json::to_vec_pretty(self).map_err(|err| SessionError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        fs::write(&path, bytes).map_err(io_error)?;
        Ok(path)
    }
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Returns the session directory.
///
/// # Errors
///
/// Returns [`SessionError::NoHome`] when neither `CONDUIT_HOME` nor a
/// platform config directory is available.
pub fn session_dir() -> Result<PathBuf, SessionError> {
    if let Some(home) = env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::config_dir().map(|dir| dir.join("conduit")).ok_or(SessionError::NoHome)
}

/// Resolves the server URL from the flag, the saved session, or the default.
#[must_use]
pub fn resolve_url(flag: Option<&str>, session_dir: Option<&Path>) -> String {
    if let Some(url) = flag.map(str::trim).filter(|url| !url.is_empty()) {
        return url.to_string();
    }
    session_dir
        .and_then(Session::load_from)
        .map_or_else(|| DEFAULT_URL.to_string(), |session| session.url)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::DEFAULT_URL;
    use super::Session;
    use super::resolve_url;

    #[test]
    fn flag_wins_over_session() {
        let dir = tempfile::tempdir().unwrap();
        Session {
            url: "http://saved:1".to_string(),
        }
        .save_to(dir.path())
        .unwrap();
        assert_eq!(resolve_url(Some("http://flag:2"), Some(dir.path())), "http://flag:2");
        assert_eq!(resolve_url(None, Some(dir.path())), "http://saved:1");
    }

    #[test]
    fn missing_or_corrupt_session_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_url(None, Some(dir.path())), DEFAULT_URL);
        std::fs::write(dir.path().join("session.json"), b"{broken").unwrap();
        assert_eq!(resolve_url(Some("  "), Some(dir.path())), DEFAULT_URL);
        assert_eq!(resolve_url(None, None), DEFAULT_URL);
    }

    #[test]
    fn save_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let path = Session {
            url: "http://x:3".to_string(),
        }
        .save_to(&nested)
        .unwrap();
        assert!(path.ends_with("session.json"));
        assert_eq!(Session::load_from(&nested).unwrap().url, "http://x:3");
    }
}
