use std::path::PathBuf;
use thiserror::Error;

use crate::core::transactions::TransactionKind;

/// Central error type for the setup backend.
/// Every module returns `Result<T, SetupError>`.
#[derive(Debug, Error)]
pub enum SetupError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Source does not exist: {0:?}")]
    MissingSource(PathBuf),

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to download the file at {url}: {source}")]
    Source {
        url: String,
        source: reqwest::Error,
    },

    #[error("Failed to create/open file {path:?}: {source}")]
    Destination {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-1 mismatch for {path:?}: expected {expected}, got {actual}")]
    Sha1Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── Transactions ────────────────────────────────────
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("{kind} of {target} failed: {source}")]
    Transaction {
        kind: TransactionKind,
        target: String,
        source: Box<SetupError>,
    },

    #[error("A batch is already running on this scheduler")]
    AlreadyRunning,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Background worker exited without finishing")]
    WorkerLost,

    #[error("Timed out waiting for completion")]
    Timeout,

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Setup ───────────────────────────────────────────
    #[error("Invalid server name: {0:?}")]
    InvalidServerName(String),

    #[error("Invalid server version: {0:?}")]
    InvalidVersion(String),

    #[error("Server does not exist: {0:?}")]
    ServerNotFound(PathBuf),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type SetupResult<T> = Result<T, SetupError>;

impl SetupError {
    /// Unwraps `Transaction` context down to the failure that caused it.
    pub fn root_cause(&self) -> &SetupError {
        let mut current = self;
        while let SetupError::Transaction { source, .. } = current {
            current = source;
        }
        current
    }
}

impl From<std::io::Error> for SetupError {
    fn from(source: std::io::Error) -> Self {
        SetupError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// Progress snapshots are handed to frontends as JSON; errors travel as text.
impl serde::Serialize for SetupError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_transaction() {
        let err = SetupError::Transaction {
            kind: TransactionKind::Copy,
            target: "a.txt".into(),
            source: Box::new(SetupError::MissingSource(PathBuf::from("a.txt"))),
        };
        assert!(matches!(err.root_cause(), SetupError::MissingSource(_)));
        assert!(err.to_string().starts_with("copy of a.txt failed"));
    }

    #[test]
    fn serializes_as_display_string() {
        let json = serde_json::to_string(&SetupError::AlreadyRunning).unwrap();
        assert_eq!(json, "\"A batch is already running on this scheduler\"");
    }
}
