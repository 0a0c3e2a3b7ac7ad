//! Error types shared across the integrity engine.
//!
//! A single enum models every failure disposition from the design's error
//! table: integrity anomalies the operator must see are carried as data
//! (see [`crate::drift::DriftOutcome`]), not as `GuardianError` — only
//! failures that mean the engine cannot make progress become errors here.

use std::path::PathBuf;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, GuardianError>;

/// Errors that stop a command from making progress.
#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    /// Filesystem I/O failure (read, write, rename, fsync, mkdir).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A protected path or snapshot target is a symlink.
    #[error("refusing symlink: {0}")]
    Symlink(PathBuf),

    /// `policy.json` failed to parse.
    #[error("invalid policy document: {0}")]
    InvalidPolicy(String),

    /// `baselines.json` failed to parse.
    #[error("invalid baseline index: {0}")]
    InvalidBaselines(String),

    /// `verify-audit` found a legacy (un-chained) log that has not been
    /// rotated yet.
    #[error("audit log is legacy (missing hash chain): {0}")]
    LegacyAudit(String),

    /// `verify-audit` found a broken hash chain.
    #[error("audit chain broken at line {line}: {detail}")]
    ChainMismatch { line: usize, detail: String },

    /// `approve`/`restore` was given a path outside the resolved target set.
    #[error("unknown or ignored file: {0}")]
    UnknownTarget(String),

    /// The live file for a target does not exist.
    #[error("missing {0}")]
    MissingFile(String),

    /// No baseline entry or approved snapshot exists for a target.
    #[error("not initialized for {0}: {1}")]
    MissingBaseline(String, String),

    /// A drift anomaly (missing file, symlink, missing baseline) that
    /// blocks an explicit `restore`, surfaced verbatim.
    #[error("{0}")]
    Anomaly(String),

    /// Nothing was selected for an `approve`/`restore` invocation.
    #[error("no files selected: {0}")]
    NoSelection(String),
}

impl GuardianError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
