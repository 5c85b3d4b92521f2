//! Error types for fleet operations
//!
//! This module defines the error conditions raised by the resource pool,
//! the worker supervisor and the persisted stores. Per-URL work failures
//! are NOT errors in this sense: they are recorded into the retry ledger
//! as [`FailureReason`](crate::retry_ledger::FailureReason) values and
//! never propagate upward.

use std::path::PathBuf;

/// Errors raised by the browser pool
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Launching a new browser session failed.
    ///
    /// Creation is never retried internally; the caller owns retry policy.
    #[error("Failed to create browser session: {0}")]
    CreationFailed(String),

    /// The pool stayed at capacity for the whole acquire timeout
    #[error("Resource pool exhausted: no handle became available within {waited_secs}s (max {max})")]
    Exhausted { waited_secs: u64, max: usize },

    /// A handle failed its health probe and was removed from the pool
    #[error("Browser session {id} evicted: {reason}")]
    Evicted { id: u64, reason: String },

    /// Page sub-pool error on a specific browser
    #[error("Page allocation failed on browser {browser_id}: {reason}")]
    PageFailed { browser_id: u64, reason: String },
}

/// Errors raised by the worker supervisor
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Spawning the worker process failed
    #[error("Failed to spawn worker for group '{group}': {reason}")]
    SpawnFailed { group: String, reason: String },

    /// The group exceeded its restart cap and requires manual intervention
    #[error("Worker group '{group}' disabled after {restarts} restarts")]
    Disabled { group: String, restarts: u32 },

    /// Referenced group is not tracked by the supervisor
    #[error("Unknown worker group '{0}'")]
    UnknownGroup(String),
}

/// Errors raised by the persisted stores (run records, retry ledger)
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Persisted state exists but cannot be parsed.
    ///
    /// This is startup-fatal: proceeding with empty state would mask data
    /// loss and cause mass re-processing of completed work.
    #[error("Corrupted state file {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// Filesystem error reading or writing a store
    #[error("Store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
