//! Typed error hierarchy for the task board.
//!
//! Three top-level enums cover the three layers:
//! - `DragError`: reasons a drag gesture was ignored (never fatal)
//! - `PersistenceError`: task list storage failures
//! - `BoardError`: board session and API failures

use thiserror::Error;

/// Why the drag controller ignored an event.
///
/// These are reported, not raised: every variant leaves the task store
/// untouched and the board stays interactive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DragError {
    #[error("Unknown id '{id}'")]
    UnknownId { id: String },

    #[error("Drop target '{target}' is neither a task nor a column")]
    InvalidTarget { target: String },

    #[error("A drag session for task '{active}' is already open")]
    SessionActive { active: String },

    #[error("No drag session is open")]
    NoSession,
}

/// Errors from a persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The stored file changed since the version the caller last read.
    #[error("Task list was modified concurrently (expected version {expected})")]
    Conflict { expected: String },

    #[error("Remote store returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Failed to decode task list: {0}")]
    Decode(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the board session and the operations layered on it.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Task {id} not found")]
    TaskNotFound { id: String },

    #[error("Unknown column '{column}'")]
    UnknownColumn { column: String },

    #[error("Failed to commit task {task_id}: {source}")]
    CommitFailure {
        task_id: String,
        #[source]
        source: PersistenceError,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
