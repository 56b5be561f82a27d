//! Error taxonomy for the enrichment pipeline.
//!
//! Row-level registry failures never surface through this type at the task level: the
//! registry client downgrades them into `Failed` output rows. Everything else either
//! rejects a submission up front or moves a task into its `failed` state.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed upload or missing required columns. The task is never created.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// Transport, parse or API-level error for a single registry lookup.
    #[error("registry lookup failed: {0}")]
    RegistryLookup(String),

    /// Empty result set or I/O failure while writing the results file.
    #[error("failed writing output: {0}")]
    OutputWrite(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("record store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A blocking file step panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
