//! Error types for the ledger service.

use thiserror::Error;

use crate::records::Collection;

/// Field the caller must supply before a transition can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredInput {
    /// A non-empty storage location (存放地点).
    StorageLocation,
}

impl RequiredInput {
    pub fn field(&self) -> &'static str {
        match self {
            RequiredInput::StorageLocation => crate::records::fields::STORAGE_LOCATION,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading or writing errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Path resolves outside the permitted root
    #[error("Forbidden path: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transition from {from} to {to} is not allowed")]
    InvalidTransition { from: String, to: String },

    /// Required user input was not supplied; nothing was changed
    #[error("Missing required input: {}", .0.field())]
    MissingInput(RequiredInput),

    /// The caller's view of a collection is stale
    #[error("Revision conflict on {collection}: expected {expected}, current {current}")]
    Conflict {
        collection: Collection,
        expected: u64,
        current: u64,
    },

    /// One or more files of a multi-file write failed
    #[error("Save failed for {files}: {reason}")]
    SaveFailed { files: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, Error>;
