use std::path::PathBuf;

use crate::doc_id::Modality;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("registry snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("no text segments or images could be extracted from {}", path.display())]
    EmptyExtraction { path: PathBuf },

    #[error(
        "{modality} index {index} exceeds the per-document capacity of {capacity}"
    )]
    CapacityExceeded {
        modality: Modality,
        index: usize,
        capacity: u64,
    },

    #[error("unsupported document type '{extension}': {}", path.display())]
    InvalidDocument { path: PathBuf, extension: String },

    #[error("query matched no documents")]
    EmptyResult,

    #[error("vector id {0} is already present in the index")]
    DuplicateId(u64),

    #[error("path is already registered: {0}")]
    AlreadyRegistered(String),

    #[error("document id space exhausted")]
    IdSpaceExhausted,

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index catalog is unreadable: {0}")]
    Corrupt(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("failed to extract {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("reconciliation pass was cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this failure concerns a single document only.
    ///
    /// The synchronizer logs and skips documents failing with one of these
    /// and keeps going; any other error aborts the pass.
    pub fn is_document_local(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::EmptyExtraction { .. }
                | Error::CapacityExceeded { .. }
                | Error::InvalidDocument { .. }
                | Error::Embedding(_)
                | Error::Extraction { .. }
        )
    }
}
