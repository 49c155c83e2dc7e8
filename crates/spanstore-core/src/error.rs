use spanstore_types::{RecordId, TypeError, TypeHash};

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record is stored under the id.
    #[error("unknown record id: {0}")]
    UnknownId(RecordId),

    /// The record exists but was stored under a different schema.
    #[error("type mismatch for record {id}: expected {expected}, stored {stored}")]
    TypeMismatch {
        id: RecordId,
        expected: TypeHash,
        stored: TypeHash,
    },

    /// I/O error from the underlying medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The medium does not hold a parseable store.
    #[error("corrupt store: {0}")]
    Corrupt(String),

    /// A record payload could not be decoded.
    #[error("record codec error: {0}")]
    Codec(#[from] TypeError),

    /// The configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
