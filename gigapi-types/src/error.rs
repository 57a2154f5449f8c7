use thiserror::Error;

/// Error kinds surfaced to ingest callers, grouped by recovery behavior
/// rather than by call site (see the propagation policy in the crate docs).
#[derive(Error, Debug, Clone)]
pub enum IngestError {
    /// Type mismatch, malformed JSON/line-protocol token, or a mask whose
    /// length doesn't match `ceil(len/8)`. Partition state is left untouched.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A store-time column type differs from the column already present in
    /// the partition's data store.
    #[error("schema conflict on column `{column}`: expected {expected}, got {got}")]
    SchemaConflict {
        column: String,
        expected: String,
        got: String,
    },

    /// Filesystem or object-store failure while writing a Parquet file.
    #[error("storage I/O error: {0}")]
    StorageIo(String),

    /// The external query engine failed to execute a merge statement.
    #[error("merge engine error: {0}")]
    MergeEngineError(String),

    /// The JSON index failed to persist its snapshot.
    #[error("index persist error: {0}")]
    IndexPersistError(String),

    /// Unrecoverable configuration/registration error (bad table name,
    /// root directory cannot be created).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        IngestError::StorageIo(e.to_string())
    }
}

impl From<object_store::Error> for IngestError {
    fn from(e: object_store::Error) -> Self {
        IngestError::StorageIo(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
