use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed record in stream {key} at line {line}: {source}")]
    Parse {
        key: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Invalid stream key: {0}")]
    InvalidKey(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Record has no '{field}' identifier")]
    MissingRecordId { field: String },

    #[error("Operation for stream {0} panicked")]
    TaskPanicked(String),

    #[error("Operation chain for stream {0} stopped before the task completed")]
    ChainClosed(String),

    #[error("Stream store is shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, StreamError>;
