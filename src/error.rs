use thiserror::Error;

pub type ShardResult<T> = Result<T, ShardError>;

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema mismatch at {path}: {reason}")]
    SchemaMismatch { path: String, reason: String },

    #[error("Encode error at {path}: {reason}")]
    Encode { path: String, reason: String },

    #[error("Decode error at {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("Archive integrity error in {location}: {reason}")]
    ArchiveIntegrity { location: String, reason: String },

    #[error("Writer is closed")]
    WriterClosed,

    #[error("Codec error: {0}")]
    Codec(String),
}

impl ShardError {
    pub(crate) fn mismatch(path: impl ToString, reason: impl Into<String>) -> Self {
        ShardError::SchemaMismatch {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn integrity(location: impl ToString, reason: impl Into<String>) -> Self {
        ShardError::ArchiveIntegrity {
            location: location.to_string(),
            reason: reason.into(),
        }
    }
}
