use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint not found")]
    NotFound,
    #[error("checkpoint is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<&CheckpointError> for syndro_types::ErrorCode {
    fn from(e: &CheckpointError) -> Self {
        match e {
            CheckpointError::NotFound => syndro_types::ErrorCode::NotFound,
            CheckpointError::Corrupt(_) => syndro_types::ErrorCode::InvalidInput,
            CheckpointError::Io(_) => syndro_types::ErrorCode::NoWritableDirectory,
        }
    }
}
