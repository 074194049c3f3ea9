use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use syndro_types::ErrorCode;
use syndro_types::wire::ErrorBody;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("path escapes the download root")]
    PathTraversal,
    #[error("file hash did not match")]
    HashMismatch,
    #[error(transparent)]
    Crypto(#[from] syndro_crypto::CryptoError),
    #[error(transparent)]
    Store(#[from] syndro_store::FileStoreError),
    #[error(transparent)]
    Checkpoint(#[from] syndro_checkpoint::CheckpointError),
    #[error("file exceeds the maximum transfer size")]
    FileTooLarge,
    #[error("encrypted upload buffer exceeded its cap")]
    BufferOverflow,
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
}

impl TransferError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TransferError::InvalidInput(_) => ErrorCode::InvalidInput,
            TransferError::Unauthorized => ErrorCode::Unauthorized,
            TransferError::NotFound => ErrorCode::NotFound,
            TransferError::PathTraversal => ErrorCode::PathTraversal,
            TransferError::HashMismatch => ErrorCode::HashMismatch,
            TransferError::Crypto(e) => ErrorCode::from(e),
            TransferError::Store(e) => ErrorCode::from(e),
            TransferError::Checkpoint(e) => ErrorCode::from(e),
            TransferError::FileTooLarge => ErrorCode::FileTooLarge,
            TransferError::BufferOverflow => ErrorCode::BufferOverflow,
            TransferError::Network(_) => ErrorCode::Network,
            TransferError::Timeout => ErrorCode::Timeout,
        }
    }
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody { code, message: self.to_string() };
        (status, Json(body)).into_response()
    }
}
