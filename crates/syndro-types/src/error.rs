use serde::{Deserialize, Serialize};

/// Stable error taxonomy shared across components, used to translate a
/// component-local error into an HTTP status code and a JSON error body
/// without coupling every crate to axum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    Unauthorized,
    NotFound,
    PathTraversal,
    HashMismatch,
    AuthenticationFailed,
    Timeout,
    Network,
    NonceLimitExhausted,
    NoWritableDirectory,
    FileTooLarge,
    BufferOverflow,
}

impl ErrorCode {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::NotFound => 404,
            ErrorCode::PathTraversal => 400,
            ErrorCode::HashMismatch => 409,
            ErrorCode::AuthenticationFailed => 409,
            ErrorCode::Timeout => 504,
            ErrorCode::Network => 502,
            ErrorCode::NonceLimitExhausted => 409,
            ErrorCode::NoWritableDirectory => 500,
            ErrorCode::FileTooLarge => 413,
            ErrorCode::BufferOverflow => 413,
        }
    }
}
