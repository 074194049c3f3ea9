use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("secret store error: {0}")]
    Store(String),
    #[error("malformed trusted-device record: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<&TrustError> for syndro_types::ErrorCode {
    fn from(_: &TrustError) -> Self {
        syndro_types::ErrorCode::InvalidInput
    }
}
