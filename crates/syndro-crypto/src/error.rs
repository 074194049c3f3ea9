use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("public key must be 32 bytes")]
    InvalidPublicKey,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("framed record is too short to contain a nonce and tag")]
    Malformed,
    #[error("framed record exceeds the maximum chunk size")]
    Oversized,
    #[error("authentication tag did not verify")]
    AuthenticationFailed,
    #[error("nonce space exhausted for this session, a fresh key exchange is required")]
    NonceLimitExhausted,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<&CryptoError> for syndro_types::ErrorCode {
    fn from(e: &CryptoError) -> Self {
        match e {
            CryptoError::InvalidPublicKey => syndro_types::ErrorCode::InvalidInput,
            CryptoError::EncryptionFailed => syndro_types::ErrorCode::InvalidInput,
            CryptoError::Malformed => syndro_types::ErrorCode::InvalidInput,
            CryptoError::Oversized => syndro_types::ErrorCode::FileTooLarge,
            CryptoError::AuthenticationFailed => syndro_types::ErrorCode::AuthenticationFailed,
            CryptoError::NonceLimitExhausted => syndro_types::ErrorCode::NonceLimitExhausted,
            CryptoError::Io(_) => syndro_types::ErrorCode::Network,
        }
    }
}
