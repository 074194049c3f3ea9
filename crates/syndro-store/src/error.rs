use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("file name is empty")]
    EmptyName,
    #[error("file name contains a null byte")]
    NullByteInName,
    #[error("resolved path escapes the download root")]
    PathTraversal,
    #[error("path not found")]
    NotFound,
    #[error("file too large to read directly")]
    TooLargeForDirectRead,
    #[error("no writable download directory available")]
    NoWritableDirectory,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<&FileStoreError> for syndro_types::ErrorCode {
    fn from(e: &FileStoreError) -> Self {
        match e {
            FileStoreError::EmptyName
            | FileStoreError::NullByteInName
            | FileStoreError::TooLargeForDirectRead => syndro_types::ErrorCode::InvalidInput,
            FileStoreError::PathTraversal => syndro_types::ErrorCode::PathTraversal,
            FileStoreError::NotFound => syndro_types::ErrorCode::NotFound,
            FileStoreError::NoWritableDirectory => syndro_types::ErrorCode::NoWritableDirectory,
            FileStoreError::Io(_) => syndro_types::ErrorCode::NoWritableDirectory,
        }
    }
}
