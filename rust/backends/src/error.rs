use std::path::PathBuf;

use pex_core::PexError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed permissions file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot serialize permissions data: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FileStoreError>;

impl From<FileStoreError> for PexError {
    fn from(e: FileStoreError) -> Self {
        PexError::Store(e.to_string())
    }
}
