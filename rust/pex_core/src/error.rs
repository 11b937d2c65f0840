//! Error types for the permission engine.

use thiserror::Error;

/// Errors surfaced to callers of the engine.
///
/// Only misuse is reported here. Unknown parents, missing context entries
/// and inheritance cycles resolve to empty contributions instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PexError {
    /// Permission node string is malformed.
    #[error("invalid permission node {node:?}: {reason}")]
    InvalidPermission { node: String, reason: &'static str },

    /// Context key/value pair is malformed.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// Option key is malformed.
    #[error("invalid option key: {0}")]
    InvalidOption(String),

    /// Subject type or identifier is malformed.
    #[error("invalid subject reference: {0}")]
    InvalidSubject(String),

    /// Inheritance chain is deeper than the configured limit.
    #[error("inheritance of {subject} exceeds the depth limit of {limit}")]
    InheritanceTooDeep { subject: String, limit: u32 },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// The backing `SubjectDataStore` failed.
    #[error("store error: {0}")]
    Store(String),
}

impl From<serde_json::Error> for PexError {
    fn from(e: serde_json::Error) -> Self {
        PexError::Config(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, PexError>;
