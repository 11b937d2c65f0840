//! `backends`: `SubjectDataStore` drivers for `pex_core`.
//!
//! - `json`: whole-document JSON file store
//! - `error`: driver errors, converted into `PexError::Store` at the seam

pub mod error;
pub mod json;

pub use error::FileStoreError;
pub use json::JsonFileStore;
