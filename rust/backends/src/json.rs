//! JSON file store.
//!
//! The whole file is one document:
//!
//! ```json
//! {
//!   "group": {
//!     "admins": [
//!       { "context": [], "permissions": { "*": 1 }, "options": { "prefix": "[A]" } }
//!     ]
//!   },
//!   "user": {
//!     "alice": [
//!       { "context": [{ "key": "world", "value": "nether" }], "parents": ["group:admins"] }
//!     ]
//!   }
//! }
//! ```
//!
//! The document is held in memory and rewritten atomically (temp file in the
//! same directory, then rename) on every save.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use pex_core::{SubjectData, SubjectDataStore, SubjectRef};
use tracing::{debug, info};

use crate::error::{FileStoreError, Result};

type Document = BTreeMap<String, BTreeMap<String, SubjectData>>;

pub struct JsonFileStore {
    path: PathBuf,
    document: RwLock<Document>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store; it is
    /// created on the first save.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = read_document(&path)?;
        info!(
            path = %path.display(),
            subject_types = document.len(),
            "opened JSON permissions file"
        );
        Ok(JsonFileStore {
            path,
            document: RwLock::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, discarding the in-memory document.
    ///
    /// Caches built on top of this store keep their loaded data until they
    /// are invalidated.
    pub fn reload(&self) -> Result<()> {
        let document = read_document(&self.path)?;
        *self.document.write() = document;
        info!(path = %self.path.display(), "reloaded JSON permissions file");
        Ok(())
    }

    fn write_document(&self, document: &Document) -> Result<()> {
        let io_err = |source| FileStoreError::Io {
            path: self.path.clone(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(document)?;
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        temp.write_all(&bytes).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    fn save_subject(&self, subject: &SubjectRef, data: &SubjectData) -> Result<()> {
        let mut document = self.document.write();
        let mut next = document.clone();
        let collection = next.entry(subject.subject_type().to_string()).or_default();
        if data.is_empty() {
            collection.remove(subject.identifier());
            if collection.is_empty() {
                next.remove(subject.subject_type());
            }
        } else {
            collection.insert(subject.identifier().to_string(), data.clone());
        }

        // Memory changes only once the file is written.
        self.write_document(&next)?;
        *document = next;
        debug!(subject = %subject, path = %self.path.display(), "saved subject data");
        Ok(())
    }
}

fn read_document(path: &Path) -> Result<Document> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
        Err(source) => {
            return Err(FileStoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(Document::new());
    }
    serde_json::from_str(&raw).map_err(|source| FileStoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

impl SubjectDataStore for JsonFileStore {
    fn load(&self, subject: &SubjectRef) -> pex_core::Result<SubjectData> {
        Ok(self
            .document
            .read()
            .get(subject.subject_type())
            .and_then(|c| c.get(subject.identifier()))
            .cloned()
            .unwrap_or_default())
    }

    fn save(&self, subject: &SubjectRef, data: &SubjectData) -> pex_core::Result<()> {
        Ok(self.save_subject(subject, data)?)
    }

    fn is_registered(&self, subject: &SubjectRef) -> pex_core::Result<bool> {
        Ok(self
            .document
            .read()
            .get(subject.subject_type())
            .is_some_and(|c| c.contains_key(subject.identifier())))
    }

    fn identifiers(&self, subject_type: &str) -> pex_core::Result<Vec<String>> {
        Ok(self
            .document
            .read()
            .get(subject_type)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }
}
