//! Persistence seam for raw subject data.

use dashmap::DashMap;

use super::SubjectData;
use crate::error::Result;
use crate::types::SubjectRef;

/// Backing store for raw subject data.
///
/// The engine calls `load` once per subject per cache generation and `save`
/// after every successful update, while holding that subject's write lock.
/// Implementations report failures as `PexError::Store`.
pub trait SubjectDataStore: Send + Sync {
    /// Stored data for `subject`, or empty data when nothing is stored.
    fn load(&self, subject: &SubjectRef) -> Result<SubjectData>;

    /// Replace the stored data for `subject`. Saving empty data unregisters it.
    fn save(&self, subject: &SubjectRef, data: &SubjectData) -> Result<()>;

    /// Whether any data is stored for `subject`.
    fn is_registered(&self, subject: &SubjectRef) -> Result<bool>;

    /// Identifiers with stored data in the collection `subject_type`.
    fn identifiers(&self, subject_type: &str) -> Result<Vec<String>>;
}

/// Volatile store. Backs the transient layer and works as a test double.
#[derive(Default)]
pub struct MemoryStore {
    subjects: DashMap<SubjectRef, SubjectData, ahash::RandomState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop whatever is stored for `subject`.
    pub fn remove(&self, subject: &SubjectRef) -> Option<SubjectData> {
        self.subjects.remove(subject).map(|(_, data)| data)
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

impl SubjectDataStore for MemoryStore {
    fn load(&self, subject: &SubjectRef) -> Result<SubjectData> {
        Ok(self
            .subjects
            .get(subject)
            .map(|d| d.value().clone())
            .unwrap_or_default())
    }

    fn save(&self, subject: &SubjectRef, data: &SubjectData) -> Result<()> {
        if data.is_empty() {
            self.subjects.remove(subject);
        } else {
            self.subjects.insert(subject.clone(), data.clone());
        }
        Ok(())
    }

    fn is_registered(&self, subject: &SubjectRef) -> Result<bool> {
        Ok(self.subjects.contains_key(subject))
    }

    fn identifiers(&self, subject_type: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .subjects
            .iter()
            .filter(|e| e.key().subject_type() == subject_type)
            .map(|e| e.key().identifier().to_string())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
