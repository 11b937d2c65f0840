//! Subjects of one type (`user`, `group`, ...), created on first use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use crate::config::PexConfig;
use crate::data::cache::DataCache;
use crate::data::store::{MemoryStore, SubjectDataStore};
use crate::error::Result;
use crate::service::ServiceInner;
use crate::subject::Subject;
use crate::types::{ContextSet, SubjectRef};

pub struct SubjectCollection {
    identifier: String,
    persistent: Arc<DataCache>,
    transient: Arc<DataCache>,
    transient_store: Arc<MemoryStore>,
    subjects: DashMap<String, Arc<Subject>, ahash::RandomState>,
    config: Arc<PexConfig>,
    epoch: Arc<AtomicU64>,
    service: Weak<ServiceInner>,
}

impl SubjectCollection {
    pub(crate) fn new(
        identifier: &str,
        store: Arc<dyn SubjectDataStore>,
        config: Arc<PexConfig>,
        epoch: Arc<AtomicU64>,
        service: Weak<ServiceInner>,
    ) -> Self {
        let transient_store = Arc::new(MemoryStore::new());
        SubjectCollection {
            identifier: identifier.to_string(),
            persistent: Arc::new(DataCache::new(identifier, store)),
            transient: Arc::new(DataCache::new(identifier, transient_store.clone())),
            transient_store,
            subjects: DashMap::with_hasher(ahash::RandomState::new()),
            config,
            epoch,
            service,
        }
    }

    /// Subject type held by this collection.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The subject named `identifier`, loading its data on first access.
    /// Subjects with no stored data are created empty.
    pub fn get(&self, identifier: &str) -> Result<Arc<Subject>> {
        if let Some(subject) = self.active(identifier) {
            return Ok(subject);
        }
        let subject_ref = SubjectRef::new(self.identifier.as_str(), identifier)?;
        self.persistent.get(identifier)?;
        self.transient.get(identifier)?;

        let subject = self
            .subjects
            .entry(identifier.to_string())
            .or_insert_with(|| {
                debug!(subject = %subject_ref, "activating subject");
                Subject::new(
                    subject_ref,
                    self.persistent.clone(),
                    self.transient.clone(),
                    self.config.clone(),
                    self.epoch.clone(),
                    self.service.clone(),
                )
            })
            .value()
            .clone();
        Ok(subject)
    }

    /// The subject named `identifier` if it is live.
    pub fn active(&self, identifier: &str) -> Option<Arc<Subject>> {
        self.subjects.get(identifier).map(|s| s.value().clone())
    }

    /// Forget the live subject and its loaded raw data, transient data
    /// included. Subjects that inherited from it are invalidated.
    pub fn uncache(&self, identifier: &str) {
        // Bakes already reading this subject's data must not be memoized.
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let removed = self.subjects.remove(identifier);
        self.persistent.invalidate(identifier);
        self.transient.invalidate(identifier);
        if let Ok(subject_ref) = SubjectRef::new(self.identifier.as_str(), identifier) {
            self.transient_store.remove(&subject_ref);
        }
        if let Some((_, subject)) = removed {
            subject.invalidate_dependents();
            debug!(subject = %subject.subject_ref(), "uncached subject");
        }
    }

    /// Whether the store holds data for `identifier`.
    pub fn has_registered(&self, identifier: &str) -> Result<bool> {
        self.persistent.is_registered(identifier)
    }

    /// Identifiers with stored data, live or not.
    pub fn all_identifiers(&self) -> Result<Vec<String>> {
        self.persistent.identifiers()
    }

    /// Every subject with stored data, activating those not yet live.
    pub fn all_subjects(&self) -> Result<Vec<Arc<Subject>>> {
        self.all_identifiers()?
            .iter()
            .map(|identifier| self.get(identifier))
            .collect()
    }

    pub fn active_subjects(&self) -> Vec<Arc<Subject>> {
        self.subjects.iter().map(|s| s.value().clone()).collect()
    }

    /// Live subjects with a defined value for `node`, with that value.
    ///
    /// Each subject is checked under `contexts` when given, otherwise under
    /// its own active contexts.
    pub fn all_with_permission(
        &self,
        contexts: Option<&ContextSet>,
        node: &str,
    ) -> Result<Vec<(SubjectRef, bool)>> {
        let mut out = Vec::new();
        for subject in self.active_subjects() {
            let tristate = match contexts {
                Some(ctx) => subject.permission(ctx, node)?,
                None => subject.active_permission(node)?,
            };
            if tristate.is_defined() {
                out.push((subject.subject_ref().clone(), tristate.as_bool()));
            }
        }
        out.sort();
        Ok(out)
    }
}
