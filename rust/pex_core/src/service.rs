//! Entry point: owns the subject collections and the context calculators.

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::bake::SubjectDirectory;
use crate::collection::SubjectCollection;
use crate::config::PexConfig;
use crate::data::store::SubjectDataStore;
use crate::error::{PexError, Result};
use crate::subject::{Subject, SubjectDataHandle};
use crate::types::{
    ContextSet, SubjectRef, DEFAULTS_GLOBAL, SUBJECTS_DEFAULTS, SUBJECTS_GROUP, SUBJECTS_USER,
};

/// Supplies the contexts a subject is currently in (world, server, ...).
pub trait ContextCalculator: Send + Sync {
    fn accumulate(&self, subject: &SubjectRef) -> ContextSet;
}

pub(crate) struct ServiceInner {
    config: Arc<PexConfig>,
    store: Arc<dyn SubjectDataStore>,
    collections: DashMap<String, Arc<SubjectCollection>, ahash::RandomState>,
    calculators: RwLock<Vec<Arc<dyn ContextCalculator>>>,
    epoch: Arc<AtomicU64>,
    this: Weak<ServiceInner>,
}

impl ServiceInner {
    fn collection(&self, subject_type: &str) -> Arc<SubjectCollection> {
        if let Some(collection) = self.collections.get(subject_type) {
            return collection.value().clone();
        }
        self.collections
            .entry(subject_type.to_string())
            .or_insert_with(|| {
                Arc::new(SubjectCollection::new(
                    subject_type,
                    self.store.clone(),
                    self.config.clone(),
                    self.epoch.clone(),
                    self.this.clone(),
                ))
            })
            .value()
            .clone()
    }

    pub(crate) fn active_contexts(&self, subject: &SubjectRef) -> ContextSet {
        let calculators: Vec<Arc<dyn ContextCalculator>> = self.calculators.read().clone();
        calculators
            .iter()
            .fold(ContextSet::global(), |acc, calc| acc.union(&calc.accumulate(subject)))
    }

    pub(crate) fn all_active_subjects(&self) -> Vec<Arc<Subject>> {
        let collections: Vec<Arc<SubjectCollection>> =
            self.collections.iter().map(|c| c.value().clone()).collect();
        collections
            .iter()
            .flat_map(|c| c.active_subjects())
            .collect()
    }
}

impl SubjectDirectory for ServiceInner {
    /// Live subjects resolve directly; others only when the store holds data
    /// for them.
    fn resolve(&self, subject: &SubjectRef) -> Option<Arc<Subject>> {
        let collection = self.collection(subject.subject_type());
        if let Some(live) = collection.active(subject.identifier()) {
            return Some(live);
        }
        let lookup = collection
            .has_registered(subject.identifier())
            .and_then(|registered| {
                if registered {
                    collection.get(subject.identifier()).map(Some)
                } else {
                    Ok(None)
                }
            });
        match lookup {
            Ok(found) => found,
            Err(e) => {
                warn!(subject = %subject, error = %e, "failed to resolve subject");
                None
            }
        }
    }
}

/// Permission service. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct PermissionService {
    inner: Arc<ServiceInner>,
}

impl PermissionService {
    pub fn new(config: PexConfig, store: Arc<dyn SubjectDataStore>) -> Result<Self> {
        config.validate()?;
        info!(
            debug = config.debug,
            baked_cache_capacity = config.baked_cache_capacity,
            max_inheritance_depth = config.max_inheritance_depth,
            "starting permission service"
        );
        let inner = Arc::new_cyclic(|this| ServiceInner {
            config: Arc::new(config),
            store,
            collections: DashMap::with_hasher(ahash::RandomState::new()),
            calculators: RwLock::new(Vec::new()),
            epoch: Arc::new(AtomicU64::new(0)),
            this: this.clone(),
        });
        Ok(PermissionService { inner })
    }

    pub fn config(&self) -> &PexConfig {
        &self.inner.config
    }

    /// Collection for `subject_type`, created on first use.
    pub fn collection(&self, subject_type: &str) -> Result<Arc<SubjectCollection>> {
        if subject_type.is_empty() || subject_type.contains(':') {
            return Err(PexError::InvalidSubject(format!(
                "bad subject type {:?}",
                subject_type
            )));
        }
        Ok(self.inner.collection(subject_type))
    }

    pub fn user_subjects(&self) -> Arc<SubjectCollection> {
        self.inner.collection(SUBJECTS_USER)
    }

    pub fn group_subjects(&self) -> Arc<SubjectCollection> {
        self.inner.collection(SUBJECTS_GROUP)
    }

    /// The `default:global` subject holding service-wide defaults.
    pub fn default_subject(&self) -> Result<Arc<Subject>> {
        self.inner.collection(SUBJECTS_DEFAULTS).get(DEFAULTS_GLOBAL)
    }

    /// Transient data of the default subject.
    pub fn default_data(&self) -> Result<SubjectDataHandle> {
        Ok(self.default_subject()?.transient_data().clone())
    }

    /// Subject types with a collection.
    pub fn known_collections(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.collections.iter().map(|c| c.key().clone()).collect();
        types.sort();
        types
    }

    /// Shorthand for `collection(type)?.get(id)`.
    pub fn subject(&self, subject: &SubjectRef) -> Result<Arc<Subject>> {
        self.inner
            .collection(subject.subject_type())
            .get(subject.identifier())
    }

    pub fn register_context_calculator(&self, calculator: Arc<dyn ContextCalculator>) {
        self.inner.calculators.write().push(calculator);
    }

    /// Union of every registered calculator's contexts for `subject`.
    pub fn active_contexts(&self, subject: &SubjectRef) -> ContextSet {
        self.inner.active_contexts(subject)
    }

    pub fn all_active_subjects(&self) -> Vec<Arc<Subject>> {
        self.inner.all_active_subjects()
    }
}

impl SubjectDirectory for PermissionService {
    fn resolve(&self, subject: &SubjectRef) -> Option<Arc<Subject>> {
        self.inner.resolve(subject)
    }
}
