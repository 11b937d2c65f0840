//! Published raw data for every subject of one collection layer.
//!
//! Each identifier owns a slot holding the current `SubjectData` behind an
//! `ArcSwap`. Readers load the snapshot without locking. Writers for one
//! identifier serialize on the slot's mutex: apply the update to the latest
//! snapshot, persist it, publish it, and only then notify listeners, outside
//! the lock. Listeners therefore never observe a generation older than the
//! one they are told about.
//!
//! Invalidation waits for the slot's writer and retires the slot; writers
//! that find their slot retired move to a freshly loaded one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::listener::{CacheListener, ListenerRegistry};
use super::store::SubjectDataStore;
use super::SubjectData;
use crate::error::Result;
use crate::types::SubjectRef;

struct Slot {
    data: ArcSwap<SubjectData>,
    /// Held by writers; `true` once the slot has been invalidated.
    write_lock: Mutex<bool>,
}

impl Slot {
    fn new(data: SubjectData) -> Self {
        Slot {
            data: ArcSwap::from_pointee(data),
            write_lock: Mutex::new(false),
        }
    }
}

/// Lazily-loaded raw data for one collection, backed by a `SubjectDataStore`.
pub struct DataCache {
    subject_type: String,
    store: Arc<dyn SubjectDataStore>,
    slots: DashMap<String, Arc<Slot>, ahash::RandomState>,
    /// Bumped by every invalidation.
    generation: AtomicU64,
    listeners: ListenerRegistry<String>,
}

impl DataCache {
    pub fn new(subject_type: impl Into<String>, store: Arc<dyn SubjectDataStore>) -> Self {
        DataCache {
            subject_type: subject_type.into(),
            store,
            slots: DashMap::with_hasher(ahash::RandomState::new()),
            generation: AtomicU64::new(0),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    fn subject_ref(&self, identifier: &str) -> Result<SubjectRef> {
        SubjectRef::new(self.subject_type.as_str(), identifier)
    }

    fn slot(&self, identifier: &str) -> Result<Arc<Slot>> {
        let subject = self.subject_ref(identifier)?;
        loop {
            if let Some(slot) = self.slots.get(identifier) {
                return Ok(slot.value().clone());
            }
            // Load outside the shard lock; a racing loader's slot wins.
            let generation = self.generation.load(Ordering::Acquire);
            let loaded = self.store.load(&subject)?;
            match self.slots.entry(identifier.to_string()) {
                Entry::Occupied(slot) => return Ok(slot.get().clone()),
                Entry::Vacant(vacant) => {
                    // An invalidation during the load may have retired a
                    // writer whose save the load did not see.
                    if self.generation.load(Ordering::Acquire) != generation {
                        continue;
                    }
                    trace!(
                        subject_type = %self.subject_type,
                        identifier,
                        contexts = loaded.active_contexts().count(),
                        "loaded subject data"
                    );
                    return Ok(vacant.insert(Arc::new(Slot::new(loaded))).value().clone());
                }
            }
        }
    }

    /// Current snapshot for `identifier`, loading it on first access.
    pub fn get(&self, identifier: &str) -> Result<Arc<SubjectData>> {
        Ok(self.slot(identifier)?.data.load_full())
    }

    /// Apply `update` to the latest snapshot and publish the result.
    ///
    /// Concurrent updates to one identifier are applied one after another,
    /// each to its predecessor's output. If `update` or the store fails,
    /// nothing is published. An update that yields equal data is neither
    /// saved nor announced.
    pub fn update<F>(&self, identifier: &str, update: F) -> Result<Arc<SubjectData>>
    where
        F: FnOnce(&SubjectData) -> Result<SubjectData>,
    {
        let subject = self.subject_ref(identifier)?;
        let published = loop {
            let slot = self.slot(identifier)?;
            let retired = slot.write_lock.lock();
            if *retired {
                continue;
            }
            let current = slot.data.load_full();
            let next = update(&current)?;
            if next == *current {
                return Ok(current);
            }
            self.store.save(&subject, &next)?;
            let next = Arc::new(next);
            slot.data.store(next.clone());
            break next;
        };

        let notified = self.listeners.notify(&identifier.to_string(), &published);
        debug!(subject = %subject, listeners = notified, "published subject data");
        Ok(published)
    }

    /// Forget the published snapshot; the next access reloads from the store.
    ///
    /// Waits for an update in progress on `identifier` to finish saving.
    pub fn invalidate(&self, identifier: &str) {
        let Some(slot) = self.slots.get(identifier).map(|s| s.value().clone()) else {
            return;
        };
        let mut retired = slot.write_lock.lock();
        *retired = true;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.slots
            .remove_if(identifier, |_, current| Arc::ptr_eq(current, &slot));
    }

    pub fn is_loaded(&self, identifier: &str) -> bool {
        self.slots.contains_key(identifier)
    }

    /// Whether the backing store holds data for `identifier`.
    pub fn is_registered(&self, identifier: &str) -> Result<bool> {
        self.store.is_registered(&self.subject_ref(identifier)?)
    }

    /// Identifiers with stored data.
    pub fn identifiers(&self) -> Result<Vec<String>> {
        self.store.identifiers(&self.subject_type)
    }

    pub fn add_listener<L>(&self, identifier: &str, listener: &Arc<L>)
    where
        L: CacheListener + 'static,
    {
        self.listeners.add_listener(identifier.to_string(), listener);
    }

    pub fn remove_listener<L: CacheListener>(&self, identifier: &str, listener: &L) {
        self.listeners
            .remove_listener(&identifier.to_string(), listener);
    }

    pub fn listener_count(&self, identifier: &str) -> usize {
        self.listeners.listener_count(&identifier.to_string())
    }
}
