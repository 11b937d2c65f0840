//! Live subjects: raw data handles plus a bounded cache of baked results.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::bake::{bake, BakedSubjectData, RawLayers, SubjectDirectory};
use crate::config::PexConfig;
use crate::data::cache::DataCache;
use crate::data::listener::CacheListener;
use crate::data::SubjectData;
use crate::error::Result;
use crate::service::ServiceInner;
use crate::types::{ContextSet, SubjectRef, Tristate};

/// One subject's raw data in one layer (persistent or transient).
///
/// Every mutator applies to the latest published data, persists it, and
/// invalidates the baked caches that could depend on it before returning.
#[derive(Clone)]
pub struct SubjectDataHandle {
    identifier: String,
    cache: Arc<DataCache>,
}

impl SubjectDataHandle {
    fn new(identifier: &str, cache: Arc<DataCache>) -> Self {
        SubjectDataHandle {
            identifier: identifier.to_string(),
            cache,
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> Result<Arc<SubjectData>> {
        self.cache.get(&self.identifier)
    }

    /// Replace the data with `update(current)`.
    pub fn update<F>(&self, update: F) -> Result<Arc<SubjectData>>
    where
        F: FnOnce(&SubjectData) -> Result<SubjectData>,
    {
        self.cache.update(&self.identifier, update)
    }

    pub fn set_permission(&self, ctx: &ContextSet, node: &str, weight: i32) -> Result<Arc<SubjectData>> {
        self.update(|d| d.set_permission(ctx, node, weight))
    }

    pub fn set_permissions<I, S>(&self, ctx: &ContextSet, permissions: I) -> Result<Arc<SubjectData>>
    where
        I: IntoIterator<Item = (S, i32)>,
        S: AsRef<str>,
    {
        self.update(|d| d.set_permissions(ctx, permissions))
    }

    pub fn clear_permissions(&self, ctx: &ContextSet) -> Result<Arc<SubjectData>> {
        self.update(|d| Ok(d.clear_permissions(ctx)))
    }

    pub fn set_option(&self, ctx: &ContextSet, key: &str, value: Option<&str>) -> Result<Arc<SubjectData>> {
        self.update(|d| d.set_option(ctx, key, value))
    }

    pub fn clear_options(&self, ctx: &ContextSet) -> Result<Arc<SubjectData>> {
        self.update(|d| Ok(d.clear_options(ctx)))
    }

    pub fn add_parent(&self, ctx: &ContextSet, parent: SubjectRef) -> Result<Arc<SubjectData>> {
        self.update(|d| Ok(d.add_parent(ctx, parent)))
    }

    pub fn remove_parent(&self, ctx: &ContextSet, parent: &SubjectRef) -> Result<Arc<SubjectData>> {
        self.update(|d| Ok(d.remove_parent(ctx, parent)))
    }

    pub fn set_parents<I>(&self, ctx: &ContextSet, parents: I) -> Result<Arc<SubjectData>>
    where
        I: IntoIterator<Item = SubjectRef>,
    {
        self.update(|d| Ok(d.set_parents(ctx, parents)))
    }

    pub fn set_default_value(&self, ctx: &ContextSet, value: i32) -> Result<Arc<SubjectData>> {
        self.update(|d| Ok(d.set_default_value(ctx, value)))
    }

    pub fn clear_context(&self, ctx: &ContextSet) -> Result<Arc<SubjectData>> {
        self.update(|d| Ok(d.clear_context(ctx)))
    }
}

/// Used once the owning service is gone: no parent resolves.
struct Detached;

impl SubjectDirectory for Detached {
    fn resolve(&self, _subject: &SubjectRef) -> Option<Arc<Subject>> {
        None
    }
}

/// A permission-bearing entity with its baked-data cache.
///
/// Queries return `Err` only for malformed input or an inheritance chain
/// deeper than the configured limit.
pub struct Subject {
    subject_ref: SubjectRef,
    data: SubjectDataHandle,
    transient_data: SubjectDataHandle,
    baked: Mutex<LruCache<ContextSet, Arc<BakedSubjectData>>>,
    config: Arc<PexConfig>,
    epoch: Arc<AtomicU64>,
    service: Weak<ServiceInner>,
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("subject", &self.subject_ref)
            .field("cached_contexts", &self.baked.lock().len())
            .finish()
    }
}

impl Subject {
    pub(crate) fn new(
        subject_ref: SubjectRef,
        persistent: Arc<DataCache>,
        transient: Arc<DataCache>,
        config: Arc<PexConfig>,
        epoch: Arc<AtomicU64>,
        service: Weak<ServiceInner>,
    ) -> Arc<Subject> {
        let capacity =
            NonZeroUsize::new(config.baked_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let identifier = subject_ref.identifier().to_string();
        let subject = Arc::new(Subject {
            data: SubjectDataHandle::new(&identifier, persistent.clone()),
            transient_data: SubjectDataHandle::new(&identifier, transient.clone()),
            subject_ref,
            baked: Mutex::new(LruCache::new(capacity)),
            config,
            epoch,
            service,
        });
        persistent.add_listener(&identifier, &subject);
        transient.add_listener(&identifier, &subject);
        subject
    }

    pub fn subject_ref(&self) -> &SubjectRef {
        &self.subject_ref
    }

    pub fn identifier(&self) -> &str {
        self.subject_ref.identifier()
    }

    pub fn subject_type(&self) -> &str {
        self.subject_ref.subject_type()
    }

    /// Data persisted through the collection's store.
    pub fn data(&self) -> &SubjectDataHandle {
        &self.data
    }

    /// Data held in memory only; it outranks persistent data.
    pub fn transient_data(&self) -> &SubjectDataHandle {
        &self.transient_data
    }

    pub fn raw_layers(&self) -> Result<RawLayers> {
        Ok(RawLayers {
            persistent: self.data.get()?,
            transient: self.transient_data.get()?,
        })
    }

    /// Baked data for `contexts`, computed on first use and memoized.
    pub fn baked(&self, contexts: &ContextSet) -> Result<Arc<BakedSubjectData>> {
        if let Some(hit) = self.baked.lock().get(contexts).cloned() {
            return Ok(hit);
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        let layers = self.raw_layers()?;
        let max_depth = self.config.max_inheritance_depth;
        let baked = match self.service.upgrade() {
            Some(service) => bake(&self.subject_ref, &layers, contexts, service.as_ref(), max_depth)?,
            None => bake(&self.subject_ref, &layers, contexts, &Detached, max_depth)?,
        };
        let baked = Arc::new(baked);

        let mut cache = self.baked.lock();
        // A mutation published while baking may not be reflected; hand the
        // result back without memoizing it.
        if self.epoch.load(Ordering::Acquire) == epoch {
            cache.put(contexts.clone(), baked.clone());
        }
        debug!(
            subject = %self.subject_ref,
            contexts = %contexts,
            parents = baked.parents().len(),
            "baked subject data"
        );
        Ok(baked)
    }

    /// Drop every memoized bake of this subject.
    pub fn invalidate_cache(&self) {
        self.baked.lock().clear();
    }

    /// Number of memoized context sets.
    pub fn cached_context_count(&self) -> usize {
        self.baked.lock().len()
    }

    /// Whether any memoized bake of this subject drew on `subject`.
    pub fn depends_on(&self, subject: &SubjectRef) -> bool {
        self.baked.lock().iter().any(|(_, b)| b.depends_on(subject))
    }

    /// Invalidate every live subject whose memoized bakes drew on this one.
    pub(crate) fn invalidate_dependents(&self) {
        let Some(service) = self.service.upgrade() else {
            return;
        };
        let mut invalidated = 0usize;
        for other in service.all_active_subjects() {
            if other.subject_ref != self.subject_ref && other.depends_on(&self.subject_ref) {
                other.invalidate_cache();
                invalidated += 1;
            }
        }
        if invalidated > 0 {
            debug!(subject = %self.subject_ref, invalidated, "invalidated dependent subjects");
        }
    }

    fn log_check(&self, check: &str, contexts: &ContextSet, key: &str, result: &dyn fmt::Display) {
        if self.config.debug {
            info!(subject = %self.subject_ref, contexts = %contexts, key, result = %result, "{check} check");
        } else {
            trace!(subject = %self.subject_ref, contexts = %contexts, key, result = %result, "{check} check");
        }
    }

    // ---- queries under an explicit context set -------------------------------

    /// Deciding weight for `node`, `0` when undefined.
    pub fn permission_value(&self, contexts: &ContextSet, node: &str) -> Result<i32> {
        let weight = self.baked(contexts)?.permission_weight(node)?;
        self.log_check("permission", contexts, node, &weight);
        Ok(weight)
    }

    pub fn permission(&self, contexts: &ContextSet, node: &str) -> Result<Tristate> {
        self.permission_value(contexts, node).map(Tristate::from_weight)
    }

    pub fn has_permission(&self, contexts: &ContextSet, node: &str) -> Result<bool> {
        self.permission(contexts, node).map(Tristate::as_bool)
    }

    pub fn option(&self, contexts: &ContextSet, key: &str) -> Result<Option<String>> {
        let value = self.baked(contexts)?.option(key).map(str::to_string);
        self.log_check("option", contexts, key, &value.as_deref().unwrap_or("<none>"));
        Ok(value)
    }

    pub fn options(&self, contexts: &ContextSet) -> Result<BTreeMap<String, String>> {
        Ok(self.baked(contexts)?.options().clone())
    }

    /// Every ancestor, nearest first.
    pub fn parents(&self, contexts: &ContextSet) -> Result<Vec<SubjectRef>> {
        let parents = self.baked(contexts)?.parents().to_vec();
        self.log_check("parents", contexts, "", &parents.len());
        Ok(parents)
    }

    pub fn is_child_of(&self, contexts: &ContextSet, parent: &SubjectRef) -> Result<bool> {
        let result = self.baked(contexts)?.is_child_of(parent);
        self.log_check("parent", contexts, &parent.to_string(), &result);
        Ok(result)
    }

    // ---- queries under the calculated active contexts ------------------------

    /// Union of every registered calculator's contexts for this subject.
    pub fn active_contexts(&self) -> ContextSet {
        self.service
            .upgrade()
            .map(|s| s.active_contexts(&self.subject_ref))
            .unwrap_or_default()
    }

    pub fn active_permission(&self, node: &str) -> Result<Tristate> {
        self.permission(&self.active_contexts(), node)
    }

    pub fn has_active_permission(&self, node: &str) -> Result<bool> {
        self.has_permission(&self.active_contexts(), node)
    }

    pub fn active_option(&self, key: &str) -> Result<Option<String>> {
        self.option(&self.active_contexts(), key)
    }

    pub fn active_parents(&self) -> Result<Vec<SubjectRef>> {
        self.parents(&self.active_contexts())
    }

    pub fn is_active_child_of(&self, parent: &SubjectRef) -> Result<bool> {
        self.is_child_of(&self.active_contexts(), parent)
    }
}

impl CacheListener for Subject {
    fn clear_cache(&self, _new_data: &Arc<SubjectData>) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.invalidate_cache();
        self.invalidate_dependents();
    }
}

impl Drop for Subject {
    fn drop(&mut self) {
        let identifier = self.subject_ref.identifier();
        self.data.cache.remove_listener(identifier, &*self);
        self.transient_data.cache.remove_listener(identifier, &*self);
    }
}
