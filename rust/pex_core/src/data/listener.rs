//! Weakly-held cache-invalidation listeners, grouped by key.
//!
//! The registry never keeps a listener alive: entries are `Weak` and are
//! pruned lazily whenever a key is touched. Registration for one key is
//! serialized through the map shard, so a listener added while a
//! notification is running is either seen by it or by the next one.

use std::hash::Hash;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;

use super::SubjectData;

/// Receives the new raw data whenever the subject it watches is updated.
pub trait CacheListener: Send + Sync {
    fn clear_cache(&self, new_data: &Arc<SubjectData>);
}

type ListenerSet = Arc<RwLock<Vec<Weak<dyn CacheListener>>>>;

fn listener_addr(listener: &Weak<dyn CacheListener>) -> *const () {
    listener.as_ptr() as *const ()
}

/// Map of key to weakly-held listeners.
pub struct ListenerRegistry<K: Eq + Hash> {
    listeners: DashMap<K, ListenerSet, ahash::RandomState>,
}

impl<K: Eq + Hash + Clone> Default for ListenerRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> ListenerRegistry<K> {
    pub fn new() -> Self {
        ListenerRegistry {
            listeners: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Register `listener` under `key`. Registering the same listener twice
    /// keeps one entry.
    pub fn add_listener<L>(&self, key: K, listener: &Arc<L>)
    where
        L: CacheListener + 'static,
    {
        let weak: Weak<dyn CacheListener> = Arc::downgrade(listener) as Weak<dyn CacheListener>;
        let target = listener_addr(&weak);

        let entry = self.listeners.entry(key).or_default();
        let mut set = entry.value().write();
        set.retain(|w| w.strong_count() > 0);
        if !set.iter().any(|w| listener_addr(w) == target) {
            set.push(weak);
        }
    }

    /// Unregister by identity. Callable from the listener's own `Drop`.
    pub fn remove_listener<L>(&self, key: &K, listener: &L)
    where
        L: CacheListener,
    {
        let target = listener as *const L as *const ();
        let Some(set) = self.listeners.get(key).map(|s| s.value().clone()) else {
            return;
        };
        set.write()
            .retain(|w| listener_addr(w) != target && w.strong_count() > 0);
        self.listeners.remove_if(key, |_, set| set.read().is_empty());
    }

    /// Call every live listener for `key` with the new data. Returns how many
    /// listeners were called.
    pub fn notify(&self, key: &K, new_data: &Arc<SubjectData>) -> usize {
        let Some(set) = self.listeners.get(key).map(|s| s.value().clone()) else {
            return 0;
        };

        let (live, saw_dead) = {
            let guard = set.read();
            let live: Vec<Arc<dyn CacheListener>> = guard.iter().filter_map(Weak::upgrade).collect();
            let saw_dead = live.len() < guard.len();
            (live, saw_dead)
        };

        // Listeners run without any registry lock held so they may register
        // or unregister themselves.
        for listener in &live {
            listener.clear_cache(new_data);
        }

        if saw_dead {
            set.write().retain(|w| w.strong_count() > 0);
        }
        live.len()
    }

    /// Live listeners registered under `key`.
    pub fn listener_count(&self, key: &K) -> usize {
        self.listeners
            .get(key)
            .map(|set| set.read().iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}
