//! Raw, context-keyed subject data and the machinery that publishes it.
//!
//! - `SubjectData`: immutable per-subject store; every mutator returns a new value
//! - `listener`: weakly-held cache-invalidation listeners per subject key
//! - `cache`: per-collection raw data slots with serialized swap + notify
//! - `store`: in-memory `SubjectDataStore`

pub mod cache;
pub mod listener;
pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PexError, Result};
use crate::tree::normalize_node;
use crate::types::{ContextSet, SubjectRef};

/// Data stored for one subject under one context set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEntry {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<String, i32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    /// Ordered, first match wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<SubjectRef>,
    /// `0` means unset.
    #[serde(
        default,
        rename = "permissions-default",
        skip_serializing_if = "is_zero"
    )]
    pub default_value: i32,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

static EMPTY_ENTRY: DataEntry = DataEntry {
    permissions: BTreeMap::new(),
    options: BTreeMap::new(),
    parents: Vec::new(),
    default_value: 0,
};

impl DataEntry {
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
            && self.options.is_empty()
            && self.parents.is_empty()
            && self.default_value == 0
    }

    /// Validate and canonicalize an entry read from outside the engine.
    fn normalized(self) -> Result<DataEntry> {
        let mut permissions = BTreeMap::new();
        for (node, weight) in self.permissions {
            if weight != 0 {
                permissions.insert(normalize_node(&node)?, weight);
            }
        }
        for key in self.options.keys() {
            check_option_key(key)?;
        }
        Ok(DataEntry {
            permissions,
            options: self.options,
            parents: dedup_parents(self.parents),
            default_value: self.default_value,
        })
    }
}

fn check_option_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(PexError::InvalidOption(format!("{:?}", key)));
    }
    Ok(())
}

fn dedup_parents<I: IntoIterator<Item = SubjectRef>>(parents: I) -> Vec<SubjectRef> {
    let mut out: Vec<SubjectRef> = Vec::new();
    for parent in parents {
        if !out.contains(&parent) {
            out.push(parent);
        }
    }
    out
}

/// Immutable store of one subject's permissions, options, parents and
/// default values, keyed by exact context set.
///
/// Accessors never fall back between context sets: global and `world=x`
/// are unrelated keys at this layer. Mutators leave `self` untouched and
/// return the next generation; entries that did not change are shared
/// between generations. Entries that become empty are dropped, so two
/// values compare equal exactly when their content does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectData {
    contexts: Arc<AHashMap<ContextSet, Arc<DataEntry>>>,
}

impl SubjectData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored entries, validating permission nodes and option
    /// keys. Later duplicates of a context set replace earlier ones.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (ContextSet, DataEntry)>,
    {
        let mut contexts = AHashMap::new();
        for (ctx, entry) in entries {
            let entry = entry.normalized()?;
            if entry.is_empty() {
                contexts.remove(&ctx);
            } else {
                contexts.insert(ctx, Arc::new(entry));
            }
        }
        Ok(SubjectData {
            contexts: Arc::new(contexts),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Entry for exactly `ctx`; empty when nothing is stored there.
    pub fn entry(&self, ctx: &ContextSet) -> &DataEntry {
        self.contexts
            .get(ctx)
            .map(|e| e.as_ref())
            .unwrap_or(&EMPTY_ENTRY)
    }

    /// All stored entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = (&ContextSet, &DataEntry)> {
        self.contexts.iter().map(|(ctx, e)| (ctx, e.as_ref()))
    }

    /// Context sets that hold any data.
    pub fn active_contexts(&self) -> impl Iterator<Item = &ContextSet> {
        self.contexts.keys()
    }

    fn with_entry(&self, ctx: &ContextSet, update: impl FnOnce(&mut DataEntry)) -> SubjectData {
        let current = self.entry(ctx);
        let mut entry = current.clone();
        update(&mut entry);
        if entry == *current {
            return self.clone();
        }

        let mut contexts = (*self.contexts).clone();
        if entry.is_empty() {
            contexts.remove(ctx);
        } else {
            contexts.insert(ctx.clone(), Arc::new(entry));
        }
        SubjectData {
            contexts: Arc::new(contexts),
        }
    }

    fn with_every_entry(&self, update: impl Fn(&mut DataEntry)) -> SubjectData {
        if self.contexts.is_empty() {
            return self.clone();
        }
        let mut contexts = AHashMap::with_capacity(self.contexts.len());
        for (ctx, entry) in self.contexts.iter() {
            let mut next = entry.as_ref().clone();
            update(&mut next);
            if next == **entry {
                contexts.insert(ctx.clone(), entry.clone());
            } else if !next.is_empty() {
                contexts.insert(ctx.clone(), Arc::new(next));
            }
        }
        SubjectData {
            contexts: Arc::new(contexts),
        }
    }

    /// Drop everything stored under `ctx`.
    pub fn clear_context(&self, ctx: &ContextSet) -> SubjectData {
        self.with_entry(ctx, |e| *e = DataEntry::default())
    }

    // ---- permissions -------------------------------------------------------

    pub fn permissions(&self, ctx: &ContextSet) -> &BTreeMap<String, i32> {
        &self.entry(ctx).permissions
    }

    pub fn all_permissions(&self) -> impl Iterator<Item = (&ContextSet, &BTreeMap<String, i32>)> {
        self.entries()
            .filter(|(_, e)| !e.permissions.is_empty())
            .map(|(ctx, e)| (ctx, &e.permissions))
    }

    /// Set `node` to `weight`; a weight of `0` removes the node.
    ///
    /// Nodes are stored in canonical form, so `a.*` and `a` are one key.
    pub fn set_permission(&self, ctx: &ContextSet, node: &str, weight: i32) -> Result<SubjectData> {
        let node = normalize_node(node)?;
        Ok(self.with_entry(ctx, |e| {
            if weight == 0 {
                e.permissions.remove(&node);
            } else {
                e.permissions.insert(node, weight);
            }
        }))
    }

    /// Replace every permission under `ctx`. Zero weights are dropped.
    pub fn set_permissions<I, S>(&self, ctx: &ContextSet, permissions: I) -> Result<SubjectData>
    where
        I: IntoIterator<Item = (S, i32)>,
        S: AsRef<str>,
    {
        let mut replacement = BTreeMap::new();
        for (node, weight) in permissions {
            let node = normalize_node(node.as_ref())?;
            if weight != 0 {
                replacement.insert(node, weight);
            }
        }
        Ok(self.with_entry(ctx, |e| e.permissions = replacement))
    }

    pub fn clear_permissions(&self, ctx: &ContextSet) -> SubjectData {
        self.with_entry(ctx, |e| e.permissions.clear())
    }

    pub fn clear_all_permissions(&self) -> SubjectData {
        self.with_every_entry(|e| e.permissions.clear())
    }

    // ---- options -----------------------------------------------------------

    pub fn options(&self, ctx: &ContextSet) -> &BTreeMap<String, String> {
        &self.entry(ctx).options
    }

    pub fn option(&self, ctx: &ContextSet, key: &str) -> Option<&str> {
        self.entry(ctx).options.get(key).map(String::as_str)
    }

    pub fn all_options(&self) -> impl Iterator<Item = (&ContextSet, &BTreeMap<String, String>)> {
        self.entries()
            .filter(|(_, e)| !e.options.is_empty())
            .map(|(ctx, e)| (ctx, &e.options))
    }

    /// Set `key` to `value`; `None` removes the key.
    pub fn set_option(&self, ctx: &ContextSet, key: &str, value: Option<&str>) -> Result<SubjectData> {
        check_option_key(key)?;
        Ok(self.with_entry(ctx, |e| match value {
            Some(value) => {
                e.options.insert(key.to_string(), value.to_string());
            }
            None => {
                e.options.remove(key);
            }
        }))
    }

    /// Replace every option under `ctx`.
    pub fn set_options<I, K, V>(&self, ctx: &ContextSet, options: I) -> Result<SubjectData>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut replacement = BTreeMap::new();
        for (key, value) in options {
            let key = key.into();
            check_option_key(&key)?;
            replacement.insert(key, value.into());
        }
        Ok(self.with_entry(ctx, |e| e.options = replacement))
    }

    pub fn clear_options(&self, ctx: &ContextSet) -> SubjectData {
        self.with_entry(ctx, |e| e.options.clear())
    }

    pub fn clear_all_options(&self) -> SubjectData {
        self.with_every_entry(|e| e.options.clear())
    }

    // ---- parents -----------------------------------------------------------

    pub fn parents(&self, ctx: &ContextSet) -> &[SubjectRef] {
        &self.entry(ctx).parents
    }

    pub fn all_parents(&self) -> impl Iterator<Item = (&ContextSet, &[SubjectRef])> {
        self.entries()
            .filter(|(_, e)| !e.parents.is_empty())
            .map(|(ctx, e)| (ctx, e.parents.as_slice()))
    }

    /// Insert `parent` at the front of the list, so the most recently added
    /// parent is consulted first. Adding a present parent is a no-op.
    pub fn add_parent(&self, ctx: &ContextSet, parent: SubjectRef) -> SubjectData {
        self.with_entry(ctx, |e| {
            if !e.parents.contains(&parent) {
                e.parents.insert(0, parent);
            }
        })
    }

    pub fn remove_parent(&self, ctx: &ContextSet, parent: &SubjectRef) -> SubjectData {
        self.with_entry(ctx, |e| e.parents.retain(|p| p != parent))
    }

    /// Replace the parent list under `ctx`, keeping the first of any duplicates.
    pub fn set_parents<I>(&self, ctx: &ContextSet, parents: I) -> SubjectData
    where
        I: IntoIterator<Item = SubjectRef>,
    {
        let replacement = dedup_parents(parents);
        self.with_entry(ctx, |e| e.parents = replacement)
    }

    pub fn clear_parents(&self, ctx: &ContextSet) -> SubjectData {
        self.with_entry(ctx, |e| e.parents.clear())
    }

    pub fn clear_all_parents(&self) -> SubjectData {
        self.with_every_entry(|e| e.parents.clear())
    }

    // ---- default value -----------------------------------------------------

    pub fn default_value(&self, ctx: &ContextSet) -> i32 {
        self.entry(ctx).default_value
    }

    pub fn all_default_values(&self) -> impl Iterator<Item = (&ContextSet, i32)> {
        self.entries()
            .filter(|(_, e)| e.default_value != 0)
            .map(|(ctx, e)| (ctx, e.default_value))
    }

    pub fn set_default_value(&self, ctx: &ContextSet, value: i32) -> SubjectData {
        self.with_entry(ctx, |e| e.default_value = value)
    }
}

#[derive(Serialize)]
struct ContextEntryRef<'a> {
    context: &'a ContextSet,
    #[serde(flatten)]
    entry: &'a DataEntry,
}

#[derive(Deserialize)]
struct ContextEntry {
    #[serde(default)]
    context: ContextSet,
    #[serde(flatten)]
    entry: DataEntry,
}

/// Serialized as a list of `{context, permissions, options, parents,
/// permissions-default}` sections ordered by context set.
impl Serialize for SubjectData {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut sections: Vec<ContextEntryRef<'_>> = self
            .entries()
            .map(|(context, entry)| ContextEntryRef { context, entry })
            .collect();
        sections.sort_by(|a, b| a.context.cmp(b.context));
        sections.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SubjectData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let sections = Vec::<ContextEntry>::deserialize(deserializer)?;
        SubjectData::from_entries(sections.into_iter().map(|s| (s.context, s.entry)))
            .map_err(serde::de::Error::custom)
    }
}
