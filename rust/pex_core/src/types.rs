//! Value types shared across pex_core modules.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PexError, Result};

/// Subject type used when a stored parent reference carries no type prefix.
pub const DEFAULT_PARENT_TYPE: &str = "group";

/// Collection identifiers used by the service for its well-known collections.
pub const SUBJECTS_USER: &str = "user";
pub const SUBJECTS_GROUP: &str = "group";
pub const SUBJECTS_DEFAULTS: &str = "default";
/// Identifier of the subject holding service-wide defaults.
pub const DEFAULTS_GLOBAL: &str = "global";

/// A single key/value tag, e.g. `world=nether`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Context {
    pub key: String,
    pub value: String,
}

impl Context {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Context {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Immutable set of contexts, used as a map and cache key.
///
/// Contexts are kept sorted and de-duplicated, so two sets holding the same
/// pairs compare and hash equal regardless of construction order. Cloning is
/// a reference-count bump. The empty set is the global context.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Vec<Context>", into = "Vec<Context>")]
pub struct ContextSet {
    contexts: Arc<[Context]>,
}

impl ContextSet {
    /// The global (always applicable) context set.
    pub fn global() -> Self {
        ContextSet {
            contexts: Arc::from(Vec::new()),
        }
    }

    /// Build a set from contexts. Keys must be non-empty.
    pub fn new<I: IntoIterator<Item = Context>>(contexts: I) -> Result<Self> {
        let mut contexts: Vec<Context> = contexts.into_iter().collect();
        if let Some(bad) = contexts.iter().find(|c| c.key.trim().is_empty()) {
            return Err(PexError::InvalidContext(format!(
                "empty key in context '{}'",
                bad
            )));
        }
        contexts.sort();
        contexts.dedup();
        Ok(ContextSet {
            contexts: Arc::from(contexts),
        })
    }

    /// Build a set from `(key, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(k, v)| Context::new(k, v)))
    }

    /// Set holding exactly one context.
    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        Self::new([Context::new(key, value)])
    }

    pub fn is_global(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Context> {
        self.contexts.iter()
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.contexts
            .binary_search_by(|c| (c.key.as_str(), c.value.as_str()).cmp(&(key, value)))
            .is_ok()
    }

    /// All values tagged with `key`.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.contexts
            .iter()
            .filter(move |c| c.key == key)
            .map(|c| c.value.as_str())
    }

    /// True when every context of `self` is also in `other`.
    pub fn is_subset_of(&self, other: &ContextSet) -> bool {
        self.len() <= other.len() && self.iter().all(|c| other.contains(&c.key, &c.value))
    }

    /// Set holding the contexts of both operands.
    pub fn union(&self, other: &ContextSet) -> ContextSet {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut merged: Vec<Context> = self.iter().chain(other.iter()).cloned().collect();
        merged.sort();
        merged.dedup();
        ContextSet {
            contexts: Arc::from(merged),
        }
    }
}

impl Default for ContextSet {
    fn default() -> Self {
        Self::global()
    }
}

impl TryFrom<Vec<Context>> for ContextSet {
    type Error = PexError;

    fn try_from(contexts: Vec<Context>) -> Result<Self> {
        ContextSet::new(contexts)
    }
}

impl From<ContextSet> for Vec<Context> {
    fn from(set: ContextSet) -> Self {
        set.contexts.to_vec()
    }
}

impl<'a> IntoIterator for &'a ContextSet {
    type Item = &'a Context;
    type IntoIter = std::slice::Iter<'a, Context>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            return f.write_str("global");
        }
        f.write_str("[")?;
        for (i, c) in self.contexts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", c)?;
        }
        f.write_str("]")
    }
}

/// Identity of a subject: its collection type plus identifier.
///
/// Stored parent references use the `type:identifier` form.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectRef {
    subject_type: String,
    identifier: String,
}

impl SubjectRef {
    pub fn new(subject_type: impl Into<String>, identifier: impl Into<String>) -> Result<Self> {
        let subject_type = subject_type.into();
        let identifier = identifier.into();
        if subject_type.is_empty() || subject_type.contains(':') {
            return Err(PexError::InvalidSubject(format!(
                "bad subject type {:?}",
                subject_type
            )));
        }
        if identifier.is_empty() {
            return Err(PexError::InvalidSubject(format!(
                "empty identifier for type {:?}",
                subject_type
            )));
        }
        Ok(SubjectRef {
            subject_type,
            identifier,
        })
    }

    /// Parse `type:identifier`. A bare identifier names a group.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(':') {
            Some((subject_type, identifier)) => SubjectRef::new(subject_type, identifier),
            None => SubjectRef::new(DEFAULT_PARENT_TYPE, raw),
        }
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl TryFrom<String> for SubjectRef {
    type Error = PexError;

    fn try_from(raw: String) -> Result<Self> {
        SubjectRef::parse(&raw)
    }
}

impl From<SubjectRef> for String {
    fn from(r: SubjectRef) -> Self {
        r.to_string()
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.identifier)
    }
}

/// Result of a permission query.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default)]
pub enum Tristate {
    Allow,
    Deny,
    #[default]
    Undefined,
}

impl Tristate {
    /// Map a stored weight to a tri-state: positive allows, negative denies,
    /// zero is unset.
    pub fn from_weight(weight: i32) -> Self {
        match weight.signum() {
            1 => Tristate::Allow,
            -1 => Tristate::Deny,
            _ => Tristate::Undefined,
        }
    }

    /// Undefined collapses to `false`.
    pub fn as_bool(self) -> bool {
        matches!(self, Tristate::Allow)
    }

    pub fn is_defined(self) -> bool {
        !matches!(self, Tristate::Undefined)
    }
}

impl fmt::Display for Tristate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tristate::Allow => "allow",
            Tristate::Deny => "deny",
            Tristate::Undefined => "undefined",
        })
    }
}
