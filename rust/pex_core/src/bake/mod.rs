//! Inheritance resolution ("baking").
//!
//! Flattens a subject's raw data, and that of every ancestor reachable
//! through its parent references, into one immutable `BakedSubjectData` for
//! a given active context set.
//!
//! Precedence, highest first:
//! - transient data over persistent data
//! - within a layer, more specific context entries over less specific ones
//! - own data over inherited data
//! - earlier parents over later parents, depth-first
//!
//! Permission precedence is per tree node: an own node shadows an inherited
//! node at the same path, while a deeper inherited node still governs its own
//! subtree.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashSet;
use tracing::{debug, warn};

use crate::data::{DataEntry, SubjectData};
use crate::error::{PexError, Result};
use crate::subject::Subject;
use crate::tree::NodeTree;
use crate::types::{ContextSet, SubjectRef, Tristate};

/// Resolves parent references to live subjects.
///
/// Returning `None` is not an error: the parent contributes nothing.
pub trait SubjectDirectory: Send + Sync {
    fn resolve(&self, subject: &SubjectRef) -> Option<Arc<Subject>>;
}

/// Snapshot of both raw data layers of one subject.
#[derive(Debug, Clone, Default)]
pub struct RawLayers {
    pub persistent: Arc<SubjectData>,
    pub transient: Arc<SubjectData>,
}

/// Effective data of one subject for one active context set.
#[derive(Debug, Clone)]
pub struct BakedSubjectData {
    contexts: ContextSet,
    permissions: NodeTree,
    default_value: i32,
    parents: Vec<SubjectRef>,
    options: BTreeMap<String, String>,
    dependencies: AHashSet<SubjectRef>,
}

impl BakedSubjectData {
    /// Context set this result was baked for.
    pub fn contexts(&self) -> &ContextSet {
        &self.contexts
    }

    pub fn permissions(&self) -> &NodeTree {
        &self.permissions
    }

    /// Fallback weight for nodes with no match; `0` when none is defined.
    pub fn default_value(&self) -> i32 {
        self.default_value
    }

    /// Every ancestor, nearest first, without duplicates.
    pub fn parents(&self) -> &[SubjectRef] {
        &self.parents
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Weight deciding `node`: the most specific matching node, else the default.
    pub fn permission_weight(&self, node: &str) -> Result<i32> {
        match self.permissions.get(node)? {
            0 => Ok(self.default_value),
            weight => Ok(weight),
        }
    }

    pub fn permission(&self, node: &str) -> Result<Tristate> {
        self.permission_weight(node).map(Tristate::from_weight)
    }

    pub fn has_permission(&self, node: &str) -> Result<bool> {
        self.permission(node).map(Tristate::as_bool)
    }

    pub fn is_child_of(&self, parent: &SubjectRef) -> bool {
        self.parents.contains(parent)
    }

    /// Whether a change to `subject` could change this result. Covers
    /// parents that were referenced but could not be resolved.
    pub fn depends_on(&self, subject: &SubjectRef) -> bool {
        self.dependencies.contains(subject)
    }
}

/// Entries of `data` that apply under `active`: the exact set first, then
/// every stored subset, larger sets before smaller ones, global last.
pub fn applicable_entries<'d>(
    data: &'d SubjectData,
    active: &ContextSet,
) -> Vec<(&'d ContextSet, &'d DataEntry)> {
    let mut entries: Vec<(&ContextSet, &DataEntry)> = data
        .entries()
        .filter(|(ctx, _)| ctx.is_subset_of(active))
        .collect();
    entries.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    entries
}

#[derive(Default)]
struct Partial {
    permissions: NodeTree,
    options: BTreeMap<String, String>,
    parents: Vec<SubjectRef>,
    default_value: i32,
}

impl Partial {
    fn push_parent(&mut self, parent: &SubjectRef) {
        if !self.parents.contains(parent) {
            self.parents.push(parent.clone());
        }
    }

    fn absorb(&mut self, inherited: Partial) {
        self.permissions.merge_underneath(&inherited.permissions);
        for (key, value) in inherited.options {
            self.options.entry(key).or_insert(value);
        }
        if self.default_value == 0 {
            self.default_value = inherited.default_value;
        }
        for parent in &inherited.parents {
            self.push_parent(parent);
        }
    }
}

struct Baker<'a> {
    directory: &'a dyn SubjectDirectory,
    contexts: &'a ContextSet,
    max_depth: u32,
    visited: AHashSet<SubjectRef>,
    dependencies: AHashSet<SubjectRef>,
}

impl Baker<'_> {
    fn visit(&mut self, subject: &SubjectRef, layers: &RawLayers, depth: u32) -> Result<Partial> {
        if depth > self.max_depth {
            return Err(PexError::InheritanceTooDeep {
                subject: subject.to_string(),
                limit: self.max_depth,
            });
        }

        let mut segments = applicable_entries(&layers.transient, self.contexts);
        segments.extend(applicable_entries(&layers.persistent, self.contexts));

        let mut partial = Partial::default();
        for (_, entry) in &segments {
            for (node, &weight) in &entry.permissions {
                partial.permissions.insert_if_absent(node, weight)?;
            }
            for (key, value) in &entry.options {
                partial
                    .options
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
            if partial.default_value == 0 {
                partial.default_value = entry.default_value;
            }
        }

        let mut direct: Vec<&SubjectRef> = Vec::new();
        for parent in segments.iter().flat_map(|(_, e)| e.parents.iter()) {
            if !direct.contains(&parent) {
                direct.push(parent);
            }
        }

        for parent in direct {
            self.dependencies.insert(parent.clone());
            // Already on this resolution: a cycle or a diamond seen earlier.
            if !self.visited.insert(parent.clone()) {
                continue;
            }
            let Some(resolved) = self.directory.resolve(parent) else {
                debug!(subject = %subject, parent = %parent, "parent not found, skipping");
                continue;
            };
            let parent_layers = match resolved.raw_layers() {
                Ok(layers) => layers,
                Err(e) => {
                    warn!(subject = %subject, parent = %parent, error = %e, "failed to load parent data");
                    continue;
                }
            };
            let inherited = self.visit(parent, &parent_layers, depth + 1)?;
            partial.push_parent(parent);
            partial.absorb(inherited);
        }
        Ok(partial)
    }
}

/// Resolve `subject` under `contexts`.
///
/// Fails only when the inheritance chain is longer than `max_depth`.
pub fn bake(
    subject: &SubjectRef,
    layers: &RawLayers,
    contexts: &ContextSet,
    directory: &dyn SubjectDirectory,
    max_depth: u32,
) -> Result<BakedSubjectData> {
    let mut baker = Baker {
        directory,
        contexts,
        max_depth,
        visited: AHashSet::new(),
        dependencies: AHashSet::new(),
    };
    baker.visited.insert(subject.clone());
    let partial = baker.visit(subject, layers, 0)?;

    Ok(BakedSubjectData {
        contexts: contexts.clone(),
        permissions: partial.permissions,
        default_value: partial.default_value,
        parents: partial.parents,
        options: partial.options,
        dependencies: baker.dependencies,
    })
}

#[cfg(test)]
mod tests;
