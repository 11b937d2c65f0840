//! Permission node tree: most-specific-node-wins lookup over dot-separated nodes.
//!
//! Each tree node carries a weight (`0` = unset). A lookup walks the queried
//! path from the root and returns the weight of the deepest set node on it,
//! so `a.b` governs `a.b.c` but never `a.x`. A trailing `*` segment is
//! implied by the tree shape: `a.b.*` and `a.b` address the same node, and a
//! bare `*` addresses the root.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::error::{PexError, Result};
use crate::types::Tristate;

/// Wildcard segment.
pub const WILDCARD: &str = "*";

/// Validate a node and return its segments with any trailing wildcard dropped.
pub fn node_segments(node: &str) -> Result<Vec<&str>> {
    let invalid = |reason: &'static str| PexError::InvalidPermission {
        node: node.to_string(),
        reason,
    };

    if node.is_empty() {
        return Err(invalid("empty node"));
    }
    if node.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }

    let mut segments: Vec<&str> = node.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid("empty segment"));
    }
    if segments.last() == Some(&WILDCARD) {
        segments.pop();
    }
    if segments.iter().any(|s| s.contains('*')) {
        return Err(invalid("wildcard must be the whole final segment"));
    }
    if segments.iter().any(|s| s.contains(['{', '}'])) {
        return Err(invalid("brace alternatives are not supported"));
    }
    Ok(segments)
}

/// Canonical spelling of a node: trailing `.*` removed, bare `*` kept.
pub fn normalize_node(node: &str) -> Result<String> {
    let segments = node_segments(node)?;
    if segments.is_empty() {
        return Ok(WILDCARD.to_string());
    }
    Ok(segments.join("."))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    value: i32,
    children: AHashMap<Box<str>, Node>,
}

impl Node {
    fn child_mut(&mut self, segment: &str) -> &mut Node {
        self.children.entry(Box::from(segment)).or_default()
    }

    fn fill_from(&mut self, other: &Node) {
        if self.value == 0 {
            self.value = other.value;
        }
        for (segment, theirs) in &other.children {
            self.children
                .entry(segment.clone())
                .or_default()
                .fill_from(theirs);
        }
    }

    fn collect(&self, prefix: &mut Vec<String>, out: &mut BTreeMap<String, i32>) {
        if self.value != 0 {
            let key = if prefix.is_empty() {
                WILDCARD.to_string()
            } else {
                prefix.join(".")
            };
            out.insert(key, self.value);
        }
        for (segment, child) in &self.children {
            prefix.push(segment.to_string());
            child.collect(prefix, out);
            prefix.pop();
        }
    }
}

/// Prefix tree of permission weights.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTree {
    root: Node,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from a flat node map; zero weights are skipped.
    pub fn from_map<'a, I>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a i32)>,
    {
        let mut tree = NodeTree::new();
        for (node, &weight) in nodes {
            tree.insert(node, weight)?;
        }
        Ok(tree)
    }

    fn node_mut(&mut self, segments: &[&str]) -> &mut Node {
        let mut current = &mut self.root;
        for segment in segments {
            current = current.child_mut(segment);
        }
        current
    }

    /// Set `node` to `weight`, replacing whatever was there.
    pub fn insert(&mut self, node: &str, weight: i32) -> Result<()> {
        let segments = node_segments(node)?;
        self.node_mut(&segments).value = weight;
        Ok(())
    }

    /// Set `node` only if it is not already set. Returns whether it was set.
    pub fn insert_if_absent(&mut self, node: &str, weight: i32) -> Result<bool> {
        let segments = node_segments(node)?;
        if weight == 0 {
            return Ok(false);
        }
        let target = self.node_mut(&segments);
        if target.value != 0 {
            return Ok(false);
        }
        target.value = weight;
        Ok(true)
    }

    /// Copy every node of `other` that is unset here.
    ///
    /// Nodes already present in `self` keep their value, so `self` takes
    /// precedence at equal paths while deeper nodes of `other` still govern
    /// their own subtrees.
    pub fn merge_underneath(&mut self, other: &NodeTree) {
        self.root.fill_from(&other.root);
    }

    /// Weight of the most specific set node on the path to `node`, or `0`.
    pub fn get(&self, node: &str) -> Result<i32> {
        let segments = node_segments(node)?;
        let mut current = &self.root;
        let mut found = current.value;
        for segment in segments {
            match current.children.get(segment) {
                Some(child) => {
                    current = child;
                    if current.value != 0 {
                        found = current.value;
                    }
                }
                None => break,
            }
        }
        Ok(found)
    }

    pub fn get_tristate(&self, node: &str) -> Result<Tristate> {
        self.get(node).map(Tristate::from_weight)
    }

    /// Flat view of every set node.
    pub fn to_map(&self) -> BTreeMap<String, i32> {
        let mut out = BTreeMap::new();
        self.root.collect(&mut Vec::new(), &mut out);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.to_map().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn most_specific_node_wins() {
        let mut tree = NodeTree::new();
        tree.insert("a", -1).unwrap();
        tree.insert("a.b", 1).unwrap();

        assert_eq!(tree.get_tristate("a.b.c").unwrap(), Tristate::Allow);
        assert_eq!(tree.get_tristate("a.x").unwrap(), Tristate::Deny);
        assert_eq!(tree.get_tristate("a").unwrap(), Tristate::Deny);
        assert_eq!(tree.get_tristate("b").unwrap(), Tristate::Undefined);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut tree = NodeTree::new();
        tree.insert("a.b", 1).unwrap();
        tree.insert("a", -1).unwrap();
        assert_eq!(tree.get_tristate("a.b.c").unwrap(), Tristate::Allow);
    }

    #[test]
    fn trailing_wildcard_governs_the_prefix() {
        let mut tree = NodeTree::new();
        tree.insert("foo.*", -1).unwrap();
        assert_eq!(tree.get_tristate("foo.bar").unwrap(), Tristate::Deny);
        assert_eq!(tree.get_tristate("foo").unwrap(), Tristate::Deny);
        assert_eq!(tree.get_tristate("fo").unwrap(), Tristate::Undefined);
    }

    #[test]
    fn bare_wildcard_sets_root() {
        let mut tree = NodeTree::new();
        tree.insert("*", 1).unwrap();
        tree.insert("build.destroy", -1).unwrap();
        assert_eq!(tree.get_tristate("anything.at.all").unwrap(), Tristate::Allow);
        assert_eq!(tree.get_tristate("build.destroy.tnt").unwrap(), Tristate::Deny);
        assert_eq!(tree.to_map().get("*"), Some(&1));
    }

    #[test]
    fn malformed_nodes_rejected() {
        for bad in ["", "a..b", ".a", "a.", "a b", "a.*.b", "fo*", "a.{b,c}", "a.}"] {
            assert!(
                matches!(node_segments(bad), Err(PexError::InvalidPermission { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn normalize_drops_trailing_wildcard() {
        assert_eq!(normalize_node("permissions.*").unwrap(), "permissions");
        assert_eq!(normalize_node("*").unwrap(), "*");
        assert_eq!(normalize_node("a.b").unwrap(), "a.b");
    }

    #[test]
    fn merge_underneath_keeps_own_values() {
        let mut own = NodeTree::new();
        own.insert("x.y", 1).unwrap();
        let mut inherited = NodeTree::new();
        inherited.insert("x.y", -1).unwrap();
        inherited.insert("x.y.z", -1).unwrap();
        inherited.insert("z", 1).unwrap();

        own.merge_underneath(&inherited);
        assert_eq!(own.get("x.y").unwrap(), 1);
        assert_eq!(own.get("x.y.z").unwrap(), -1);
        assert_eq!(own.get("z").unwrap(), 1);
    }

    #[test]
    fn insert_if_absent_respects_existing() {
        let mut tree = NodeTree::new();
        assert!(tree.insert_if_absent("a", 1).unwrap());
        assert!(!tree.insert_if_absent("a.*", -1).unwrap());
        assert!(!tree.insert_if_absent("b", 0).unwrap());
        assert_eq!(tree.get("a").unwrap(), 1);
        assert_eq!(tree.get("b").unwrap(), 0);
    }

    proptest! {
        #[test]
        fn deepest_set_ancestor_decides(
            depth in 1usize..6,
            set_at in proptest::collection::vec(any::<bool>(), 6),
            weights in proptest::collection::vec(prop_oneof![Just(-1i32), Just(1i32)], 6),
        ) {
            let segments: Vec<String> = (0..depth).map(|i| format!("s{i}")).collect();
            let mut tree = NodeTree::new();
            let mut expected = 0;
            for i in 0..depth {
                if set_at[i] {
                    tree.insert(&segments[..=i].join("."), weights[i]).unwrap();
                    expected = weights[i];
                }
            }
            let query = format!("{}.leaf", segments.join("."));
            prop_assert_eq!(tree.get(&query).unwrap(), expected);
        }
    }
}
