//! Nested compatibility tree.
//!
//! A [`VersionTree`] is a recursively nested, insertion-ordered map.
//! Depth 0 keys are distro versions, depth 1 runtime versions, and an
//! optional depth 2 holds extension versions; a leaf is an empty node.
//! Every root-to-leaf path is length 2 (plain runtime image) or 3
//! (extension image).
//!
//! Insertion order is load-bearing: the flattening pass walks the tree
//! in the order entries were produced, and the first image flattened
//! claims the contended aliases (`latest`, the bare distro name). A
//! sorted or hashed map here would silently reassign them.

use indexmap::IndexMap;

/// Recursively nested ordered mapping of version strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionTree(IndexMap<String, VersionTree>);

impl VersionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if this node has no children (it is a leaf).
    pub fn is_leaf(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Direct child by key.
    pub fn get(&self, key: &str) -> Option<&VersionTree> {
        self.0.get(key)
    }

    /// Insert a full path, creating intermediate nodes as needed.
    ///
    /// Inserting an already-present path is a no-op, which is how
    /// duplicate discoveries (same runtime version reported twice for
    /// one distro version) collapse.
    pub fn insert_path<I, S>(&mut self, path: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut node = self;
        for key in path {
            node = node.0.entry(key.into()).or_default();
        }
    }

    /// Direct children in insertion order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &VersionTree)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Mutable access to direct children, for pruning passes.
    pub fn children_mut(&mut self) -> impl Iterator<Item = (&str, &mut VersionTree)> {
        self.0.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Drop direct children for which `keep` returns false.
    pub fn retain_children<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.0.retain(|key, _| keep(key));
    }

    /// All root-to-leaf paths, depth first, in insertion order.
    pub fn leaf_paths(&self) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        let mut prefix = Vec::new();
        self.collect_leaf_paths(&mut prefix, &mut paths);
        paths
    }

    fn collect_leaf_paths(&self, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        if self.is_leaf() {
            if !prefix.is_empty() {
                out.push(prefix.clone());
            }
            return;
        }
        for (key, child) in self.0.iter() {
            prefix.push(key.clone());
            child.collect_leaf_paths(prefix, out);
            prefix.pop();
        }
    }
}
