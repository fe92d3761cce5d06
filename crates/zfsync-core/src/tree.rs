//! In-memory mirror of the pool/dataset/snapshot namespace.
//!
//! Nodes live in an arena owned by [`Tree`] and are addressed by [`NodeId`].
//! Children are owned through the parent's child list; the parent link is a
//! plain handle. Removed nodes stay in the arena marked dead so a stale
//! `NodeId` is reported as [`ZfsyncError::InvalidatedNode`] instead of silently
//! aliasing a newer node.
//!
//! Path grammar: `/` separates pool and dataset levels, `@` introduces the
//! snapshot suffix and appears at most once, at the end.

use crate::error::{ZfsyncError, ZfsyncResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

const POOL_SET_CONTEXT: &str = "pool set";

/// Stable handle to a node inside a [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Pool,
    Dataset,
    Snapshot,
}

impl NodeKind {
    fn label(self) -> &'static str {
        match self {
            NodeKind::Pool => "Pool",
            NodeKind::Dataset => "Dataset",
            NodeKind::Snapshot => "Snapshot",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    live: bool,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in discovery order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_snapshot(&self) -> bool {
        self.kind == NodeKind::Snapshot
    }
}

/// Forest of pools keyed by pool name.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    pools: BTreeMap<String, NodeId>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no pool is attached.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Live pools ordered by name.
    pub fn pools(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.pools.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// Resolve `id`, failing when the node was removed.
    pub fn node(&self, id: NodeId) -> ZfsyncResult<&Node> {
        let node = self
            .nodes
            .get(id.0)
            .ok_or_else(|| ZfsyncError::InvalidatedNode(format!("#{}", id.0)))?;
        if !node.live {
            return Err(ZfsyncError::InvalidatedNode(format!(
                "{} `{}`",
                node.kind.label(),
                node.name
            )));
        }
        Ok(node)
    }

    pub fn pool(&self, name: &str) -> ZfsyncResult<NodeId> {
        self.pools
            .get(name)
            .copied()
            .ok_or_else(|| ZfsyncError::not_found(name, POOL_SET_CONTEXT))
    }

    /// Attach a new root pool. The caller guarantees `name` is not already present.
    pub fn add_pool(&mut self, name: &str) -> NodeId {
        debug_assert!(
            !self.pools.contains_key(name),
            "pool `{name}` inserted twice"
        );
        let id = self.alloc(name, NodeKind::Pool, None);
        self.pools.insert(name.to_string(), id);
        id
    }

    /// Append a dataset under `parent`. The caller guarantees sibling-name uniqueness.
    pub fn add_dataset(&mut self, parent: NodeId, name: &str) -> ZfsyncResult<NodeId> {
        self.add_child(parent, name, NodeKind::Dataset)
    }

    /// Append a snapshot under `parent`. The caller guarantees sibling-name uniqueness.
    pub fn add_snapshot(&mut self, parent: NodeId, name: &str) -> ZfsyncResult<NodeId> {
        self.add_child(parent, name, NodeKind::Snapshot)
    }

    fn add_child(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> ZfsyncResult<NodeId> {
        let parent_kind = self.node(parent)?.kind;
        debug_assert!(
            parent_kind != NodeKind::Snapshot,
            "snapshots are terminal and cannot own `{name}`"
        );
        let id = self.alloc(name, kind, Some(parent));
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    fn alloc(&mut self, name: &str, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_string(),
            kind,
            parent,
            children: Vec::new(),
            live: true,
        });
        id
    }

    /// Exact match among the dataset children of `id`.
    pub fn get_child(&self, id: NodeId, name: &str) -> ZfsyncResult<NodeId> {
        self.find_child(id, name, false)?
            .ok_or_else(|| self.missing(name, id))
    }

    /// Exact match among the snapshot children of `id`.
    pub fn get_snapshot(&self, id: NodeId, name: &str) -> ZfsyncResult<NodeId> {
        self.find_child(id, name, true)?
            .ok_or_else(|| self.missing(name, id))
    }

    /// Return the dataset child `name` of `parent`, creating it when absent.
    pub fn dataset_or_insert(
        &mut self,
        parent: NodeId,
        name: &str,
    ) -> ZfsyncResult<(NodeId, bool)> {
        match self.find_child(parent, name, false)? {
            Some(id) => Ok((id, false)),
            None => Ok((self.add_dataset(parent, name)?, true)),
        }
    }

    /// Return the snapshot child `name` of `parent`, creating it when absent.
    pub fn snapshot_or_insert(
        &mut self,
        parent: NodeId,
        name: &str,
    ) -> ZfsyncResult<(NodeId, bool)> {
        match self.find_child(parent, name, true)? {
            Some(id) => Ok((id, false)),
            None => Ok((self.add_snapshot(parent, name)?, true)),
        }
    }

    fn find_child(&self, id: NodeId, name: &str, snapshot: bool) -> ZfsyncResult<Option<NodeId>> {
        let node = self.node(id)?;
        let mut matches = node.children.iter().copied().filter(|child| {
            let child = &self.nodes[child.0];
            child.is_snapshot() == snapshot && child.name == name
        });
        let found = matches.next();
        if found.is_some() && matches.next().is_some() {
            return Err(ZfsyncError::DuplicateChild {
                name: name.to_string(),
                parent: self.path(id)?,
            });
        }
        Ok(found)
    }

    fn missing(&self, name: &str, under: NodeId) -> ZfsyncError {
        let context = self
            .path(under)
            .unwrap_or_else(|_| self.nodes[under.0].name.clone());
        ZfsyncError::not_found(name, context)
    }

    /// Ordered snapshot children of `id`.
    pub fn snapshots(&self, id: NodeId) -> ZfsyncResult<Vec<NodeId>> {
        self.snapshots_matching(id, |_| true)
    }

    /// Snapshot children of `id` accepted by `filter`, in discovery order.
    pub fn snapshots_matching<F>(&self, id: NodeId, mut filter: F) -> ZfsyncResult<Vec<NodeId>>
    where
        F: FnMut(&Node) -> bool,
    {
        let node = self.node(id)?;
        Ok(node
            .children
            .iter()
            .copied()
            .filter(|child| {
                let child = &self.nodes[child.0];
                child.is_snapshot() && filter(child)
            })
            .collect())
    }

    /// Resolve `path` relative to `id`, e.g. `data/child@snap` below pool `tank`.
    pub fn lookup_from(&self, id: NodeId, path: &str) -> ZfsyncResult<NodeId> {
        let (datasets, snapshot) = split_snapshot(path);
        match datasets.split_once('/') {
            None => {
                let child = self.get_child(id, datasets)?;
                match snapshot {
                    Some(snapshot) => self.get_snapshot(child, snapshot),
                    None => Ok(child),
                }
            }
            Some((head, tail)) => {
                let child = self.get_child(id, head)?;
                match snapshot {
                    Some(snapshot) => self.lookup_from(child, &format!("{tail}@{snapshot}")),
                    None => self.lookup_from(child, tail),
                }
            }
        }
    }

    /// Resolve a full path such as `tank`, `tank/data`, or `tank/data@snap1`.
    pub fn lookup(&self, path: &str) -> ZfsyncResult<NodeId> {
        let (datasets, snapshot) = split_snapshot(path);
        let (pool_name, rest) = match datasets.split_once('/') {
            Some((pool, rest)) => (pool, Some(rest)),
            None => (datasets, None),
        };
        let pool = self.pool(pool_name)?;
        match (rest, snapshot) {
            (None, None) => Ok(pool),
            (None, Some(snapshot)) => self.get_snapshot(pool, snapshot),
            (Some(rest), None) => self.lookup_from(pool, rest),
            (Some(rest), Some(snapshot)) => self.lookup_from(pool, &format!("{rest}@{snapshot}")),
        }
    }

    /// Detach `child` from `parent` and invalidate its whole subtree.
    pub fn remove(&mut self, parent: NodeId, child: NodeId) -> ZfsyncResult<()> {
        let position = self
            .node(parent)?
            .children
            .iter()
            .position(|candidate| *candidate == child);
        let Some(position) = position else {
            let name = self
                .nodes
                .get(child.0)
                .map(|node| node.name.clone())
                .unwrap_or_else(|| format!("#{}", child.0));
            return Err(self.missing(&name, parent));
        };

        self.nodes[parent.0].children.remove(position);
        self.invalidate_subtree(child);
        Ok(())
    }

    /// Drop a pool from the forest, invalidating everything below it.
    pub fn remove_pool(&mut self, name: &str) -> ZfsyncResult<()> {
        let id = self
            .pools
            .remove(name)
            .ok_or_else(|| ZfsyncError::not_found(name, POOL_SET_CONTEXT))?;
        self.invalidate_subtree(id);
        Ok(())
    }

    fn invalidate_subtree(&mut self, root: NodeId) {
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            let node = &mut self.nodes[id.0];
            node.live = false;
            node.parent = None;
            pending.append(&mut node.children);
        }
    }

    /// Render the full path of `id`.
    pub fn path(&self, id: NodeId) -> ZfsyncResult<String> {
        let node = self.node(id)?;
        let Some(parent) = node.parent else {
            return Ok(node.name.clone());
        };
        let separator = if node.is_snapshot() { '@' } else { '/' };
        let mut rendered = self.path(parent)?;
        rendered.push(separator);
        rendered.push_str(&node.name);
        Ok(rendered)
    }

    /// The part of `path(id)` below the parent: the pool name for a pool, the
    /// last dataset component for a dataset, the text after `@` for a snapshot.
    pub fn relative_name(&self, id: NodeId) -> ZfsyncResult<&str> {
        Ok(self.node(id)?.name())
    }

    /// Pre-order traversal of every pool in name order.
    pub fn walk(&self) -> Walk<'_> {
        let mut stack: Vec<NodeId> = self.pools.values().copied().collect();
        stack.reverse();
        Walk {
            tree: self,
            stack,
            failed: false,
        }
    }

    /// Pre-order traversal of `id` and its descendants.
    pub fn walk_from(&self, id: NodeId) -> Walk<'_> {
        Walk {
            tree: self,
            stack: vec![id],
            failed: false,
        }
    }

    /// Every path in the forest, pre-order.
    pub fn paths(&self) -> ZfsyncResult<Vec<String>> {
        self.walk()
            .map(|id| id.and_then(|id| self.path(id)))
            .collect()
    }

    /// `<Kind: path>` rendering of a node.
    pub fn display(&self, id: NodeId) -> NodeDisplay<'_> {
        NodeDisplay { tree: self, id }
    }
}

/// Pre-order iterator over live nodes.
///
/// Yields an `InvalidatedNode` error, then stops, if it reaches a dead node.
pub struct Walk<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
    failed: bool,
}

impl Iterator for Walk<'_> {
    type Item = ZfsyncResult<NodeId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let id = self.stack.pop()?;
        match self.tree.node(id) {
            Ok(node) => {
                self.stack.extend(node.children.iter().rev().copied());
                Some(Ok(id))
            }
            Err(err) => {
                self.failed = true;
                self.stack.clear();
                Some(Err(err))
            }
        }
    }
}

pub struct NodeDisplay<'a> {
    tree: &'a Tree,
    id: NodeId,
}

impl fmt::Display for NodeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tree.node(self.id) {
            Ok(node) => {
                let path = self.tree.path(self.id).map_err(|_| fmt::Error)?;
                write!(f, "<{}: {}>", node.kind.label(), path)
            }
            Err(_) => write!(f, "<invalidated #{}>", self.id.0),
        }
    }
}

/// Split `path@snapshot` into its dataset path and optional snapshot name.
pub fn split_snapshot(path: &str) -> (&str, Option<&str>) {
    match path.split_once('@') {
        Some((datasets, snapshot)) => (datasets, Some(snapshot)),
        None => (path, None),
    }
}

/// Nesting depth of a path: one per `/` and one for the `@` suffix.
pub fn path_depth(path: &str) -> usize {
    path.chars().filter(|ch| matches!(ch, '/' | '@')).count()
}

/// Deepest paths first; ties keep their input order.
pub fn children_first<S: AsRef<str>>(mut paths: Vec<S>) -> Vec<S> {
    paths.sort_by_key(|path| std::cmp::Reverse(path_depth(path.as_ref())));
    paths
}

/// Shallowest paths first; ties keep their input order.
pub fn parents_first<S: AsRef<str>>(mut paths: Vec<S>) -> Vec<S> {
    paths.sort_by_key(|path| path_depth(path.as_ref()));
    paths
}
