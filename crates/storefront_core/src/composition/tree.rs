//! Path-addressed composition tree.
//!
//! # Responsibility
//! - Hold orderable UI contributions under dot-joined paths rooted at `page`.
//! - Produce sorted, serializable snapshots and per-region flat lists.
//!
//! # Invariants
//! - Child ids are unique under one parent; re-adding an id replaces the
//!   contribution in place and keeps its position and children.
//! - Missing path segments are created as structural nodes, never an error.
//! - Node ids never contain the path separator, so every path names exactly
//!   one node; dotted ids passed to `add`/`remove` are resolved as paths.
//! - The live tree keeps insertion order; ordering is applied to snapshots
//!   only, so repeated `build()` calls yield identical results.

use crate::composition::ordering::{order_siblings, OrderingHint};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Id of the root node and first segment of every absolute path.
pub const ROOT_ID: &str = "page";
const PATH_SEPARATOR: char = '.';

/// Component held directly by value rather than by registered name.
///
/// Allowed in the live tree, but it cannot cross a serialization boundary;
/// snapshots keep only its type name and the validator flags it.
#[derive(Clone)]
pub struct DirectComponent {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl DirectComponent {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl Debug for DirectComponent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectComponent")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// What a node renders.
#[derive(Debug, Clone)]
pub enum Contribution {
    /// Reference to a component registered under this name.
    Named(String),
    Direct(DirectComponent),
}

impl From<&str> for Contribution {
    fn from(value: &str) -> Self {
        Self::Named(value.to_string())
    }
}

impl From<String> for Contribution {
    fn from(value: String) -> Self {
        Self::Named(value)
    }
}

impl From<DirectComponent> for Contribution {
    fn from(value: DirectComponent) -> Self {
        Self::Direct(value)
    }
}

/// Serializable form of a contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentRef {
    Named { name: String },
    Direct { type_name: String },
}

impl ComponentRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named { name: name.into() }
    }

    /// Registered name, `None` for direct references.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named { name } => Some(name.as_str()),
            Self::Direct { .. } => None,
        }
    }
}

impl From<&Contribution> for ComponentRef {
    fn from(value: &Contribution) -> Self {
        match value {
            Contribution::Named(name) => Self::Named { name: name.clone() },
            Contribution::Direct(direct) => Self::Direct {
                type_name: direct.type_name().to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeIndex(usize);

#[derive(Debug)]
struct Node {
    id: String,
    path: String,
    parent: Option<NodeIndex>,
    contribution: Option<Contribution>,
    hint: OrderingHint,
    props: Option<Value>,
    meta: Option<Value>,
    children: Vec<NodeIndex>,
}

/// Mutable composition tree. Created per request/navigation.
#[derive(Debug)]
pub struct CompositionTree {
    nodes: Vec<Node>,
}

impl Default for CompositionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositionTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                id: ROOT_ID.to_string(),
                path: ROOT_ID.to_string(),
                parent: None,
                contribution: None,
                hint: OrderingHint::default(),
                props: None,
                meta: None,
                children: Vec::new(),
            }],
        }
    }

    /// Handle to the root node.
    pub fn root(&mut self) -> Slot<'_> {
        Slot {
            tree: self,
            node: NodeIndex(0),
        }
    }

    /// Resolves `path` from the root, creating missing segments.
    ///
    /// `path` may start with `page` or be relative to it.
    pub fn at(&mut self, path: &str) -> Slot<'_> {
        let node = self.resolve(NodeIndex(0), path, true);
        Slot { tree: self, node }
    }

    /// Returns whether a node exists at `path` without creating anything.
    pub fn contains(&self, path: &str) -> bool {
        self.find(NodeIndex(0), path).is_some()
    }

    /// Number of nodes in the tree, root and orphaned nodes excluded.
    pub fn len(&self) -> usize {
        self.count_reachable(NodeIndex(0)) - 1
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].children.is_empty()
    }

    /// Produces a sorted, immutable snapshot of the tree.
    pub fn build(&self) -> CompositionSnapshot {
        let mut root = self.snapshot_node(NodeIndex(0));
        let conflicts = root.sort_recursive();
        CompositionSnapshot { root, conflicts }
    }

    fn count_reachable(&self, index: NodeIndex) -> usize {
        1 + self.nodes[index.0]
            .children
            .iter()
            .map(|child| self.count_reachable(*child))
            .sum::<usize>()
    }

    fn snapshot_node(&self, index: NodeIndex) -> SnapshotNode {
        let node = &self.nodes[index.0];
        SnapshotNode {
            id: node.id.clone(),
            path: node.path.clone(),
            component: node.contribution.as_ref().map(ComponentRef::from),
            ordering_hint: node.hint.clone(),
            props: node.props.clone(),
            meta: node.meta.clone(),
            children: node
                .children
                .iter()
                .map(|child| self.snapshot_node(*child))
                .collect(),
        }
    }

    fn segments<'p>(start: NodeIndex, path: &'p str) -> (NodeIndex, Vec<&'p str>) {
        let mut parts = path
            .split(PATH_SEPARATOR)
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .peekable();
        let from = if parts.peek() == Some(&ROOT_ID) {
            parts.next();
            NodeIndex(0)
        } else {
            start
        };
        (from, parts.collect())
    }

    fn child_named(&self, parent: NodeIndex, id: &str) -> Option<NodeIndex> {
        self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|child| self.nodes[child.0].id == id)
    }

    fn find(&self, start: NodeIndex, path: &str) -> Option<NodeIndex> {
        let (mut current, segments) = Self::segments(start, path);
        for segment in segments {
            current = self.child_named(current, segment)?;
        }
        Some(current)
    }

    fn resolve(&mut self, start: NodeIndex, path: &str, create: bool) -> NodeIndex {
        let (mut current, segments) = Self::segments(start, path);
        for segment in segments {
            current = match self.child_named(current, segment) {
                Some(child) => child,
                None if create => self.push_child(current, segment, None, OrderingHint::default()),
                None => return current,
            };
        }
        current
    }

    fn push_child(
        &mut self,
        parent: NodeIndex,
        id: &str,
        contribution: Option<Contribution>,
        hint: OrderingHint,
    ) -> NodeIndex {
        let index = NodeIndex(self.nodes.len());
        let path = format!("{}{}{}", self.nodes[parent.0].path, PATH_SEPARATOR, id);
        self.nodes.push(Node {
            id: id.to_string(),
            path,
            parent: Some(parent),
            contribution,
            hint,
            props: None,
            meta: None,
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(index);
        index
    }
}

/// Handle to one node of a [`CompositionTree`].
pub struct Slot<'t> {
    tree: &'t mut CompositionTree,
    node: NodeIndex,
}

impl Slot<'_> {
    pub fn id(&self) -> &str {
        &self.tree.nodes[self.node.0].id
    }

    pub fn path(&self) -> &str {
        &self.tree.nodes[self.node.0].path
    }

    /// Resolves `path` relative to this node (or absolute when it starts
    /// with `page`), creating missing segments.
    pub fn at(&mut self, path: &str) -> Slot<'_> {
        let node = self.tree.resolve(self.node, path, true);
        Slot {
            tree: &mut *self.tree,
            node,
        }
    }

    /// Handle to the parent node; the root returns itself.
    pub fn parent(&mut self) -> Slot<'_> {
        let node = self.tree.nodes[self.node.0].parent.unwrap_or(self.node);
        Slot {
            tree: &mut *self.tree,
            node,
        }
    }

    /// Adds a child with the default ordering hint.
    pub fn add(&mut self, contribution: impl Into<Contribution>, id: &str) -> Slot<'_> {
        self.add_ordered(contribution, id, OrderingHint::default())
    }

    /// Adds a child, replacing the contribution of an existing child with the
    /// same id.
    ///
    /// A dotted id such as `a.b` is a path: `a` is resolved (or created) like
    /// [`Slot::at`] and `b` is added under it.
    pub fn add_ordered(
        &mut self,
        contribution: impl Into<Contribution>,
        id: &str,
        hint: OrderingHint,
    ) -> Slot<'_> {
        let contribution = contribution.into();
        let (parent, id) = match id.trim().rsplit_once(PATH_SEPARATOR) {
            Some((prefix, leaf)) => (self.tree.resolve(self.node, prefix, true), leaf.trim()),
            None => (self.node, id.trim()),
        };
        let node = match self.tree.child_named(parent, id) {
            Some(existing) => {
                let node = &mut self.tree.nodes[existing.0];
                node.contribution = Some(contribution);
                node.hint = hint;
                node.props = None;
                node.meta = None;
                existing
            }
            None => self.tree.push_child(parent, id, Some(contribution), hint),
        };
        Slot {
            tree: &mut *self.tree,
            node,
        }
    }

    /// Detaches the child `id` (a dotted id names a descendant). Returns
    /// whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let (parent, id) = match id.trim().rsplit_once(PATH_SEPARATOR) {
            Some((prefix, leaf)) => match self.tree.find(self.node, prefix) {
                Some(parent) => (parent, leaf.trim()),
                None => return false,
            },
            None => (self.node, id.trim()),
        };
        let Some(child) = self.tree.child_named(parent, id) else {
            return false;
        };
        self.tree.nodes[parent.0]
            .children
            .retain(|candidate| *candidate != child);
        true
    }

    pub fn set_hint(&mut self, hint: OrderingHint) -> &mut Self {
        self.tree.nodes[self.node.0].hint = hint;
        self
    }

    pub fn set_props(&mut self, props: Value) -> &mut Self {
        self.tree.nodes[self.node.0].props = Some(props);
        self
    }

    pub fn set_meta(&mut self, meta: Value) -> &mut Self {
        self.tree.nodes[self.node.0].meta = Some(meta);
        self
    }

    /// Child ids in insertion order.
    pub fn child_ids(&self) -> Vec<&str> {
        self.tree.nodes[self.node.0]
            .children
            .iter()
            .map(|child| self.tree.nodes[child.0].id.as_str())
            .collect()
    }

    pub fn contribution(&self) -> Option<&Contribution> {
        self.tree.nodes[self.node.0].contribution.as_ref()
    }
}

/// Contradictory sibling hints found while sorting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConflict {
    /// Path of the parent whose children conflict.
    pub parent: String,
    pub cycle: Vec<String>,
}

/// Immutable, sorted node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub id: String,
    pub path: String,
    pub component: Option<ComponentRef>,
    pub ordering_hint: OrderingHint,
    pub props: Option<Value>,
    pub meta: Option<Value>,
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    /// Sorts children by their hints, parent before descendants.
    ///
    /// Applying this to an already sorted node leaves the order unchanged.
    pub fn sort_recursive(&mut self) -> Vec<OrderConflict> {
        let mut conflicts = Vec::new();
        self.sort_into(&mut conflicts);
        conflicts
    }

    fn sort_into(&mut self, conflicts: &mut Vec<OrderConflict>) {
        let siblings: Vec<(&str, &OrderingHint)> = self
            .children
            .iter()
            .map(|child| (child.id.as_str(), &child.ordering_hint))
            .collect();
        let result = order_siblings(&siblings);
        if let Some(cycle) = result.conflict {
            warn!(
                "event=composition_order_conflict module=composition status=warn parent={} cycle={}",
                self.path,
                cycle.join(",")
            );
            conflicts.push(OrderConflict {
                parent: self.path.clone(),
                cycle,
            });
        }

        let mut slots: Vec<Option<SnapshotNode>> =
            std::mem::take(&mut self.children).into_iter().map(Some).collect();
        self.children = result
            .order
            .into_iter()
            .filter_map(|position| slots[position].take())
            .collect();

        for child in &mut self.children {
            child.sort_into(conflicts);
        }
    }
}

/// One entry of a flattened region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub id: String,
    pub path: String,
    pub component: ComponentRef,
    pub ordering_hint: OrderingHint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl RegionEntry {
    pub fn component_name(&self) -> Option<&str> {
        self.component.name()
    }
}

/// Region name (node path without the `page.` prefix) to ordered entries.
pub type RegionMap = BTreeMap<String, Vec<RegionEntry>>;

/// Sorted result of [`CompositionTree::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionSnapshot {
    pub root: SnapshotNode,
    pub conflicts: Vec<OrderConflict>,
}

impl CompositionSnapshot {
    /// Flattens the tree: every node with contributing children becomes a
    /// region listing those children in order. Structural children are
    /// skipped in the list but still yield their own regions.
    pub fn regions(&self) -> RegionMap {
        let mut regions = RegionMap::new();
        collect_regions(&self.root, &mut regions);
        regions
    }

    /// Looks up a node by absolute or root-relative path.
    pub fn find(&self, path: &str) -> Option<&SnapshotNode> {
        let mut current = &self.root;
        let mut segments = path
            .split(PATH_SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .peekable();
        if segments.peek() == Some(&ROOT_ID) {
            segments.next();
        }
        for segment in segments {
            current = current.children.iter().find(|child| child.id == segment)?;
        }
        Some(current)
    }
}

/// Maps a node path to its region name.
pub fn region_name(path: &str) -> &str {
    path.strip_prefix(ROOT_ID)
        .and_then(|rest| rest.strip_prefix(PATH_SEPARATOR))
        .unwrap_or(path)
}

fn collect_regions(node: &SnapshotNode, regions: &mut RegionMap) {
    let entries: Vec<RegionEntry> = node
        .children
        .iter()
        .filter_map(|child| {
            child.component.as_ref().map(|component| RegionEntry {
                id: child.id.clone(),
                path: child.path.clone(),
                component: component.clone(),
                ordering_hint: child.ordering_hint.clone(),
                props: child.props.clone(),
                meta: child.meta.clone(),
            })
        })
        .collect();
    if !entries.is_empty() {
        regions.insert(region_name(&node.path).to_string(), entries);
    }
    for child in &node.children {
        collect_regions(child, regions);
    }
}
