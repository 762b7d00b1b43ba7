//! Core graph value types: nodes, relationships, node sets and paths

use crate::kinds::{EdgeKind, NodeKind};
use crate::properties::{keys, Properties};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traversal direction relative to the node being expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Follow edges pointing into the node
    Inbound,
    /// Follow edges leaving the node
    Outbound,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Inbound => Direction::Outbound,
            Direction::Outbound => Direction::Inbound,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kinds: Vec<NodeKind>,
    pub properties: Properties,
}

impl Node {
    pub fn new(id: NodeId, kinds: Vec<NodeKind>, properties: Properties) -> Self {
        Self { id, kinds, properties }
    }

    pub fn has_kind(&self, kind: NodeKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn has_any_kind(&self, kinds: &[NodeKind]) -> bool {
        kinds.iter().any(|k| self.kinds.contains(k))
    }

    /// Returns false when the kind was already present
    pub fn add_kind(&mut self, kind: NodeKind) -> bool {
        if self.has_kind(kind) {
            false
        } else {
            self.kinds.push(kind);
            true
        }
    }

    pub fn object_id(&self) -> Option<&str> {
        self.properties.get_str(keys::OBJECT_ID).ok()
    }

    pub fn domain_sid(&self) -> Option<&str> {
        self.properties.get_str(keys::DOMAIN_SID).ok()
    }

    /// Display name, falling back to the object id and then the graph id
    pub fn display_name(&self) -> String {
        self.properties
            .get_str(keys::NAME)
            .ok()
            .or_else(|| self.object_id())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("node:{}", self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub start: NodeId,
    pub end: NodeId,
    pub kind: EdgeKind,
    pub properties: Properties,
}

impl Relationship {
    /// The node on the other side of this edge from `id`
    pub fn other(&self, id: NodeId) -> NodeId {
        if self.start == id {
            self.end
        } else {
            self.start
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            start: self.start,
            end: self.end,
            kind: self.kind,
        }
    }
}

/// Identity of a derived edge independent of its storage id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub start: NodeId,
    pub end: NodeId,
    pub kind: EdgeKind,
}

/// Ordered node-identity map used for list results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSet(BTreeMap<NodeId, Node>);

impl NodeSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn add(&mut self, node: Node) {
        self.0.insert(node.id, node);
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.0.remove(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.0.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.0.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.0.keys().copied().collect()
    }

    pub fn id_set(&self) -> BTreeSet<NodeId> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.0.values()
    }

    pub fn union(&mut self, other: NodeSet) {
        self.0.extend(other.0);
    }

    /// Nodes carrying at least one of the given kinds
    pub fn containing_node_kinds(&self, kinds: &[NodeKind]) -> NodeSet {
        self.0
            .values()
            .filter(|n| n.has_any_kind(kinds))
            .cloned()
            .collect()
    }

    pub fn filter(&self, mut predicate: impl FnMut(&Node) -> bool) -> NodeSet {
        self.0.values().filter(|n| predicate(n)).cloned().collect()
    }

    /// Id-ordered page. `limit == 0` means no upper bound.
    pub fn slice(&self, skip: usize, limit: usize) -> NodeSet {
        let take = if limit == 0 { usize::MAX } else { limit };
        self.0.values().skip(skip).take(take).cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.values().map(|n| n.display_name()).collect()
    }
}

impl FromIterator<Node> for NodeSet {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        Self(iter.into_iter().map(|n| (n.id, n)).collect())
    }
}

impl IntoIterator for NodeSet {
    type Item = Node;
    type IntoIter = std::collections::btree_map::IntoValues<NodeId, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

/// One traversal result: alternating nodes and relationships, root first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub edges: Vec<Relationship>,
}

impl Path {
    pub fn from_root(root: Node) -> Self {
        Self {
            nodes: vec![root],
            edges: Vec::new(),
        }
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn terminal(&self) -> &Node {
        &self.nodes[self.nodes.len() - 1]
    }

    /// Number of hops
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Every edge touches the nodes on either side of it
    pub fn is_well_formed(&self) -> bool {
        if self.nodes.len() != self.edges.len() + 1 {
            return false;
        }
        self.edges.iter().enumerate().all(|(i, edge)| {
            let (a, b) = (self.nodes[i].id, self.nodes[i + 1].id);
            (edge.start == a && edge.end == b) || (edge.start == b && edge.end == a)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathSet(Vec<Path>);

impl PathSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, path: Path) {
        self.0.push(path);
    }

    pub fn extend(&mut self, other: PathSet) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.0.iter()
    }

    /// Every node on every path, deduplicated by identity
    pub fn all_nodes(&self) -> NodeSet {
        self.0
            .iter()
            .flat_map(|p| p.nodes.iter().cloned())
            .collect()
    }

    pub fn all_edges(&self) -> Vec<Relationship> {
        let mut seen = BTreeMap::new();
        for edge in self.0.iter().flat_map(|p| p.edges.iter()) {
            seen.entry(edge.id).or_insert_with(|| edge.clone());
        }
        seen.into_values().collect()
    }

    pub fn terminals(&self) -> NodeSet {
        self.0.iter().map(|p| p.terminal().clone()).collect()
    }

    pub fn retain(&mut self, predicate: impl FnMut(&Path) -> bool) {
        self.0.retain(predicate);
    }
}

impl FromIterator<Path> for PathSet {
    fn from_iter<I: IntoIterator<Item = Path>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
