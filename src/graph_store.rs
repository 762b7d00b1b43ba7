//! Transactional property-graph store
//!
//! The analysis code only talks to the [`Transaction`], [`WriteTransaction`]
//! and [`GraphDatabase`] traits. [`MemoryGraph`] is the in-process
//! implementation: every committed write publishes a new immutable snapshot,
//! so a reader holding a snapshot sees either the whole previous state or the
//! whole new one, never a partially reconciled graph.

use crate::errors::{AnalysisError, Result};
use crate::graph_types::{Direction, Node, NodeId, Relationship, RelationshipId};
use crate::kinds::{EdgeKind, NodeKind};
use crate::properties::Properties;
use crate::query::Criteria;
use im::{OrdMap, OrdSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path as FsPath;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Read operations available inside any transaction
pub trait Transaction {
    fn node(&self, id: NodeId) -> Result<Node>;

    /// Matching nodes ordered by id. `limit == 0` means unbounded.
    fn nodes(&self, criteria: &Criteria, skip: usize, limit: usize) -> Result<Vec<Node>>;

    fn count_nodes(&self, criteria: &Criteria) -> Result<usize>;

    fn relationship(&self, id: RelationshipId) -> Result<Relationship>;

    /// Matching relationships ordered by id. `limit == 0` means unbounded.
    fn relationships(&self, criteria: &Criteria, skip: usize, limit: usize) -> Result<Vec<Relationship>>;

    fn count_relationships(&self, criteria: &Criteria) -> Result<usize>;

    /// Edges adjacent to `id` in `direction` that match `criteria`, each paired
    /// with the node on the far side. Ordered by relationship id.
    fn expand(&self, id: NodeId, direction: Direction, criteria: &Criteria) -> Result<Vec<(Relationship, Node)>>;
}

/// Mutations, applied atomically on commit
pub trait WriteTransaction: Transaction {
    fn create_node(&mut self, kinds: Vec<NodeKind>, properties: Properties) -> Result<Node>;
    fn update_node(&mut self, node: &Node) -> Result<()>;
    /// Deletes the node and every attached relationship
    fn delete_node(&mut self, id: NodeId) -> Result<()>;
    fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        kind: EdgeKind,
        properties: Properties,
    ) -> Result<Relationship>;
    fn update_relationship(&mut self, rel: &Relationship) -> Result<()>;
    fn delete_relationship(&mut self, id: RelationshipId) -> Result<()>;
}

pub trait GraphDatabase: Send + Sync {
    /// Owned, immutable read view that can be moved into worker tasks
    type Snapshot: Transaction + Clone + Send + Sync + 'static;

    fn snapshot(&self) -> Result<Self::Snapshot>;

    fn read_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self::Snapshot) -> Result<T>,
    {
        let snapshot = self.snapshot()?;
        f(&snapshot)
    }

    /// Runs `f` against a private copy of the graph and publishes it only if
    /// `f` succeeds. Writers are serialized.
    fn write_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn WriteTransaction) -> Result<T>;
}

// ==========================================
// In-memory implementation
// ==========================================

#[derive(Debug, Clone, Default)]
pub struct GraphState {
    nodes: OrdMap<NodeId, Node>,
    relationships: OrdMap<RelationshipId, Relationship>,
    outbound: OrdMap<NodeId, OrdSet<RelationshipId>>,
    inbound: OrdMap<NodeId, OrdSet<RelationshipId>>,
    node_kinds: OrdMap<NodeKind, OrdSet<NodeId>>,
    edge_kinds: OrdMap<EdgeKind, OrdSet<RelationshipId>>,
    next_node_id: u64,
    next_relationship_id: u64,
}

fn page<T>(items: impl Iterator<Item = T>, skip: usize, limit: usize) -> Vec<T> {
    let take = if limit == 0 { usize::MAX } else { limit };
    items.skip(skip).take(take).collect()
}

impl GraphState {
    fn node_ref(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| AnalysisError::NotFound(format!("node {}", id)))
    }

    fn relationship_ref(&self, id: RelationshipId) -> Result<&Relationship> {
        self.relationships
            .get(&id)
            .ok_or_else(|| AnalysisError::NotFound(format!("relationship {}", id)))
    }

    fn candidate_nodes(&self, criteria: &Criteria) -> Vec<NodeId> {
        match criteria.node_kind_hint() {
            Some(kinds) => {
                let mut ids = BTreeSet::new();
                for kind in kinds {
                    if let Some(set) = self.node_kinds.get(kind) {
                        ids.extend(set.iter().copied());
                    }
                }
                ids.into_iter().collect()
            }
            None => self.nodes.keys().copied().collect(),
        }
    }

    fn candidate_relationships(&self, criteria: &Criteria) -> Vec<RelationshipId> {
        match criteria.edge_kind_hint() {
            Some(kinds) => {
                let mut ids = BTreeSet::new();
                for kind in kinds {
                    if let Some(set) = self.edge_kinds.get(kind) {
                        ids.extend(set.iter().copied());
                    }
                }
                ids.into_iter().collect()
            }
            None => self.relationships.keys().copied().collect(),
        }
    }

    fn matching_nodes(&self, criteria: &Criteria) -> Result<Vec<&Node>> {
        let mut matched = Vec::new();
        for id in self.candidate_nodes(criteria) {
            let node = self.node_ref(id)?;
            if criteria.matches_node(node)? {
                matched.push(node);
            }
        }
        Ok(matched)
    }

    fn matching_relationships(&self, criteria: &Criteria) -> Result<Vec<&Relationship>> {
        let mut matched = Vec::new();
        for id in self.candidate_relationships(criteria) {
            let rel = self.relationship_ref(id)?;
            let start = self.node_ref(rel.start)?;
            let end = self.node_ref(rel.end)?;
            if criteria.matches_relationship(start, rel, end)? {
                matched.push(rel);
            }
        }
        Ok(matched)
    }

    fn index_node_kinds(&mut self, node: &Node) {
        for kind in &node.kinds {
            self.node_kinds.entry(*kind).or_default().insert(node.id);
        }
    }

    fn unindex_node_kinds(&mut self, node: &Node) {
        for kind in &node.kinds {
            if let Some(set) = self.node_kinds.get_mut(kind) {
                set.remove(&node.id);
            }
        }
    }

    fn unlink_relationship(&mut self, rel: &Relationship) {
        if let Some(set) = self.outbound.get_mut(&rel.start) {
            set.remove(&rel.id);
        }
        if let Some(set) = self.inbound.get_mut(&rel.end) {
            set.remove(&rel.id);
        }
        if let Some(set) = self.edge_kinds.get_mut(&rel.kind) {
            set.remove(&rel.id);
        }
    }
}

impl Transaction for GraphState {
    fn node(&self, id: NodeId) -> Result<Node> {
        self.node_ref(id).cloned()
    }

    fn nodes(&self, criteria: &Criteria, skip: usize, limit: usize) -> Result<Vec<Node>> {
        let matched = self.matching_nodes(criteria)?;
        Ok(page(matched.into_iter().cloned(), skip, limit))
    }

    fn count_nodes(&self, criteria: &Criteria) -> Result<usize> {
        Ok(self.matching_nodes(criteria)?.len())
    }

    fn relationship(&self, id: RelationshipId) -> Result<Relationship> {
        self.relationship_ref(id).cloned()
    }

    fn relationships(&self, criteria: &Criteria, skip: usize, limit: usize) -> Result<Vec<Relationship>> {
        let matched = self.matching_relationships(criteria)?;
        Ok(page(matched.into_iter().cloned(), skip, limit))
    }

    fn count_relationships(&self, criteria: &Criteria) -> Result<usize> {
        Ok(self.matching_relationships(criteria)?.len())
    }

    fn expand(&self, id: NodeId, direction: Direction, criteria: &Criteria) -> Result<Vec<(Relationship, Node)>> {
        let index = match direction {
            Direction::Outbound => &self.outbound,
            Direction::Inbound => &self.inbound,
        };
        let Some(rel_ids) = index.get(&id) else {
            return Ok(Vec::new());
        };

        let mut expanded = Vec::new();
        for rel_id in rel_ids.iter() {
            let rel = self.relationship_ref(*rel_id)?;
            let start = self.node_ref(rel.start)?;
            let end = self.node_ref(rel.end)?;
            if criteria.matches_relationship(start, rel, end)? {
                let far = match direction {
                    Direction::Outbound => end,
                    Direction::Inbound => start,
                };
                expanded.push((rel.clone(), far.clone()));
            }
        }
        Ok(expanded)
    }
}

impl WriteTransaction for GraphState {
    fn create_node(&mut self, kinds: Vec<NodeKind>, properties: Properties) -> Result<Node> {
        self.next_node_id += 1;
        let node = Node::new(NodeId(self.next_node_id), kinds, properties);
        self.index_node_kinds(&node);
        self.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    fn update_node(&mut self, node: &Node) -> Result<()> {
        let previous = self.node_ref(node.id)?.clone();
        self.unindex_node_kinds(&previous);
        self.index_node_kinds(node);
        self.nodes.insert(node.id, node.clone());
        Ok(())
    }

    fn delete_node(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_ref(id)?.clone();
        let attached: BTreeSet<RelationshipId> = self
            .outbound
            .get(&id)
            .into_iter()
            .chain(self.inbound.get(&id))
            .flat_map(|set| set.iter().copied())
            .collect();
        for rel_id in attached {
            self.delete_relationship(rel_id)?;
        }
        self.unindex_node_kinds(&node);
        self.outbound.remove(&id);
        self.inbound.remove(&id);
        self.nodes.remove(&id);
        Ok(())
    }

    fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        kind: EdgeKind,
        properties: Properties,
    ) -> Result<Relationship> {
        self.node_ref(start)?;
        self.node_ref(end)?;

        self.next_relationship_id += 1;
        let rel = Relationship {
            id: RelationshipId(self.next_relationship_id),
            start,
            end,
            kind,
            properties,
        };
        self.outbound.entry(start).or_default().insert(rel.id);
        self.inbound.entry(end).or_default().insert(rel.id);
        self.edge_kinds.entry(kind).or_default().insert(rel.id);
        self.relationships.insert(rel.id, rel.clone());
        Ok(rel)
    }

    fn update_relationship(&mut self, rel: &Relationship) -> Result<()> {
        let previous = self.relationship_ref(rel.id)?;
        if previous.start != rel.start || previous.end != rel.end || previous.kind != rel.kind {
            return Err(AnalysisError::TransactionError(format!(
                "relationship {} endpoints and kind are immutable",
                rel.id
            )));
        }
        self.relationships.insert(rel.id, rel.clone());
        Ok(())
    }

    fn delete_relationship(&mut self, id: RelationshipId) -> Result<()> {
        let rel = self.relationship_ref(id)?.clone();
        self.unlink_relationship(&rel);
        self.relationships.remove(&id);
        Ok(())
    }
}

/// Immutable, cheaply cloneable read view of a committed graph state
#[derive(Debug, Clone)]
pub struct GraphSnapshot(Arc<GraphState>);

impl Transaction for GraphSnapshot {
    fn node(&self, id: NodeId) -> Result<Node> {
        self.0.node(id)
    }

    fn nodes(&self, criteria: &Criteria, skip: usize, limit: usize) -> Result<Vec<Node>> {
        self.0.nodes(criteria, skip, limit)
    }

    fn count_nodes(&self, criteria: &Criteria) -> Result<usize> {
        self.0.count_nodes(criteria)
    }

    fn relationship(&self, id: RelationshipId) -> Result<Relationship> {
        self.0.relationship(id)
    }

    fn relationships(&self, criteria: &Criteria, skip: usize, limit: usize) -> Result<Vec<Relationship>> {
        self.0.relationships(criteria, skip, limit)
    }

    fn count_relationships(&self, criteria: &Criteria) -> Result<usize> {
        self.0.count_relationships(criteria)
    }

    fn expand(&self, id: NodeId, direction: Direction, criteria: &Criteria) -> Result<Vec<(Relationship, Node)>> {
        self.0.expand(id, direction, criteria)
    }
}

/// In-process graph database with copy-on-write commits
#[derive(Debug, Default)]
pub struct MemoryGraph {
    current: RwLock<Arc<GraphState>>,
    writer: Mutex<()>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> Result<usize> {
        Ok(self.snapshot()?.0.nodes.len())
    }

    pub fn relationship_count(&self) -> Result<usize> {
        Ok(self.snapshot()?.0.relationships.len())
    }

    /// Loads a fixture and returns the fixture key to node id mapping
    pub fn load_fixture(&self, fixture: &GraphFixture) -> Result<HashMap<String, NodeId>> {
        let ids = self.write_transaction(|tx| {
            let mut ids = HashMap::with_capacity(fixture.nodes.len());
            for node in &fixture.nodes {
                if ids.contains_key(&node.key) {
                    return Err(AnalysisError::ParseError(format!(
                        "duplicate fixture node key '{}'",
                        node.key
                    )));
                }
                let created = tx.create_node(node.kinds.clone(), node.properties.clone())?;
                ids.insert(node.key.clone(), created.id);
            }

            for rel in &fixture.relationships {
                let lookup = |key: &str| {
                    ids.get(key).copied().ok_or_else(|| {
                        AnalysisError::ParseError(format!("unknown fixture node key '{}'", key))
                    })
                };
                let (start, end) = (lookup(&rel.start)?, lookup(&rel.end)?);
                tx.create_relationship(start, end, rel.kind, rel.properties.clone())?;
            }
            Ok(ids)
        })?;

        info!(
            "Loaded fixture: {} nodes, {} relationships",
            fixture.nodes.len(),
            fixture.relationships.len()
        );
        Ok(ids)
    }
}

impl GraphDatabase for MemoryGraph {
    type Snapshot = GraphSnapshot;

    fn snapshot(&self) -> Result<GraphSnapshot> {
        let current = self
            .current
            .read()
            .map_err(|e| AnalysisError::TransactionError(format!("Failed to acquire graph lock: {}", e)))?;
        Ok(GraphSnapshot(current.clone()))
    }

    fn write_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn WriteTransaction) -> Result<T>,
    {
        let _writer = self
            .writer
            .lock()
            .map_err(|e| AnalysisError::TransactionError(format!("Failed to acquire writer lock: {}", e)))?;

        let mut working = GraphState::clone(&self.snapshot()?.0);
        let result = f(&mut working)?;

        let mut current = self
            .current
            .write()
            .map_err(|e| AnalysisError::TransactionError(format!("Failed to acquire graph lock: {}", e)))?;
        *current = Arc::new(working);
        debug!("Graph transaction committed");
        Ok(result)
    }
}

// ==========================================
// Fixture format
// ==========================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphFixture {
    #[serde(default)]
    pub nodes: Vec<FixtureNode>,
    #[serde(default)]
    pub relationships: Vec<FixtureRelationship>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureNode {
    pub key: String,
    pub kinds: Vec<NodeKind>,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureRelationship {
    pub start: String,
    pub end: String,
    pub kind: EdgeKind,
    #[serde(default)]
    pub properties: Properties,
}

impl GraphFixture {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &FsPath) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}
