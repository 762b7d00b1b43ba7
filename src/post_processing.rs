//! Derived-edge bookkeeping shared by every post-processing pass
//!
//! A pass computes the complete set of edges it wants to exist, then
//! [`reconcile`] makes the graph match in a single write transaction:
//! missing edges are created, stale ones of the pass's kinds are deleted and
//! managed properties on kept edges are refreshed. Running a pass twice over
//! the same input therefore leaves the graph unchanged.

use crate::analysis_context::{AnalysisContext, CompositionCounter};
use crate::errors::{AnalysisError, Result};
use crate::graph_store::{GraphDatabase, Transaction};
use crate::graph_types::{EdgeKey, NodeId, RelationshipId};
use crate::kinds::EdgeKind;
use crate::parallel_executor::ParallelExecutor;
use crate::properties::{keys, Properties};
use crate::query;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Explains one derived edge by the nodes and relationships that justify it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionRecord {
    pub composition_id: i64,
    pub edge: EdgeKey,
    pub node_ids: BTreeSet<NodeId>,
    pub relationship_ids: BTreeSet<RelationshipId>,
}

/// The edges a pass wants to exist, keyed by `(start, end, kind)`
#[derive(Debug, Clone, Default)]
pub struct DerivedEdges {
    edges: BTreeMap<EdgeKey, Properties>,
    compositions: BTreeMap<EdgeKey, CompositionRecord>,
}

impl DerivedEdges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, start: NodeId, end: NodeId, kind: EdgeKind) {
        self.edges.entry(EdgeKey { start, end, kind }).or_default();
    }

    /// Insert with properties; later values win on key collision
    pub fn insert_with(&mut self, start: NodeId, end: NodeId, kind: EdgeKind, properties: Properties) {
        let entry = self.edges.entry(EdgeKey { start, end, kind }).or_default();
        for (key, value) in properties.iter() {
            entry.set(key, value.clone());
        }
    }

    /// Insert an edge explained by a composition. A second explanation for the
    /// same edge extends the existing record instead of allocating a new id.
    pub fn insert_composed(
        &mut self,
        start: NodeId,
        end: NodeId,
        kind: EdgeKind,
        counter: &CompositionCounter,
        node_ids: impl IntoIterator<Item = NodeId>,
        relationship_ids: impl IntoIterator<Item = RelationshipId>,
    ) {
        let edge = EdgeKey { start, end, kind };
        self.edges.entry(edge).or_default();
        let record = self.compositions.entry(edge).or_insert_with(|| CompositionRecord {
            composition_id: counter.next_id(),
            edge,
            node_ids: BTreeSet::new(),
            relationship_ids: BTreeSet::new(),
        });
        record.node_ids.extend(node_ids);
        record.relationship_ids.extend(relationship_ids);
    }

    pub fn merge(&mut self, other: DerivedEdges) {
        for (key, properties) in other.edges {
            self.insert_with(key.start, key.end, key.kind, properties);
        }
        for (key, record) in other.compositions {
            match self.compositions.get_mut(&key) {
                Some(existing) => {
                    existing.node_ids.extend(record.node_ids);
                    existing.relationship_ids.extend(record.relationship_ids);
                }
                None => {
                    self.compositions.insert(key, record);
                }
            }
        }
    }

    pub fn contains(&self, start: NodeId, end: NodeId, kind: EdgeKind) -> bool {
        self.edges.contains_key(&EdgeKey { start, end, kind })
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &EdgeKey> {
        self.edges.keys()
    }

    pub fn composition(&self, key: &EdgeKey) -> Option<&CompositionRecord> {
        self.compositions.get(key)
    }
}

/// Created and deleted relationship counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeCounts {
    pub created: usize,
    pub deleted: usize,
}

/// Per-kind counters shared by concurrent passes
#[derive(Debug, Default)]
pub struct PostProcessingStats {
    created: DashMap<EdgeKind, usize>,
    deleted: DashMap<EdgeKind, usize>,
    compositions: DashMap<i64, CompositionRecord>,
}

impl PostProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_created(&self, kind: EdgeKind, count: usize) {
        *self.created.entry(kind).or_insert(0) += count;
    }

    pub fn add_deleted(&self, kind: EdgeKind, count: usize) {
        *self.deleted.entry(kind).or_insert(0) += count;
    }

    pub fn created(&self, kind: EdgeKind) -> usize {
        self.created.get(&kind).map(|c| *c).unwrap_or(0)
    }

    pub fn deleted(&self, kind: EdgeKind) -> usize {
        self.deleted.get(&kind).map(|c| *c).unwrap_or(0)
    }

    pub fn total_created(&self) -> usize {
        self.created.iter().map(|e| *e.value()).sum()
    }

    pub fn total_deleted(&self) -> usize {
        self.deleted.iter().map(|e| *e.value()).sum()
    }

    pub fn record_composition(&self, record: CompositionRecord) {
        self.compositions.insert(record.composition_id, record);
    }

    /// Composition records ordered by id
    pub fn compositions(&self) -> Vec<CompositionRecord> {
        let mut records: Vec<_> = self.compositions.iter().map(|e| e.value().clone()).collect();
        records.sort_by_key(|r| r.composition_id);
        records
    }

    pub fn merge(&self, other: PostProcessingStats) {
        for (kind, count) in other.created {
            self.add_created(kind, count);
        }
        for (kind, count) in other.deleted {
            self.add_deleted(kind, count);
        }
        for (id, record) in other.compositions {
            self.compositions.insert(id, record);
        }
    }

    /// Serializable per-kind view, ordered by kind
    pub fn summary(&self) -> BTreeMap<EdgeKind, EdgeCounts> {
        let mut summary: BTreeMap<EdgeKind, EdgeCounts> = BTreeMap::new();
        for entry in self.created.iter() {
            summary.entry(*entry.key()).or_default().created = *entry.value();
        }
        for entry in self.deleted.iter() {
            summary.entry(*entry.key()).or_default().deleted = *entry.value();
        }
        summary
    }

    pub fn log_stats(&self, pass: &str) {
        for (kind, counts) in self.summary() {
            info!(
                "{}: {} {} relationships created, {} deleted",
                pass, kind, counts.created, counts.deleted
            );
        }
    }
}

fn is_managed(properties: &Properties, kind: EdgeKind) -> Result<bool> {
    Ok(kind.is_post_processed() || properties.get_bool_or(keys::IS_DERIVED, false)?)
}

/// Makes the relationships of `kinds` match `desired` in one write transaction.
///
/// Only derived relationships are touched: kinds that only exist as
/// post-processing output, and any relationship flagged `derived`. A
/// collected relationship with a desired key satisfies that key as-is.
pub fn reconcile<G: GraphDatabase>(
    ctx: &AnalysisContext,
    db: &G,
    kinds: &[EdgeKind],
    desired: &DerivedEdges,
) -> Result<PostProcessingStats> {
    if let Some(stray) = desired.keys().find(|key| !kinds.contains(&key.kind)) {
        return Err(AnalysisError::InternalError(format!(
            "derived {} edge outside the reconciled kinds",
            stray.kind
        )));
    }
    ctx.check("reconcile")?;

    db.write_transaction(|tx| {
        let stats = PostProcessingStats::new();
        let existing = tx.relationships(&query::edge_kinds(kinds), 0, 0)?;

        let mut satisfied = BTreeSet::new();
        let mut managed = Vec::new();
        for rel in existing {
            if is_managed(&rel.properties, rel.kind)? {
                managed.push(rel);
            } else {
                satisfied.insert(rel.key());
            }
        }

        for rel in managed {
            let key = rel.key();
            let wanted = match desired.edges.get(&key) {
                Some(properties) if !satisfied.contains(&key) => properties,
                _ => {
                    tx.delete_relationship(rel.id)?;
                    stats.add_deleted(rel.kind, 1);
                    continue;
                }
            };
            satisfied.insert(key);

            let mut updated = rel.clone();
            apply_managed_properties(&mut updated.properties, wanted, desired.compositions.get(&key));
            if updated.properties != rel.properties {
                tx.update_relationship(&updated)?;
            }
            if let Some(record) = desired.compositions.get(&key) {
                stats.record_composition(record.clone());
            }
        }

        for (key, wanted) in &desired.edges {
            if satisfied.contains(key) {
                continue;
            }
            let mut properties = Properties::new();
            apply_managed_properties(&mut properties, wanted, desired.compositions.get(key));
            tx.create_relationship(key.start, key.end, key.kind, properties)?;
            stats.add_created(key.kind, 1);
            if let Some(record) = desired.compositions.get(key) {
                stats.record_composition(record.clone());
            }
        }

        debug!(
            "Reconciled {:?}: {} created, {} deleted",
            kinds,
            stats.total_created(),
            stats.total_deleted()
        );
        Ok(stats)
    })
}

fn apply_managed_properties(target: &mut Properties, wanted: &Properties, composition: Option<&CompositionRecord>) {
    for (key, value) in wanted.iter() {
        target.set(key, value.clone());
    }
    target.set(keys::IS_DERIVED, true);
    match composition {
        Some(record) => target.set(keys::COMPOSITION_ID, record.composition_id),
        None => {
            target.remove(keys::COMPOSITION_ID);
        }
    }
}

/// Runs `unit` once per item on the worker pool against one shared snapshot.
/// Unit results are merged under a mutex as they complete; the first failing
/// unit fails the whole derivation.
pub async fn derive_parallel<S, I, F>(
    executor: &ParallelExecutor,
    ctx: &AnalysisContext,
    snapshot: S,
    items: Vec<I>,
    name: &str,
    unit: F,
) -> Result<DerivedEdges>
where
    S: Transaction + Clone + Send + Sync + 'static,
    I: Send + 'static,
    F: Fn(&AnalysisContext, &S, I) -> Result<DerivedEdges> + Send + Sync + 'static,
{
    let unit = Arc::new(unit);
    let merged = Arc::new(Mutex::new(DerivedEdges::new()));

    let operations: Vec<_> = items
        .into_iter()
        .map(|item| {
            let unit = unit.clone();
            let snapshot = snapshot.clone();
            let ctx = ctx.clone();
            let merged = merged.clone();
            move || async move {
                tokio::task::spawn_blocking(move || -> Result<()> {
                    ctx.check("post-processing unit")?;
                    let edges = unit(&ctx, &snapshot, item)?;
                    merged
                        .lock()
                        .map_err(|e| AnalysisError::InternalError(format!("Failed to acquire merge lock: {}", e)))?
                        .merge(edges);
                    Ok(())
                })
                .await
                .map_err(|e| AnalysisError::InternalError(format!("Worker task failed: {}", e)))?
            }
        })
        .collect();

    for result in executor.execute_parallel(operations, name).await {
        result?;
    }

    let mut guard = merged
        .lock()
        .map_err(|e| AnalysisError::InternalError(format!("Failed to acquire merge lock: {}", e)))?;
    Ok(std::mem::take(&mut *guard))
}
