//! Query helpers shared by the fetch library and the post-processing passes

use crate::errors::{AnalysisError, Result};
use crate::graph_store::Transaction;
use crate::graph_types::{Node, NodeId, NodeSet, Relationship};
use crate::kinds::{EdgeKind, NodeKind};
use crate::properties::keys;
use crate::query::{self, Criteria, Target};

pub fn fetch_nodes(tx: &dyn Transaction, criteria: &Criteria) -> Result<Vec<Node>> {
    tx.nodes(criteria, 0, 0)
}

pub fn count_nodes(tx: &dyn Transaction, criteria: &Criteria) -> Result<usize> {
    tx.count_nodes(criteria)
}

pub fn fetch_node_set(tx: &dyn Transaction, criteria: &Criteria, skip: usize, limit: usize) -> Result<NodeSet> {
    Ok(tx.nodes(criteria, skip, limit)?.into_iter().collect())
}

pub fn fetch_node_ids(tx: &dyn Transaction, criteria: &Criteria) -> Result<Vec<NodeId>> {
    Ok(tx.nodes(criteria, 0, 0)?.into_iter().map(|n| n.id).collect())
}

pub fn fetch_relationships(tx: &dyn Transaction, criteria: &Criteria) -> Result<Vec<Relationship>> {
    tx.relationships(criteria, 0, 0)
}

/// Start nodes of every matching relationship
pub fn fetch_start_nodes(tx: &dyn Transaction, criteria: &Criteria) -> Result<NodeSet> {
    let mut nodes = NodeSet::new();
    for rel in tx.relationships(criteria, 0, 0)? {
        if !nodes.contains(rel.start) {
            nodes.add(tx.node(rel.start)?);
        }
    }
    Ok(nodes)
}

/// End nodes of every matching relationship
pub fn fetch_end_nodes(tx: &dyn Transaction, criteria: &Criteria) -> Result<NodeSet> {
    let mut nodes = NodeSet::new();
    for rel in tx.relationships(criteria, 0, 0)? {
        if !nodes.contains(rel.end) {
            nodes.add(tx.node(rel.end)?);
        }
    }
    Ok(nodes)
}

pub fn fetch_node_by_object_id(tx: &dyn Transaction, object_id: &str) -> Result<Node> {
    tx.nodes(&query::equals(Target::Node, keys::OBJECT_ID, object_id), 0, 1)?
        .into_iter()
        .next()
        .ok_or_else(|| AnalysisError::NotFound(format!("node with objectid {}", object_id)))
}

pub fn fetch_domains(tx: &dyn Transaction) -> Result<Vec<Node>> {
    tx.nodes(&query::kind(Target::Node, NodeKind::Domain), 0, 0)
}

/// Nodes of `kind` whose `domainsid` matches
pub fn fetch_domain_members(tx: &dyn Transaction, kind: NodeKind, domain_sid: &str) -> Result<Vec<Node>> {
    tx.nodes(
        &query::and(vec![
            query::kind(Target::Node, kind),
            query::equals(Target::Node, keys::DOMAIN_SID, domain_sid),
        ]),
        0,
        0,
    )
}

/// True when any edge of the given kinds points into `id`
pub fn has_inbound(tx: &dyn Transaction, id: NodeId, kinds: &[EdgeKind]) -> Result<bool> {
    Ok(!tx
        .expand(id, crate::graph_types::Direction::Inbound, &query::edge_kinds(kinds))?
        .is_empty())
}

/// Domain SID of a domain node (its object id)
pub fn domain_sid(domain: &Node) -> Result<&str> {
    domain.properties.get_str(keys::OBJECT_ID)
}
