//! OU containment

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeSet, PathSet};
use crate::kinds::{EdgeKind, NodeKind};
use crate::query;
use crate::traversal::{follow, traverse, SegmentTree, TraversalPlan};

fn contained_tree(ctx: &AnalysisContext, tx: &dyn Transaction, container: &Node) -> Result<SegmentTree> {
    let rule = follow(query::edge_kind(EdgeKind::Contains));
    traverse(
        ctx,
        tx,
        TraversalPlan {
            root: container.clone(),
            direction: Direction::Outbound,
            branch: &rule,
        },
    )
}

/// Paths from the container down to every nested node of `kind`
pub fn fetch_ou_contained_paths(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    container: &Node,
    kind: NodeKind,
) -> Result<PathSet> {
    Ok(contained_tree(ctx, tx, container)?.paths_where(|v| v.node().has_kind(kind)))
}

pub fn fetch_ou_contained(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    container: &Node,
    kind: NodeKind,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(contained_tree(ctx, tx, container)?
        .nodes_where(|v| v.node().has_kind(kind))
        .slice(skip, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::properties::Properties;

    #[test]
    fn test_nested_ou_contents() {
        let graph = MemoryGraph::new();
        let (ou, users) = graph
            .write_transaction(|tx| {
                let ou = tx.create_node(vec![NodeKind::Base, NodeKind::OU], Properties::new())?.id;
                let child = tx.create_node(vec![NodeKind::Base, NodeKind::OU], Properties::new())?.id;
                let direct = tx.create_node(vec![NodeKind::Base, NodeKind::User], Properties::new())?.id;
                let nested = tx.create_node(vec![NodeKind::Base, NodeKind::User], Properties::new())?.id;
                let computer = tx.create_node(vec![NodeKind::Base, NodeKind::Computer], Properties::new())?.id;
                tx.create_relationship(ou, child, EdgeKind::Contains, Properties::new())?;
                tx.create_relationship(ou, direct, EdgeKind::Contains, Properties::new())?;
                tx.create_relationship(child, nested, EdgeKind::Contains, Properties::new())?;
                tx.create_relationship(child, computer, EdgeKind::Contains, Properties::new())?;
                Ok((ou, vec![direct, nested]))
            })
            .unwrap();

        let snapshot = graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();
        let ou = snapshot.node(ou).unwrap();

        assert_eq!(fetch_ou_contained(&ctx, &snapshot, &ou, NodeKind::User, 0, 0).unwrap().ids(), users);
        assert_eq!(fetch_ou_contained(&ctx, &snapshot, &ou, NodeKind::Computer, 0, 0).unwrap().len(), 1);
        let paths = fetch_ou_contained_paths(&ctx, &snapshot, &ou, NodeKind::User).unwrap();
        assert_eq!(paths.all_nodes().len(), 4);
    }
}
