//! Breadth-first traversal over a [`Transaction`]
//!
//! A traversal expands outward from a root node and records every reached
//! node as a segment in a tree: each segment remembers the edge it arrived
//! through and its trunk (parent). Each node is expanded at most once, which
//! makes every traversal terminate on cyclic graphs (nested group loops are
//! common in real directories) and keeps the work linear in the size of the
//! reachable subgraph.
//!
//! What gets expanded is decided per segment by a branch rule: given the
//! segment being expanded, it returns the edge criteria to follow next, or
//! `None` to stop descending below that segment.

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeId, NodeSet, Path, PathSet, Relationship};
use crate::query::Criteria;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
struct Segment {
    node: Node,
    edge: Option<Relationship>,
    trunk: Option<usize>,
    depth: usize,
    children: usize,
    /// Matching edges to nodes already reached elsewhere, ancestors excluded
    cross_links: usize,
}

/// Result of a traversal: one segment per reached node, root at index 0
#[derive(Debug, Clone)]
pub struct SegmentTree {
    segments: Vec<Segment>,
}

/// Borrowed view of one segment and its position in the tree
#[derive(Clone, Copy)]
pub struct SegmentView<'t> {
    tree: &'t SegmentTree,
    index: usize,
}

impl<'t> SegmentView<'t> {
    fn segment(&self) -> &'t Segment {
        &self.tree.segments[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn node(&self) -> &'t Node {
        &self.segment().node
    }

    /// The edge this segment was reached through; `None` for the root
    pub fn edge(&self) -> Option<&'t Relationship> {
        self.segment().edge.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.segment().depth
    }

    pub fn is_root(&self) -> bool {
        self.index == 0
    }

    /// True when no matching edge continues below this segment, ignoring
    /// edges that lead back to one of its own ancestors
    pub fn is_leaf(&self) -> bool {
        let segment = self.segment();
        segment.children == 0 && segment.cross_links == 0
    }

    pub fn trunk(&self) -> Option<SegmentView<'t>> {
        self.segment().trunk.map(|index| SegmentView { tree: self.tree, index })
    }

    /// Walks from this segment's trunk back to the root
    pub fn ancestors(&self) -> impl Iterator<Item = SegmentView<'t>> {
        std::iter::successors(self.trunk(), |view| view.trunk())
    }

    pub fn to_path(&self) -> Path {
        self.tree.path(self.index)
    }
}

impl SegmentTree {
    pub fn root(&self) -> &Node {
        &self.segments[0].node
    }

    /// Number of reached nodes, root included
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.len() <= 1
    }

    pub fn views(&self) -> impl Iterator<Item = SegmentView<'_>> {
        (0..self.segments.len()).map(move |index| SegmentView { tree: self, index })
    }

    /// Path from the root to the segment at `index`
    pub fn path(&self, index: usize) -> Path {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut cursor = Some(index);
        while let Some(i) = cursor {
            let segment = &self.segments[i];
            nodes.push(segment.node.clone());
            if let Some(edge) = &segment.edge {
                edges.push(edge.clone());
            }
            cursor = segment.trunk;
        }
        nodes.reverse();
        edges.reverse();
        Path { nodes, edges }
    }

    /// Paths to every non-root segment accepted by `filter`
    pub fn paths_where(&self, mut filter: impl FnMut(&SegmentView<'_>) -> bool) -> PathSet {
        self.views()
            .filter(|view| !view.is_root() && filter(view))
            .map(|view| view.to_path())
            .collect()
    }

    /// Non-root nodes accepted by `filter`
    pub fn nodes_where(&self, mut filter: impl FnMut(&SegmentView<'_>) -> bool) -> NodeSet {
        self.views()
            .filter(|view| !view.is_root() && filter(view))
            .map(|view| view.node().clone())
            .collect()
    }

    fn is_ancestor_or_self(&self, index: usize, id: NodeId) -> bool {
        let mut cursor = Some(index);
        while let Some(i) = cursor {
            if self.segments[i].node.id == id {
                return true;
            }
            cursor = self.segments[i].trunk;
        }
        false
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.segments.iter().any(|s| s.node.id == id)
    }
}

/// Chooses the edges to follow out of a segment; `None` stops descent
pub type BranchRule<'r> = dyn Fn(&SegmentView<'_>) -> Option<Criteria> + 'r;

pub struct TraversalPlan<'r> {
    pub root: Node,
    pub direction: Direction,
    pub branch: &'r BranchRule<'r>,
}

/// Runs a breadth-first traversal, checking `ctx` before every expansion
pub fn traverse(ctx: &AnalysisContext, tx: &dyn Transaction, plan: TraversalPlan<'_>) -> Result<SegmentTree> {
    let mut tree = SegmentTree {
        segments: vec![Segment {
            node: plan.root.clone(),
            edge: None,
            trunk: None,
            depth: 0,
            children: 0,
            cross_links: 0,
        }],
    };
    let mut visited: HashSet<NodeId> = HashSet::from([plan.root.id]);
    let mut queue = VecDeque::from([0usize]);

    while let Some(index) = queue.pop_front() {
        ctx.check("graph traversal")?;

        let criteria = {
            let view = SegmentView { tree: &tree, index };
            match (plan.branch)(&view) {
                Some(criteria) => criteria,
                None => continue,
            }
        };

        let (node_id, depth) = (tree.segments[index].node.id, tree.segments[index].depth);
        for (edge, next) in tx.expand(node_id, plan.direction, &criteria)? {
            if !visited.insert(next.id) {
                if !tree.is_ancestor_or_self(index, next.id) {
                    tree.segments[index].cross_links += 1;
                }
                continue;
            }
            tree.segments[index].children += 1;
            tree.segments.push(Segment {
                node: next,
                edge: Some(edge),
                trunk: Some(index),
                depth: depth + 1,
                children: 0,
                cross_links: 0,
            });
            queue.push_back(tree.segments.len() - 1);
        }
    }

    Ok(tree)
}

/// Branch rule that follows the same criteria everywhere
pub fn follow(criteria: Criteria) -> impl Fn(&SegmentView<'_>) -> Option<Criteria> {
    move |_| Some(criteria.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis_context::CancellationToken;
    use crate::errors::AnalysisError;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::kinds::{EdgeKind, NodeKind};
    use crate::properties::Properties;
    use crate::query;

    fn chain_with_cycle() -> (MemoryGraph, Vec<NodeId>) {
        let graph = MemoryGraph::new();
        let ids = graph
            .write_transaction(|tx| {
                let mut ids = Vec::new();
                for _ in 0..3 {
                    ids.push(tx.create_node(vec![NodeKind::Base, NodeKind::Group], Properties::new())?.id);
                }
                tx.create_relationship(ids[1], ids[0], EdgeKind::MemberOf, Properties::new())?;
                tx.create_relationship(ids[2], ids[1], EdgeKind::MemberOf, Properties::new())?;
                tx.create_relationship(ids[0], ids[2], EdgeKind::MemberOf, Properties::new())?;
                Ok(ids)
            })
            .unwrap();
        (graph, ids)
    }

    #[test]
    fn test_cycle_terminates() {
        let (graph, ids) = chain_with_cycle();
        let snapshot = graph.snapshot().unwrap();
        let root = snapshot.node(ids[0]).unwrap();
        let rule = follow(query::edge_kind(EdgeKind::MemberOf));

        let tree = traverse(
            &AnalysisContext::background(),
            &snapshot,
            TraversalPlan { root, direction: Direction::Inbound, branch: &rule },
        )
        .unwrap();

        assert_eq!(tree.len(), 3);
        let paths = tree.paths_where(|_| true);
        assert!(paths.iter().all(|p| p.is_well_formed()));
        assert_eq!(paths.all_nodes().len(), 3);
        assert_eq!(tree.nodes_where(|v| v.is_leaf()).ids(), vec![ids[2]]);
    }

    #[test]
    fn test_branch_rule_stops_descent() {
        let (graph, ids) = chain_with_cycle();
        let snapshot = graph.snapshot().unwrap();
        let root = snapshot.node(ids[0]).unwrap();
        let rule = |view: &SegmentView<'_>| {
            if view.depth() == 0 {
                Some(query::edge_kind(EdgeKind::MemberOf))
            } else {
                None
            }
        };

        let tree = traverse(
            &AnalysisContext::background(),
            &snapshot,
            TraversalPlan { root, direction: Direction::Inbound, branch: &rule },
        )
        .unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_cancelled_traversal_returns_error() {
        let (graph, ids) = chain_with_cycle();
        let snapshot = graph.snapshot().unwrap();
        let root = snapshot.node(ids[0]).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let rule = follow(query::edge_kind(EdgeKind::MemberOf));

        let result = traverse(
            &AnalysisContext::with_token(token),
            &snapshot,
            TraversalPlan { root, direction: Direction::Inbound, branch: &rule },
        );
        assert!(matches!(result, Err(AnalysisError::Cancelled(_))));
    }
}
