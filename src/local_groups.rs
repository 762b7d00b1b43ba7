//! Local group administration traversals
//!
//! A right such as `AdminTo` or `CanRDP` is granted to a principal directly
//! or to a group it is nested in:
//!
//! | Direction | Walk                                          | Result             |
//! |-----------|-----------------------------------------------|--------------------|
//! | Outbound  | `MemberOf*` then one hop of the right         | targets reached    |
//! | Inbound   | one inbound hop of the right, then `MemberOf*`| terminal principals|
//!
//! Rights that never flow through group nesting (`SQLAdmin`, constrained
//! delegation) use the direct one-hop walk instead.

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeSet, PathSet};
use crate::kinds::EdgeKind;
use crate::query::{self, Criteria};
use crate::traversal::{traverse, SegmentTree, SegmentView, TraversalPlan};

fn arrived_via(view: &SegmentView<'_>, kind: EdgeKind) -> bool {
    view.edge().map(|e| e.kind == kind).unwrap_or(false)
}

/// Inbound tree: the right's edge into the target, then members of each grantee
pub fn inbound_local_group_tree(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    target: &Node,
    right: EdgeKind,
) -> Result<SegmentTree> {
    let rule = move |view: &SegmentView<'_>| -> Option<Criteria> {
        if view.is_root() {
            Some(query::edge_kind(right))
        } else {
            Some(query::edge_kind(EdgeKind::MemberOf))
        }
    };
    traverse(
        ctx,
        tx,
        TraversalPlan {
            root: target.clone(),
            direction: Direction::Inbound,
            branch: &rule,
        },
    )
}

/// Outbound tree: group nesting of the principal, then one hop of the right
pub fn outbound_local_group_tree(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    principal: &Node,
    right: EdgeKind,
) -> Result<SegmentTree> {
    let rule = move |view: &SegmentView<'_>| -> Option<Criteria> {
        if arrived_via(view, right) {
            None
        } else {
            Some(query::edge_kinds(&[EdgeKind::MemberOf, right]))
        }
    };
    traverse(
        ctx,
        tx,
        TraversalPlan {
            root: principal.clone(),
            direction: Direction::Outbound,
            branch: &rule,
        },
    )
}

pub fn fetch_inbound_local_group_paths(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    target: &Node,
    right: EdgeKind,
) -> Result<PathSet> {
    Ok(inbound_local_group_tree(ctx, tx, target, right)?.paths_where(|v| v.is_leaf()))
}

/// Principals at the end of every grant chain into `target`
pub fn fetch_inbound_local_group_members(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    target: &Node,
    right: EdgeKind,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(inbound_local_group_tree(ctx, tx, target, right)?
        .nodes_where(|v| v.is_leaf())
        .slice(skip, limit))
}

pub fn fetch_outbound_local_group_paths(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    principal: &Node,
    right: EdgeKind,
) -> Result<PathSet> {
    Ok(outbound_local_group_tree(ctx, tx, principal, right)?.paths_where(|v| arrived_via(v, right)))
}

/// Targets the principal holds `right` over, directly or through its groups
pub fn fetch_outbound_local_group_targets(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    principal: &Node,
    right: EdgeKind,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(outbound_local_group_tree(ctx, tx, principal, right)?
        .nodes_where(|v| arrived_via(v, right))
        .slice(skip, limit))
}

/// Single-hop paths over `kind` in `direction`
pub fn fetch_direct_edge_paths(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    node: &Node,
    kind: EdgeKind,
    direction: Direction,
) -> Result<PathSet> {
    let rule = move |view: &SegmentView<'_>| view.is_root().then(|| query::edge_kind(kind));
    let tree = traverse(
        ctx,
        tx,
        TraversalPlan {
            root: node.clone(),
            direction,
            branch: &rule,
        },
    )?;
    Ok(tree.paths_where(|_| true))
}

pub fn fetch_direct_edge_nodes(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    node: &Node,
    kind: EdgeKind,
    direction: Direction,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(fetch_direct_edge_paths(ctx, tx, node, kind, direction)?
        .terminals()
        .slice(skip, limit))
}
