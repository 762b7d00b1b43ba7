//! Group membership traversals
//!
//! Membership is the transitive closure over `MemberOf`. Nested groups may
//! contain themselves indirectly; the traversal expands each node once, so a
//! cycle terminates and every member is reported exactly once.

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeSet, PathSet};
use crate::kinds::EdgeKind;
use crate::query;
use crate::traversal::{follow, traverse, SegmentTree, TraversalPlan};

fn membership_tree(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    root: &Node,
    direction: Direction,
) -> Result<SegmentTree> {
    let rule = follow(query::edge_kind(EdgeKind::MemberOf));
    traverse(
        ctx,
        tx,
        TraversalPlan {
            root: root.clone(),
            direction,
            branch: &rule,
        },
    )
}

/// Paths from a group down to each of its transitive members
pub fn fetch_group_member_paths(ctx: &AnalysisContext, tx: &dyn Transaction, group: &Node) -> Result<PathSet> {
    Ok(membership_tree(ctx, tx, group, Direction::Inbound)?.paths_where(|_| true))
}

/// Transitive members of a group, the group itself excluded
pub fn fetch_group_members(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    group: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(membership_tree(ctx, tx, group, Direction::Inbound)?
        .nodes_where(|_| true)
        .slice(skip, limit))
}

/// Paths from an entity up to each group it belongs to
pub fn fetch_entity_group_membership_paths(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    entity: &Node,
) -> Result<PathSet> {
    Ok(membership_tree(ctx, tx, entity, Direction::Outbound)?.paths_where(|_| true))
}

/// Every group an entity belongs to, directly or through nesting
pub fn fetch_entity_group_membership(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    entity: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(membership_tree(ctx, tx, entity, Direction::Outbound)?
        .nodes_where(|_| true)
        .slice(skip, limit))
}
