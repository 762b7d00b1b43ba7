//! Session traversals
//!
//! `HasSession` points from a computer to the user logged on to it. A
//! group's sessions are the sessions of all its transitive members.

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeSet, Path, PathSet};
use crate::kinds::{EdgeKind, NodeKind};
use crate::query;
use crate::traversal::{follow, traverse, SegmentView, TraversalPlan};

fn one_hop_session_paths(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    root: &Node,
    direction: Direction,
) -> Result<PathSet> {
    let rule = |view: &SegmentView<'_>| view.is_root().then(|| query::edge_kind(EdgeKind::HasSession));
    let tree = traverse(
        ctx,
        tx,
        TraversalPlan {
            root: root.clone(),
            direction,
            branch: &rule,
        },
    )?;
    Ok(tree.paths_where(|_| true))
}

/// Paths from a computer to the users with sessions on it
pub fn fetch_computer_session_paths(ctx: &AnalysisContext, tx: &dyn Transaction, computer: &Node) -> Result<PathSet> {
    one_hop_session_paths(ctx, tx, computer, Direction::Outbound)
}

/// Users with a session on the computer
pub fn fetch_computer_sessions(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    computer: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(fetch_computer_session_paths(ctx, tx, computer)?
        .terminals()
        .slice(skip, limit))
}

/// Paths from a user to the computers holding its sessions
pub fn fetch_user_session_paths(ctx: &AnalysisContext, tx: &dyn Transaction, user: &Node) -> Result<PathSet> {
    one_hop_session_paths(ctx, tx, user, Direction::Inbound)
}

/// Computers where the user has a session
pub fn fetch_user_sessions(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    user: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(fetch_user_session_paths(ctx, tx, user)?.terminals().slice(skip, limit))
}

/// Paths from a group through its members to the computers holding their sessions
pub fn fetch_group_session_paths(ctx: &AnalysisContext, tx: &dyn Transaction, group: &Node) -> Result<PathSet> {
    let rule = follow(query::edge_kind(EdgeKind::MemberOf));
    let members = traverse(
        ctx,
        tx,
        TraversalPlan {
            root: group.clone(),
            direction: Direction::Inbound,
            branch: &rule,
        },
    )?;

    let sessions = query::and(vec![
        query::edge_kind(EdgeKind::HasSession),
        query::kind(query::Target::Start, NodeKind::Computer),
    ]);

    // Session hops are expanded separately from membership so a computer that
    // is itself a group member still counts as a session host.
    let mut paths = PathSet::new();
    for view in members.views().filter(|v| !v.is_root()) {
        ctx.check("group session expansion")?;
        for (edge, computer) in tx.expand(view.node().id, Direction::Inbound, &sessions)? {
            let Path { mut nodes, mut edges } = view.to_path();
            nodes.push(computer);
            edges.push(edge);
            paths.push(Path { nodes, edges });
        }
    }
    Ok(paths)
}

/// Computers holding a session of any transitive group member
pub fn fetch_group_sessions(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    group: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(fetch_group_session_paths(ctx, tx, group)?.terminals().slice(skip, limit))
}
