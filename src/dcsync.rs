//! Directory replication rights
//!
//! A user or computer can DCSync a domain when it holds `DCSync` on the
//! domain, or holds both `GetChanges` and `GetChangesAll`, in every case
//! either directly or through the groups it belongs to.

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeId, NodeSet, PathSet};
use crate::kinds::{EdgeKind, NodeKind};
use crate::query::{self, Criteria};
use crate::traversal::{traverse, SegmentTree, SegmentView, TraversalPlan};
use std::collections::BTreeSet;

/// Holders of `right` on the domain, followed by their transitive members
pub fn replication_right_tree(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    domain: &Node,
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
            root: domain.clone(),
            direction: Direction::Inbound,
            branch: &rule,
        },
    )
}

fn principal_ids(tree: &SegmentTree) -> BTreeSet<NodeId> {
    tree.views()
        .filter(|v| !v.is_root() && v.node().has_any_kind(&[NodeKind::User, NodeKind::Computer]))
        .map(|v| v.node().id)
        .collect()
}

struct ReplicationTrees {
    dcsync: SegmentTree,
    get_changes: SegmentTree,
    get_changes_all: SegmentTree,
    via_dcsync: BTreeSet<NodeId>,
    via_pair: BTreeSet<NodeId>,
}

fn replication_trees(ctx: &AnalysisContext, tx: &dyn Transaction, domain: &Node) -> Result<ReplicationTrees> {
    let dcsync = replication_right_tree(ctx, tx, domain, EdgeKind::DCSync)?;
    let get_changes = replication_right_tree(ctx, tx, domain, EdgeKind::GetChanges)?;
    let get_changes_all = replication_right_tree(ctx, tx, domain, EdgeKind::GetChangesAll)?;

    let via_dcsync = principal_ids(&dcsync);
    let via_pair = principal_ids(&get_changes)
        .intersection(&principal_ids(&get_changes_all))
        .copied()
        .filter(|id| !via_dcsync.contains(id))
        .collect();

    Ok(ReplicationTrees {
        dcsync,
        get_changes,
        get_changes_all,
        via_dcsync,
        via_pair,
    })
}

/// Paths from the domain through each granting edge to every DCSync-capable principal
pub fn fetch_dcsyncer_paths(ctx: &AnalysisContext, tx: &dyn Transaction, domain: &Node) -> Result<PathSet> {
    let trees = replication_trees(ctx, tx, domain)?;
    let mut paths = trees.dcsync.paths_where(|v| trees.via_dcsync.contains(&v.node().id));
    paths.extend(trees.get_changes.paths_where(|v| trees.via_pair.contains(&v.node().id)));
    paths.extend(trees.get_changes_all.paths_where(|v| trees.via_pair.contains(&v.node().id)));
    Ok(paths)
}

/// Users and computers able to replicate secrets from the domain
pub fn fetch_dcsyncers(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    domain: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(fetch_dcsyncer_paths(ctx, tx, domain)?.terminals().slice(skip, limit))
}
