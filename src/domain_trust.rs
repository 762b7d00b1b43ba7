//! Domain trust traversals
//!
//! `TrustedBy` points from the trusted domain to the trusting one. Walking it
//! outbound lists the domains that trust the root; inbound lists the domains
//! the root trusts. The two sets are generally different.

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeSet, PathSet};
use crate::kinds::{EdgeKind, NodeKind};
use crate::properties::keys;
use crate::query::{self, Target};
use crate::traversal::{follow, traverse, SegmentTree, TraversalPlan};

fn trust_tree(ctx: &AnalysisContext, tx: &dyn Transaction, domain: &Node, direction: Direction) -> Result<SegmentTree> {
    let rule = follow(query::and(vec![
        query::edge_kind(EdgeKind::TrustedBy),
        query::kind(Target::Start, NodeKind::Domain),
        query::kind(Target::End, NodeKind::Domain),
    ]));
    traverse(
        ctx,
        tx,
        TraversalPlan {
            root: domain.clone(),
            direction,
            branch: &rule,
        },
    )
}

pub fn fetch_domain_trust_paths(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    domain: &Node,
    direction: Direction,
) -> Result<PathSet> {
    Ok(trust_tree(ctx, tx, domain, direction)?.paths_where(|_| true))
}

/// Domains reachable over transitive trusts in `direction`
pub fn fetch_domain_trusts(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    domain: &Node,
    direction: Direction,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(trust_tree(ctx, tx, domain, direction)?
        .nodes_where(|_| true)
        .slice(skip, limit))
}

/// Domains whose data was actually collected
pub fn fetch_collected_domains(tx: &dyn Transaction) -> Result<NodeSet> {
    Ok(tx
        .nodes(
            &query::and(vec![
                query::kind(Target::Node, NodeKind::Domain),
                query::equals(Target::Node, keys::COLLECTED, true),
            ]),
            0,
            0,
        )?
        .into_iter()
        .collect())
}
