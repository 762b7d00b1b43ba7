//! Cross-domain exposure
//!
//! A node is foreign to a domain when its `domainsid` is present and differs
//! from the domain's object id. Nodes without a `domainsid` are never
//! reported as foreign.

use crate::analysis_context::AnalysisContext;
use crate::entity_control::inbound_controller_tree;
use crate::errors::Result;
use crate::graph_ops::{domain_sid, fetch_domain_members};
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeSet, PathSet};
use crate::kinds::{EdgeKind, NodeKind};
use crate::local_groups::inbound_local_group_tree;
use crate::query;
use crate::traversal::{follow, traverse, TraversalPlan};
use tracing::debug;

fn is_foreign(node: &Node, sid: &str) -> bool {
    match node.domain_sid() {
        Some(found) => found != sid,
        None => {
            debug!("Skipping {} without a domain sid", node.display_name());
            false
        }
    }
}

/// Paths from each of the domain's groups to foreign members of `kind`
pub fn fetch_foreign_entity_membership_paths(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    domain: &Node,
    kind: NodeKind,
) -> Result<PathSet> {
    let sid = domain_sid(domain)?;
    let rule = follow(query::edge_kind(EdgeKind::MemberOf));

    let mut paths = PathSet::new();
    for group in fetch_domain_members(tx, NodeKind::Group, sid)? {
        ctx.check("foreign membership")?;
        let tree = traverse(
            ctx,
            tx,
            TraversalPlan {
                root: group,
                direction: Direction::Inbound,
                branch: &rule,
            },
        )?;
        paths.extend(tree.paths_where(|v| v.node().has_kind(kind) && is_foreign(v.node(), sid)));
    }
    Ok(paths)
}

/// Foreign nodes of `kind` that are members of any group in the domain
pub fn fetch_foreign_entity_membership(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    domain: &Node,
    kind: NodeKind,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(fetch_foreign_entity_membership_paths(ctx, tx, domain, kind)?
        .terminals()
        .slice(skip, limit))
}

/// Paths to foreign principals holding `AdminTo` on the domain's computers
pub fn fetch_foreign_admin_paths(ctx: &AnalysisContext, tx: &dyn Transaction, domain: &Node) -> Result<PathSet> {
    let sid = domain_sid(domain)?;
    let mut paths = PathSet::new();
    for computer in fetch_domain_members(tx, NodeKind::Computer, sid)? {
        let tree = inbound_local_group_tree(ctx, tx, &computer, EdgeKind::AdminTo)?;
        paths.extend(tree.paths_where(|v| v.is_leaf() && is_foreign(v.node(), sid)));
    }
    Ok(paths)
}

pub fn fetch_foreign_admins(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    domain: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(fetch_foreign_admin_paths(ctx, tx, domain)?.terminals().slice(skip, limit))
}

/// Paths to foreign principals controlling the domain's GPOs
pub fn fetch_foreign_gpo_controller_paths(ctx: &AnalysisContext, tx: &dyn Transaction, domain: &Node) -> Result<PathSet> {
    let sid = domain_sid(domain)?;
    let mut paths = PathSet::new();
    for gpo in fetch_domain_members(tx, NodeKind::GPO, sid)? {
        let tree = inbound_controller_tree(ctx, tx, &gpo)?;
        paths.extend(tree.paths_where(|v| is_foreign(v.node(), sid)));
    }
    Ok(paths)
}

pub fn fetch_foreign_gpo_controllers(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    domain: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(fetch_foreign_gpo_controller_paths(ctx, tx, domain)?
        .terminals()
        .slice(skip, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::graph_types::NodeId;
    use crate::properties::{keys, Properties};

    const LOCAL: &str = "S-1-5-21-100";
    const REMOTE: &str = "S-1-5-21-200";

    fn principal(tx: &mut dyn WriteTransaction, kind: NodeKind, sid: Option<&str>) -> Result<NodeId> {
        let mut props = Properties::new();
        if let Some(sid) = sid {
            props.set(keys::DOMAIN_SID, sid);
        }
        Ok(tx.create_node(vec![NodeKind::Base, kind], props)?.id)
    }

    struct Fixture {
        graph: MemoryGraph,
        domain: NodeId,
        foreign_user: NodeId,
        foreign_group: NodeId,
    }

    fn fixture() -> Fixture {
        let graph = MemoryGraph::new();
        let (domain, foreign_user, foreign_group) = graph
            .write_transaction(|tx| {
                let domain = tx
                    .create_node(vec![NodeKind::Base, NodeKind::Domain], Properties::new().with(keys::OBJECT_ID, LOCAL))?
                    .id;
                let group = principal(tx, NodeKind::Group, Some(LOCAL))?;
                let local_user = principal(tx, NodeKind::User, Some(LOCAL))?;
                let foreign_user = principal(tx, NodeKind::User, Some(REMOTE))?;
                let foreign_group = principal(tx, NodeKind::Group, Some(REMOTE))?;
                let unknown = principal(tx, NodeKind::User, None)?;
                let computer = principal(tx, NodeKind::Computer, Some(LOCAL))?;
                let gpo = principal(tx, NodeKind::GPO, Some(LOCAL))?;

                for (start, end, kind) in [
                    (local_user, group, EdgeKind::MemberOf),
                    (foreign_group, group, EdgeKind::MemberOf),
                    (foreign_user, foreign_group, EdgeKind::MemberOf),
                    (unknown, group, EdgeKind::MemberOf),
                    (group, computer, EdgeKind::AdminTo),
                    (foreign_user, gpo, EdgeKind::GenericWrite),
                ] {
                    tx.create_relationship(start, end, kind, Properties::new())?;
                }
                Ok((domain, foreign_user, foreign_group))
            })
            .unwrap();
        Fixture { graph, domain, foreign_user, foreign_group }
    }

    #[test]
    fn test_foreign_members_by_kind() {
        let f = fixture();
        let snapshot = f.graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();
        let domain = snapshot.node(f.domain).unwrap();

        let users = fetch_foreign_entity_membership(&ctx, &snapshot, &domain, NodeKind::User, 0, 0).unwrap();
        assert_eq!(users.ids(), vec![f.foreign_user]);
        let groups = fetch_foreign_entity_membership(&ctx, &snapshot, &domain, NodeKind::Group, 0, 0).unwrap();
        assert_eq!(groups.ids(), vec![f.foreign_group]);

        let paths = fetch_foreign_entity_membership_paths(&ctx, &snapshot, &domain, NodeKind::User).unwrap();
        assert!(paths.iter().all(|p| p.is_well_formed()));
        assert_eq!(paths.all_nodes().len(), 3);
    }

    #[test]
    fn test_foreign_admins_and_gpo_controllers() {
        let f = fixture();
        let snapshot = f.graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();
        let domain = snapshot.node(f.domain).unwrap();

        assert_eq!(fetch_foreign_admins(&ctx, &snapshot, &domain, 0, 0).unwrap().ids(), vec![f.foreign_user]);
        assert_eq!(
            fetch_foreign_gpo_controllers(&ctx, &snapshot, &domain, 0, 0).unwrap().ids(),
            vec![f.foreign_user]
        );
    }
}
