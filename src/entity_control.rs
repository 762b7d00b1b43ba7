//! ACL control traversals
//!
//! Inbound: who controls an entity, through an ACL edge and then the
//! members of whatever holds it. Outbound: what an entity controls, through
//! its own groups and then one ACL edge.

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeSet, PathSet};
use crate::kinds::{EdgeKind, ACL_CONTROL_KINDS};
use crate::query::{self, Criteria};
use crate::traversal::{traverse, SegmentTree, SegmentView, TraversalPlan};

fn arrived_via_acl(view: &SegmentView<'_>) -> bool {
    view.edge().map(|e| e.kind.is_acl_control()).unwrap_or(false)
}

pub fn inbound_controller_tree(ctx: &AnalysisContext, tx: &dyn Transaction, entity: &Node) -> Result<SegmentTree> {
    let rule = |view: &SegmentView<'_>| -> Option<Criteria> {
        if view.is_root() {
            Some(query::edge_kinds(ACL_CONTROL_KINDS))
        } else {
            Some(query::edge_kind(EdgeKind::MemberOf))
        }
    };
    traverse(
        ctx,
        tx,
        TraversalPlan {
            root: entity.clone(),
            direction: Direction::Inbound,
            branch: &rule,
        },
    )
}

fn outbound_control_tree(ctx: &AnalysisContext, tx: &dyn Transaction, principal: &Node) -> Result<SegmentTree> {
    let mut kinds = vec![EdgeKind::MemberOf];
    kinds.extend_from_slice(ACL_CONTROL_KINDS);
    let rule = move |view: &SegmentView<'_>| -> Option<Criteria> {
        if arrived_via_acl(view) {
            None
        } else {
            Some(query::edge_kinds(&kinds))
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

/// Paths from the entity to every direct and group-inherited controller
pub fn fetch_inbound_ad_entity_controller_paths(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    entity: &Node,
) -> Result<PathSet> {
    Ok(inbound_controller_tree(ctx, tx, entity)?.paths_where(|_| true))
}

pub fn fetch_inbound_ad_entity_controllers(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    entity: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(inbound_controller_tree(ctx, tx, entity)?
        .nodes_where(|_| true)
        .slice(skip, limit))
}

pub fn fetch_outbound_ad_entity_control_paths(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    principal: &Node,
) -> Result<PathSet> {
    Ok(outbound_control_tree(ctx, tx, principal)?.paths_where(arrived_via_acl))
}

/// Entities the principal controls, directly or through group membership
pub fn fetch_outbound_ad_entity_control(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    principal: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(outbound_control_tree(ctx, tx, principal)?
        .nodes_where(arrived_via_acl)
        .slice(skip, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::graph_types::NodeId;
    use crate::kinds::NodeKind;
    use crate::properties::Properties;

    // helpdesk ∈ operators; operators GenericAll target; alice ∈ helpdesk
    // bob ForceChangePassword target; operators MemberOf unrelated (not ACL)
    fn fixture() -> (MemoryGraph, [NodeId; 5]) {
        let graph = MemoryGraph::new();
        let ids = graph
            .write_transaction(|tx| {
                let mut new = |kind| -> Result<NodeId> {
                    Ok(tx.create_node(vec![NodeKind::Base, kind], Properties::new())?.id)
                };
                let target = new(NodeKind::User)?;
                let operators = new(NodeKind::Group)?;
                let helpdesk = new(NodeKind::Group)?;
                let alice = new(NodeKind::User)?;
                let bob = new(NodeKind::User)?;
                for (start, end, kind) in [
                    (operators, target, EdgeKind::GenericAll),
                    (helpdesk, operators, EdgeKind::MemberOf),
                    (alice, helpdesk, EdgeKind::MemberOf),
                    (bob, target, EdgeKind::ForceChangePassword),
                    (target, operators, EdgeKind::HasSession),
                ] {
                    tx.create_relationship(start, end, kind, Properties::new())?;
                }
                Ok([target, operators, helpdesk, alice, bob])
            })
            .unwrap();
        (graph, ids)
    }

    #[test]
    fn test_inbound_controllers_include_group_members() {
        let (graph, [target, operators, helpdesk, alice, bob]) = fixture();
        let snapshot = graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();

        let target = snapshot.node(target).unwrap();
        let controllers = fetch_inbound_ad_entity_controllers(&ctx, &snapshot, &target, 0, 0).unwrap();
        assert_eq!(controllers.ids(), vec![operators, helpdesk, alice, bob]);

        let paths = fetch_inbound_ad_entity_controller_paths(&ctx, &snapshot, &target).unwrap();
        assert_eq!(paths.terminals().ids(), controllers.ids());
        assert!(paths.iter().all(|p| p.is_well_formed()));
    }

    #[test]
    fn test_outbound_control_through_groups() {
        let (graph, [target, _, _, alice, _]) = fixture();
        let snapshot = graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();

        let alice = snapshot.node(alice).unwrap();
        let controlled = fetch_outbound_ad_entity_control(&ctx, &snapshot, &alice, 0, 0).unwrap();
        assert_eq!(controlled.ids(), vec![target]);

        let paths = fetch_outbound_ad_entity_control_paths(&ctx, &snapshot, &alice).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths.all_nodes().len(), 4);
    }
}
