//! GPO enforcement
//!
//! A GPO linked to a container applies to everything below it unless some
//! container on the way down blocks inheritance. Enforced links ignore
//! blocking. Both directions are covered here:
//!
//! - upward, from an anchor to the GPOs that apply to it
//! - downward, from a GPO to the containers and principals it affects
//!
//! The blocking window is the same in both: every container from the anchor
//! (inclusive) up to the linked container (exclusive).

use crate::analysis_context::AnalysisContext;
use crate::delegates::CandidateFilter;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeSet, Path, PathSet, Relationship};
use crate::kinds::{EdgeKind, NodeKind};
use crate::properties::keys;
use crate::query::{self, Criteria, Target};
use crate::traversal::{follow, traverse, SegmentTree, SegmentView, TraversalPlan};
use tracing::debug;

fn is_enforced(link: &Relationship) -> Result<bool> {
    link.properties.get_bool_or(keys::ENFORCED, false)
}

fn blocks_inheritance(node: &Node) -> Result<bool> {
    node.properties.get_bool_or(keys::BLOCKS_INHERITANCE, false)
}

fn container_tree(ctx: &AnalysisContext, tx: &dyn Transaction, anchor: &Node) -> Result<SegmentTree> {
    let rule = follow(query::edge_kind(EdgeKind::Contains));
    traverse(
        ctx,
        tx,
        TraversalPlan {
            root: anchor.clone(),
            direction: Direction::Inbound,
            branch: &rule,
        },
    )
}

/// Paths from the anchor up through its containers to every GPO that applies
pub fn fetch_enforced_gpo_paths(ctx: &AnalysisContext, tx: &dyn Transaction, anchor: &Node) -> Result<PathSet> {
    let containers = container_tree(ctx, tx, anchor)?;
    let links = query::and(vec![
        query::edge_kind(EdgeKind::GPLink),
        query::kind(Target::Start, NodeKind::GPO),
    ]);

    let mut paths = PathSet::new();
    for view in containers.views() {
        ctx.check("gpo enforcement")?;

        let trail = view.to_path();
        let mut blocked = false;
        for node in &trail.nodes[..trail.nodes.len() - 1] {
            if blocks_inheritance(node)? {
                blocked = true;
                break;
            }
        }

        for (link, gpo) in tx.expand(view.node().id, Direction::Inbound, &links)? {
            if blocked && !is_enforced(&link)? {
                debug!(
                    "GPO {} linked at {} blocked before reaching {}",
                    gpo.display_name(),
                    view.node().display_name(),
                    anchor.display_name()
                );
                continue;
            }
            let Path { mut nodes, mut edges } = trail.clone();
            nodes.push(gpo);
            edges.push(link);
            paths.push(Path { nodes, edges });
        }
    }
    Ok(paths)
}

/// GPOs that apply to the anchor
pub fn fetch_enforced_gpos(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    anchor: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(fetch_enforced_gpo_paths(ctx, tx, anchor)?.terminals().slice(skip, limit))
}

/// Union of the GPOs applying to any of the targets
pub fn fetch_all_enforced_gpos(ctx: &AnalysisContext, tx: &dyn Transaction, targets: &NodeSet) -> Result<NodeSet> {
    let mut gpos = NodeSet::new();
    for target in targets.iter() {
        gpos.union(fetch_enforced_gpos(ctx, tx, target, 0, 0)?);
    }
    Ok(gpos)
}

/// The GPLink a downward segment descends from
fn originating_link<'t>(view: &SegmentView<'t>) -> Option<&'t Relationship> {
    if view.depth() == 1 {
        return view.edge();
    }
    view.ancestors().find(|a| a.depth() == 1).and_then(|a| a.edge())
}

/// Everything a GPO reaches: its linked containers, then `Contains*` below
/// them, stopping at blocking containers for unenforced links
pub fn gpo_affected_tree(ctx: &AnalysisContext, tx: &dyn Transaction, gpo: &Node) -> Result<SegmentTree> {
    let unblocked = query::and(vec![
        query::edge_kind(EdgeKind::Contains),
        query::not(query::equals(Target::End, keys::BLOCKS_INHERITANCE, true)),
    ]);
    let rule = move |view: &SegmentView<'_>| -> Option<Criteria> {
        if view.is_root() {
            return Some(query::edge_kind(EdgeKind::GPLink));
        }
        let enforced = originating_link(view)
            .map(|link| link.properties.get_bool_or(keys::ENFORCED, false).unwrap_or(false))
            .unwrap_or(false);
        if enforced {
            Some(query::edge_kind(EdgeKind::Contains))
        } else {
            Some(unblocked.clone())
        }
    };
    traverse(
        ctx,
        tx,
        TraversalPlan {
            root: gpo.clone(),
            direction: Direction::Outbound,
            branch: &rule,
        },
    )
}

fn is_gpo_container(node: &Node) -> bool {
    node.has_any_kind(&[NodeKind::OU, NodeKind::Domain])
}

/// Paths from the GPO to every OU and domain it affects
pub fn fetch_gpo_affected_container_paths(ctx: &AnalysisContext, tx: &dyn Transaction, gpo: &Node) -> Result<PathSet> {
    Ok(gpo_affected_tree(ctx, tx, gpo)?.paths_where(|v| is_gpo_container(v.node())))
}

pub fn fetch_gpo_affected_paths(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    gpo: &Node,
    filter: &dyn CandidateFilter,
) -> Result<PathSet> {
    Ok(gpo_affected_tree(ctx, tx, gpo)?.paths_where(|v| filter.select(v.node())))
}

/// Nodes the GPO affects that pass `filter`
pub fn fetch_gpo_affected(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    gpo: &Node,
    filter: &dyn CandidateFilter,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(gpo_affected_tree(ctx, tx, gpo)?
        .nodes_where(|v| filter.select(v.node()))
        .slice(skip, limit))
}

/// GPOs linked directly to a container, enforced or not
pub fn fetch_entity_linked_gpo_paths(ctx: &AnalysisContext, tx: &dyn Transaction, container: &Node) -> Result<PathSet> {
    ctx.check("linked gpo lookup")?;
    let links = query::and(vec![
        query::edge_kind(EdgeKind::GPLink),
        query::kind(Target::Start, NodeKind::GPO),
    ]);
    Ok(tx
        .expand(container.id, Direction::Inbound, &links)?
        .into_iter()
        .map(|(link, gpo)| Path {
            nodes: vec![container.clone(), gpo],
            edges: vec![link],
        })
        .collect())
}

pub fn fetch_entity_linked_gpo_list(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    container: &Node,
    skip: usize,
    limit: usize,
) -> Result<NodeSet> {
    Ok(fetch_entity_linked_gpo_paths(ctx, tx, container)?
        .terminals()
        .slice(skip, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegates::GpoCandidateFilter;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::graph_types::NodeId;
    use crate::properties::Properties;

    struct Harness {
        graph: MemoryGraph,
        domain: NodeId,
        ou_a: NodeId,
        ou_c: NodeId,
        ou_d: NodeId,
        user_a: NodeId,
        user_c: NodeId,
        user_d: NodeId,
        enforced: NodeId,
        unenforced: NodeId,
    }

    // domain ─ GPLink(enforced) ← gpo_enforced
    //        ─ GPLink           ← gpo_unenforced
    // domain ⊃ ou_a (blocks) ⊃ ou_c ⊃ user_c ; ou_a ⊃ user_a
    // domain ⊃ ou_b ⊃ ou_d ⊃ user_d ; ou_b ⊃ user_b
    fn harness() -> Harness {
        let graph = MemoryGraph::new();
        let ids = graph
            .write_transaction(|tx| {
                let mut new = |kind, props: Properties| -> Result<NodeId> {
                    Ok(tx.create_node(vec![NodeKind::Base, kind], props)?.id)
                };
                let domain = new(NodeKind::Domain, Properties::new())?;
                let ou_a = new(NodeKind::OU, Properties::new().with(keys::BLOCKS_INHERITANCE, true))?;
                let ou_b = new(NodeKind::OU, Properties::new().with(keys::BLOCKS_INHERITANCE, false))?;
                let ou_c = new(NodeKind::OU, Properties::new())?;
                let ou_d = new(NodeKind::OU, Properties::new())?;
                let user_a = new(NodeKind::User, Properties::new())?;
                let user_b = new(NodeKind::User, Properties::new())?;
                let user_c = new(NodeKind::User, Properties::new())?;
                let user_d = new(NodeKind::User, Properties::new())?;
                let enforced = new(NodeKind::GPO, Properties::new())?;
                let unenforced = new(NodeKind::GPO, Properties::new())?;

                tx.create_relationship(enforced, domain, EdgeKind::GPLink, Properties::new().with(keys::ENFORCED, true))?;
                tx.create_relationship(unenforced, domain, EdgeKind::GPLink, Properties::new().with(keys::ENFORCED, false))?;
                for (start, end) in [
                    (domain, ou_a),
                    (domain, ou_b),
                    (ou_a, ou_c),
                    (ou_b, ou_d),
                    (ou_a, user_a),
                    (ou_b, user_b),
                    (ou_c, user_c),
                    (ou_d, user_d),
                ] {
                    tx.create_relationship(start, end, EdgeKind::Contains, Properties::new())?;
                }
                Ok([domain, ou_a, ou_c, ou_d, user_a, user_c, user_d, enforced, unenforced])
            })
            .unwrap();
        let [domain, ou_a, ou_c, ou_d, user_a, user_c, user_d, enforced, unenforced] = ids;
        Harness { graph, domain, ou_a, ou_c, ou_d, user_a, user_c, user_d, enforced, unenforced }
    }

    #[test]
    fn test_blocked_ou_only_receives_enforced_gpo() {
        let h = harness();
        let snapshot = h.graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();

        let ou_c = snapshot.node(h.ou_c).unwrap();
        let gpos = fetch_enforced_gpos(&ctx, &snapshot, &ou_c, 0, 0).unwrap();
        assert_eq!(gpos.ids(), vec![h.enforced]);

        let paths = fetch_enforced_gpo_paths(&ctx, &snapshot, &ou_c).unwrap();
        let nodes = paths.all_nodes();
        assert_eq!(nodes.len(), 4);
        assert!(nodes.contains(h.ou_a) && nodes.contains(h.domain));
        assert!(paths.iter().all(|p| p.is_well_formed()));

        let user_c = snapshot.node(h.user_c).unwrap();
        assert_eq!(fetch_enforced_gpo_paths(&ctx, &snapshot, &user_c).unwrap().all_nodes().len(), 5);
    }

    #[test]
    fn test_unblocked_ou_receives_both_gpos() {
        let h = harness();
        let snapshot = h.graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();

        let ou_d = snapshot.node(h.ou_d).unwrap();
        let gpos = fetch_enforced_gpos(&ctx, &snapshot, &ou_d, 0, 0).unwrap();
        assert_eq!(gpos.ids(), vec![h.enforced, h.unenforced]);
        assert_eq!(fetch_enforced_gpo_paths(&ctx, &snapshot, &ou_d).unwrap().all_nodes().len(), 5);

        let user_d = snapshot.node(h.user_d).unwrap();
        assert_eq!(fetch_enforced_gpo_paths(&ctx, &snapshot, &user_d).unwrap().all_nodes().len(), 6);

        let targets: NodeSet = vec![ou_d, snapshot.node(h.ou_c).unwrap()].into_iter().collect();
        assert_eq!(fetch_all_enforced_gpos(&ctx, &snapshot, &targets).unwrap().len(), 2);
    }

    #[test]
    fn test_blocking_anchor_is_inclusive() {
        let h = harness();
        let snapshot = h.graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();

        let ou_a = snapshot.node(h.ou_a).unwrap();
        assert_eq!(fetch_enforced_gpos(&ctx, &snapshot, &ou_a, 0, 0).unwrap().ids(), vec![h.enforced]);
    }

    #[test]
    fn test_affected_containers_and_users() {
        let h = harness();
        let snapshot = h.graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();

        let enforced = snapshot.node(h.enforced).unwrap();
        let containers =
            fetch_gpo_affected(&ctx, &snapshot, &enforced, &GpoCandidateFilter::GpoContainer, 0, 0).unwrap();
        assert_eq!(containers.len(), 5);
        assert_eq!(containers.containing_node_kinds(&[NodeKind::OU]).len(), 4);
        assert_eq!(
            fetch_gpo_affected_container_paths(&ctx, &snapshot, &enforced).unwrap().all_nodes().len(),
            6
        );
        let users = fetch_gpo_affected(&ctx, &snapshot, &enforced, &GpoCandidateFilter::Users, 0, 0).unwrap();
        assert_eq!(users.len(), 4);

        let unenforced = snapshot.node(h.unenforced).unwrap();
        let containers =
            fetch_gpo_affected(&ctx, &snapshot, &unenforced, &GpoCandidateFilter::GpoContainer, 0, 0).unwrap();
        assert!(!containers.contains(h.ou_a));
        assert!(!containers.contains(h.ou_c));
        assert_eq!(containers.len(), 3);

        let users = fetch_gpo_affected(&ctx, &snapshot, &unenforced, &GpoCandidateFilter::Users, 0, 0).unwrap();
        assert_eq!(users.len(), 2);
        assert!(!users.contains(h.user_c));
        assert!(!users.contains(h.user_a));

        let paths = fetch_gpo_affected_paths(&ctx, &snapshot, &unenforced, &GpoCandidateFilter::Users).unwrap();
        assert_eq!(paths.terminals().ids(), users.ids());
    }

    #[test]
    fn test_tier_zero_filter() {
        let h = harness();
        h.graph
            .write_transaction(|tx| {
                for id in [h.user_c, h.user_d] {
                    let mut node = tx.node(id)?;
                    node.properties.add_tag(keys::SYSTEM_TAGS, "admin_tier_0");
                    tx.update_node(&node)?;
                }
                Ok(())
            })
            .unwrap();
        let snapshot = h.graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();

        let enforced = snapshot.node(h.enforced).unwrap();
        assert_eq!(
            fetch_gpo_affected(&ctx, &snapshot, &enforced, &GpoCandidateFilter::GpoTierZero, 0, 0)
                .unwrap()
                .len(),
            2
        );
        let unenforced = snapshot.node(h.unenforced).unwrap();
        assert_eq!(
            fetch_gpo_affected(&ctx, &snapshot, &unenforced, &GpoCandidateFilter::GpoTierZero, 0, 0)
                .unwrap()
                .ids(),
            vec![h.user_d]
        );
    }

    #[test]
    fn test_entity_linked_gpos() {
        let h = harness();
        let snapshot = h.graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();

        let domain = snapshot.node(h.domain).unwrap();
        assert_eq!(fetch_entity_linked_gpo_list(&ctx, &snapshot, &domain, 0, 0).unwrap().len(), 2);
        assert_eq!(fetch_entity_linked_gpo_paths(&ctx, &snapshot, &domain).unwrap().all_nodes().len(), 3);

        let ou_d = snapshot.node(h.ou_d).unwrap();
        assert!(fetch_entity_linked_gpo_list(&ctx, &snapshot, &ou_d, 0, 0).unwrap().is_empty());
    }
}
