//! GPO application edges: `GPOAppliesTo` and `CanApplyGPO`

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::gpo_enforcement::gpo_affected_tree;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node};
use crate::kinds::{EdgeKind, NodeKind, GPLINK_CONTROL_KINDS};
use crate::post_processing::DerivedEdges;
use crate::query::{self, Target};

/// `GPOAppliesTo` from the GPO to every user and computer it reaches,
/// honoring enforcement and blocked inheritance
pub fn derive_gpo_applies_to(ctx: &AnalysisContext, tx: &dyn Transaction, gpo: &Node) -> Result<DerivedEdges> {
    let tree = gpo_affected_tree(ctx, tx, gpo)?;
    let mut edges = DerivedEdges::new();
    for view in tree.views().skip(1) {
        let node = view.node();
        if node.has_any_kind(&[NodeKind::User, NodeKind::Computer]) {
            edges.insert(gpo.id, node.id, EdgeKind::GPOAppliesTo);
        }
    }
    Ok(edges)
}

/// `CanApplyGPO` from every principal that can change a container's GPO links
pub fn derive_can_apply_gpo(ctx: &AnalysisContext, tx: &dyn Transaction, container: &Node) -> Result<DerivedEdges> {
    ctx.check("can apply gpo")?;
    let mut edges = DerivedEdges::new();
    for (rel, _) in tx.expand(container.id, Direction::Inbound, &query::edge_kinds(GPLINK_CONTROL_KINDS))? {
        edges.insert(rel.start, container.id, EdgeKind::CanApplyGPO);
    }
    Ok(edges)
}

pub fn fetch_gpos(tx: &dyn Transaction) -> Result<Vec<Node>> {
    tx.nodes(&query::kind(Target::Node, NodeKind::GPO), 0, 0)
}

/// OUs and domains: the containers a GPO can be linked to
pub fn fetch_linkable_containers(tx: &dyn Transaction) -> Result<Vec<Node>> {
    tx.nodes(&query::kind_in(Target::Node, &[NodeKind::OU, NodeKind::Domain]), 0, 0)
}
