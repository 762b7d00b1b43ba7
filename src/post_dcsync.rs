//! Replication-derived edges: `DCSync` and `SyncLAPSPassword`

use crate::analysis_context::{AnalysisContext, CompositionCounter};
use crate::errors::Result;
use crate::graph_ops::{domain_sid, fetch_domain_members};
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeId, Relationship};
use crate::group_expansion::GroupExpansions;
use crate::kinds::{EdgeKind, NodeKind};
use crate::post_processing::DerivedEdges;
use crate::properties::keys;
use crate::query;
use std::collections::BTreeSet;

/// Edges of `right` into the domain
fn grants(tx: &dyn Transaction, domain: &Node, right: EdgeKind) -> Result<Vec<Relationship>> {
    Ok(tx
        .expand(domain.id, Direction::Inbound, &query::edge_kind(right))?
        .into_iter()
        .map(|(rel, _)| rel)
        .collect())
}

fn holders(grants: &[Relationship], expansions: &GroupExpansions) -> BTreeSet<NodeId> {
    expansions.expand_holders(grants.iter().map(|rel| rel.start))
}

/// Grants in `grants` that reach `principal`, directly or through a group
fn justifying<'g>(
    grants: &'g [Relationship],
    principal: NodeId,
    expansions: &'g GroupExpansions,
) -> impl Iterator<Item = &'g Relationship> + 'g {
    grants
        .iter()
        .filter(move |rel| rel.start == principal || expansions.is_member(principal, rel.start))
}

/// Every principal holding both `GetChanges` and `GetChangesAll` on the
/// domain, through itself or its groups, gets `DCSync` to the domain
pub fn derive_dcsync(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    domain: &Node,
    expansions: &GroupExpansions,
    counter: &CompositionCounter,
) -> Result<DerivedEdges> {
    ctx.check("dcsync")?;
    let get_changes = grants(tx, domain, EdgeKind::GetChanges)?;
    let get_changes_all = grants(tx, domain, EdgeKind::GetChangesAll)?;

    let mut edges = DerivedEdges::new();
    let both = holders(&get_changes, expansions);
    for principal in both.intersection(&holders(&get_changes_all, expansions)) {
        let justification: Vec<&Relationship> = justifying(&get_changes, *principal, expansions)
            .chain(justifying(&get_changes_all, *principal, expansions))
            .collect();
        edges.insert_composed(
            *principal,
            domain.id,
            EdgeKind::DCSync,
            counter,
            justification
                .iter()
                .flat_map(|rel| [rel.start, rel.end])
                .chain([*principal]),
            justification.iter().map(|rel| rel.id),
        );
    }
    Ok(edges)
}

/// Holders of both `GetChanges` and `GetChangesInFilteredSet` can read the
/// LAPS password of every LAPS-enabled computer in the domain
pub fn derive_sync_laps_password(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    domain: &Node,
    expansions: &GroupExpansions,
) -> Result<DerivedEdges> {
    ctx.check("sync laps password")?;
    let get_changes = grants(tx, domain, EdgeKind::GetChanges)?;
    let filtered_set = grants(tx, domain, EdgeKind::GetChangesInFilteredSet)?;
    let principals: BTreeSet<NodeId> = holders(&get_changes, expansions)
        .intersection(&holders(&filtered_set, expansions))
        .copied()
        .collect();

    let mut edges = DerivedEdges::new();
    if principals.is_empty() {
        return Ok(edges);
    }

    let sid = domain_sid(domain)?;
    for computer in fetch_domain_members(tx, NodeKind::Computer, sid)? {
        if !computer.properties.get_bool_or(keys::HAS_LAPS, false)? {
            continue;
        }
        for principal in &principals {
            edges.insert(*principal, computer.id, EdgeKind::SyncLAPSPassword);
        }
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::group_expansion::expand_all_groups;
    use crate::properties::Properties;

    const SID: &str = "S-1-5-21-7";

    struct Fixture {
        graph: MemoryGraph,
        domain: NodeId,
        group: NodeId,
        member: NodeId,
        partial: NodeId,
        laps: NodeId,
    }

    fn fixture() -> Fixture {
        let graph = MemoryGraph::new();
        let ids = graph
            .write_transaction(|tx| {
                let domain = tx
                    .create_node(vec![NodeKind::Base, NodeKind::Domain], Properties::new().with(keys::OBJECT_ID, SID))?
                    .id;
                let in_domain = || Properties::new().with(keys::DOMAIN_SID, SID);
                let group = tx.create_node(vec![NodeKind::Base, NodeKind::Group], in_domain())?.id;
                let member = tx.create_node(vec![NodeKind::Base, NodeKind::User], in_domain())?.id;
                let partial = tx.create_node(vec![NodeKind::Base, NodeKind::User], in_domain())?.id;
                let laps = tx
                    .create_node(vec![NodeKind::Base, NodeKind::Computer], in_domain().with(keys::HAS_LAPS, true))?
                    .id;
                tx.create_node(vec![NodeKind::Base, NodeKind::Computer], in_domain())?;

                for (start, end, kind) in [
                    (member, group, EdgeKind::MemberOf),
                    (group, domain, EdgeKind::GetChanges),
                    (member, domain, EdgeKind::GetChangesAll),
                    (partial, domain, EdgeKind::GetChanges),
                    (group, domain, EdgeKind::GetChangesInFilteredSet),
                ] {
                    tx.create_relationship(start, end, kind, Properties::new())?;
                }
                Ok([domain, group, member, partial, laps])
            })
            .unwrap();
        let [domain, group, member, partial, laps] = ids;
        Fixture { graph, domain, group, member, partial, laps }
    }

    #[test]
    fn test_dcsync_requires_both_rights() {
        let f = fixture();
        let snapshot = f.graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();
        let expansions = expand_all_groups(&ctx, &snapshot).unwrap();
        let counter = CompositionCounter::new();
        let domain = snapshot.node(f.domain).unwrap();

        let edges = derive_dcsync(&ctx, &snapshot, &domain, &expansions, &counter).unwrap();
        assert_eq!(edges.len(), 1);
        assert!(edges.contains(f.member, f.domain, EdgeKind::DCSync));
        assert!(!edges.contains(f.partial, f.domain, EdgeKind::DCSync));

        let key = edges.keys().next().unwrap();
        let record = edges.composition(key).unwrap();
        assert_eq!(record.relationship_ids.len(), 2);
        assert!(record.node_ids.contains(&f.group));
    }

    #[test]
    fn test_sync_laps_targets_laps_computers() {
        let f = fixture();
        let snapshot = f.graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();
        let expansions = expand_all_groups(&ctx, &snapshot).unwrap();
        let domain = snapshot.node(f.domain).unwrap();

        let edges = derive_sync_laps_password(&ctx, &snapshot, &domain, &expansions).unwrap();
        // The group and its member hold both rights
        assert_eq!(edges.len(), 2);
        assert!(edges.contains(f.group, f.laps, EdgeKind::SyncLAPSPassword));
        assert!(edges.contains(f.member, f.laps, EdgeKind::SyncLAPSPassword));
    }
}
