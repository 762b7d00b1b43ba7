//! Flattened group membership
//!
//! Computed once at the start of AD post-processing and handed by value to
//! the steps that need transitive membership, so each of them avoids
//! re-walking `MemberOf` chains.

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, NodeId};
use crate::kinds::{EdgeKind, NodeKind};
use crate::query::{self, Target};
use crate::traversal::{follow, traverse, TraversalPlan};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct GroupExpansions {
    /// group -> transitive members
    members: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// principal -> every group it belongs to, directly or through nesting
    memberships: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl GroupExpansions {
    pub fn members_of(&self, group: NodeId) -> Option<&BTreeSet<NodeId>> {
        self.members.get(&group)
    }

    pub fn groups_of(&self, principal: NodeId) -> Option<&BTreeSet<NodeId>> {
        self.memberships.get(&principal)
    }

    pub fn is_member(&self, principal: NodeId, group: NodeId) -> bool {
        self.members.get(&group).map(|m| m.contains(&principal)).unwrap_or(false)
    }

    /// The holders themselves plus the transitive members of any group among them
    pub fn expand_holders(&self, holders: impl IntoIterator<Item = NodeId>) -> BTreeSet<NodeId> {
        let mut expanded = BTreeSet::new();
        for holder in holders {
            expanded.insert(holder);
            if let Some(members) = self.members.get(&holder) {
                expanded.extend(members.iter().copied());
            }
        }
        expanded
    }

    pub fn group_count(&self) -> usize {
        self.members.len()
    }
}

/// Expands every domain and local group in the graph
pub fn expand_all_groups(ctx: &AnalysisContext, tx: &dyn Transaction) -> Result<GroupExpansions> {
    let groups = tx.nodes(
        &query::kind_in(Target::Node, &[NodeKind::Group, NodeKind::LocalGroup]),
        0,
        0,
    )?;
    let rule = follow(query::edge_kinds(&[EdgeKind::MemberOf, EdgeKind::MemberOfLocalGroup]));

    let mut expansions = GroupExpansions::default();
    for group in groups {
        let id = group.id;
        let tree = traverse(
            ctx,
            tx,
            TraversalPlan {
                root: group,
                direction: Direction::Inbound,
                branch: &rule,
            },
        )?;
        let members: BTreeSet<NodeId> = tree.views().skip(1).map(|v| v.node().id).collect();
        for member in &members {
            expansions.memberships.entry(*member).or_default().insert(id);
        }
        expansions.members.insert(id, members);
    }

    info!("Expanded {} groups", expansions.group_count());
    Ok(expansions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::properties::Properties;

    #[test]
    fn test_nested_and_local_groups_flatten() {
        let graph = MemoryGraph::new();
        let (local, outer, inner, user) = graph
            .write_transaction(|tx| {
                let local = tx.create_node(vec![NodeKind::Base, NodeKind::LocalGroup], Properties::new())?.id;
                let outer = tx.create_node(vec![NodeKind::Base, NodeKind::Group], Properties::new())?.id;
                let inner = tx.create_node(vec![NodeKind::Base, NodeKind::Group], Properties::new())?.id;
                let user = tx.create_node(vec![NodeKind::Base, NodeKind::User], Properties::new())?.id;
                tx.create_relationship(outer, local, EdgeKind::MemberOfLocalGroup, Properties::new())?;
                tx.create_relationship(inner, outer, EdgeKind::MemberOf, Properties::new())?;
                tx.create_relationship(user, inner, EdgeKind::MemberOf, Properties::new())?;
                Ok((local, outer, inner, user))
            })
            .unwrap();

        let snapshot = graph.snapshot().unwrap();
        let expansions = expand_all_groups(&AnalysisContext::background(), &snapshot).unwrap();

        assert_eq!(expansions.group_count(), 3);
        assert!(expansions.is_member(user, local));
        assert!(expansions.is_member(user, outer));
        assert!(!expansions.is_member(outer, inner));
        assert_eq!(expansions.groups_of(user).unwrap().len(), 3);
        assert_eq!(
            expansions.expand_holders([outer]),
            BTreeSet::from([outer, inner, user])
        );
    }
}
