//! Named entity lookups for the command line
//!
//! Each lookup maps to one fetch operation or delegate and returns either the
//! node list or the paths that justify it.

use crate::analysis_context::AnalysisContext;
use crate::dcsync::{fetch_dcsyncer_paths, fetch_dcsyncers};
use crate::delegates::{
    create_direct_edge_delegate, create_domain_trust_delegate, create_entity_control_delegate,
    create_foreign_entity_membership_delegate, create_gpo_affected_intermediaries_list_delegate,
    create_local_group_delegate, create_ou_contained_delegate, GpoCandidateFilter, ListDelegate, PathDelegate,
};
use crate::errors::Result;
use crate::foreign_membership::{
    fetch_foreign_admin_paths, fetch_foreign_admins, fetch_foreign_gpo_controller_paths, fetch_foreign_gpo_controllers,
};
use crate::gpo_enforcement::{
    fetch_enforced_gpo_paths, fetch_enforced_gpos, fetch_entity_linked_gpo_list, fetch_entity_linked_gpo_paths,
};
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeSet, PathSet};
use crate::group_membership::{
    fetch_entity_group_membership, fetch_entity_group_membership_paths, fetch_group_member_paths, fetch_group_members,
};
use crate::kinds::{EdgeKind, NodeKind};
use crate::sessions::{
    fetch_computer_session_paths, fetch_computer_sessions, fetch_group_session_paths, fetch_group_sessions,
    fetch_user_session_paths, fetch_user_sessions,
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lookup {
    GroupMembers,
    GroupMembership,
    ComputerSessions,
    UserSessions,
    GroupSessions,
    LocalAdmins,
    AdminRights,
    RdpUsers,
    PsRemoteUsers,
    DcomUsers,
    ConstrainedDelegation,
    InboundControl,
    OutboundControl,
    OutboundTrusts,
    InboundTrusts,
    ForeignUsers,
    ForeignGroups,
    ForeignAdmins,
    ForeignGpoControllers,
    ContainedUsers,
    ContainedComputers,
    LinkedGpos,
    EnforcedGpos,
    GpoAffectedUsers,
    GpoAffectedComputers,
    GpoAffectedTierZero,
    Dcsyncers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LookupResult {
    Nodes(NodeSet),
    Paths(PathSet),
}

impl LookupResult {
    pub fn len(&self) -> usize {
        match self {
            LookupResult::Nodes(nodes) => nodes.len(),
            LookupResult::Paths(paths) => paths.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Operation {
    Delegate(Box<dyn Delegate>),
    Functions {
        list: fn(&AnalysisContext, &dyn Transaction, &Node, usize, usize) -> Result<NodeSet>,
        paths: fn(&AnalysisContext, &dyn Transaction, &Node) -> Result<PathSet>,
    },
}

trait Delegate: ListDelegate + PathDelegate {}
impl<T: ListDelegate + PathDelegate> Delegate for T {}

impl Lookup {
    fn operation(self) -> Operation {
        use Lookup::*;
        let delegate = |d: Box<dyn Delegate>| Operation::Delegate(d);
        match self {
            GroupMembers => Operation::Functions {
                list: fetch_group_members,
                paths: fetch_group_member_paths,
            },
            GroupMembership => Operation::Functions {
                list: fetch_entity_group_membership,
                paths: fetch_entity_group_membership_paths,
            },
            ComputerSessions => Operation::Functions {
                list: fetch_computer_sessions,
                paths: fetch_computer_session_paths,
            },
            UserSessions => Operation::Functions {
                list: fetch_user_sessions,
                paths: fetch_user_session_paths,
            },
            GroupSessions => Operation::Functions {
                list: fetch_group_sessions,
                paths: fetch_group_session_paths,
            },
            LocalAdmins => delegate(Box::new(create_local_group_delegate(EdgeKind::AdminTo, Direction::Inbound))),
            AdminRights => delegate(Box::new(create_local_group_delegate(EdgeKind::AdminTo, Direction::Outbound))),
            RdpUsers => delegate(Box::new(create_local_group_delegate(EdgeKind::CanRDP, Direction::Inbound))),
            PsRemoteUsers => delegate(Box::new(create_local_group_delegate(EdgeKind::CanPSRemote, Direction::Inbound))),
            DcomUsers => delegate(Box::new(create_local_group_delegate(EdgeKind::ExecuteDCOM, Direction::Inbound))),
            ConstrainedDelegation => {
                delegate(Box::new(create_direct_edge_delegate(EdgeKind::AllowedToDelegate, Direction::Inbound)))
            }
            InboundControl => delegate(Box::new(create_entity_control_delegate(Direction::Inbound))),
            OutboundControl => delegate(Box::new(create_entity_control_delegate(Direction::Outbound))),
            OutboundTrusts => delegate(Box::new(create_domain_trust_delegate(Direction::Outbound))),
            InboundTrusts => delegate(Box::new(create_domain_trust_delegate(Direction::Inbound))),
            ForeignUsers => delegate(Box::new(create_foreign_entity_membership_delegate(NodeKind::User))),
            ForeignGroups => delegate(Box::new(create_foreign_entity_membership_delegate(NodeKind::Group))),
            ForeignAdmins => Operation::Functions {
                list: fetch_foreign_admins,
                paths: fetch_foreign_admin_paths,
            },
            ForeignGpoControllers => Operation::Functions {
                list: fetch_foreign_gpo_controllers,
                paths: fetch_foreign_gpo_controller_paths,
            },
            ContainedUsers => delegate(Box::new(create_ou_contained_delegate(NodeKind::User))),
            ContainedComputers => delegate(Box::new(create_ou_contained_delegate(NodeKind::Computer))),
            LinkedGpos => Operation::Functions {
                list: fetch_entity_linked_gpo_list,
                paths: fetch_entity_linked_gpo_paths,
            },
            EnforcedGpos => Operation::Functions {
                list: fetch_enforced_gpos,
                paths: fetch_enforced_gpo_paths,
            },
            GpoAffectedUsers => delegate(Box::new(create_gpo_affected_intermediaries_list_delegate(
                GpoCandidateFilter::Users,
            ))),
            GpoAffectedComputers => delegate(Box::new(create_gpo_affected_intermediaries_list_delegate(
                GpoCandidateFilter::Computers,
            ))),
            GpoAffectedTierZero => delegate(Box::new(create_gpo_affected_intermediaries_list_delegate(
                GpoCandidateFilter::GpoTierZero,
            ))),
            Dcsyncers => Operation::Functions {
                list: fetch_dcsyncers,
                paths: fetch_dcsyncer_paths,
            },
        }
    }

    /// Runs the lookup from `node`. `limit == 0` means unlimited.
    pub fn run(
        self,
        ctx: &AnalysisContext,
        tx: &dyn Transaction,
        node: &Node,
        paths: bool,
        skip: usize,
        limit: usize,
    ) -> Result<LookupResult> {
        Ok(match (self.operation(), paths) {
            (Operation::Delegate(d), true) => LookupResult::Paths(d.paths(ctx, tx, node)?),
            (Operation::Delegate(d), false) => LookupResult::Nodes(d.list(ctx, tx, node, skip, limit)?),
            (Operation::Functions { paths: f, .. }, true) => LookupResult::Paths(f(ctx, tx, node)?),
            (Operation::Functions { list: f, .. }, false) => LookupResult::Nodes(f(ctx, tx, node, skip, limit)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::properties::{keys, Properties};

    #[test]
    fn test_group_member_lookup() {
        let graph = MemoryGraph::new();
        let group = graph
            .write_transaction(|tx| {
                let group = tx.create_node(
                    vec![NodeKind::Base, NodeKind::Group],
                    Properties::new().with(keys::OBJECT_ID, "S-1-5-21-1-512"),
                )?;
                let nested = tx.create_node(vec![NodeKind::Base, NodeKind::Group], Properties::new())?.id;
                let user = tx.create_node(vec![NodeKind::Base, NodeKind::User], Properties::new())?.id;
                tx.create_relationship(nested, group.id, EdgeKind::MemberOf, Properties::new())?;
                tx.create_relationship(user, nested, EdgeKind::MemberOf, Properties::new())?;
                Ok(group)
            })
            .unwrap();

        let snapshot = graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();
        let nodes = Lookup::GroupMembers.run(&ctx, &snapshot, &group, false, 0, 0).unwrap();
        assert_eq!(nodes.len(), 2);
        let limited = Lookup::GroupMembers.run(&ctx, &snapshot, &group, false, 0, 1).unwrap();
        assert_eq!(limited.len(), 1);
        let paths = Lookup::GroupMembers.run(&ctx, &snapshot, &group, true, 0, 0).unwrap();
        assert!(matches!(paths, LookupResult::Paths(ref p) if p.len() == 2));
    }

    #[test]
    fn test_lookup_names() {
        assert_eq!(
            Lookup::from_str("local-admins", true).unwrap(),
            Lookup::LocalAdmins
        );
        let json = serde_json::to_string(&Lookup::GpoAffectedTierZero).unwrap();
        assert_eq!(json, "\"gpo-affected-tier-zero\"");
    }
}
