//! Local-group derived rights: `AdminTo`, `CanRDP`, `CanPSRemote`, `ExecuteDCOM`
//!
//! Each well-known local group on a computer grants one right to its
//! direct members. Remote Desktop additionally honors the
//! RemoteInteractiveLogon user right when it was collected, and the Citrix
//! "Direct Access Users" group when Citrix support is on.

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeId};
use crate::group_expansion::GroupExpansions;
use crate::kinds::{EdgeKind, NodeKind};
use crate::post_processing::DerivedEdges;
use crate::properties::keys;
use crate::query::{self, Target};
use std::collections::BTreeSet;

pub const ADMINISTRATORS_RID: &str = "-544";
pub const REMOTE_DESKTOP_USERS_RID: &str = "-555";
pub const REMOTE_MANAGEMENT_USERS_RID: &str = "-580";
pub const DCOM_USERS_RID: &str = "-562";
pub const DIRECT_ACCESS_USERS: &str = "DIRECT ACCESS USERS";

/// The right a local group grants, by object id suffix
pub fn local_group_right(local_group: &Node) -> Option<EdgeKind> {
    let object_id = local_group.object_id()?;
    [
        (ADMINISTRATORS_RID, EdgeKind::AdminTo),
        (REMOTE_DESKTOP_USERS_RID, EdgeKind::CanRDP),
        (REMOTE_MANAGEMENT_USERS_RID, EdgeKind::CanPSRemote),
        (DCOM_USERS_RID, EdgeKind::ExecuteDCOM),
    ]
    .into_iter()
    .find(|(rid, _)| object_id.ends_with(rid))
    .map(|(_, right)| right)
}

fn is_direct_access_users(local_group: &Node) -> bool {
    local_group
        .properties
        .get_str(keys::NAME)
        .map(|name| name.to_uppercase().starts_with(DIRECT_ACCESS_USERS))
        .unwrap_or(false)
}

fn direct_members(tx: &dyn Transaction, local_group: NodeId) -> Result<BTreeSet<NodeId>> {
    Ok(tx
        .expand(local_group, Direction::Inbound, &query::edge_kind(EdgeKind::MemberOfLocalGroup))?
        .into_iter()
        .map(|(_, member)| member.id)
        .collect())
}

/// Principals that can RDP to `computer` through `rdp_group`
fn rdp_principals(
    tx: &dyn Transaction,
    computer: &Node,
    rdp_group: NodeId,
    direct_access_group: Option<NodeId>,
    expansions: &GroupExpansions,
) -> Result<BTreeSet<NodeId>> {
    let mut principals = direct_members(tx, rdp_group)?;

    if computer.properties.get_bool_or(keys::HAS_URA, false)? {
        let ura_holders: BTreeSet<NodeId> = tx
            .expand(
                computer.id,
                Direction::Inbound,
                &query::edge_kind(EdgeKind::RemoteInteractiveLogonRight),
            )?
            .into_iter()
            .map(|(_, holder)| holder.id)
            .collect();
        if !ura_holders.contains(&rdp_group) {
            let allowed = expansions.expand_holders(ura_holders);
            principals = expansions
                .expand_holders(principals)
                .intersection(&allowed)
                .copied()
                .collect();
        }
    }

    if let Some(direct_access_group) = direct_access_group {
        let allowed = expansions.expand_holders(direct_members(tx, direct_access_group)?);
        principals = expansions
            .expand_holders(principals)
            .intersection(&allowed)
            .copied()
            .collect();
    }

    Ok(principals)
}

/// Derived local-group rights into one computer
pub fn derive_local_group_edges(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    computer: &Node,
    expansions: &GroupExpansions,
    citrix_enabled: bool,
) -> Result<DerivedEdges> {
    ctx.check("local group edges")?;
    let local_groups: Vec<Node> = tx
        .expand(computer.id, Direction::Inbound, &query::edge_kind(EdgeKind::LocalToComputer))?
        .into_iter()
        .map(|(_, group)| group)
        .filter(|group| group.has_kind(NodeKind::LocalGroup))
        .collect();

    let direct_access_group = if citrix_enabled {
        local_groups.iter().find(|g| is_direct_access_users(g)).map(|g| g.id)
    } else {
        None
    };

    let mut edges = DerivedEdges::new();
    for local_group in &local_groups {
        let Some(right) = local_group_right(local_group) else {
            continue;
        };
        let principals = match right {
            EdgeKind::CanRDP => rdp_principals(tx, computer, local_group.id, direct_access_group, expansions)?,
            _ => direct_members(tx, local_group.id)?,
        };
        for principal in principals {
            // A computer's own account is not a path into itself
            if principal != computer.id {
                edges.insert(principal, computer.id, right);
            }
        }
    }
    Ok(edges)
}

/// Every computer to run local-group derivation over
pub fn fetch_computers(tx: &dyn Transaction) -> Result<Vec<Node>> {
    tx.nodes(&query::kind(Target::Node, NodeKind::Computer), 0, 0)
}
