//! Candidate-selection delegates
//!
//! A delegate packages one fetch operation with its parameters so callers can
//! pick the operation at runtime and run it against any entity. Delegates are
//! plain data: they serialize, never mutate the graph, and can be shared
//! across workers.

use crate::analysis_context::AnalysisContext;
use crate::containment::{fetch_ou_contained, fetch_ou_contained_paths};
use crate::domain_trust::{fetch_domain_trust_paths, fetch_domain_trusts};
use crate::entity_control::{
    fetch_inbound_ad_entity_controller_paths, fetch_inbound_ad_entity_controllers, fetch_outbound_ad_entity_control,
    fetch_outbound_ad_entity_control_paths,
};
use crate::errors::Result;
use crate::foreign_membership::{fetch_foreign_entity_membership, fetch_foreign_entity_membership_paths};
use crate::gpo_enforcement::{fetch_gpo_affected, fetch_gpo_affected_paths};
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node, NodeSet, PathSet};
use crate::kinds::{EdgeKind, NodeKind};
use crate::local_groups::{
    fetch_direct_edge_nodes, fetch_direct_edge_paths, fetch_inbound_local_group_members,
    fetch_inbound_local_group_paths, fetch_outbound_local_group_paths, fetch_outbound_local_group_targets,
};
use crate::properties::keys;
use serde::{Deserialize, Serialize};

pub const ADMIN_TIER_ZERO: &str = "admin_tier_0";

/// Predicate over an already-fetched node
pub trait CandidateFilter: Send + Sync {
    fn select(&self, node: &Node) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpoCandidateFilter {
    /// OUs and domains
    GpoContainer,
    /// Tier-zero users and computers; groups are never selected
    GpoTierZero,
    Users,
    Computers,
}

impl CandidateFilter for GpoCandidateFilter {
    fn select(&self, node: &Node) -> bool {
        match self {
            GpoCandidateFilter::GpoContainer => node.has_any_kind(&[NodeKind::OU, NodeKind::Domain]),
            GpoCandidateFilter::GpoTierZero => {
                node.has_any_kind(&[NodeKind::User, NodeKind::Computer])
                    && !node.has_kind(NodeKind::Group)
                    && node.properties.has_tag(keys::SYSTEM_TAGS, ADMIN_TIER_ZERO)
            }
            GpoCandidateFilter::Users => node.has_kind(NodeKind::User),
            GpoCandidateFilter::Computers => node.has_kind(NodeKind::Computer),
        }
    }
}

/// Selects nodes carrying a given kind
impl CandidateFilter for NodeKind {
    fn select(&self, node: &Node) -> bool {
        node.has_kind(*self)
    }
}

pub trait ListDelegate: Send + Sync {
    fn list(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node, skip: usize, limit: usize)
        -> Result<NodeSet>;
}

pub trait PathDelegate: Send + Sync {
    fn paths(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node) -> Result<PathSet>;
}

/// Rights granted through local groups, following group nesting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalGroupDelegate {
    pub edge: EdgeKind,
    pub direction: Direction,
}

impl ListDelegate for LocalGroupDelegate {
    fn list(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node, skip: usize, limit: usize) -> Result<NodeSet> {
        match self.direction {
            Direction::Inbound => fetch_inbound_local_group_members(ctx, tx, node, self.edge, skip, limit),
            Direction::Outbound => fetch_outbound_local_group_targets(ctx, tx, node, self.edge, skip, limit),
        }
    }
}

impl PathDelegate for LocalGroupDelegate {
    fn paths(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node) -> Result<PathSet> {
        match self.direction {
            Direction::Inbound => fetch_inbound_local_group_paths(ctx, tx, node, self.edge),
            Direction::Outbound => fetch_outbound_local_group_paths(ctx, tx, node, self.edge),
        }
    }
}

/// A single hop of one edge kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectEdgeDelegate {
    pub edge: EdgeKind,
    pub direction: Direction,
}

impl ListDelegate for DirectEdgeDelegate {
    fn list(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node, skip: usize, limit: usize) -> Result<NodeSet> {
        fetch_direct_edge_nodes(ctx, tx, node, self.edge, self.direction, skip, limit)
    }
}

impl PathDelegate for DirectEdgeDelegate {
    fn paths(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node) -> Result<PathSet> {
        fetch_direct_edge_paths(ctx, tx, node, self.edge, self.direction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTrustDelegate {
    pub direction: Direction,
}

impl ListDelegate for DomainTrustDelegate {
    fn list(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node, skip: usize, limit: usize) -> Result<NodeSet> {
        fetch_domain_trusts(ctx, tx, node, self.direction, skip, limit)
    }
}

impl PathDelegate for DomainTrustDelegate {
    fn paths(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node) -> Result<PathSet> {
        fetch_domain_trust_paths(ctx, tx, node, self.direction)
    }
}

/// ACL control in either direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityControlDelegate {
    pub direction: Direction,
}

impl ListDelegate for EntityControlDelegate {
    fn list(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node, skip: usize, limit: usize) -> Result<NodeSet> {
        match self.direction {
            Direction::Inbound => fetch_inbound_ad_entity_controllers(ctx, tx, node, skip, limit),
            Direction::Outbound => fetch_outbound_ad_entity_control(ctx, tx, node, skip, limit),
        }
    }
}

impl PathDelegate for EntityControlDelegate {
    fn paths(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node) -> Result<PathSet> {
        match self.direction {
            Direction::Inbound => fetch_inbound_ad_entity_controller_paths(ctx, tx, node),
            Direction::Outbound => fetch_outbound_ad_entity_control_paths(ctx, tx, node),
        }
    }
}

/// Foreign members of a domain's groups, by node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignEntityMembershipDelegate {
    pub kind: NodeKind,
}

impl ListDelegate for ForeignEntityMembershipDelegate {
    fn list(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node, skip: usize, limit: usize) -> Result<NodeSet> {
        fetch_foreign_entity_membership(ctx, tx, node, self.kind, skip, limit)
    }
}

impl PathDelegate for ForeignEntityMembershipDelegate {
    fn paths(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node) -> Result<PathSet> {
        fetch_foreign_entity_membership_paths(ctx, tx, node, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OuContainedDelegate {
    pub kind: NodeKind,
}

impl ListDelegate for OuContainedDelegate {
    fn list(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node, skip: usize, limit: usize) -> Result<NodeSet> {
        fetch_ou_contained(ctx, tx, node, self.kind, skip, limit)
    }
}

impl PathDelegate for OuContainedDelegate {
    fn paths(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node) -> Result<PathSet> {
        fetch_ou_contained_paths(ctx, tx, node, self.kind)
    }
}

/// Nodes affected by a GPO, narrowed by a candidate filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpoAffectedDelegate {
    pub filter: GpoCandidateFilter,
}

impl ListDelegate for GpoAffectedDelegate {
    fn list(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node, skip: usize, limit: usize) -> Result<NodeSet> {
        fetch_gpo_affected(ctx, tx, node, &self.filter, skip, limit)
    }
}

impl PathDelegate for GpoAffectedDelegate {
    fn paths(&self, ctx: &AnalysisContext, tx: &dyn Transaction, node: &Node) -> Result<PathSet> {
        fetch_gpo_affected_paths(ctx, tx, node, &self.filter)
    }
}

pub fn create_local_group_delegate(edge: EdgeKind, direction: Direction) -> LocalGroupDelegate {
    LocalGroupDelegate { edge, direction }
}

pub fn create_direct_edge_delegate(edge: EdgeKind, direction: Direction) -> DirectEdgeDelegate {
    DirectEdgeDelegate { edge, direction }
}

pub fn create_domain_trust_delegate(direction: Direction) -> DomainTrustDelegate {
    DomainTrustDelegate { direction }
}

pub fn create_entity_control_delegate(direction: Direction) -> EntityControlDelegate {
    EntityControlDelegate { direction }
}

pub fn create_foreign_entity_membership_delegate(kind: NodeKind) -> ForeignEntityMembershipDelegate {
    ForeignEntityMembershipDelegate { kind }
}

pub fn create_ou_contained_delegate(kind: NodeKind) -> OuContainedDelegate {
    OuContainedDelegate { kind }
}

pub fn create_gpo_affected_intermediaries_list_delegate(filter: GpoCandidateFilter) -> GpoAffectedDelegate {
    GpoAffectedDelegate { filter }
}

pub fn create_gpo_affected_intermediaries_path_delegate(filter: GpoCandidateFilter) -> GpoAffectedDelegate {
    GpoAffectedDelegate { filter }
}
