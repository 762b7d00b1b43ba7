//! `Owns` / `WriteOwner` from the raw collected ownership edges
//!
//! An owner's implicit rights can be stripped by an explicit OWNER RIGHTS
//! ACE, or, for computer-derived objects, by a domain that enforces
//! BlockOwnerImplicitRights (dsHeuristics position 28 set to `1`) unless
//! the owner is a Domain or Enterprise Admin. Collected data without the
//! ACE flags keeps the raw edge.

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Node, NodeId, Relationship};
use crate::group_expansion::GroupExpansions;
use crate::kinds::{EdgeKind, NodeKind};
use crate::post_processing::DerivedEdges;
use crate::properties::keys;
use crate::query::{self, Target};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

pub const DOMAIN_ADMINS_RID: &str = "-512";
pub const ENTERPRISE_ADMINS_RID: &str = "-519";
const BLOCK_OWNER_IMPLICIT_RIGHTS_INDEX: usize = 28;

/// Domain-wide facts every ownership unit needs
#[derive(Debug, Clone, Default)]
pub struct OwnershipScope {
    /// Domain SIDs that enforce BlockOwnerImplicitRights
    enforcing_domains: HashSet<String>,
    /// DA/EA groups and everything nested in them
    admins: BTreeSet<NodeId>,
}

impl OwnershipScope {
    pub fn build(tx: &dyn Transaction, expansions: &GroupExpansions) -> Result<Self> {
        let mut enforcing_domains = HashSet::new();
        for domain in tx.nodes(&query::kind(Target::Node, NodeKind::Domain), 0, 0)? {
            if !enforces_owner_rights_block(&domain) {
                continue;
            }
            if let Some(sid) = domain.object_id() {
                enforcing_domains.insert(sid.to_string());
            }
        }

        let admin_groups = tx.nodes(
            &query::and(vec![
                query::kind(Target::Node, NodeKind::Group),
                query::or(vec![
                    query::ends_with(Target::Node, keys::OBJECT_ID, DOMAIN_ADMINS_RID),
                    query::ends_with(Target::Node, keys::OBJECT_ID, ENTERPRISE_ADMINS_RID),
                ]),
            ]),
            0,
            0,
        )?;
        let admins = expansions.expand_holders(admin_groups.iter().map(|g| g.id));

        debug!(
            "Ownership scope: {} enforcing domains, {} admin principals",
            enforcing_domains.len(),
            admins.len()
        );
        Ok(Self { enforcing_domains, admins })
    }

    fn is_admin(&self, principal: NodeId) -> bool {
        self.admins.contains(&principal)
    }

    fn domain_enforces(&self, node: &Node) -> bool {
        node.domain_sid()
            .map(|sid| self.enforcing_domains.contains(sid))
            .unwrap_or(false)
    }
}

fn enforces_owner_rights_block(domain: &Node) -> bool {
    domain
        .properties
        .get_str(keys::DS_HEURISTICS)
        .ok()
        .and_then(|heuristics| heuristics.chars().nth(BLOCK_OWNER_IMPLICIT_RIGHTS_INDEX))
        == Some('1')
}

/// Computers and managed service accounts
fn is_computer_derived(node: &Node) -> Result<bool> {
    if node.has_kind(NodeKind::Computer) {
        return Ok(true);
    }
    Ok(node.has_kind(NodeKind::User)
        && (node.properties.get_bool_or(keys::MSA, false)? || node.properties.get_bool_or(keys::GMSA, false)?))
}

/// The derived kind and the target flag that suppresses it
fn derivation(raw: EdgeKind) -> Option<(EdgeKind, &'static str)> {
    match raw {
        EdgeKind::OwnsRaw => Some((EdgeKind::Owns, keys::DOES_ANY_ACE_GRANT_OWNER_RIGHTS)),
        EdgeKind::WriteOwnerRaw => Some((
            EdgeKind::WriteOwner,
            keys::DOES_ANY_INHERITED_ACE_GRANT_OWNER_RIGHTS,
        )),
        _ => None,
    }
}

/// Derives `Owns`/`WriteOwner` for a batch of raw ownership relationships
pub fn derive_ownership(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    raw: &[Relationship],
    scope: &OwnershipScope,
) -> Result<DerivedEdges> {
    ctx.check("ownership")?;
    let mut edges = DerivedEdges::new();

    for rel in raw {
        let Some((derived, suppressing_flag)) = derivation(rel.kind) else {
            continue;
        };
        let target = tx.node(rel.end)?;

        if target.properties.get_bool_or(suppressing_flag, false)? {
            continue;
        }
        if is_computer_derived(&target)? && scope.domain_enforces(&target) && !scope.is_admin(rel.start) {
            continue;
        }
        edges.insert(rel.start, rel.end, derived);
    }
    Ok(edges)
}

pub fn fetch_raw_ownership(tx: &dyn Transaction) -> Result<Vec<Relationship>> {
    tx.relationships(&query::edge_kinds(&[EdgeKind::OwnsRaw, EdgeKind::WriteOwnerRaw]), 0, 0)
}
