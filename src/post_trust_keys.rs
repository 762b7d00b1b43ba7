//! `HasTrustKeys`: a trusting domain holds the credentials of the trust
//! account the trusted domain keeps for it

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_ops::domain_sid;
use crate::graph_store::Transaction;
use crate::graph_types::{Node, Relationship};
use crate::kinds::{EdgeKind, NodeKind};
use crate::post_processing::DerivedEdges;
use crate::properties::keys;
use crate::query::{self, Target};
use tracing::{debug, warn};

/// For a `TrustedBy` edge `A -> B`, B stores a trust account named after
/// A's NetBIOS name; A gets `HasTrustKeys` to that account.
pub fn derive_trust_keys_for(tx: &dyn Transaction, trust: &Relationship) -> Result<DerivedEdges> {
    let mut edges = DerivedEdges::new();
    let trusting = tx.node(trust.start)?;
    let trusted = tx.node(trust.end)?;
    if !trusting.has_kind(NodeKind::Domain) || !trusted.has_kind(NodeKind::Domain) {
        return Ok(edges);
    }

    let netbios = match trusting.properties.get_str(keys::NETBIOS) {
        Ok(netbios) if !netbios.is_empty() => netbios,
        _ => {
            warn!("Domain {} has no netbios name, skipping trust keys", trusting.display_name());
            return Ok(edges);
        }
    };

    let Some(account) = find_trust_account(tx, &trusted, netbios)? else {
        debug!("No trust account for {} in {}", netbios, trusted.display_name());
        return Ok(edges);
    };
    edges.insert(trusting.id, account.id, EdgeKind::HasTrustKeys);
    Ok(edges)
}

fn find_trust_account(tx: &dyn Transaction, domain: &Node, netbios: &str) -> Result<Option<Node>> {
    let account_name = format!("{}$", netbios.to_uppercase());
    let sid = domain_sid(domain)?;
    let candidates = tx.nodes(
        &query::and(vec![
            query::kind(Target::Node, NodeKind::User),
            query::equals(Target::Node, keys::DOMAIN_SID, sid),
        ]),
        0,
        0,
    )?;
    Ok(candidates.into_iter().find(|user| {
        user.properties
            .get_str(keys::SAM_ACCOUNT_NAME)
            .map(|name| name.eq_ignore_ascii_case(&account_name))
            .unwrap_or(false)
    }))
}

/// `HasTrustKeys` for every trust in the graph
pub fn derive_trust_keys(ctx: &AnalysisContext, tx: &dyn Transaction) -> Result<DerivedEdges> {
    let mut edges = DerivedEdges::new();
    for trust in tx.relationships(&query::edge_kind(EdgeKind::TrustedBy), 0, 0)? {
        ctx.check("trust keys")?;
        edges.merge(derive_trust_keys_for(tx, &trust)?);
    }
    Ok(edges)
}
