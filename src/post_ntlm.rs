//! `CoerceAndRelayNTLMToSMB`
//!
//! Any authenticated principal can coerce a computer into authenticating
//! and relay that NTLM authentication to an SMB server without signing.
//! When the coerced computer is a local admin on the relay target, the
//! relayed session is administrative.

use crate::analysis_context::{AnalysisContext, CompositionCounter};
use crate::errors::Result;
use crate::graph_ops::{domain_sid, fetch_domain_members};
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node};
use crate::kinds::{EdgeKind, NodeKind};
use crate::post_processing::DerivedEdges;
use crate::properties::keys;
use crate::query::{self, Target};
use crate::well_known::AUTHENTICATED_USERS_SUFFIX;
use tracing::debug;

fn authenticated_users(tx: &dyn Transaction, domain: &Node) -> Result<Option<Node>> {
    let Ok(name) = domain.properties.get_str(keys::NAME) else {
        return Ok(None);
    };
    let object_id = format!("{}{}", name.to_uppercase(), AUTHENTICATED_USERS_SUFFIX);
    Ok(tx
        .nodes(&query::equals(Target::Node, keys::OBJECT_ID, object_id), 0, 1)?
        .into_iter()
        .next())
}

/// Relay edges into every unsigned SMB server of one domain
pub fn derive_ntlm_relay(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    domain: &Node,
    counter: &CompositionCounter,
) -> Result<DerivedEdges> {
    ctx.check("ntlm relay")?;
    let mut edges = DerivedEdges::new();
    let Some(auth_users) = authenticated_users(tx, domain)? else {
        debug!("No Authenticated Users node for {}", domain.display_name());
        return Ok(edges);
    };

    for target in fetch_domain_members(tx, NodeKind::Computer, domain_sid(domain)?)? {
        // Unknown signing state is not a finding
        if target.properties.get_bool_or(keys::SMB_SIGNING, true)? {
            continue;
        }

        let mut coercible = Vec::new();
        for (admin_to, source) in tx.expand(
            target.id,
            Direction::Inbound,
            &query::and(vec![
                query::edge_kind(EdgeKind::AdminTo),
                query::kind(Target::Start, NodeKind::Computer),
            ]),
        )? {
            if !source.properties.get_bool_or(keys::RESTRICT_OUTBOUND_NTLM, false)? {
                coercible.push((admin_to, source));
            }
        }
        if coercible.is_empty() {
            continue;
        }

        edges.insert_composed(
            auth_users.id,
            target.id,
            EdgeKind::CoerceAndRelayNTLMToSMB,
            counter,
            coercible
                .iter()
                .map(|(_, source)| source.id)
                .chain([auth_users.id, target.id]),
            coercible.iter().map(|(rel, _)| rel.id),
        );
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::graph_types::NodeId;
    use crate::properties::Properties;

    const SID: &str = "S-1-5-21-3";

    #[test]
    fn test_relay_to_unsigned_admin_target() {
        let graph = MemoryGraph::new();
        let (domain, auth_users, unsigned, signed, restricted_target) = graph
            .write_transaction(|tx| {
                let domain = tx
                    .create_node(
                        vec![NodeKind::Base, NodeKind::Domain],
                        Properties::new().with(keys::OBJECT_ID, SID).with(keys::NAME, "testlab.local"),
                    )?
                    .id;
                let auth_users = tx
                    .create_node(
                        vec![NodeKind::Base, NodeKind::Group],
                        Properties::new().with(keys::OBJECT_ID, "TESTLAB.LOCAL-S-1-5-11"),
                    )?
                    .id;
                let computer = |tx: &mut dyn WriteTransaction, signing: bool, restrict: bool| {
                    tx.create_node(
                        vec![NodeKind::Base, NodeKind::Computer],
                        Properties::new()
                            .with(keys::DOMAIN_SID, SID)
                            .with(keys::SMB_SIGNING, signing)
                            .with(keys::RESTRICT_OUTBOUND_NTLM, restrict),
                    )
                    .map(|n| n.id)
                };
                let source = computer(tx, true, false)?;
                let restricted_source = computer(tx, true, true)?;
                let unsigned = computer(tx, false, false)?;
                let signed = computer(tx, true, false)?;
                let restricted_target = computer(tx, false, false)?;

                for (start, end) in [(source, unsigned), (source, signed), (restricted_source, restricted_target)] {
                    tx.create_relationship(start, end, EdgeKind::AdminTo, Properties::new())?;
                }
                Ok((domain, auth_users, unsigned, signed, restricted_target))
            })
            .unwrap();

        let snapshot = graph.snapshot().unwrap();
        let counter = CompositionCounter::new();
        let domain_node = snapshot.node(domain).unwrap();
        let edges = derive_ntlm_relay(&AnalysisContext::background(), &snapshot, &domain_node, &counter).unwrap();

        assert_eq!(edges.len(), 1);
        assert!(edges.contains(auth_users, unsigned, EdgeKind::CoerceAndRelayNTLMToSMB));
        let absent = |target: NodeId| !edges.contains(auth_users, target, EdgeKind::CoerceAndRelayNTLMToSMB);
        assert!(absent(signed));
        assert!(absent(restricted_target));
        assert_eq!(counter.allocated(), 1);
    }
}
