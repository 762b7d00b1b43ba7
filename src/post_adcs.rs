//! ADCS `GoldenCert`: a CA host can forge certificates trusted for NT
//! authentication in every domain its CA is published to

use crate::analysis_context::{AnalysisContext, CompositionCounter};
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::{Direction, Node};
use crate::kinds::{EdgeKind, NodeKind};
use crate::post_processing::DerivedEdges;
use crate::query::{self, Target};

/// `Computer -HostsCAService-> EnterpriseCA -TrustedForNTAuth-> NTAuthStore -NTAuthStoreFor-> Domain`
pub fn derive_golden_cert(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    enterprise_ca: &Node,
    counter: &CompositionCounter,
) -> Result<DerivedEdges> {
    ctx.check("golden cert")?;
    let mut edges = DerivedEdges::new();

    let hosts = tx.expand(enterprise_ca.id, Direction::Inbound, &query::edge_kind(EdgeKind::HostsCAService))?;
    if hosts.is_empty() {
        return Ok(edges);
    }

    for (trusted_for, store) in tx.expand(
        enterprise_ca.id,
        Direction::Outbound,
        &query::and(vec![
            query::edge_kind(EdgeKind::TrustedForNTAuth),
            query::kind(Target::End, NodeKind::NTAuthStore),
        ]),
    )? {
        for (store_for, domain) in tx.expand(
            store.id,
            Direction::Outbound,
            &query::and(vec![
                query::edge_kind(EdgeKind::NTAuthStoreFor),
                query::kind(Target::End, NodeKind::Domain),
            ]),
        )? {
            for (hosts_ca, computer) in hosts.iter().filter(|(_, host)| host.has_kind(NodeKind::Computer)) {
                edges.insert_composed(
                    computer.id,
                    domain.id,
                    EdgeKind::GoldenCert,
                    counter,
                    [computer.id, enterprise_ca.id, store.id, domain.id],
                    [hosts_ca.id, trusted_for.id, store_for.id],
                );
            }
        }
    }
    Ok(edges)
}

pub fn fetch_enterprise_cas(tx: &dyn Transaction) -> Result<Vec<Node>> {
    tx.nodes(&query::kind(Target::Node, NodeKind::EnterpriseCA), 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::properties::Properties;

    #[test]
    fn test_golden_cert_chain() {
        let graph = MemoryGraph::new();
        let (host, ca, domain, orphan_ca) = graph
            .write_transaction(|tx| {
                let mut node = |kind: NodeKind| tx.create_node(vec![NodeKind::Base, kind], Properties::new()).map(|n| n.id);
                let host = node(NodeKind::Computer)?;
                let ca = node(NodeKind::EnterpriseCA)?;
                let store = node(NodeKind::NTAuthStore)?;
                let domain = node(NodeKind::Domain)?;
                let orphan_ca = node(NodeKind::EnterpriseCA)?;
                for (start, end, kind) in [
                    (host, ca, EdgeKind::HostsCAService),
                    (ca, store, EdgeKind::TrustedForNTAuth),
                    (store, domain, EdgeKind::NTAuthStoreFor),
                    (host, orphan_ca, EdgeKind::HostsCAService),
                ] {
                    tx.create_relationship(start, end, kind, Properties::new())?;
                }
                Ok((host, ca, domain, orphan_ca))
            })
            .unwrap();

        let snapshot = graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();
        let counter = CompositionCounter::new();

        let edges = derive_golden_cert(&ctx, &snapshot, &snapshot.node(ca).unwrap(), &counter).unwrap();
        assert!(edges.contains(host, domain, EdgeKind::GoldenCert));
        let key = edges.keys().next().unwrap();
        let record = edges.composition(key).unwrap();
        assert_eq!(record.node_ids.len(), 4);
        assert_eq!(record.relationship_ids.len(), 3);

        let orphan = derive_golden_cert(&ctx, &snapshot, &snapshot.node(orphan_ca).unwrap(), &counter).unwrap();
        assert!(orphan.is_empty());
        assert_eq!(fetch_enterprise_cas(&snapshot).unwrap().len(), 2);
    }
}
