//! Collection completeness ratios
//!
//! Both ratios are in `[0, 1]`. A domain with nothing to measure reports `0.0`.

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_ops::{fetch_domain_members, has_inbound};
use crate::graph_store::Transaction;
use crate::kinds::{EdgeKind, NodeKind, LOCAL_GROUP_KINDS};

fn ratio(covered: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (covered as f64 / total as f64).clamp(0.0, 1.0)
}

fn coverage(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    kind: NodeKind,
    domain_sid: &str,
    evidence: &[EdgeKind],
) -> Result<f64> {
    let members = fetch_domain_members(tx, kind, domain_sid)?;
    let mut covered = 0;
    for node in &members {
        ctx.check("completeness")?;
        if has_inbound(tx, node.id, evidence)? {
            covered += 1;
        }
    }
    Ok(ratio(covered, members.len()))
}

/// Share of the domain's computers with any local group data
pub fn fetch_local_group_completeness(ctx: &AnalysisContext, tx: &dyn Transaction, domain_sid: &str) -> Result<f64> {
    coverage(ctx, tx, NodeKind::Computer, domain_sid, LOCAL_GROUP_KINDS)
}

/// Share of the domain's users with at least one observed session
pub fn fetch_user_session_completeness(ctx: &AnalysisContext, tx: &dyn Transaction, domain_sid: &str) -> Result<f64> {
    coverage(ctx, tx, NodeKind::User, domain_sid, &[EdgeKind::HasSession])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::properties::{keys, Properties};

    const SID: &str = "S-1-5-21-1";

    #[test]
    fn test_empty_domain_is_zero() {
        let graph = MemoryGraph::new();
        let snapshot = graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();
        assert_eq!(fetch_local_group_completeness(&ctx, &snapshot, SID).unwrap(), 0.0);
        assert_eq!(fetch_user_session_completeness(&ctx, &snapshot, SID).unwrap(), 0.0);
    }

    #[test]
    fn test_partial_coverage() {
        let graph = MemoryGraph::new();
        graph
            .write_transaction(|tx| {
                let props = || Properties::new().with(keys::DOMAIN_SID, SID);
                let admin = tx.create_node(vec![NodeKind::Base, NodeKind::User], props())?.id;
                tx.create_node(vec![NodeKind::Base, NodeKind::User], props())?;
                let mut computers = Vec::new();
                for _ in 0..4 {
                    computers.push(tx.create_node(vec![NodeKind::Base, NodeKind::Computer], props())?.id);
                }
                tx.create_relationship(admin, computers[0], EdgeKind::AdminTo, Properties::new())?;
                tx.create_relationship(admin, computers[1], EdgeKind::CanRDP, Properties::new())?;
                tx.create_relationship(admin, computers[1], EdgeKind::AdminTo, Properties::new())?;
                tx.create_relationship(computers[2], admin, EdgeKind::HasSession, Properties::new())?;
                Ok(())
            })
            .unwrap();

        let snapshot = graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();
        assert_eq!(fetch_local_group_completeness(&ctx, &snapshot, SID).unwrap(), 0.5);
        assert_eq!(fetch_user_session_completeness(&ctx, &snapshot, SID).unwrap(), 0.5);
        assert_eq!(fetch_user_session_completeness(&ctx, &snapshot, "S-1-5-21-9").unwrap(), 0.0);
    }
}
