//! Per-domain data-quality snapshot
//!
//! Counts what was collected for each domain and how complete the local
//! group and session collection is, then stores one row per domain plus a
//! run-wide aggregation row.

use crate::analysis_context::AnalysisContext;
use crate::completeness::{fetch_local_group_completeness, fetch_user_session_completeness};
use crate::database::{AdDataQualityAggregation, AdDataQualityStat, Database};
use crate::errors::Result;
use crate::graph_ops::{domain_sid, fetch_domains};
use crate::graph_store::Transaction;
use crate::graph_types::NodeId;
use crate::kinds::{EdgeKind, NodeKind};
use crate::properties::keys;
use crate::query::{self, Target};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

fn count_kind(tx: &dyn Transaction, kind: NodeKind, sid: &str) -> Result<i64> {
    let count = tx.count_nodes(&query::and(vec![
        query::kind(Target::Node, kind),
        query::equals(Target::Node, keys::DOMAIN_SID, sid),
    ]))?;
    Ok(count as i64)
}

#[derive(Default)]
struct EdgeTally {
    acls: i64,
    sessions: i64,
    relationships: i64,
}

/// Relationship counts per domain SID in one pass over the graph.
/// ACL edges count toward the target's domain, everything else toward the source's.
fn tally_relationships(tx: &dyn Transaction) -> Result<HashMap<String, EdgeTally>> {
    let mut domain_of: HashMap<NodeId, String> = HashMap::new();
    for node in tx.nodes(&query::exists(Target::Node, keys::DOMAIN_SID), 0, 0)? {
        if let Some(sid) = node.domain_sid() {
            domain_of.insert(node.id, sid.to_string());
        }
    }

    let mut tallies: HashMap<String, EdgeTally> = HashMap::new();
    for rel in tx.relationships(&query::all(), 0, 0)? {
        let is_acl = rel.properties.get_bool_or(keys::IS_ACL, false).unwrap_or(false);
        let owner = if is_acl { rel.end } else { rel.start };
        let Some(sid) = domain_of.get(&owner) else {
            continue;
        };
        let tally = tallies.entry(sid.clone()).or_default();
        tally.relationships += 1;
        if is_acl {
            tally.acls += 1;
        }
        if rel.kind == EdgeKind::HasSession {
            tally.sessions += 1;
        }
    }
    Ok(tallies)
}

/// Builds the per-domain rows and their aggregation for one run
pub fn compute_ad_data_quality(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    run_id: &str,
) -> Result<(Vec<AdDataQualityStat>, AdDataQualityAggregation)> {
    let mut tallies = tally_relationships(tx)?;
    let mut stats = Vec::new();

    for domain in fetch_domains(tx)? {
        ctx.check("data quality")?;
        let sid = match domain_sid(&domain) {
            Ok(sid) => sid,
            Err(e) => {
                warn!("Skipping data quality for domain {}: {}", domain.id, e);
                continue;
            }
        };
        let tally = tallies.remove(sid).unwrap_or_default();

        stats.push(AdDataQualityStat {
            domain_sid: sid.to_string(),
            users: count_kind(tx, NodeKind::User, sid)?,
            groups: count_kind(tx, NodeKind::Group, sid)?,
            computers: count_kind(tx, NodeKind::Computer, sid)?,
            ous: count_kind(tx, NodeKind::OU, sid)?,
            containers: count_kind(tx, NodeKind::Container, sid)?,
            gpos: count_kind(tx, NodeKind::GPO, sid)?,
            acls: tally.acls,
            sessions: tally.sessions,
            relationships: tally.relationships,
            session_completeness: fetch_user_session_completeness(ctx, tx, sid)?,
            local_group_completeness: fetch_local_group_completeness(ctx, tx, sid)?,
            run_id: run_id.to_string(),
        });
    }

    let aggregation = aggregate(&stats, run_id);
    Ok((stats, aggregation))
}

/// Sums the counts; completeness is the mean over domains, 0.0 with none
pub fn aggregate(stats: &[AdDataQualityStat], run_id: &str) -> AdDataQualityAggregation {
    let mut aggregation = AdDataQualityAggregation {
        domains: stats.len() as i64,
        run_id: run_id.to_string(),
        ..Default::default()
    };
    for stat in stats {
        aggregation.users += stat.users;
        aggregation.groups += stat.groups;
        aggregation.computers += stat.computers;
        aggregation.ous += stat.ous;
        aggregation.containers += stat.containers;
        aggregation.gpos += stat.gpos;
        aggregation.acls += stat.acls;
        aggregation.sessions += stat.sessions;
        aggregation.relationships += stat.relationships;
        aggregation.session_completeness += stat.session_completeness;
        aggregation.local_group_completeness += stat.local_group_completeness;
    }
    if !stats.is_empty() {
        aggregation.session_completeness /= stats.len() as f64;
        aggregation.local_group_completeness /= stats.len() as f64;
    }
    aggregation
}

/// Computes and stores this run's data-quality rows. Returns the run id.
pub fn save_data_quality(ctx: &AnalysisContext, tx: &dyn Transaction, database: &Database) -> Result<String> {
    let run_id = Uuid::new_v4().to_string();
    let (stats, aggregation) = compute_ad_data_quality(ctx, tx, &run_id)?;
    database.save_ad_data_quality(&stats, &aggregation)?;
    info!(
        "Saved data quality for {} domains (run {})",
        aggregation.domains, run_id
    );
    Ok(run_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::properties::Properties;

    const SID: &str = "S-1-5-21-11";

    fn seeded() -> MemoryGraph {
        let graph = MemoryGraph::new();
        graph
            .write_transaction(|tx| {
                tx.create_node(
                    vec![NodeKind::Base, NodeKind::Domain],
                    Properties::new().with(keys::OBJECT_ID, SID),
                )?;
                let in_domain = || Properties::new().with(keys::DOMAIN_SID, SID);
                let user = tx.create_node(vec![NodeKind::Base, NodeKind::User], in_domain())?.id;
                tx.create_node(vec![NodeKind::Base, NodeKind::User], in_domain())?;
                let computer = tx.create_node(vec![NodeKind::Base, NodeKind::Computer], in_domain())?.id;
                let group = tx.create_node(vec![NodeKind::Base, NodeKind::Group], in_domain())?.id;

                tx.create_relationship(computer, user, EdgeKind::HasSession, Properties::new())?;
                tx.create_relationship(user, group, EdgeKind::MemberOf, Properties::new())?;
                tx.create_relationship(user, group, EdgeKind::GenericAll, Properties::new().with(keys::IS_ACL, true))?;
                Ok(())
            })
            .unwrap();
        graph
    }

    #[test]
    fn test_domain_stats() {
        let graph = seeded();
        let snapshot = graph.snapshot().unwrap();
        let (stats, aggregation) =
            compute_ad_data_quality(&AnalysisContext::background(), &snapshot, "run").unwrap();

        assert_eq!(stats.len(), 1);
        let stat = &stats[0];
        assert_eq!((stat.users, stat.computers, stat.groups), (2, 1, 1));
        assert_eq!((stat.sessions, stat.acls, stat.relationships), (1, 1, 3));
        assert_eq!(stat.session_completeness, 0.5);
        assert_eq!(stat.local_group_completeness, 0.0);
        assert_eq!(aggregation.domains, 1);
        assert_eq!(aggregation.session_completeness, 0.5);
    }

    #[test]
    fn test_empty_aggregation() {
        let aggregation = aggregate(&[], "run");
        assert_eq!(aggregation.domains, 0);
        assert_eq!(aggregation.session_completeness, 0.0);
    }

    #[test]
    fn test_save_data_quality() {
        let graph = seeded();
        let database = Database::open_in_memory().unwrap();
        let snapshot = graph.snapshot().unwrap();
        let run_id = save_data_quality(&AnalysisContext::background(), &snapshot, &database).unwrap();

        let stored = database.get_latest_ad_data_quality(SID).unwrap().unwrap();
        assert_eq!(stored.run_id, run_id);
        let aggregation = database.get_latest_ad_data_quality_aggregation().unwrap().unwrap();
        assert_eq!(aggregation.users, 2);
    }
}
