//! Active Directory post-processing
//!
//! Steps run in a fixed order because later steps read edges earlier ones
//! produce (`CanApplyGPO` reads `Owns`, NTLM relay reads `AdminTo`). Each
//! step derives on a fresh snapshot through the worker pool and commits
//! with one reconciliation.

use crate::analysis_context::{AnalysisContext, CompositionCounter};
use crate::database::FeatureFlags;
use crate::errors::{AnalysisError, Result};
use crate::graph_ops::fetch_domains;
use crate::graph_store::GraphDatabase;
use crate::graph_types::{Node, Relationship};
use crate::group_expansion::{expand_all_groups, GroupExpansions};
use crate::kinds::{EdgeKind, LOCAL_GROUP_KINDS};
use crate::parallel_executor::ParallelExecutor;
use crate::post_adcs::{derive_golden_cert, fetch_enterprise_cas};
use crate::post_dcsync::{derive_dcsync, derive_sync_laps_password};
use crate::post_gpos::{derive_can_apply_gpo, derive_gpo_applies_to, fetch_gpos, fetch_linkable_containers};
use crate::post_local_groups::{derive_local_group_edges, fetch_computers};
use crate::post_ntlm::derive_ntlm_relay;
use crate::post_owns::{derive_ownership, fetch_raw_ownership, OwnershipScope};
use crate::post_processing::{derive_parallel, reconcile, DerivedEdges, PostProcessingStats};
use crate::post_trust_keys::derive_trust_keys_for;
use crate::query;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Optional AD steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdPostFlags {
    pub adcs_enabled: bool,
    pub citrix_rdp_support: bool,
    pub ntlm_enabled: bool,
}

impl From<&FeatureFlags> for AdPostFlags {
    fn from(flags: &FeatureFlags) -> Self {
        Self {
            adcs_enabled: flags.adcs_enabled,
            citrix_rdp_support: flags.citrix_rdp_support,
            ntlm_enabled: flags.ntlm_post_processing,
        }
    }
}

fn batches<T: Clone>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

struct StepRunner<'a, G: GraphDatabase> {
    ctx: &'a AnalysisContext,
    db: &'a G,
    executor: &'a ParallelExecutor,
    stats: PostProcessingStats,
}

impl<'a, G: GraphDatabase> StepRunner<'a, G> {
    /// Derives `kinds` with `unit` over `items(snapshot)` and reconciles them
    async fn step<I, L, F>(&self, name: &str, kinds: &[EdgeKind], items: L, unit: F) -> Result<()>
    where
        I: Send + 'static,
        L: FnOnce(&G::Snapshot) -> Result<Vec<I>>,
        F: Fn(&AnalysisContext, &G::Snapshot, I) -> Result<DerivedEdges> + Send + Sync + 'static,
    {
        let started = Instant::now();
        self.ctx.check(name)?;
        let snapshot = self.db.snapshot()?;
        let items = items(&snapshot)?;
        let units = items.len();

        let desired = derive_parallel(self.executor, self.ctx, snapshot, items, name, unit).await?;
        self.commit(name, kinds, &desired)?;
        info!("{}: {} units in {:?}", name, units, started.elapsed());
        Ok(())
    }

    /// Reconciles `kinds` against `desired`; an empty set clears the kinds
    fn commit(&self, name: &str, kinds: &[EdgeKind], desired: &DerivedEdges) -> Result<()> {
        let step_stats = reconcile(self.ctx, self.db, kinds, desired)?;
        step_stats.log_stats(name);
        self.stats.merge(step_stats);
        Ok(())
    }
}

async fn expand_groups<G: GraphDatabase>(ctx: &AnalysisContext, db: &G) -> Result<GroupExpansions> {
    let snapshot = db.snapshot()?;
    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || expand_all_groups(&ctx, &snapshot))
        .await
        .map_err(|e| AnalysisError::InternalError(format!("Group expansion task failed: {}", e)))?
}

/// Runs every AD step and returns the merged created/deleted counts
pub async fn post_ad<G: GraphDatabase>(
    ctx: &AnalysisContext,
    db: &G,
    executor: &ParallelExecutor,
    flags: AdPostFlags,
    counter: Arc<CompositionCounter>,
) -> Result<PostProcessingStats> {
    let started = Instant::now();
    let batch_size = executor.config().batch_size;
    let runner = StepRunner {
        ctx,
        db,
        executor,
        stats: PostProcessingStats::new(),
    };

    // Flattened membership, shared by every step below
    let expansions = Arc::new(expand_groups(ctx, db).await?);

    let (expanded, unit_counter) = (expansions.clone(), counter.clone());
    runner
        .step(
            "DCSync",
            &[EdgeKind::DCSync],
            |tx| fetch_domains(tx),
            move |ctx, tx, domain: Node| derive_dcsync(ctx, tx, &domain, &expanded, &unit_counter),
        )
        .await?;

    let expanded = expansions.clone();
    runner
        .step(
            "SyncLAPSPassword",
            &[EdgeKind::SyncLAPSPassword],
            |tx| fetch_domains(tx),
            move |ctx, tx, domain: Node| derive_sync_laps_password(ctx, tx, &domain, &expanded),
        )
        .await?;

    runner
        .step(
            "HasTrustKeys",
            &[EdgeKind::HasTrustKeys],
            |tx| crate::graph_ops::fetch_relationships(tx, &query::edge_kind(EdgeKind::TrustedBy)),
            |_, tx, trust: Relationship| derive_trust_keys_for(tx, &trust),
        )
        .await?;

    let (expanded, citrix) = (expansions.clone(), flags.citrix_rdp_support);
    runner
        .step(
            "LocalGroups",
            LOCAL_GROUP_KINDS,
            |tx| Ok(batches(fetch_computers(tx)?, batch_size)),
            move |ctx, tx, computers: Vec<Node>| {
                let mut edges = DerivedEdges::new();
                for computer in &computers {
                    edges.merge(derive_local_group_edges(ctx, tx, computer, &expanded, citrix)?);
                }
                Ok(edges)
            },
        )
        .await?;

    if flags.adcs_enabled {
        let unit_counter = counter.clone();
        runner
            .step(
                "GoldenCert",
                &[EdgeKind::GoldenCert],
                |tx| fetch_enterprise_cas(tx),
                move |ctx, tx, ca: Node| derive_golden_cert(ctx, tx, &ca, &unit_counter),
            )
            .await?;
    } else {
        runner.commit("GoldenCert", &[EdgeKind::GoldenCert], &DerivedEdges::new())?;
    }

    let scope = Arc::new(OwnershipScope::build(&db.snapshot()?, &expansions)?);
    runner
        .step(
            "Owns",
            &[EdgeKind::Owns, EdgeKind::WriteOwner],
            |tx| Ok(batches(fetch_raw_ownership(tx)?, batch_size)),
            move |ctx, tx, raw: Vec<Relationship>| derive_ownership(ctx, tx, &raw, &scope),
        )
        .await?;

    runner
        .step(
            "GPOAppliesTo",
            &[EdgeKind::GPOAppliesTo],
            |tx| fetch_gpos(tx),
            |ctx, tx, gpo: Node| derive_gpo_applies_to(ctx, tx, &gpo),
        )
        .await?;

    runner
        .step(
            "CanApplyGPO",
            &[EdgeKind::CanApplyGPO],
            |tx| fetch_linkable_containers(tx),
            |ctx, tx, container: Node| derive_can_apply_gpo(ctx, tx, &container),
        )
        .await?;

    if flags.ntlm_enabled {
        let unit_counter = counter.clone();
        runner
            .step(
                "CoerceAndRelayNTLMToSMB",
                &[EdgeKind::CoerceAndRelayNTLMToSMB],
                |tx| fetch_domains(tx),
                move |ctx, tx, domain: Node| derive_ntlm_relay(ctx, tx, &domain, &unit_counter),
            )
            .await?;
    } else {
        runner.commit(
            "CoerceAndRelayNTLMToSMB",
            &[EdgeKind::CoerceAndRelayNTLMToSMB],
            &DerivedEdges::new(),
        )?;
    }

    info!(
        "AD post-processing finished in {:?}: {} created, {} deleted",
        started.elapsed(),
        runner.stats.total_created(),
        runner.stats.total_deleted()
    );
    Ok(runner.stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{MemoryGraph, Transaction, WriteTransaction};
    use crate::graph_types::NodeId;
    use crate::kinds::NodeKind;
    use crate::parallel_executor::ParallelConfig;
    use crate::properties::{keys, Properties};

    const SID: &str = "S-1-5-21-5";

    fn seeded() -> (MemoryGraph, NodeId, NodeId, NodeId) {
        let graph = MemoryGraph::new();
        let ids = graph
            .write_transaction(|tx| {
                let domain = tx
                    .create_node(
                        vec![NodeKind::Base, NodeKind::Domain],
                        Properties::new().with(keys::OBJECT_ID, SID).with(keys::NAME, "TESTLAB.LOCAL"),
                    )?
                    .id;
                let in_domain = || Properties::new().with(keys::DOMAIN_SID, SID);
                let user = tx.create_node(vec![NodeKind::Base, NodeKind::User], in_domain())?.id;
                let computer = tx.create_node(vec![NodeKind::Base, NodeKind::Computer], in_domain())?.id;
                let admins = tx.create_node(
                    vec![NodeKind::Base, NodeKind::LocalGroup],
                    Properties::new().with(keys::OBJECT_ID, format!("{}-1000-544", SID)),
                )?;
                tx.create_relationship(admins.id, computer, EdgeKind::LocalToComputer, Properties::new())?;
                tx.create_relationship(user, admins.id, EdgeKind::MemberOfLocalGroup, Properties::new())?;
                tx.create_relationship(user, domain, EdgeKind::GetChanges, Properties::new())?;
                tx.create_relationship(user, domain, EdgeKind::GetChangesAll, Properties::new())?;
                tx.create_relationship(user, computer, EdgeKind::OwnsRaw, Properties::new())?;
                Ok((domain, user, computer))
            })
            .unwrap();
        (graph, ids.0, ids.1, ids.2)
    }

    #[tokio::test]
    async fn test_post_ad_derives_and_is_idempotent() {
        let (graph, domain, user, computer) = seeded();
        let ctx = AnalysisContext::background();
        let executor = ParallelExecutor::new(ParallelConfig::default());
        let counter = Arc::new(CompositionCounter::new());

        let stats = post_ad(&ctx, &graph, &executor, AdPostFlags::default(), counter.clone())
            .await
            .unwrap();
        assert_eq!(stats.created(EdgeKind::DCSync), 1);
        assert_eq!(stats.created(EdgeKind::AdminTo), 1);
        assert_eq!(stats.created(EdgeKind::Owns), 1);
        assert_eq!(stats.compositions().len(), 1);

        let snapshot = graph.snapshot().unwrap();
        let admin_to = snapshot.relationships(&query::edge_kind(EdgeKind::AdminTo), 0, 0).unwrap();
        assert_eq!((admin_to[0].start, admin_to[0].end), (user, computer));
        assert!(admin_to[0].properties.get_bool(keys::IS_DERIVED).unwrap());
        let dcsync = snapshot.relationships(&query::edge_kind(EdgeKind::DCSync), 0, 0).unwrap();
        assert_eq!(dcsync[0].end, domain);

        let again = post_ad(&ctx, &graph, &executor, AdPostFlags::default(), counter)
            .await
            .unwrap();
        assert_eq!(again.total_created(), 0);
        assert_eq!(again.total_deleted(), 0);
    }

    #[test]
    fn test_flags_from_feature_flags() {
        let flags = FeatureFlags {
            adcs_enabled: true,
            ntlm_post_processing: true,
            ..FeatureFlags::default()
        };
        let ad = AdPostFlags::from(&flags);
        assert!(ad.adcs_enabled && ad.ntlm_enabled && !ad.citrix_rdp_support);
    }
}
