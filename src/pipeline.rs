//! Full analysis run
//!
//! Passes run sequentially in a fixed order. A failing pass is recorded and
//! the run moves on; the final status reflects which passes failed.

use crate::ad_post::{post_ad, AdPostFlags};
use crate::analysis_context::{AnalysisContext, CompositionCounter};
use crate::asset_group_isolation::run_asset_group_isolation_collections;
use crate::azure_post::post_azure;
use crate::data_quality::save_data_quality;
use crate::database::{Database, FeatureFlags};
use crate::domain_associations::run_domain_associations;
use crate::errors::{AnalysisError, Result};
use crate::graph_store::GraphDatabase;
use crate::kinds::EdgeKind;
use crate::parallel_executor::{ExecutionStats, ParallelExecutor};
use crate::post_processing::{EdgeCounts, PostProcessingStats};
use crate::tier_zero::tag_asset_groups_and_tier_zero;
use crate::well_known::{fix_well_known_node_types, link_well_known_nodes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const PASS_FEATURE_FLAGS: &str = "feature_flags";
pub const PASS_FIX_WELL_KNOWN: &str = "fix_well_known_node_types";
pub const PASS_DOMAIN_ASSOCIATIONS: &str = "domain_associations";
pub const PASS_LINK_WELL_KNOWN: &str = "link_well_known_nodes";
pub const PASS_TAGGING: &str = "asset_group_tagging";
pub const PASS_AD: &str = "ad_post_processing";
pub const PASS_AZURE: &str = "azure_post_processing";
pub const PASS_COMPOSITIONS: &str = "edge_compositions";
pub const PASS_ISOLATION: &str = "asset_group_isolation";
pub const PASS_DATA_QUALITY: &str = "data_quality";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Success,
    PartiallyCompleted,
    Failed,
}

impl AnalysisStatus {
    /// `Failed` when both platform passes failed, `PartiallyCompleted`
    /// when anything else failed
    pub fn from_errors(errors: &[PassError]) -> Self {
        let failed = |pass: &str| errors.iter().any(|e| e.pass == pass);
        if failed(PASS_AD) && failed(PASS_AZURE) {
            AnalysisStatus::Failed
        } else if !errors.is_empty() {
            AnalysisStatus::PartiallyCompleted
        } else {
            AnalysisStatus::Success
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassError {
    pub pass: String,
    pub category: String,
    pub message: String,
}

/// Result of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub status: AnalysisStatus,
    pub errors: Vec<PassError>,
    pub stats: BTreeMap<EdgeKind, EdgeCounts>,
    pub compositions: usize,
    pub data_quality_run_id: Option<String>,
    /// Worker pool counters accumulated over the executor's lifetime
    pub execution: ExecutionStats,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl AnalysisOutcome {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn failed_passes(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.pass.as_str()).collect()
    }
}

#[derive(Default)]
struct PassLog {
    errors: Vec<PassError>,
}

impl PassLog {
    /// Logs the pass outcome with its timing; failures are kept, not raised
    fn record<T>(&mut self, pass: &str, started: Instant, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                info!("Pass {} finished in {:?}", pass, started.elapsed());
                Some(value)
            }
            Err(e) => {
                error!("Pass {} failed after {:?}: {}", pass, started.elapsed(), e);
                self.errors.push(PassError {
                    pass: pass.to_string(),
                    category: e.category().to_string(),
                    message: e.to_string(),
                });
                None
            }
        }
    }
}

/// Runs every pass against `db`, persisting side results into `database`
pub async fn run_analysis<G: GraphDatabase>(
    ctx: &AnalysisContext,
    db: &G,
    database: &Database,
    executor: &ParallelExecutor,
) -> AnalysisOutcome {
    let started_at = Utc::now();
    let started = Instant::now();
    let mut log = PassLog::default();
    let stats = PostProcessingStats::new();
    let counter = Arc::new(CompositionCounter::new());
    info!("Starting analysis run");

    let flags = log
        .record(PASS_FEATURE_FLAGS, Instant::now(), database.feature_flags().map_err(AnalysisError::from))
        .unwrap_or_else(|| {
            warn!("Using default feature flags");
            FeatureFlags::default()
        });

    let pass_started = Instant::now();
    if let Some(fixed) = log.record(PASS_FIX_WELL_KNOWN, pass_started, fix_well_known_node_types(ctx, db)) {
        info!("Fixed {} well-known node types", fixed);
    }

    let pass_started = Instant::now();
    if let Some(counts) = log.record(PASS_DOMAIN_ASSOCIATIONS, pass_started, run_domain_associations(ctx, db)) {
        info!(
            "Domain associations: {} associated, {} pruned",
            counts.associated, counts.pruned
        );
    }

    let pass_started = Instant::now();
    if let Some(linked) = log.record(PASS_LINK_WELL_KNOWN, pass_started, link_well_known_nodes(ctx, db)) {
        info!("Linked {} well-known relationships", linked);
    }

    let pass_started = Instant::now();
    let tagging = database
        .get_asset_groups()
        .map_err(AnalysisError::from)
        .and_then(|groups| tag_asset_groups_and_tier_zero(ctx, db, &groups));
    if let Some(counts) = log.record(PASS_TAGGING, pass_started, tagging) {
        info!("Asset group tagging: {} tagged, {} untagged", counts.tagged, counts.untagged);
    }

    let pass_started = Instant::now();
    let ad = post_ad(ctx, db, executor, AdPostFlags::from(&flags), counter.clone()).await;
    let ad_succeeded = match log.record(PASS_AD, pass_started, ad) {
        Some(ad_stats) => {
            stats.merge(ad_stats);
            true
        }
        None => false,
    };

    let pass_started = Instant::now();
    if let Some(azure_stats) = log.record(PASS_AZURE, pass_started, post_azure(ctx, db, executor).await) {
        stats.merge(azure_stats);
    }

    // A partial AD run leaves older compositions referenced by surviving edges
    let mut compositions = 0;
    if ad_succeeded {
        let pass_started = Instant::now();
        let stored = database
            .replace_edge_compositions(&stats.compositions())
            .map_err(AnalysisError::from);
        compositions = log.record(PASS_COMPOSITIONS, pass_started, stored).unwrap_or(0);
    }

    if flags.tiering_enabled {
        info!("Tiering enabled, skipping asset group isolation collections");
    } else {
        let pass_started = Instant::now();
        let collected = db
            .snapshot()
            .and_then(|snapshot| run_asset_group_isolation_collections(ctx, &snapshot, database));
        if let Some(groups) = log.record(PASS_ISOLATION, pass_started, collected) {
            info!("Recorded isolation collections for {} asset groups", groups);
        }
    }

    let pass_started = Instant::now();
    let quality = db
        .snapshot()
        .and_then(|snapshot| save_data_quality(ctx, &snapshot, database));
    let data_quality_run_id = log.record(PASS_DATA_QUALITY, pass_started, quality);

    let status = AnalysisStatus::from_errors(&log.errors);
    stats.log_stats("Analysis");
    info!(
        "Analysis run finished with status {:?} in {:?} ({} created, {} deleted, {} failed passes)",
        status,
        started.elapsed(),
        stats.total_created(),
        stats.total_deleted(),
        log.errors.len()
    );

    AnalysisOutcome {
        status,
        errors: log.errors,
        stats: stats.summary(),
        compositions,
        data_quality_run_id,
        execution: executor.stats().await,
        started_at,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
