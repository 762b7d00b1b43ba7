//! Azure post-processing: tenant-wide abuse edges from directory role assignments

use crate::analysis_context::AnalysisContext;
use crate::errors::{AnalysisError, Result};
use crate::graph_store::{GraphDatabase, Transaction};
use crate::graph_types::{Direction, Node, NodeId};
use crate::kinds::{EdgeKind, NodeKind};
use crate::parallel_executor::ParallelExecutor;
use crate::post_processing::{derive_parallel, reconcile, DerivedEdges, PostProcessingStats};
use crate::properties::keys;
use crate::query::{self, Target};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{info, warn};

pub const GLOBAL_ADMINISTRATOR_ROLE: &str = "62e90394-69f5-4237-9190-012177145e10";
pub const PRIVILEGED_ROLE_ADMINISTRATOR_ROLE: &str = "e8611ab8-c189-46e8-94e1-60213ab1f814";
pub const APPLICATION_ADMINISTRATOR_ROLE: &str = "9b895d92-2cd3-44c7-9d02-a6ac2d5ea5c3";
pub const CLOUD_APPLICATION_ADMINISTRATOR_ROLE: &str = "158c047a-c907-4556-b7ef-446551a6b5f7";
pub const INTUNE_ADMINISTRATOR_ROLE: &str = "3a2c62db-5318-420d-8d74-23affee5d9d5";

/// Every kind Azure post-processing owns
pub const AZURE_POST_KINDS: &[EdgeKind] = &[
    EdgeKind::AZGlobalAdmin,
    EdgeKind::AZPrivilegedRoleAdmin,
    EdgeKind::AZAddSecret,
    EdgeKind::AZExecuteCommand,
];

/// Principals holding any role with one of `templates` in the tenant
fn role_holders(tx: &dyn Transaction, tenant_id: &str, templates: &[&str]) -> Result<BTreeSet<NodeId>> {
    let roles = tx.nodes(
        &query::and(vec![
            query::kind(Target::Node, NodeKind::AZRole),
            query::equals(Target::Node, keys::TENANT_ID, tenant_id),
            query::or(
                templates
                    .iter()
                    .map(|template| query::equals(Target::Node, keys::ROLE_TEMPLATE_ID, *template))
                    .collect(),
            ),
        ]),
        0,
        0,
    )?;

    let mut holders = BTreeSet::new();
    for role in roles {
        for (_, holder) in tx.expand(role.id, Direction::Inbound, &query::edge_kind(EdgeKind::AZHasRole))? {
            holders.insert(holder.id);
        }
    }
    Ok(holders)
}

fn contained(tx: &dyn Transaction, tenant: &Node, kinds: &[NodeKind]) -> Result<Vec<Node>> {
    Ok(tx
        .expand(
            tenant.id,
            Direction::Outbound,
            &query::and(vec![
                query::edge_kind(EdgeKind::AZContains),
                query::kind_in(Target::End, kinds),
            ]),
        )?
        .into_iter()
        .map(|(_, node)| node)
        .collect())
}

fn is_windows(device: &Node) -> bool {
    device
        .properties
        .get_str(keys::OPERATING_SYSTEM)
        .map(|os| os.to_uppercase().contains("WINDOWS"))
        .unwrap_or(false)
}

/// Role-derived edges for one tenant
pub fn derive_tenant_edges(ctx: &AnalysisContext, tx: &dyn Transaction, tenant: &Node) -> Result<DerivedEdges> {
    ctx.check("azure tenant")?;
    let mut edges = DerivedEdges::new();
    let Some(tenant_id) = tenant.object_id() else {
        warn!("Tenant {} has no objectid, skipping", tenant.id);
        return Ok(edges);
    };

    for holder in role_holders(tx, tenant_id, &[GLOBAL_ADMINISTRATOR_ROLE])? {
        edges.insert(holder, tenant.id, EdgeKind::AZGlobalAdmin);
    }
    for holder in role_holders(tx, tenant_id, &[PRIVILEGED_ROLE_ADMINISTRATOR_ROLE])? {
        edges.insert(holder, tenant.id, EdgeKind::AZPrivilegedRoleAdmin);
    }

    let app_admins = role_holders(
        tx,
        tenant_id,
        &[APPLICATION_ADMINISTRATOR_ROLE, CLOUD_APPLICATION_ADMINISTRATOR_ROLE],
    )?;
    if !app_admins.is_empty() {
        for app in contained(tx, tenant, &[NodeKind::AZApp, NodeKind::AZServicePrincipal])? {
            for holder in &app_admins {
                edges.insert(*holder, app.id, EdgeKind::AZAddSecret);
            }
        }
    }

    let intune_admins = role_holders(tx, tenant_id, &[INTUNE_ADMINISTRATOR_ROLE])?;
    if !intune_admins.is_empty() {
        for device in contained(tx, tenant, &[NodeKind::AZDevice])?.iter().filter(|d| is_windows(d)) {
            for holder in &intune_admins {
                edges.insert(*holder, device.id, EdgeKind::AZExecuteCommand);
            }
        }
    }

    Ok(edges)
}

/// Runs Azure post-processing across every tenant
pub async fn post_azure<G: GraphDatabase>(
    ctx: &AnalysisContext,
    db: &G,
    executor: &ParallelExecutor,
) -> Result<PostProcessingStats> {
    let started = Instant::now();
    ctx.check("azure post-processing")?;
    let snapshot = db.snapshot()?;
    let tenants = snapshot.nodes(&query::kind(Target::Node, NodeKind::AZTenant), 0, 0)?;
    if tenants.is_empty() {
        info!("No Azure tenants, clearing derived Azure edges");
    }

    let desired = derive_parallel(executor, ctx, snapshot, tenants, "Azure", |ctx, tx, tenant: Node| {
        derive_tenant_edges(ctx, tx, &tenant)
    })
    .await
    .map_err(|e| match e {
        e if e.is_cancellation() => e,
        other => AnalysisError::PassFailed {
            pass: "azure".to_string(),
            reason: other.to_string(),
        },
    })?;

    let stats = reconcile(ctx, db, AZURE_POST_KINDS, &desired)?;
    stats.log_stats("Azure");
    info!("Azure post-processing finished in {:?}", started.elapsed());
    Ok(stats)
}
