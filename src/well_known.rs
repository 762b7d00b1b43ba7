//! Built-in principals: kind fixes and the Everyone / Authenticated Users links

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_ops::fetch_domains;
use crate::graph_store::{GraphDatabase, WriteTransaction};
use crate::graph_types::{Direction, Node, NodeId};
use crate::kinds::{EdgeKind, NodeKind};
use crate::properties::{keys, Properties};
use crate::query::{self, Target};
use tracing::{debug, info, warn};

/// Object id suffixes of built-in principals that are groups even when
/// collected without the `Group` kind
pub const WELL_KNOWN_GROUP_SUFFIXES: &[&str] = &[
    "-S-1-5-9",  // Enterprise Domain Controllers
    "-S-1-5-11", // Authenticated Users
    "-S-1-1-0",  // Everyone
    "-526",      // Key Admins
    "-527",      // Enterprise Key Admins
];

pub const EVERYONE_SUFFIX: &str = "-S-1-1-0";
pub const AUTHENTICATED_USERS_SUFFIX: &str = "-S-1-5-11";
pub const DOMAIN_USERS_RID: &str = "-513";
pub const DOMAIN_COMPUTERS_RID: &str = "-515";

/// Adds the `Group` kind to well-known group nodes. Returns the number of nodes fixed.
pub fn fix_well_known_node_types<G: GraphDatabase>(ctx: &AnalysisContext, db: &G) -> Result<usize> {
    ctx.check("fix well-known node types")?;
    let criteria = query::and(vec![
        query::kind(Target::Node, NodeKind::Base),
        query::not(query::kind(Target::Node, NodeKind::Group)),
        query::or(
            WELL_KNOWN_GROUP_SUFFIXES
                .iter()
                .map(|suffix| query::ends_with(Target::Node, keys::OBJECT_ID, suffix))
                .collect(),
        ),
    ]);

    let fixed = db.write_transaction(|tx| {
        let mut fixed = 0;
        for mut node in tx.nodes(&criteria, 0, 0)? {
            if node.add_kind(NodeKind::Group) {
                tx.update_node(&node)?;
                fixed += 1;
            }
        }
        Ok(fixed)
    })?;

    info!("Fixed kinds on {} well-known nodes", fixed);
    Ok(fixed)
}

fn find_by_object_id(tx: &mut dyn WriteTransaction, object_id: &str) -> Result<Option<Node>> {
    Ok(tx
        .nodes(&query::equals(Target::Node, keys::OBJECT_ID, object_id), 0, 1)?
        .into_iter()
        .next())
}

fn ensure_group(
    tx: &mut dyn WriteTransaction,
    object_id: &str,
    name: &str,
    domain_name: &str,
    domain_sid: &str,
) -> Result<NodeId> {
    if let Some(existing) = find_by_object_id(tx, object_id)? {
        return Ok(existing.id);
    }
    debug!("Creating well-known node {}", object_id);
    let properties = Properties::new()
        .with(keys::OBJECT_ID, object_id)
        .with(keys::NAME, name)
        .with(keys::DOMAIN, domain_name)
        .with(keys::DOMAIN_SID, domain_sid);
    Ok(tx.create_node(vec![NodeKind::Base, NodeKind::Group], properties)?.id)
}

/// Creates `start -MemberOf-> end` unless it exists. Returns true when created.
fn ensure_member_of(tx: &mut dyn WriteTransaction, start: NodeId, end: NodeId) -> Result<bool> {
    let exists = tx
        .expand(start, Direction::Outbound, &query::edge_kind(EdgeKind::MemberOf))?
        .iter()
        .any(|(rel, _)| rel.end == end);
    if exists {
        return Ok(false);
    }
    tx.create_relationship(start, end, EdgeKind::MemberOf, Properties::new())?;
    Ok(true)
}

/// Ensures every domain has its Everyone and Authenticated Users nodes and
/// links Domain Users and Domain Computers into them. Returns the number of
/// relationships created.
pub fn link_well_known_nodes<G: GraphDatabase>(ctx: &AnalysisContext, db: &G) -> Result<usize> {
    ctx.check("link well-known nodes")?;
    let domains = db.read_transaction(|tx| fetch_domains(tx))?;

    let created = db.write_transaction(|tx| {
        let mut created = 0;
        for domain in &domains {
            let (sid, name) = match (domain.object_id(), domain.properties.get_str(keys::NAME)) {
                (Some(sid), Ok(name)) => (sid, name.to_uppercase()),
                _ => {
                    warn!("Skipping well-known links for domain {}: missing objectid or name", domain.id);
                    continue;
                }
            };

            let everyone = ensure_group(
                tx,
                &format!("{}{}", name, EVERYONE_SUFFIX),
                &format!("EVERYONE@{}", name),
                &name,
                sid,
            )?;
            let authenticated_users = ensure_group(
                tx,
                &format!("{}{}", name, AUTHENTICATED_USERS_SUFFIX),
                &format!("AUTHENTICATED USERS@{}", name),
                &name,
                sid,
            )?;

            for rid in [DOMAIN_USERS_RID, DOMAIN_COMPUTERS_RID] {
                if let Some(group) = find_by_object_id(tx, &format!("{}{}", sid, rid))? {
                    created += usize::from(ensure_member_of(tx, group.id, authenticated_users)?);
                }
            }
            created += usize::from(ensure_member_of(tx, authenticated_users, everyone)?);
        }
        Ok(created)
    })?;

    info!("Linked well-known nodes: {} relationships created", created);
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_ops::fetch_node_by_object_id;
    use crate::graph_store::{MemoryGraph, Transaction};

    const SID: &str = "S-1-5-21-42";

    fn seeded() -> MemoryGraph {
        let graph = MemoryGraph::new();
        graph
            .write_transaction(|tx| {
                tx.create_node(
                    vec![NodeKind::Base, NodeKind::Domain],
                    Properties::new().with(keys::OBJECT_ID, SID).with(keys::NAME, "testlab.local"),
                )?;
                tx.create_node(
                    vec![NodeKind::Base, NodeKind::Group],
                    Properties::new().with(keys::OBJECT_ID, format!("{}-513", SID)),
                )?;
                tx.create_node(
                    vec![NodeKind::Base],
                    Properties::new().with(keys::OBJECT_ID, format!("{}-526", SID)),
                )?;
                tx.create_node(
                    vec![NodeKind::Base, NodeKind::User],
                    Properties::new().with(keys::OBJECT_ID, format!("{}-1105", SID)),
                )?;
                Ok(())
            })
            .unwrap();
        graph
    }

    #[test]
    fn test_fix_well_known_node_types() {
        let graph = seeded();
        let ctx = AnalysisContext::background();
        assert_eq!(fix_well_known_node_types(&ctx, &graph).unwrap(), 1);
        assert_eq!(fix_well_known_node_types(&ctx, &graph).unwrap(), 0);

        let snapshot = graph.snapshot().unwrap();
        let key_admins = fetch_node_by_object_id(&snapshot, &format!("{}-526", SID)).unwrap();
        assert!(key_admins.has_kind(NodeKind::Group));
        let user = fetch_node_by_object_id(&snapshot, &format!("{}-1105", SID)).unwrap();
        assert!(!user.has_kind(NodeKind::Group));
    }

    #[test]
    fn test_link_well_known_nodes_is_idempotent() {
        let graph = seeded();
        let ctx = AnalysisContext::background();

        // Domain Users -> Authenticated Users -> Everyone
        assert_eq!(link_well_known_nodes(&ctx, &graph).unwrap(), 2);
        assert_eq!(link_well_known_nodes(&ctx, &graph).unwrap(), 0);

        let snapshot = graph.snapshot().unwrap();
        let everyone = fetch_node_by_object_id(&snapshot, "TESTLAB.LOCAL-S-1-1-0").unwrap();
        assert_eq!(everyone.properties.get_str(keys::NAME).unwrap(), "EVERYONE@TESTLAB.LOCAL");
        let members = snapshot
            .expand(everyone.id, Direction::Inbound, &query::edge_kind(EdgeKind::MemberOf))
            .unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(
            members[0].1.object_id(),
            Some("TESTLAB.LOCAL-S-1-5-11")
        );
    }
}
