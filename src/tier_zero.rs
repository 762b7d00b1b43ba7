//! Asset-group tagging, including the Tier Zero system group

use crate::analysis_context::AnalysisContext;
use crate::database::AssetGroup;
use crate::delegates::ADMIN_TIER_ZERO;
use crate::errors::Result;
use crate::graph_store::{GraphDatabase, Transaction};
use crate::graph_types::{Direction, Node, NodeId};
use crate::kinds::{EdgeKind, NodeKind};
use crate::properties::keys;
use crate::query::{self, Target};
use crate::traversal::{follow, traverse, TraversalPlan};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Object id suffixes of built-in privileged groups
pub const TIER_ZERO_GROUP_SUFFIXES: &[&str] = &[
    "-512",          // Domain Admins
    "-519",          // Enterprise Admins
    "-S-1-5-32-544", // Administrators
    "-516",          // Domain Controllers
    "-518",          // Schema Admins
    "-S-1-5-9",      // Enterprise Domain Controllers
    "-526",          // Key Admins
    "-527",          // Enterprise Key Admins
    "-551",          // Backup Operators
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaggingCounts {
    pub tagged: usize,
    pub untagged: usize,
}

/// The property an asset group's tag lives in
pub fn tag_property(group: &AssetGroup) -> &'static str {
    if group.system_group {
        keys::SYSTEM_TAGS
    } else {
        keys::USER_TAGS
    }
}

fn tier_zero_roots(tx: &dyn Transaction) -> Result<Vec<Node>> {
    let mut roots = tx.nodes(&query::kind(Target::Node, NodeKind::Domain), 0, 0)?;
    roots.extend(tx.nodes(
        &query::and(vec![
            query::kind(Target::Node, NodeKind::Group),
            query::or(
                TIER_ZERO_GROUP_SUFFIXES
                    .iter()
                    .map(|suffix| query::ends_with(Target::Node, keys::OBJECT_ID, suffix))
                    .collect(),
            ),
        ]),
        0,
        0,
    )?);
    Ok(roots)
}

fn selected_nodes(tx: &dyn Transaction, group: &AssetGroup) -> Result<Vec<Node>> {
    let mut nodes = Vec::with_capacity(group.selectors.len());
    for selector in &group.selectors {
        match tx
            .nodes(&query::equals(Target::Node, keys::OBJECT_ID, selector.selector.as_str()), 0, 1)?
            .into_iter()
            .next()
        {
            Some(node) => nodes.push(node),
            None => warn!(
                "Asset group {} selector '{}' matches no node",
                group.name, selector.selector
            ),
        }
    }
    Ok(nodes)
}

/// Nodes that should carry the group's tag
pub fn desired_members(ctx: &AnalysisContext, tx: &dyn Transaction, group: &AssetGroup) -> Result<BTreeSet<NodeId>> {
    let mut roots = selected_nodes(tx, group)?;
    let tier_zero = group.tag == ADMIN_TIER_ZERO;
    if tier_zero {
        roots.extend(tier_zero_roots(tx)?);
    }

    let mut desired = BTreeSet::new();
    let rule = follow(query::edge_kind(EdgeKind::MemberOf));
    for root in roots {
        if !desired.insert(root.id) || !tier_zero || !root.has_kind(NodeKind::Group) {
            continue;
        }
        let tree = traverse(
            ctx,
            tx,
            TraversalPlan {
                root,
                direction: Direction::Inbound,
                branch: &rule,
            },
        )?;
        desired.extend(tree.views().map(|view| view.node().id));
    }
    Ok(desired)
}

/// Tags every asset group's members and clears the tag from nodes that no
/// longer qualify
pub fn tag_asset_groups_and_tier_zero<G: GraphDatabase>(
    ctx: &AnalysisContext,
    db: &G,
    groups: &[AssetGroup],
) -> Result<TaggingCounts> {
    let snapshot = db.snapshot()?;
    let mut plans = Vec::with_capacity(groups.len());
    for group in groups {
        ctx.check("asset group tagging")?;
        plans.push((group, desired_members(ctx, &snapshot, group)?));
    }

    let counts = db.write_transaction(|tx| {
        let mut counts = TaggingCounts::default();
        for (group, desired) in &plans {
            let property = tag_property(group);

            for mut node in tx.nodes(&query::contains(Target::Node, property, &group.tag), 0, 0)? {
                if !desired.contains(&node.id) && node.properties.remove_tag(property, &group.tag) {
                    tx.update_node(&node)?;
                    counts.untagged += 1;
                }
            }
            for id in desired {
                let mut node = tx.node(*id)?;
                if node.properties.add_tag(property, &group.tag) {
                    tx.update_node(&node)?;
                    counts.tagged += 1;
                }
            }
            info!("Asset group {}: {} members", group.name, desired.len());
        }
        Ok(counts)
    })?;

    info!(
        "Asset group tagging: {} nodes tagged, {} untagged",
        counts.tagged, counts.untagged
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{AssetGroupSelector, OWNED_TAG};
    use crate::graph_store::{MemoryGraph, WriteTransaction};
    use crate::properties::Properties;

    fn tier_zero_group() -> AssetGroup {
        AssetGroup {
            id: 1,
            name: "Admin Tier Zero".to_string(),
            tag: ADMIN_TIER_ZERO.to_string(),
            system_group: true,
            selectors: Vec::new(),
        }
    }

    #[test]
    fn test_tier_zero_includes_transitive_members() {
        let graph = MemoryGraph::new();
        let (domain, admins, nested, admin, user, stale) = graph
            .write_transaction(|tx| {
                let domain = tx
                    .create_node(vec![NodeKind::Base, NodeKind::Domain], Properties::new().with(keys::OBJECT_ID, "S-1-5-21-1"))?
                    .id;
                let admins = tx
                    .create_node(
                        vec![NodeKind::Base, NodeKind::Group],
                        Properties::new().with(keys::OBJECT_ID, "S-1-5-21-1-512"),
                    )?
                    .id;
                let nested = tx.create_node(vec![NodeKind::Base, NodeKind::Group], Properties::new())?.id;
                let admin = tx.create_node(vec![NodeKind::Base, NodeKind::User], Properties::new())?.id;
                let user = tx.create_node(vec![NodeKind::Base, NodeKind::User], Properties::new())?.id;
                let stale = tx
                    .create_node(
                        vec![NodeKind::Base, NodeKind::User],
                        Properties::new().with(keys::SYSTEM_TAGS, ADMIN_TIER_ZERO),
                    )?
                    .id;
                tx.create_relationship(nested, admins, EdgeKind::MemberOf, Properties::new())?;
                tx.create_relationship(admin, nested, EdgeKind::MemberOf, Properties::new())?;
                Ok((domain, admins, nested, admin, user, stale))
            })
            .unwrap();

        let ctx = AnalysisContext::background();
        let counts = tag_asset_groups_and_tier_zero(&ctx, &graph, &[tier_zero_group()]).unwrap();
        assert_eq!(counts, TaggingCounts { tagged: 4, untagged: 1 });

        let snapshot = graph.snapshot().unwrap();
        let tagged = |id: NodeId| snapshot.node(id).unwrap().properties.has_tag(keys::SYSTEM_TAGS, ADMIN_TIER_ZERO);
        assert!(tagged(domain) && tagged(admins) && tagged(nested) && tagged(admin));
        assert!(!tagged(user));
        assert!(!tagged(stale));

        let again = tag_asset_groups_and_tier_zero(&ctx, &graph, &[tier_zero_group()]).unwrap();
        assert_eq!(again, TaggingCounts::default());
    }

    #[test]
    fn test_user_group_selectors_use_user_tags() {
        let graph = MemoryGraph::new();
        let (group, member) = graph
            .write_transaction(|tx| {
                let group = tx
                    .create_node(vec![NodeKind::Base, NodeKind::Group], Properties::new().with(keys::OBJECT_ID, "G-1"))?
                    .id;
                let member = tx.create_node(vec![NodeKind::Base, NodeKind::User], Properties::new())?.id;
                tx.create_relationship(member, group, EdgeKind::MemberOf, Properties::new())?;
                Ok((group, member))
            })
            .unwrap();

        let owned = AssetGroup {
            id: 2,
            name: "Custom".to_string(),
            tag: OWNED_TAG.to_string(),
            system_group: false,
            selectors: vec![
                AssetGroupSelector {
                    id: 1,
                    asset_group_id: 2,
                    name: "group".to_string(),
                    selector: "G-1".to_string(),
                },
                AssetGroupSelector {
                    id: 2,
                    asset_group_id: 2,
                    name: "missing".to_string(),
                    selector: "G-404".to_string(),
                },
            ],
        };

        let ctx = AnalysisContext::background();
        let counts = tag_asset_groups_and_tier_zero(&ctx, &graph, &[owned]).unwrap();
        assert_eq!(counts.tagged, 1);

        let snapshot = graph.snapshot().unwrap();
        assert!(snapshot.node(group).unwrap().properties.has_tag(keys::USER_TAGS, OWNED_TAG));
        // Members of non tier-zero selections are not pulled in
        assert!(!snapshot.node(member).unwrap().properties.has_tag(keys::USER_TAGS, OWNED_TAG));
    }
}
