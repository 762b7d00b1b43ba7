//! Asset-group isolation collections: a point-in-time record of every node
//! carrying an asset group's tag

use crate::analysis_context::AnalysisContext;
use crate::database::{AssetGroup, AssetGroupCollectionEntry, Database};
use crate::errors::Result;
use crate::graph_store::Transaction;
use crate::graph_types::Node;
use crate::kinds::NodeKind;
use crate::query::{self, Target};
use crate::tier_zero::tag_property;
use tracing::{info, warn};

/// Most specific kind of a node, for display
pub fn node_label(node: &Node) -> String {
    node.kinds
        .iter()
        .find(|kind| !matches!(kind, NodeKind::Base | NodeKind::AZBase))
        .or_else(|| node.kinds.first())
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Entries for every node tagged with the group's tag
pub fn collect_asset_group_entries(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    group: &AssetGroup,
) -> Result<Vec<AssetGroupCollectionEntry>> {
    ctx.check("asset group isolation")?;
    let property = tag_property(group);

    let mut entries = Vec::new();
    for node in tx.nodes(&query::contains(Target::Node, property, &group.tag), 0, 0)? {
        // The criteria is a substring match; tags must match a whole token
        if !node.properties.has_tag(property, &group.tag) {
            continue;
        }
        let Some(object_id) = node.object_id() else {
            warn!(
                "Node {} tagged {} has no objectid, leaving it out of the collection",
                node.id, group.tag
            );
            continue;
        };
        entries.push(AssetGroupCollectionEntry {
            object_id: object_id.to_string(),
            node_label: node_label(&node),
            properties: serde_json::to_value(&node.properties)?,
        });
    }
    Ok(entries)
}

/// Records one collection per asset group, including empty ones
pub fn run_asset_group_isolation_collections(
    ctx: &AnalysisContext,
    tx: &dyn Transaction,
    database: &Database,
) -> Result<usize> {
    let groups = database.get_asset_groups()?;
    for group in &groups {
        let entries = collect_asset_group_entries(ctx, tx, group)?;
        database.create_asset_group_collection(group.id, &entries)?;
        info!("Asset group {} collection: {} entries", group.name, entries.len());
    }
    Ok(groups.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegates::ADMIN_TIER_ZERO;
    use crate::graph_store::{GraphDatabase, MemoryGraph, WriteTransaction};
    use crate::graph_types::NodeId;
    use crate::properties::{keys, Properties};

    #[test]
    fn test_collections_keep_exact_tags_with_object_ids() {
        let graph = MemoryGraph::new();
        graph
            .write_transaction(|tx| {
                tx.create_node(
                    vec![NodeKind::Base, NodeKind::User],
                    Properties::new()
                        .with(keys::OBJECT_ID, "S-1-5-21-1-500")
                        .with(keys::SYSTEM_TAGS, ADMIN_TIER_ZERO),
                )?;
                tx.create_node(
                    vec![NodeKind::Base, NodeKind::User],
                    Properties::new()
                        .with(keys::OBJECT_ID, "S-1-5-21-1-501")
                        .with(keys::SYSTEM_TAGS, "admin_tier_0_candidate"),
                )?;
                tx.create_node(vec![NodeKind::Base, NodeKind::Group], Properties::new().with(keys::SYSTEM_TAGS, ADMIN_TIER_ZERO))?;
                Ok(())
            })
            .unwrap();

        let database = Database::open_in_memory().unwrap();
        let snapshot = graph.snapshot().unwrap();
        let ctx = AnalysisContext::background();
        assert_eq!(run_asset_group_isolation_collections(&ctx, &snapshot, &database).unwrap(), 2);

        let tier_zero = database.get_asset_group_by_tag(ADMIN_TIER_ZERO).unwrap().unwrap();
        let collection = database.get_latest_collection(tier_zero.id).unwrap().unwrap();
        assert_eq!(collection.entries.len(), 1);
        assert_eq!(collection.entries[0].object_id, "S-1-5-21-1-500");
        assert_eq!(collection.entries[0].node_label, "User");

        // The owned group has no members but still gets a collection
        let owned = database.get_asset_group_by_tag(crate::database::OWNED_TAG).unwrap().unwrap();
        assert!(database.get_latest_collection(owned.id).unwrap().unwrap().entries.is_empty());
    }

    #[test]
    fn test_node_label() {
        let node = Node::new(NodeId(1), vec![NodeKind::AZBase, NodeKind::AZDevice], Properties::new());
        assert_eq!(node_label(&node), "AZDevice");
        let base = Node::new(NodeId(2), vec![NodeKind::Base], Properties::new());
        assert_eq!(node_label(&base), "Base");
    }
}
