//! Associates every AD node with the name of the domain it belongs to

use crate::analysis_context::AnalysisContext;
use crate::errors::Result;
use crate::graph_ops::fetch_domains;
use crate::graph_store::GraphDatabase;
use crate::kinds::NodeKind;
use crate::properties::{keys, PropertyValue};
use crate::query::{self, Target};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssociationCounts {
    pub associated: usize,
    pub pruned: usize,
}

/// Sets `domain` to the owning domain's name on every node whose
/// `domainsid` (a domain's own object id, for domain nodes) matches a
/// collected domain, and removes `domain` where nothing matches.
pub fn run_domain_associations<G: GraphDatabase>(ctx: &AnalysisContext, db: &G) -> Result<AssociationCounts> {
    ctx.check("domain associations")?;
    let domains = db.read_transaction(|tx| fetch_domains(tx))?;

    let mut names: HashMap<String, String> = HashMap::with_capacity(domains.len());
    for domain in &domains {
        match (domain.object_id(), domain.properties.get_str(keys::NAME)) {
            (Some(sid), Ok(name)) => {
                names.insert(sid.to_string(), name.to_string());
            }
            _ => warn!("Domain {} has no objectid or name, skipping association", domain.id),
        }
    }

    let counts = db.write_transaction(|tx| {
        let mut counts = AssociationCounts::default();
        for mut node in tx.nodes(&query::kind(Target::Node, NodeKind::Base), 0, 0)? {
            let sid = if node.has_kind(NodeKind::Domain) {
                node.object_id()
            } else {
                node.domain_sid()
            };

            match sid.and_then(|sid| names.get(sid)) {
                Some(name) => {
                    let wanted = PropertyValue::from(name.as_str());
                    if node.properties.get(keys::DOMAIN) != Some(&wanted) {
                        node.properties.set(keys::DOMAIN, wanted);
                        tx.update_node(&node)?;
                        counts.associated += 1;
                    }
                }
                None => {
                    if node.properties.remove(keys::DOMAIN).is_some() {
                        tx.update_node(&node)?;
                        counts.pruned += 1;
                    }
                }
            }
        }
        Ok(counts)
    })?;

    info!(
        "Domain associations: {} nodes associated, {} pruned",
        counts.associated, counts.pruned
    );
    Ok(counts)
}
