//! Typed query criteria
//!
//! Criteria are plain immutable values: cloning one and evaluating it twice
//! against the same graph state always yields the same answer, so callers can
//! build a criteria once and reuse it across queries and worker threads.
//!
//! | Target         | Valid when matching | Addresses                  |
//! |----------------|---------------------|----------------------------|
//! | `Node`         | nodes               | the node itself            |
//! | `Start`/`End`  | relationships       | the edge's endpoint nodes  |
//! | `Relationship` | relationships       | the edge's own properties  |

use crate::errors::{AnalysisError, Result};
use crate::graph_types::{Node, NodeId, Relationship};
use crate::kinds::{EdgeKind, NodeKind};
use crate::properties::{Properties, PropertyValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Node,
    Start,
    End,
    Relationship,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Criteria {
    All,
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Not(Box<Criteria>),
    Kind { target: Target, kinds: Vec<NodeKind> },
    EdgeKind(Vec<EdgeKind>),
    Equals { target: Target, key: String, value: PropertyValue },
    Contains { target: Target, key: String, needle: String },
    EndsWith { target: Target, key: String, suffix: String },
    Exists { target: Target, key: String },
    IdIn { target: Target, ids: Vec<NodeId> },
}

pub fn all() -> Criteria {
    Criteria::All
}

pub fn and(criteria: Vec<Criteria>) -> Criteria {
    Criteria::And(criteria)
}

pub fn or(criteria: Vec<Criteria>) -> Criteria {
    Criteria::Or(criteria)
}

pub fn not(criteria: Criteria) -> Criteria {
    Criteria::Not(Box::new(criteria))
}

pub fn kind(target: Target, kind: NodeKind) -> Criteria {
    Criteria::Kind { target, kinds: vec![kind] }
}

pub fn kind_in(target: Target, kinds: &[NodeKind]) -> Criteria {
    Criteria::Kind { target, kinds: kinds.to_vec() }
}

pub fn edge_kind(kind: EdgeKind) -> Criteria {
    Criteria::EdgeKind(vec![kind])
}

pub fn edge_kinds(kinds: &[EdgeKind]) -> Criteria {
    Criteria::EdgeKind(kinds.to_vec())
}

pub fn equals(target: Target, key: &str, value: impl Into<PropertyValue>) -> Criteria {
    Criteria::Equals {
        target,
        key: key.to_string(),
        value: value.into(),
    }
}

/// Substring match on strings, element match on string lists
pub fn contains(target: Target, key: &str, needle: &str) -> Criteria {
    Criteria::Contains {
        target,
        key: key.to_string(),
        needle: needle.to_string(),
    }
}

pub fn ends_with(target: Target, key: &str, suffix: &str) -> Criteria {
    Criteria::EndsWith {
        target,
        key: key.to_string(),
        suffix: suffix.to_string(),
    }
}

pub fn exists(target: Target, key: &str) -> Criteria {
    Criteria::Exists { target, key: key.to_string() }
}

pub fn id_in(target: Target, ids: Vec<NodeId>) -> Criteria {
    Criteria::IdIn { target, ids }
}

fn property_equals(props: &Properties, key: &str, value: &PropertyValue) -> bool {
    match (props.get(key), value) {
        (Some(PropertyValue::Int(a)), PropertyValue::Float(b)) => (*a as f64) == *b,
        (Some(PropertyValue::Float(a)), PropertyValue::Int(b)) => *a == (*b as f64),
        (Some(found), _) => found == value,
        (None, _) => false,
    }
}

fn property_contains(props: &Properties, key: &str, needle: &str) -> bool {
    match props.get(key) {
        Some(PropertyValue::String(s)) => s.contains(needle),
        Some(PropertyValue::StringList(list)) => list.iter().any(|s| s == needle),
        _ => false,
    }
}

fn property_ends_with(props: &Properties, key: &str, suffix: &str) -> bool {
    props
        .get(key)
        .and_then(|v| v.as_text())
        .map(|s| s.ends_with(suffix))
        .unwrap_or(false)
}

/// Endpoint context for relationship matching
struct EdgeScope<'a> {
    start: &'a Node,
    rel: &'a Relationship,
    end: &'a Node,
}

impl Criteria {
    /// Evaluate against a node. Only `Target::Node` is addressable here.
    pub fn matches_node(&self, node: &Node) -> Result<bool> {
        self.eval(&|target| match target {
            Target::Node => Ok(Subject::Node(node)),
            other => Err(AnalysisError::MalformedCriteria(format!(
                "{:?} target used in a node query",
                other
            ))),
        }, None)
    }

    /// Evaluate against a relationship and its endpoints.
    pub fn matches_relationship(&self, start: &Node, rel: &Relationship, end: &Node) -> Result<bool> {
        let scope = EdgeScope { start, rel, end };
        self.eval(&|target| match target {
            Target::Start => Ok(Subject::Node(scope.start)),
            Target::End => Ok(Subject::Node(scope.end)),
            Target::Relationship => Ok(Subject::Edge(scope.rel)),
            Target::Node => Err(AnalysisError::MalformedCriteria(
                "Node target used in a relationship query".to_string(),
            )),
        }, Some(rel.kind))
    }

    fn eval<'a>(
        &self,
        resolve: &dyn Fn(Target) -> Result<Subject<'a>>,
        edge_kind: Option<EdgeKind>,
    ) -> Result<bool> {
        match self {
            Criteria::All => Ok(true),
            Criteria::And(items) => {
                for item in items {
                    if !item.eval(resolve, edge_kind)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Criteria::Or(items) => {
                for item in items {
                    if item.eval(resolve, edge_kind)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Criteria::Not(inner) => Ok(!inner.eval(resolve, edge_kind)?),
            Criteria::Kind { target, kinds } => match resolve(*target)? {
                Subject::Node(node) => Ok(node.has_any_kind(kinds)),
                Subject::Edge(_) => Err(AnalysisError::MalformedCriteria(
                    "node kind filter applied to a relationship".to_string(),
                )),
            },
            Criteria::EdgeKind(kinds) => match edge_kind {
                Some(kind) => Ok(kinds.contains(&kind)),
                None => Err(AnalysisError::MalformedCriteria(
                    "edge kind filter used in a node query".to_string(),
                )),
            },
            Criteria::Equals { target, key, value } => {
                Ok(property_equals(resolve(*target)?.properties(), key, value))
            }
            Criteria::Contains { target, key, needle } => {
                Ok(property_contains(resolve(*target)?.properties(), key, needle))
            }
            Criteria::EndsWith { target, key, suffix } => {
                Ok(property_ends_with(resolve(*target)?.properties(), key, suffix))
            }
            Criteria::Exists { target, key } => Ok(resolve(*target)?.properties().exists(key)),
            Criteria::IdIn { target, ids } => match resolve(*target)? {
                Subject::Node(node) => Ok(ids.contains(&node.id)),
                Subject::Edge(_) => Err(AnalysisError::MalformedCriteria(
                    "node id filter applied to a relationship".to_string(),
                )),
            },
        }
    }

    /// Node kinds every match must carry, used by stores to narrow scans
    pub fn node_kind_hint(&self) -> Option<&[NodeKind]> {
        match self {
            Criteria::Kind { target: Target::Node, kinds } => Some(kinds),
            Criteria::And(items) => items.iter().find_map(|c| c.node_kind_hint()),
            _ => None,
        }
    }

    /// Edge kinds every match must carry
    pub fn edge_kind_hint(&self) -> Option<&[EdgeKind]> {
        match self {
            Criteria::EdgeKind(kinds) => Some(kinds),
            Criteria::And(items) => items.iter().find_map(|c| c.edge_kind_hint()),
            _ => None,
        }
    }
}

enum Subject<'a> {
    Node(&'a Node),
    Edge(&'a Relationship),
}

impl<'a> Subject<'a> {
    fn properties(&self) -> &'a Properties {
        match self {
            Subject::Node(node) => &node.properties,
            Subject::Edge(rel) => &rel.properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_types::RelationshipId;
    use crate::properties::keys;

    fn user() -> Node {
        Node::new(
            NodeId(1),
            vec![NodeKind::Base, NodeKind::User],
            Properties::new()
                .with(keys::DOMAIN_SID, "S-1-5-21-1")
                .with(keys::SYSTEM_TAGS, "admin_tier_0"),
        )
    }

    fn domain() -> Node {
        Node::new(
            NodeId(2),
            vec![NodeKind::Base, NodeKind::Domain],
            Properties::new().with(keys::OBJECT_ID, "S-1-5-21-1"),
        )
    }

    #[test]
    fn test_node_criteria() {
        let criteria = and(vec![
            kind(Target::Node, NodeKind::User),
            equals(Target::Node, keys::DOMAIN_SID, "S-1-5-21-1"),
            contains(Target::Node, keys::SYSTEM_TAGS, "tier_0"),
        ]);
        assert!(criteria.matches_node(&user()).unwrap());
        assert!(!not(criteria.clone()).matches_node(&user()).unwrap());
        assert!(!criteria.matches_node(&domain()).unwrap());
        assert_eq!(criteria.node_kind_hint(), Some(&[NodeKind::User][..]));
    }

    #[test]
    fn test_relationship_criteria() {
        let rel = Relationship {
            id: RelationshipId(5),
            start: NodeId(1),
            end: NodeId(2),
            kind: EdgeKind::GetChanges,
            properties: Properties::new().with(keys::IS_ACL, true),
        };
        let criteria = and(vec![
            edge_kind(EdgeKind::GetChanges),
            kind(Target::End, NodeKind::Domain),
            equals(Target::Relationship, keys::IS_ACL, true),
            equals(Target::End, keys::OBJECT_ID, "S-1-5-21-1"),
        ]);
        assert!(criteria.matches_relationship(&user(), &rel, &domain()).unwrap());
        assert!(!edge_kind(EdgeKind::GetChangesAll)
            .matches_relationship(&user(), &rel, &domain())
            .unwrap());
    }

    #[test]
    fn test_malformed_targets() {
        let err = kind(Target::Start, NodeKind::User).matches_node(&user()).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedCriteria(_)));

        let err = edge_kind(EdgeKind::MemberOf).matches_node(&user()).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedCriteria(_)));
    }
}
