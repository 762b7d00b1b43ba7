//! Property bags for nodes and relationships
//!
//! Collected data is heterogeneous: the same key may hold a string on one
//! node and be absent on the next. Values are a tagged union and every read
//! goes through a typed accessor that reports `TypeMismatch` instead of
//! coercing silently.

use crate::errors::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known property keys
pub mod keys {
    pub const OBJECT_ID: &str = "objectid";
    pub const NAME: &str = "name";
    pub const DOMAIN: &str = "domain";
    pub const DOMAIN_SID: &str = "domainsid";
    pub const NETBIOS: &str = "netbios";
    pub const SAM_ACCOUNT_NAME: &str = "samaccountname";
    pub const COLLECTED: &str = "collected";
    pub const ENFORCED: &str = "enforced";
    pub const BLOCKS_INHERITANCE: &str = "blocksinheritance";
    pub const SYSTEM_TAGS: &str = "system_tags";
    pub const USER_TAGS: &str = "user_tags";
    pub const HAS_LAPS: &str = "haslaps";
    pub const IS_ACL: &str = "isacl";
    pub const LAST_SEEN: &str = "lastseen";
    pub const DS_HEURISTICS: &str = "dsheuristics";
    pub const MSA: &str = "msa";
    pub const GMSA: &str = "gmsa";
    pub const DOES_ANY_ACE_GRANT_OWNER_RIGHTS: &str = "doesanyacegrantownerrights";
    pub const DOES_ANY_INHERITED_ACE_GRANT_OWNER_RIGHTS: &str =
        "doesanyinheritedacegrantownerrights";
    pub const HAS_URA: &str = "hasura";
    pub const SMB_SIGNING: &str = "smbsigning";
    pub const RESTRICT_OUTBOUND_NTLM: &str = "restrictoutboundntlm";
    pub const ROLE_TEMPLATE_ID: &str = "roletemplateid";
    pub const TENANT_ID: &str = "tenantid";
    pub const OPERATING_SYSTEM: &str = "operatingsystem";
    pub const COMPOSITION_ID: &str = "compositionid";
    pub const IS_DERIVED: &str = "derived";
}

/// A single property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringList(Vec<String>),
}

impl PropertyValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "string",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::StringList(_) => "string_list",
        }
    }

    /// Loose textual form used by containment criteria
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        PropertyValue::StringList(value)
    }
}

/// String-keyed property bag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<PropertyValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    fn require(&self, key: &str) -> Result<&PropertyValue> {
        self.0
            .get(key)
            .ok_or_else(|| AnalysisError::PropertyMissing(key.to_string()))
    }

    fn mismatch(key: &str, expected: &'static str, found: &PropertyValue) -> AnalysisError {
        AnalysisError::TypeMismatch {
            key: key.to_string(),
            expected,
            found: found.type_name(),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        match self.require(key)? {
            PropertyValue::String(s) => Ok(s),
            other => Err(Self::mismatch(key, "string", other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.require(key)? {
            PropertyValue::Bool(b) => Ok(*b),
            other => Err(Self::mismatch(key, "bool", other)),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.require(key)? {
            PropertyValue::Int(i) => Ok(*i),
            other => Err(Self::mismatch(key, "int", other)),
        }
    }

    /// Integers widen to floats; nothing else does.
    pub fn get_float(&self, key: &str) -> Result<f64> {
        match self.require(key)? {
            PropertyValue::Float(f) => Ok(*f),
            PropertyValue::Int(i) => Ok(*i as f64),
            other => Err(Self::mismatch(key, "float", other)),
        }
    }

    pub fn get_string_list(&self, key: &str) -> Result<&[String]> {
        match self.require(key)? {
            PropertyValue::StringList(list) => Ok(list),
            other => Err(Self::mismatch(key, "string_list", other)),
        }
    }

    /// Missing keys yield the default; a wrong type is still an error.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        if self.exists(key) {
            self.get_bool(key)
        } else {
            Ok(default)
        }
    }

    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        if self.exists(key) {
            self.get_str(key)
        } else {
            Ok(default)
        }
    }

    /// Space-separated tag membership, as stored in `system_tags` / `user_tags`
    pub fn has_tag(&self, key: &str, tag: &str) -> bool {
        match self.get(key) {
            Some(PropertyValue::String(tags)) => tags.split_whitespace().any(|t| t == tag),
            Some(PropertyValue::StringList(tags)) => tags.iter().any(|t| t == tag),
            _ => false,
        }
    }

    /// Adds a tag to a space-separated tag property. Returns false when already present.
    pub fn add_tag(&mut self, key: &str, tag: &str) -> bool {
        if self.has_tag(key, tag) {
            return false;
        }
        let next = match self.get(key) {
            Some(PropertyValue::String(tags)) if !tags.trim().is_empty() => {
                format!("{} {}", tags.trim(), tag)
            }
            _ => tag.to_string(),
        };
        self.set(key, next);
        true
    }

    /// Removes a tag; the property is dropped once no tags remain
    pub fn remove_tag(&mut self, key: &str, tag: &str) -> bool {
        let remaining: Vec<String> = match self.get(key) {
            Some(PropertyValue::String(tags)) if tags.split_whitespace().any(|t| t == tag) => tags
                .split_whitespace()
                .filter(|t| *t != tag)
                .map(str::to_string)
                .collect(),
            Some(PropertyValue::StringList(tags)) if tags.iter().any(|t| t == tag) => {
                tags.iter().filter(|t| *t != tag).cloned().collect()
            }
            _ => return false,
        };
        if remaining.is_empty() {
            self.remove(key);
        } else {
            self.set(key, remaining.join(" "));
        }
        true
    }
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
