//! ---
//! hmeta_section: "02-permission-model"
//! hmeta_subsection: "table"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Per-table metadata documents and header shards."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde_yaml::{Mapping, Value};

use crate::permission::RolePermission;
use crate::{Result, SchemaError};

pub const SELECT_PERMISSIONS_KEY: &str = "select_permissions";

/// The two relationship lists a table document may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    Object,
    Array,
}

impl RelationshipKind {
    pub fn key(self) -> &'static str {
        match self {
            RelationshipKind::Object => "object_relationships",
            RelationshipKind::Array => "array_relationships",
        }
    }

    pub fn all() -> [RelationshipKind; 2] {
        [RelationshipKind::Object, RelationshipKind::Array]
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipKind::Object => f.write_str("object"),
            RelationshipKind::Array => f.write_str("array"),
        }
    }
}

impl FromStr for RelationshipKind {
    type Err = SchemaError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "object" => Ok(RelationshipKind::Object),
            "array" => Ok(RelationshipKind::Array),
            _ => Err(SchemaError::Malformed {
                context: format!("relationship type '{value}'"),
                expected: "'object' or 'array'",
            }),
        }
    }
}

/// A per-table metadata document: either a deployed monolith or a `_table.yaml` header.
///
/// The top-level mapping keeps its key order so untouched sections survive a
/// shard/reconstruct round trip unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDocument {
    name: String,
    body: Mapping,
}

impl TableDocument {
    /// Header for a table that has no metadata yet.
    pub fn stub(table: &str, schema: &str) -> Self {
        let mut descriptor = Mapping::new();
        descriptor.insert(Value::from("schema"), Value::from(schema));
        descriptor.insert(Value::from("name"), Value::from(table));
        let mut body = Mapping::new();
        body.insert(Value::from("table"), Value::Mapping(descriptor));
        body.insert(Value::from(SELECT_PERMISSIONS_KEY), Value::Sequence(Vec::new()));
        Self {
            name: table.to_string(),
            body,
        }
    }

    /// Interpret a parsed YAML document. `context` names the source in errors.
    pub fn from_value(value: Value, context: &str) -> Result<Self> {
        let Value::Mapping(body) = value else {
            return Err(SchemaError::Malformed {
                context: context.to_string(),
                expected: "a mapping at the document root",
            });
        };
        let name = body
            .get("table")
            .and_then(|table| table.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::Malformed {
                context: context.to_string(),
                expected: "a `table.name` string",
            })?
            .to_string();
        Ok(Self { name, body })
    }

    pub fn table_name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.body
            .get("table")
            .and_then(|table| table.get("schema"))
            .and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.body.get_mut(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) -> Option<Value> {
        self.body.insert(Value::from(key), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.body.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.body.keys().filter_map(Value::as_str)
    }

    pub fn has_select_permissions(&self) -> bool {
        self.body.contains_key(SELECT_PERMISSIONS_KEY)
    }

    /// Typed view of `select_permissions`; a missing key reads as an empty list.
    pub fn select_permissions(&self) -> Result<Vec<RolePermission>> {
        match self.body.get(SELECT_PERMISSIONS_KEY) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => {
                serde_yaml::from_value(value.clone()).map_err(|source| SchemaError::Convert {
                    context: format!("select_permissions of table '{}'", self.name),
                    source,
                })
            }
        }
    }

    /// Replace `select_permissions` (inserting the key if needed).
    pub fn set_select_permissions(&mut self, permissions: &[RolePermission]) -> Result<()> {
        let value = serde_yaml::to_value(permissions).map_err(|source| SchemaError::Convert {
            context: format!("select_permissions of table '{}'", self.name),
            source,
        })?;
        self.body.insert(Value::from(SELECT_PERMISSIONS_KEY), value);
        Ok(())
    }

    /// Empty `select_permissions` when present. An absent key stays absent.
    pub fn clear_select_permissions(&mut self) {
        if let Some(value) = self.body.get_mut(SELECT_PERMISSIONS_KEY) {
            *value = Value::Sequence(Vec::new());
        }
    }

    pub fn relationships(&self, kind: RelationshipKind) -> &[Value] {
        match self.body.get(kind.key()) {
            Some(Value::Sequence(entries)) => entries,
            _ => &[],
        }
    }

    pub fn relationships_mut(&mut self, kind: RelationshipKind) -> Option<&mut Vec<Value>> {
        match self.body.get_mut(kind.key()) {
            Some(Value::Sequence(entries)) => Some(entries),
            _ => None,
        }
    }

    /// Append a relationship, creating the list when the document has none.
    pub fn push_relationship(&mut self, kind: RelationshipKind, relationship: Value) {
        match self.body.get_mut(kind.key()) {
            Some(Value::Sequence(entries)) => entries.push(relationship),
            _ => {
                self.body
                    .insert(Value::from(kind.key()), Value::Sequence(vec![relationship]));
            }
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Mapping(self.body.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Mapping(self.body)
    }
}
