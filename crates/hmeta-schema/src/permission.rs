//! ---
//! hmeta_section: "02-permission-model"
//! hmeta_subsection: "permission"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Select-permission records and their normalization helpers."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Keys the merge rules understand. Anything else inside a permission body is rejected
/// when supersets are combined.
pub const PERMISSION_KEYS: [&str; 5] = [
    "columns",
    "filter",
    "limit",
    "computed_fields",
    "allow_aggregations",
];

/// Body of a select permission (`permission:` block).
///
/// Every field is optional because source documents omit them freely; serialization
/// order is columns, filter, limit, computed_fields, allow_aggregations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_aggregations: Option<bool>,
    /// Keys outside [`PERMISSION_KEYS`], preserved verbatim.
    #[serde(flatten)]
    pub extra: Mapping,
}

impl PermissionDefinition {
    /// Names of keys the merge rules do not know how to combine.
    pub fn unrecognized_keys(&self) -> Vec<String> {
        self.extra
            .keys()
            .map(|key| match key {
                Value::String(name) => name.clone(),
                other => format!("{other:?}"),
            })
            .collect()
    }

    pub fn columns_or_empty(&self) -> &[String] {
        self.columns.as_deref().unwrap_or_default()
    }

    pub fn computed_fields_or_empty(&self) -> &[String] {
        self.computed_fields.as_deref().unwrap_or_default()
    }

    pub fn allow_aggregations_or_default(&self) -> bool {
        self.allow_aggregations.unwrap_or(false)
    }

    /// `true` when the filter is absent, null, or an empty mapping (no row restriction).
    pub fn filter_is_empty(&self) -> bool {
        filter_value_is_empty(self.filter.as_ref())
    }

    /// The filter as a value, substituting an empty mapping when absent.
    pub fn filter_or_empty(&self) -> Value {
        match &self.filter {
            Some(value) if !filter_value_is_empty(Some(value)) => value.clone(),
            _ => Value::Mapping(Mapping::new()),
        }
    }

    pub fn sort_columns(&mut self) {
        if let Some(columns) = self.columns.as_mut() {
            columns.sort();
        }
    }

    /// Remove repeated columns, keeping first occurrences. Returns the duplicates seen.
    pub fn dedup_columns(&mut self) -> Vec<String> {
        let Some(columns) = self.columns.as_mut() else {
            return Vec::new();
        };
        let mut seen = IndexSet::with_capacity(columns.len());
        let mut duplicates = IndexSet::new();
        for column in columns.drain(..) {
            if !seen.insert(column.clone()) {
                duplicates.insert(column);
            }
        }
        *columns = seen.into_iter().collect();
        duplicates.into_iter().collect()
    }

    /// Fill every field with its default so the record can be written as a role shard.
    ///
    /// Defaults: limit `default_limit`, filter `{}`, computed_fields `[]`,
    /// allow_aggregations `false`. Columns are sorted.
    pub fn into_prescribed(mut self, default_limit: u64) -> Self {
        self.sort_columns();
        if self.columns.is_none() {
            self.columns = Some(Vec::new());
        }
        if self.filter.is_none() || matches!(self.filter, Some(Value::Null)) {
            self.filter = Some(Value::Mapping(Mapping::new()));
        }
        if self.limit.is_none() {
            self.limit = Some(default_limit);
        }
        if self.computed_fields.is_none() {
            self.computed_fields = Some(Vec::new());
        }
        if self.allow_aggregations.is_none() {
            self.allow_aggregations = Some(false);
        }
        self
    }
}

pub(crate) fn filter_value_is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Mapping(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// One entry of a table's `select_permissions` list, and the content of a role shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role: String,
    pub permission: PermissionDefinition,
    /// Sibling keys such as `comment`, preserved verbatim.
    #[serde(flatten)]
    pub extra: Mapping,
}

impl RolePermission {
    pub fn new(role: impl Into<String>, permission: PermissionDefinition) -> Self {
        Self {
            role: role.into(),
            permission,
            extra: Mapping::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> PermissionDefinition {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn unknown_keys_are_preserved_and_reported() {
        let permission = parse("columns: [a]\nlimit: 5\nquery_root_fields: [select]\n");
        assert_eq!(permission.limit, Some(5));
        assert_eq!(permission.unrecognized_keys(), vec!["query_root_fields"]);
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let mut permission = parse("columns: [b, a, b, c, a]\n");
        let duplicates = permission.dedup_columns();
        assert_eq!(permission.columns_or_empty(), ["b", "a", "c"]);
        assert_eq!(duplicates, vec!["b", "a"]);
    }

    #[test]
    fn prescribed_form_fills_defaults_and_sorts() {
        let permission = parse("columns: [z, a]\n").into_prescribed(100);
        assert_eq!(permission.columns_or_empty(), ["a", "z"]);
        assert_eq!(permission.limit, Some(100));
        assert_eq!(permission.filter, Some(Value::Mapping(Mapping::new())));
        assert_eq!(permission.computed_fields, Some(Vec::new()));
        assert_eq!(permission.allow_aggregations, Some(false));
    }

    #[test]
    fn explicit_values_survive_prescription() {
        let permission =
            parse("columns: [a]\nlimit: 7\nallow_aggregations: true\nfilter: {id: {_eq: 1}}\n")
                .into_prescribed(100);
        assert_eq!(permission.limit, Some(7));
        assert_eq!(permission.allow_aggregations, Some(true));
        assert!(!permission.filter_is_empty());
    }

    #[test]
    fn role_permission_serializes_role_first() {
        let record = RolePermission::new("analyst", parse("columns: [a]\nlimit: 1\n"));
        let text = serde_yaml::to_string(&record).unwrap();
        assert!(text.starts_with("role: analyst\npermission:\n"));
    }
}
