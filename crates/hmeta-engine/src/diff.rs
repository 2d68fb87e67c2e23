//! ---
//! hmeta_section: "03-merge-engine"
//! hmeta_subsection: "diff"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Table-by-table comparison of two permission sets."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use hmeta_schema::{Mapping, PermissionDefinition, SchemaError, Value};
use indexmap::IndexMap;
use serde::Serialize;

use crate::errors::Result;

/// Which two permission sets are being compared; decides the labels in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffCase {
    RoleVsPrescription,
    SupersetVsSuperset,
    RoleVsRole,
}

impl DiffCase {
    pub fn labels(self) -> (&'static str, &'static str) {
        match self {
            DiffCase::RoleVsPrescription => ("role_actual_perms", "prescription"),
            DiffCase::SupersetVsSuperset => ("superset_1", "superset_2"),
            DiffCase::RoleVsRole => ("role_1", "role_2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff<T> {
    pub first: T,
    pub second: T,
}

/// Field-level differences for a table present in both sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableDiff {
    pub columns_only_in_first: BTreeSet<String>,
    pub columns_only_in_second: BTreeSet<String>,
    pub limit: Option<FieldDiff<Option<u64>>>,
    pub filter: Option<FieldDiff<Value>>,
    pub computed_fields: Option<FieldDiff<Vec<String>>>,
    pub allow_aggregations: Option<FieldDiff<bool>>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.columns_only_in_first.is_empty()
            && self.columns_only_in_second.is_empty()
            && self.limit.is_none()
            && self.filter.is_none()
            && self.computed_fields.is_none()
            && self.allow_aggregations.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionDiff {
    pub case: DiffCase,
    pub only_in_first: IndexMap<String, PermissionDefinition>,
    pub only_in_second: IndexMap<String, PermissionDefinition>,
    pub differing: IndexMap<String, TableDiff>,
}

impl PermissionDiff {
    pub fn is_empty(&self) -> bool {
        self.only_in_first.is_empty() && self.only_in_second.is_empty() && self.differing.is_empty()
    }

    /// Case-labelled tree: `only_in_<a>`, `only_in_<b>`, `in_both_diff`.
    pub fn to_labelled_value(&self) -> Result<Value> {
        let mut root = Mapping::new();
        let (first, second) = self.case.labels();
        root.insert(
            Value::from(format!("only_in_{first}")),
            definitions_value(&self.only_in_first)?,
        );
        root.insert(
            Value::from(format!("only_in_{second}")),
            definitions_value(&self.only_in_second)?,
        );
        root.insert(Value::from("in_both_diff"), self.differing_value());
        Ok(Value::Mapping(root))
    }

    pub(crate) fn only_in_first_value(&self) -> Result<Value> {
        definitions_value(&self.only_in_first)
    }

    pub(crate) fn only_in_second_value(&self) -> Result<Value> {
        definitions_value(&self.only_in_second)
    }

    pub(crate) fn differing_value(&self) -> Value {
        let (first, second) = self.case.labels();
        let pair = |a: Value, b: Value| {
            let mut map = Mapping::new();
            map.insert(Value::from(first), a);
            map.insert(Value::from(second), b);
            Value::Mapping(map)
        };
        let columns = |set: &BTreeSet<String>| {
            Value::Sequence(set.iter().map(|c| Value::from(c.as_str())).collect())
        };
        let list = |items: &[String]| {
            Value::Sequence(items.iter().map(|c| Value::from(c.as_str())).collect())
        };
        let limit = |limit: Option<u64>| limit.map(Value::from).unwrap_or(Value::Null);

        let mut tables = Mapping::new();
        for (table, diff) in &self.differing {
            let mut entry = Mapping::new();
            if !diff.columns_only_in_first.is_empty() {
                entry.insert(
                    Value::from(format!("columns_only_in_{first}")),
                    columns(&diff.columns_only_in_first),
                );
            }
            if !diff.columns_only_in_second.is_empty() {
                entry.insert(
                    Value::from(format!("columns_only_in_{second}")),
                    columns(&diff.columns_only_in_second),
                );
            }
            if let Some(d) = &diff.limit {
                entry.insert(Value::from("row_limit_diff"), pair(limit(d.first), limit(d.second)));
            }
            if let Some(d) = &diff.filter {
                entry.insert(Value::from("filter_diff"), pair(d.first.clone(), d.second.clone()));
            }
            if let Some(d) = &diff.computed_fields {
                entry.insert(
                    Value::from("computed_fields_diff"),
                    pair(list(&d.first), list(&d.second)),
                );
            }
            if let Some(d) = &diff.allow_aggregations {
                entry.insert(
                    Value::from("allow_aggregations_diff"),
                    pair(Value::from(d.first), Value::from(d.second)),
                );
            }
            tables.insert(Value::from(table.as_str()), Value::Mapping(entry));
        }
        Value::Mapping(tables)
    }
}

fn definitions_value(definitions: &IndexMap<String, PermissionDefinition>) -> Result<Value> {
    serde_yaml::to_value(definitions).map_err(|source| {
        SchemaError::Convert {
            context: "permission definitions in diff report".to_string(),
            source,
        }
        .into()
    })
}

/// Compare two `table -> definition` sets.
///
/// Absent filters compare as `{}`, absent computed fields as `[]` and absent
/// aggregation flags as `false`.
pub fn diff(
    first: &IndexMap<String, PermissionDefinition>,
    second: &IndexMap<String, PermissionDefinition>,
    case: DiffCase,
) -> PermissionDiff {
    let mut only_in_first = IndexMap::new();
    let mut differing = IndexMap::new();

    for (table, a) in first {
        let Some(b) = second.get(table) else {
            only_in_first.insert(table.clone(), a.clone());
            continue;
        };
        let table_diff = compare_definitions(a, b);
        if !table_diff.is_empty() {
            differing.insert(table.clone(), table_diff);
        }
    }

    let only_in_second = second
        .iter()
        .filter(|(table, _)| !first.contains_key(*table))
        .map(|(table, def)| (table.clone(), def.clone()))
        .collect();

    PermissionDiff {
        case,
        only_in_first,
        only_in_second,
        differing,
    }
}

fn compare_definitions(a: &PermissionDefinition, b: &PermissionDefinition) -> TableDiff {
    let a_columns: BTreeSet<&String> = a.columns_or_empty().iter().collect();
    let b_columns: BTreeSet<&String> = b.columns_or_empty().iter().collect();

    let mut diff = TableDiff {
        columns_only_in_first: a_columns.difference(&b_columns).map(|c| (*c).clone()).collect(),
        columns_only_in_second: b_columns.difference(&a_columns).map(|c| (*c).clone()).collect(),
        ..TableDiff::default()
    };
    if a.limit != b.limit {
        diff.limit = Some(FieldDiff {
            first: a.limit,
            second: b.limit,
        });
    }
    let (a_filter, b_filter) = (a.filter_or_empty(), b.filter_or_empty());
    if a_filter != b_filter {
        diff.filter = Some(FieldDiff {
            first: a_filter,
            second: b_filter,
        });
    }
    if a.computed_fields_or_empty() != b.computed_fields_or_empty() {
        diff.computed_fields = Some(FieldDiff {
            first: a.computed_fields_or_empty().to_vec(),
            second: b.computed_fields_or_empty().to_vec(),
        });
    }
    if a.allow_aggregations_or_default() != b.allow_aggregations_or_default() {
        diff.allow_aggregations = Some(FieldDiff {
            first: a.allow_aggregations_or_default(),
            second: b.allow_aggregations_or_default(),
        });
    }
    diff
}
