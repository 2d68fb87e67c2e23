//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "deprecation"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Renames or drops deprecated relationships and strips deprecated columns."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! Deprecations are listed in `source_of_truth/metadata_deprecations.yaml`:
//!
//! ```yaml
//! relationships:
//!   - origin_table: parcels
//!     remote_table: owners
//!     rel_name: owner
//!     replacement_rel_name: current_owner   # "n/a" or absent: drop outright
//! columns:
//!   - table_name: parcels
//!     column_name: legacy_code
//! supersets: [base]                         # empty: every superset
//! ```
//!
//! Relationship renames take two runs. The first run adds the replacement beside
//! the deprecated relationship so clients can migrate. Once the replacement
//! exists, the next run removes the deprecated one.

use std::collections::{BTreeMap, BTreeSet};

use hmeta_logging::{hmeta_error, hmeta_info, LogContext};
use hmeta_persistence::{reconstruct, shard_monolith};
use hmeta_schema::{read_yaml_file, write_yaml_value, RelationshipKind, SchemaError, TableDocument, Value};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::relationship_index::remote_table_name;
use crate::workspace::MetadataWorkspace;
use crate::{OrchestratorError, Result};

const NO_REPLACEMENT: &str = "n/a";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeprecatedRelationship {
    pub origin_table: String,
    pub remote_table: String,
    pub rel_name: String,
    #[serde(default)]
    pub replacement_rel_name: Option<String>,
}

impl DeprecatedRelationship {
    fn replacement(&self) -> Option<&str> {
        self.replacement_rel_name
            .as_deref()
            .filter(|name| !name.is_empty() && *name != NO_REPLACEMENT)
    }

    fn label(&self) -> String {
        format!("{}.{}", self.origin_table, self.rel_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeprecatedColumn {
    pub table_name: String,
    pub column_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Deprecations {
    pub relationships: Vec<DeprecatedRelationship>,
    pub columns: Vec<DeprecatedColumn>,
    pub supersets: Vec<String>,
}

impl Deprecations {
    /// `table -> columns` to strip.
    fn columns_by_table(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut grouped: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for column in &self.columns {
            grouped
                .entry(column.table_name.as_str())
                .or_default()
                .insert(column.column_name.as_str());
        }
        grouped
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeprecationReport {
    /// `origin.replacement` relationships added beside a deprecated one.
    pub replacements_created: Vec<String>,
    /// `origin.rel_name` relationships removed.
    pub relationships_removed: Vec<String>,
    /// `origin.rel_name` rows that matched nothing.
    pub relationships_missing: Vec<String>,
    pub shard_columns_removed: usize,
    pub superset_columns_removed: usize,
}

/// Apply `metadata_deprecations.yaml` to the shard headers, the role shards and
/// the superset catalog, then rebuild the deployed documents.
pub fn apply_deprecations(workspace: &MetadataWorkspace) -> Result<DeprecationReport> {
    let store = workspace.store();
    let deprecations: Deprecations = read_yaml_file(&workspace.paths().deprecations_file())?;
    let schema = workspace.config().permissions.default_schema.as_str();

    let supersets_path = workspace.paths().supersets_file();
    workspace.supersets()?.check_exist(&deprecations.supersets)?;
    let mut supersets: Value = read_yaml_file(&supersets_path)?;
    if !supersets.is_mapping() {
        return Err(SchemaError::Malformed {
            context: supersets_path.display().to_string(),
            expected: "a mapping of superset names",
        }
        .into());
    }
    for row in &deprecations.relationships {
        if !store.has_table(&row.origin_table) && !store.deployed_document_path(schema, &row.origin_table).exists() {
            return Err(OrchestratorError::UnknownTable(row.origin_table.clone()));
        }
    }

    shard_monolith(store, true)?;
    let mut report = DeprecationReport::default();

    let mut headers: IndexMap<String, TableDocument> = IndexMap::new();
    for row in &deprecations.relationships {
        if !headers.contains_key(&row.origin_table) {
            headers.insert(row.origin_table.clone(), store.read_header(&row.origin_table)?);
        }
        let Some(header) = headers.get_mut(&row.origin_table) else {
            continue;
        };
        deprecate_relationship(header, row, &mut report);
    }
    for header in headers.values() {
        store.write_header(header)?;
    }

    let columns = deprecations.columns_by_table();
    for (table, deprecated) in &columns {
        if !store.has_table(table) {
            continue;
        }
        for role in store.list_roles(table)? {
            let mut record = store.read_role_permission(table, &role)?;
            let Some(granted) = record.permission.columns.as_mut() else {
                continue;
            };
            let before = granted.len();
            granted.retain(|column| !deprecated.contains(column.as_str()));
            if granted.len() == before {
                continue;
            }
            report.shard_columns_removed += before - granted.len();
            store.write_role_permission(table, &record)?;
            hmeta_info!(
                context = LogContext::new().with_table(table).with_role(&role),
                "removed deprecated column(s) from {}",
                store.role_path(table, &role).display()
            );
        }
    }

    let removed = strip_superset_columns(&mut supersets, &deprecations.supersets, &columns);
    if removed > 0 {
        write_yaml_value(&supersets_path, &supersets)?;
        report.superset_columns_removed = removed;
    }

    reconstruct(store, true)?;
    hmeta_info!(
        context = LogContext::new().with_operation("deprecate"),
        "{} replacement relationship(s) created, {} removed, {} column grant(s) removed",
        report.replacements_created.len(),
        report.relationships_removed.len(),
        report.shard_columns_removed + report.superset_columns_removed
    );
    Ok(report)
}

fn is_relationship(entry: &Value, name: &str, remote_table: &str) -> bool {
    entry.get("name").and_then(Value::as_str) == Some(name) && remote_table_name(entry) == Some(remote_table)
}

/// Object relationships are searched first. A name is unique per origin table,
/// so the first match is the only one.
fn deprecate_relationship(header: &mut TableDocument, row: &DeprecatedRelationship, report: &mut DeprecationReport) {
    let ctx = LogContext::new().with_table(&row.origin_table).with_operation("deprecate");
    for kind in RelationshipKind::all() {
        let Some(entries) = header.relationships_mut(kind) else {
            continue;
        };
        let Some(index) = entries
            .iter()
            .position(|entry| is_relationship(entry, &row.rel_name, &row.remote_table))
        else {
            continue;
        };
        match row.replacement() {
            Some(replacement)
                if !entries
                    .iter()
                    .any(|entry| is_relationship(entry, replacement, &row.remote_table)) =>
            {
                let mut renamed = entries[index].clone();
                if let Value::Mapping(block) = &mut renamed {
                    block.insert("name".into(), replacement.into());
                }
                entries.push(renamed);
                hmeta_info!(context = ctx, "added {} relationship {}.{}", kind, row.origin_table, replacement);
                report
                    .replacements_created
                    .push(format!("{}.{}", row.origin_table, replacement));
            }
            _ => {
                entries.remove(index);
                hmeta_info!(context = ctx, "removed deprecated relationship {}", row.label());
                report.relationships_removed.push(row.label());
            }
        }
        return;
    }
    hmeta_error!(context = ctx, "deprecated relationship {} not found", row.label());
    report.relationships_missing.push(row.label());
}

/// Returns the number of column grants removed.
fn strip_superset_columns(
    supersets: &mut Value,
    scope: &[String],
    columns: &BTreeMap<&str, BTreeSet<&str>>,
) -> usize {
    let Value::Mapping(catalog) = supersets else {
        return 0;
    };
    let mut removed = 0;
    for (name, tables) in catalog.iter_mut() {
        let in_scope = scope.is_empty() || name.as_str().is_some_and(|name| scope.iter().any(|s| s == name));
        let Value::Mapping(tables) = tables else {
            continue;
        };
        if !in_scope {
            continue;
        }
        for (table, definition) in tables.iter_mut() {
            let Some(deprecated) = table.as_str().and_then(|table| columns.get(table)) else {
                continue;
            };
            let Some(Value::Sequence(granted)) = definition.get_mut("columns") else {
                continue;
            };
            let before = granted.len();
            granted.retain(|column| !column.as_str().is_some_and(|column| deprecated.contains(column)));
            removed += before - granted.len();
        }
    }
    removed
}
