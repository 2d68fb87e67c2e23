//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "relationship-index"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Flat relationship export and grouped listings."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! The export flattens every manual-configuration relationship in the deployed
//! table documents into one record per column pair and writes them to
//! `tooling/metadata_relationships.yaml`. Listings read that file back.

use std::path::{Path, PathBuf};

use hmeta_logging::{hmeta_info, LogContext};
use hmeta_persistence::{deployed_documents, ShardStore};
use hmeta_schema::{read_yaml_file, write_yaml_file, Mapping, RelationshipKind, Value};
use serde::{Deserialize, Serialize};

use crate::workspace::{ensure_parent, MetadataWorkspace};
use crate::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub origin_table: String,
    pub remote_table: String,
    pub rel_name: String,
    pub rel_type: String,
    pub origin_column: String,
    pub remote_column: String,
}

/// Which side of a relationship listings are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Origin,
    Remote,
}

/// `using.manual_configuration` of a relationship block.
fn manual_configuration(relationship: &Value) -> Option<&Value> {
    relationship
        .get("using")
        .and_then(|using| using.get("manual_configuration"))
}

/// Remote table name; Hasura accepts both `remote_table: name` and
/// `remote_table: {name, schema}`.
pub(crate) fn remote_table_name(relationship: &Value) -> Option<&str> {
    match manual_configuration(relationship)?.get("remote_table")? {
        Value::String(name) => Some(name),
        table => table.get("name").and_then(Value::as_str),
    }
}

/// `(origin column, remote column)` pairs in declaration order.
pub(crate) fn column_pairs(relationship: &Value) -> Vec<(&str, &str)> {
    manual_configuration(relationship)
        .and_then(|manual| manual.get("column_mapping"))
        .and_then(Value::as_mapping)
        .map(|mapping| {
            mapping
                .iter()
                .filter_map(|(origin, remote)| Some((origin.as_str()?, remote.as_str()?)))
                .collect()
        })
        .unwrap_or_default()
}

/// Every manual-configuration relationship in the deployed documents, sorted by
/// origin table, remote table and name. Relationships defined by foreign key
/// constraints carry no column mapping and are left out.
pub fn collect_relationships(store: &ShardStore) -> Result<Vec<RelationshipRecord>> {
    let mut records = Vec::new();
    for document in deployed_documents(store)? {
        for kind in RelationshipKind::all() {
            for relationship in document.relationships(kind) {
                let (Some(name), Some(remote)) = (
                    relationship.get("name").and_then(Value::as_str),
                    remote_table_name(relationship),
                ) else {
                    continue;
                };
                for (origin_column, remote_column) in column_pairs(relationship) {
                    records.push(RelationshipRecord {
                        origin_table: document.table_name().to_string(),
                        remote_table: remote.to_string(),
                        rel_name: name.to_string(),
                        rel_type: kind.to_string(),
                        origin_column: origin_column.to_string(),
                        remote_column: remote_column.to_string(),
                    });
                }
            }
        }
    }
    records.sort();
    Ok(records)
}

/// Refresh the flat relationship listing. Returns its path and record count.
pub fn export_relationships(workspace: &MetadataWorkspace) -> Result<(PathBuf, usize)> {
    let records = collect_relationships(workspace.store())?;
    let path = workspace.paths().relationships_export_file();
    ensure_parent(&path)?;
    write_yaml_file(&path, &records)?;
    hmeta_info!(
        context = LogContext::new().with_operation("relationships"),
        "exported {} relationship record(s) to {}",
        records.len(),
        path.display()
    );
    Ok((path, records.len()))
}

pub fn load_exported_relationships(path: &Path) -> Result<Vec<RelationshipRecord>> {
    Ok(read_yaml_file(path)?)
}

/// Nest records under the grouping table.
///
/// By origin: `origin -> rel_name -> {remote_table, origin_column, remote_column}`.
/// By remote: `remote -> origin -> rel_name -> {origin_column, remote_column}`.
/// `filter` keeps only the subtree of one grouping table.
pub fn group_relationships(records: &[RelationshipRecord], by: GroupBy, filter: Option<&str>) -> Result<Value> {
    let mut grouped = Mapping::new();
    for record in records {
        let mut detail = Mapping::new();
        if by == GroupBy::Origin {
            detail.insert("remote_table".into(), record.remote_table.as_str().into());
        }
        detail.insert("origin_column".into(), record.origin_column.as_str().into());
        detail.insert("remote_column".into(), record.remote_column.as_str().into());

        let (outer, inner) = match by {
            GroupBy::Origin => (record.origin_table.as_str(), None),
            GroupBy::Remote => (record.remote_table.as_str(), Some(record.origin_table.as_str())),
        };
        let mut level = entry(&mut grouped, outer);
        if let Some(inner) = inner {
            level = entry(level, inner);
        }
        level.insert(record.rel_name.as_str().into(), Value::Mapping(detail));
    }
    match filter {
        None => Ok(Value::Mapping(grouped)),
        Some(table) => grouped
            .remove(table)
            .ok_or_else(|| OrchestratorError::NotInRelationshipExport(table.to_string())),
    }
}

fn entry<'a>(mapping: &'a mut Mapping, key: &str) -> &'a mut Mapping {
    let slot = mapping
        .entry(key.into())
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !slot.is_mapping() {
        *slot = Value::Mapping(Mapping::new());
    }
    match slot {
        Value::Mapping(inner) => inner,
        _ => unreachable!("slot was just made a mapping"),
    }
}
