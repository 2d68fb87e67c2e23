//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "relationships"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Bulk manual-configuration relationship creation with e2e scaffolding."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! Input is `metadata/hasura_relationships_metadata.txt`, a list of rows such as
//!
//! ```text
//! [
//! {'origin_table': 'parcels', 'origin_column': 'id', 'remote_table': 'sales',
//!     'remote_column': 'parcel_id', 'rel_type': 'array', 'rel_name': 'sales'},
//! ]
//! ```
//!
//! The single-quoted, trailing-comma form parses as a YAML flow sequence.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use hmeta_logging::{hmeta_error, hmeta_info, hmeta_warn, LogContext};
use hmeta_persistence::{reconstruct, shard_monolith, ShardStore};
use hmeta_schema::{read_yaml_file, Mapping, RelationshipKind, TableDocument, Value};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::relationship_index::column_pairs;
use crate::workspace::{ensure_parent, MetadataWorkspace};
use crate::{OrchestratorError, Result};

/// One input row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelationshipSpec {
    pub origin_table: String,
    pub origin_column: String,
    pub remote_table: String,
    pub remote_column: String,
    pub rel_type: String,
    pub rel_name: String,
}

impl RelationshipSpec {
    /// Manual-configuration block appended to the origin table's header.
    pub fn block(&self, remote_schema: &str) -> Value {
        let mut column_mapping = Mapping::new();
        column_mapping.insert(self.origin_column.as_str().into(), self.remote_column.as_str().into());
        let mut remote_table = Mapping::new();
        remote_table.insert("name".into(), self.remote_table.as_str().into());
        remote_table.insert("schema".into(), remote_schema.into());
        let mut manual = Mapping::new();
        manual.insert("column_mapping".into(), Value::Mapping(column_mapping));
        manual.insert("remote_table".into(), Value::Mapping(remote_table));
        let mut using = Mapping::new();
        using.insert("manual_configuration".into(), Value::Mapping(manual));
        let mut block = Mapping::new();
        block.insert("name".into(), self.rel_name.as_str().into());
        block.insert("using".into(), Value::Mapping(using));
        Value::Mapping(block)
    }

    /// Whether `existing` already declares this relationship (same name, remote
    /// table and column pair).
    fn matches(&self, existing: &Value) -> bool {
        let Some(manual) = existing
            .get("using")
            .and_then(|using| using.get("manual_configuration"))
        else {
            return false;
        };
        let remote = manual
            .get("remote_table")
            .and_then(|table| table.get("name"))
            .and_then(Value::as_str);
        let mapping = manual.get("column_mapping").and_then(Value::as_mapping);
        let pair = mapping.and_then(|columns| columns.iter().next());
        existing.get("name").and_then(Value::as_str) == Some(self.rel_name.as_str())
            && remote == Some(self.remote_table.as_str())
            && pair.is_some_and(|(origin, target)| {
                origin.as_str() == Some(self.origin_column.as_str())
                    && target.as_str() == Some(self.remote_column.as_str())
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipReport {
    /// `origin.rel_name` of relationships appended to headers.
    pub added: Vec<String>,
    /// `origin.rel_name` of rows already present.
    pub skipped: Vec<String>,
    /// Feature files created or appended to.
    pub features: Vec<PathBuf>,
    /// GraphQL query files created.
    pub queries: Vec<PathBuf>,
}

/// Read the relationship input, append the new blocks to the origin headers,
/// scaffold their e2e tests and rebuild the deployed documents.
///
/// Every row is validated before any file is touched.
pub fn create_relationships(workspace: &MetadataWorkspace) -> Result<RelationshipReport> {
    let store = workspace.store();
    let specs: Vec<RelationshipSpec> = read_yaml_file(&workspace.paths().relationships_input_file())?;
    let schema = workspace.config().permissions.default_schema.as_str();
    let rows = validate(store, schema, &specs)?;

    shard_monolith(store, true)?;

    let mut report = RelationshipReport::default();
    let mut headers: IndexMap<String, TableDocument> = IndexMap::new();
    for (spec, kind) in &rows {
        if !headers.contains_key(&spec.origin_table) {
            headers.insert(spec.origin_table.clone(), store.read_header(&spec.origin_table)?);
        }
        let Some(header) = headers.get_mut(&spec.origin_table) else {
            continue;
        };
        let label = format!("{}.{}", spec.origin_table, spec.rel_name);
        if header.relationships(*kind).iter().any(|existing| spec.matches(existing)) {
            hmeta_info!(
                context = LogContext::new().with_table(&spec.origin_table),
                "relationship metadata already exists for {}; skipping",
                label
            );
            report.skipped.push(label);
        } else {
            header.push_relationship(*kind, spec.block(schema));
            report.added.push(label);
        }
    }
    for header in headers.values() {
        store.write_header(header)?;
    }

    for (spec, kind) in &rows {
        scaffold_e2e(workspace, spec, *kind, &mut report)?;
    }

    reconstruct(store, true)?;
    hmeta_info!(
        context = LogContext::new().with_operation("relationships"),
        "added {} relationship(s), {} already present",
        report.added.len(),
        report.skipped.len()
    );
    Ok(report)
}

/// Origin tables must already exist as shards or as a deployed document in `schema`.
fn validate<'a>(
    store: &ShardStore,
    schema: &str,
    specs: &'a [RelationshipSpec],
) -> Result<Vec<(&'a RelationshipSpec, RelationshipKind)>> {
    let mut rows = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        let kind = spec
            .rel_type
            .parse::<RelationshipKind>()
            .map_err(|err| OrchestratorError::InvalidRelationship {
                index,
                reason: err.to_string(),
            })?;
        if !store.has_table(&spec.origin_table) && !store.deployed_document_path(schema, &spec.origin_table).exists() {
            return Err(OrchestratorError::UnknownTable(spec.origin_table.clone()));
        }
        rows.push((spec, kind));
    }
    Ok(rows)
}

fn scaffold_e2e(
    workspace: &MetadataWorkspace,
    spec: &RelationshipSpec,
    kind: RelationshipKind,
    report: &mut RelationshipReport,
) -> Result<()> {
    let ctx = LogContext::new().with_table(&spec.origin_table).with_operation("relationships");
    let e2e = &workspace.config().e2e;
    let Some(subdir) = e2e.relationship_subdirs.get(&spec.origin_table) else {
        hmeta_error!(
            context = ctx,
            "no e2e subdirectory configured for {}; skipping test scaffolding",
            spec.origin_table
        );
        return Ok(());
    };
    let dir = workspace.paths().relationships_e2e_dir().join(subdir);

    let feature = dir.join(format!("{}.feature", spec.origin_table));
    if append_scenario(&feature, spec, kind, &e2e.relationship_test_role)? {
        report.features.push(feature);
    } else {
        hmeta_info!(
            context = ctx,
            "test scenario for {} already exists in {}; skipping",
            spec.rel_name,
            feature.display()
        );
    }

    let query = dir
        .join("queries")
        .join(&spec.origin_table)
        .join(format!("{}.graphql", spec.rel_name));
    if query.exists() {
        hmeta_info!(context = ctx, "query file {} exists already; skipping", query.display());
        return Ok(());
    }
    let store = workspace.store();
    let role = e2e.relationship_test_role.as_str();
    if !store.has_role_permission(&spec.origin_table, role) || !store.has_role_permission(&spec.remote_table, role) {
        hmeta_warn!(
            context = ctx,
            "{} cannot read both {} and {}; skipping query for {}",
            role,
            spec.origin_table,
            spec.remote_table,
            spec.rel_name
        );
        return Ok(());
    }
    let origin_columns = store.read_role_permission(&spec.origin_table, role)?.permission;
    let remote_columns = store.read_role_permission(&spec.remote_table, role)?.permission;
    let text = graphql_query(
        &spec.origin_table,
        &spec.rel_name,
        remote_columns.columns_or_empty(),
        origin_columns.columns_or_empty(),
    );
    ensure_parent(&query)?;
    fs::write(&query, text).map_err(|err| OrchestratorError::io(&query, err))?;
    report.queries.push(query);
    Ok(())
}

/// Append the scenario unless the relationship name already appears in the file.
/// New files start with the feature header. Returns whether the file changed.
fn append_scenario(path: &Path, spec: &RelationshipSpec, kind: RelationshipKind, role: &str) -> Result<bool> {
    let mut text = String::new();
    if path.exists() {
        let existing = fs::read_to_string(path).map_err(|err| OrchestratorError::io(path, err))?;
        if existing.contains(&spec.rel_name) {
            return Ok(false);
        }
    } else {
        ensure_parent(path)?;
        text.push_str(&feature_header(&spec.origin_table));
    }
    text.push_str(&scenario(spec, kind, role));
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| OrchestratorError::io(path, err))?;
    file.write_all(text.as_bytes())
        .map_err(|err| OrchestratorError::io(path, err))?;
    Ok(true)
}

fn feature_header(origin: &str) -> String {
    format!(
        "\n    Feature: {origin} as origin table\n    Background:\n    * url baseUrl + '/graphql'\n    * def tokens = read('../tokens.yaml')['tokens'] "
    )
}

fn scenario(spec: &RelationshipSpec, kind: RelationshipKind, role: &str) -> String {
    let (tag, eq) = match kind {
        RelationshipKind::Object => ("obj", "!"),
        RelationshipKind::Array => ("array", "="),
    };
    let origin = &spec.origin_table;
    let name = &spec.rel_name;
    format!(
        "


    @{origin}
    @{remote}
    @{name}
    @rel_type_{tag}
    Scenario Outline: confirm {name} relationship work and is correct relationship type.

    * header Authorization = 'Bearer ' + tokens['<role>']
    Given def query = read('queries/{origin}/{name}.graphql')
    And request {{ query : '#(query)' }}
    When method post
    Then status 200

    * match $.data.{origin}[0].{name} {eq}= '#[]'

    Examples:
    | role              |
    | {role:<17} |


    ",
        remote = spec.remote_table,
    )
}

/// Query selecting the remote columns through the relationship and the origin
/// columns beside it.
fn graphql_query(origin: &str, rel_name: &str, remote_columns: &[String], origin_columns: &[String]) -> String {
    let remote: String = remote_columns
        .iter()
        .map(|column| format!("{column}\n            "))
        .collect();
    let local: String = origin_columns
        .iter()
        .map(|column| format!("{column}\n        "))
        .collect();
    format!("{{\n    {origin} {{\n        {rel_name} {{\n            {remote}\n        }}\n        {local}\n    }}\n}}\n")
}

/// Restrict a scaffolded relationship query to origin rows whose relationship is
/// populated, so the e2e assertion cannot pass on an empty join.
///
/// `query` is relative to the relationship e2e directory. The origin table and
/// relationship name are the first two selections of the query. Returns `false`
/// when the query already carries a not-null clause.
pub fn add_not_null_filter(workspace: &MetadataWorkspace, query: &Path) -> Result<bool> {
    let path = workspace.paths().relationships_e2e_dir().join(query);
    let text = fs::read_to_string(&path).map_err(|err| OrchestratorError::io(&path, err))?;
    if text.contains("_is_null:false") {
        hmeta_info!(
            context = LogContext::new().with_operation("relationships"),
            "{} already filters out null relationships",
            path.display()
        );
        return Ok(false);
    }

    let braces: Vec<usize> = text.match_indices('{').map(|(at, _)| at).take(3).collect();
    let &[start, origin_brace, relationship_brace] = braces.as_slice() else {
        return Err(OrchestratorError::MalformedQuery {
            path,
            reason: "expected a root selection, an origin table and a relationship",
        });
    };
    let origin = text[start + 1..origin_brace].trim();
    let rel_name = text[origin_brace + 1..relationship_brace].trim();
    if origin.is_empty() || rel_name.is_empty() {
        return Err(OrchestratorError::MalformedQuery {
            path,
            reason: "origin table or relationship name is empty",
        });
    }

    let header = origin_header(workspace, origin)?;
    let remote_column = RelationshipKind::all()
        .into_iter()
        .flat_map(|kind| header.relationships(kind))
        .find(|relationship| relationship.get("name").and_then(Value::as_str) == Some(rel_name))
        .and_then(|relationship| column_pairs(relationship).first().map(|(_, remote)| remote.to_string()))
        .ok_or_else(|| OrchestratorError::UnknownRelationship {
            table: origin.to_string(),
            name: rel_name.to_string(),
        })?;

    let clause = format!(
        "(\n        where: {{\n            {rel_name}: {{\n                    {remote_column} :{{_is_null:false}}\n                }}\n            }}\n        )\n        "
    );
    let updated = format!("{}{}{}", &text[..origin_brace], clause, &text[origin_brace..]);
    fs::write(&path, updated).map_err(|err| OrchestratorError::io(&path, err))?;
    hmeta_info!(
        context = LogContext::new().with_table(origin).with_operation("relationships"),
        "added not-null filter on {}.{} to {}",
        rel_name,
        remote_column,
        path.display()
    );
    Ok(true)
}

/// The origin table's header shard, or its deployed document when unsharded.
fn origin_header(workspace: &MetadataWorkspace, table: &str) -> Result<TableDocument> {
    let store = workspace.store();
    if store.has_table(table) {
        return Ok(store.read_header(table)?);
    }
    let schema = workspace.config().permissions.default_schema.as_str();
    let path = store.deployed_document_path(schema, table);
    if !path.exists() {
        return Err(OrchestratorError::UnknownTable(table.to_string()));
    }
    let value: Value = read_yaml_file(&path)?;
    Ok(TableDocument::from_value(value, &path.display().to_string())?)
}
