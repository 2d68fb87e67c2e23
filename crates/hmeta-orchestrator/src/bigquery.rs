//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "bigquery"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Derives BigQuery mirror API metadata for one role from its shards."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;

use hmeta_logging::{hmeta_debug, hmeta_info, LogContext};
use hmeta_persistence::TablesIncludeList;
use hmeta_schema::{write_yaml_value, Mapping, RelationshipKind, RolePermission, TableDocument, Value};
use indexmap::IndexMap;

use crate::workspace::MetadataWorkspace;
use crate::{OrchestratorError, Result};

/// Files produced by one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigQueryExport {
    /// One `<role>_<table>.yaml` per table the role can read.
    pub documents: Vec<PathBuf>,
    pub include_list: PathBuf,
}

/// Write the BigQuery mirror documents for `role` under `project`.
///
/// Every table holding a `<role>.yaml` shard becomes one document. Without
/// `overwrite`, an existing document aborts the export before anything is written.
/// The project's `tables.yaml` keeps entries of other roles and gains this role's.
pub fn create_bq_metadata(
    workspace: &MetadataWorkspace,
    role: &str,
    project: &str,
    overwrite: bool,
) -> Result<BigQueryExport> {
    let store = workspace.store();
    let tables = store.list_tables_with_role_file(role)?;
    if tables.is_empty() {
        return Err(OrchestratorError::NoShardsForRole(role.to_string()));
    }

    let mut views: IndexMap<String, (TableDocument, RolePermission)> = IndexMap::new();
    for table in &tables {
        views.insert(
            table.clone(),
            (store.read_header(table)?, store.read_role_permission(table, role)?),
        );
    }

    let dir = workspace.paths().bigquery_tables_dir(project);
    let config = &workspace.config().bigquery;
    let mut outputs = Vec::with_capacity(views.len());
    for (table, (header, record)) in &views {
        let path = dir.join(format!("{role}_{table}.yaml"));
        if !overwrite && path.exists() {
            return Err(OrchestratorError::OutputExists(path));
        }
        let document = mirror_document(table, header, record, &views, &config.dataset_placeholder, config.row_limit);
        outputs.push((path, document));
    }

    fs::create_dir_all(&dir).map_err(|err| OrchestratorError::io(&dir, err))?;
    let mut documents = Vec::with_capacity(outputs.len());
    for (path, document) in outputs {
        write_yaml_value(&path, &document)?;
        hmeta_debug!(
            context = LogContext::new().with_role(role).with_operation("bigquery"),
            "wrote {}",
            path.display()
        );
        documents.push(path);
    }

    let include_path = dir.join(hmeta_common::TABLES_INCLUDE_FILE);
    let mut includes = TablesIncludeList::load(&include_path)?;
    for table in views.keys() {
        includes.append(TablesIncludeList::entry_for(role, table));
    }
    includes.sort();
    includes.save()?;

    hmeta_info!(
        context = LogContext::new().with_role(role).with_operation("bigquery"),
        "wrote {} BigQuery mirror document(s) for {} into {}",
        documents.len(),
        role,
        dir.display()
    );
    Ok(BigQueryExport {
        documents,
        include_list: include_path,
    })
}

fn mirror_document(
    table: &str,
    header: &TableDocument,
    record: &RolePermission,
    views: &IndexMap<String, (TableDocument, RolePermission)>,
    dataset: &str,
    row_limit: u64,
) -> Value {
    let mut document = Mapping::new();

    let mut descriptor = Mapping::new();
    descriptor.insert("dataset".into(), dataset.into());
    descriptor.insert("name".into(), table.into());
    document.insert("table".into(), Value::Mapping(descriptor));
    document.insert("configuration".into(), Value::Mapping(configuration(table, header)));

    for kind in RelationshipKind::all() {
        let relationships = mirror_relationships(header, kind, views, dataset);
        if !relationships.is_empty() {
            document.insert(kind.key().into(), Value::Sequence(relationships));
        }
    }

    let mut permission = Mapping::new();
    let columns = record
        .permission
        .columns_or_empty()
        .iter()
        .map(|column| Value::from(column.as_str()))
        .collect();
    permission.insert("columns".into(), Value::Sequence(columns));
    permission.insert("filter".into(), Value::Mapping(Mapping::new()));
    permission.insert("limit".into(), row_limit.into());
    permission.insert("allow_aggregations".into(), true.into());
    let mut entry = Mapping::new();
    entry.insert("permission".into(), Value::Mapping(permission));
    entry.insert("role".into(), record.role.as_str().into());
    document.insert("select_permissions".into(), Value::Sequence(vec![Value::Mapping(entry)]));

    Value::Mapping(document)
}

/// `custom_column_names` carried over, `custom_name` from the select root field
/// (falling back to the table name), and no custom root fields.
fn configuration(table: &str, header: &TableDocument) -> Mapping {
    let source = header.get("configuration");
    let column_names = source
        .and_then(|config| config.get("custom_column_names"))
        .filter(|names| names.is_mapping())
        .cloned()
        .unwrap_or_else(|| Value::Mapping(Mapping::new()));
    let custom_name = source
        .and_then(|config| config.get("custom_root_fields"))
        .and_then(|fields| fields.get("select"))
        .and_then(Value::as_str)
        .unwrap_or(table);

    let mut configuration = Mapping::new();
    configuration.insert("custom_column_names".into(), column_names);
    configuration.insert("custom_name".into(), custom_name.into());
    configuration.insert("custom_root_fields".into(), Value::Mapping(Mapping::new()));
    configuration
}

/// Manual-configuration relationships whose remote table the role can also read,
/// with the remote schema replaced by the dataset, sorted by name.
fn mirror_relationships(
    header: &TableDocument,
    kind: RelationshipKind,
    views: &IndexMap<String, (TableDocument, RolePermission)>,
    dataset: &str,
) -> Vec<Value> {
    let mut relationships: Vec<Value> = header
        .relationships(kind)
        .iter()
        .filter_map(|relationship| {
            let remote = relationship
                .get("using")?
                .get("manual_configuration")?
                .get("remote_table")?
                .get("name")?
                .as_str()?;
            if !views.contains_key(remote) {
                return None;
            }
            let mut remote_table = Mapping::new();
            remote_table.insert("name".into(), remote.into());
            remote_table.insert("dataset".into(), dataset.into());
            let mut mirrored = relationship.clone();
            if let Some(Value::Mapping(manual)) = mirrored
                .get_mut("using")
                .and_then(|using| using.get_mut("manual_configuration"))
            {
                manual.insert("remote_table".into(), Value::Mapping(remote_table));
            }
            Some(mirrored)
        })
        .collect();
    relationships.sort_by(|a, b| {
        let name = |value: &Value| value.get("name").and_then(Value::as_str).map(str::to_string);
        name(a).cmp(&name(b))
    });
    relationships
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmeta_common::{HmetaConfig, MetadataPaths};
    use tempfile::{tempdir, TempDir};

    const PARCELS_HEADER: &str = "\
table:
  schema: public
  name: parcels
configuration:
  custom_root_fields:
    select: parcel_records
  custom_column_names:
    id: parcel_id
object_relationships:
  - name: owner
    using:
      manual_configuration:
        remote_table:
          schema: public
          name: owners
        column_mapping:
          owner_id: id
  - name: fk_owner
    using:
      foreign_key_constraint_on: owner_id
array_relationships:
  - name: sales
    using:
      manual_configuration:
        remote_table:
          schema: public
          name: sales
        column_mapping:
          id: parcel_id
  - name: assessments
    using:
      manual_configuration:
        remote_table:
          schema: public
          name: sales
        column_mapping:
          id: parcel_id
select_permissions: []
";

    fn workspace() -> (TempDir, MetadataWorkspace) {
        let dir = tempdir().unwrap();
        let ws = MetadataWorkspace::new(HmetaConfig::default(), MetadataPaths::new(dir.path()));
        let root = ws.store().root().to_path_buf();
        for table in ["parcels", "sales", "owners"] {
            fs::create_dir_all(root.join(table)).unwrap();
        }
        fs::write(root.join("parcels/_table.yaml"), PARCELS_HEADER).unwrap();
        fs::write(root.join("sales/_table.yaml"), "table:\n  schema: public\n  name: sales\nselect_permissions: []\n").unwrap();
        fs::write(root.join("owners/_table.yaml"), "table:\n  schema: public\n  name: owners\nselect_permissions: []\n").unwrap();
        let shard = "permission:\n  columns:\n    - zoning\n    - id\n  filter: {}\n  limit: 100\n";
        fs::write(root.join("parcels/viewer.yaml"), format!("role: viewer\n{shard}")).unwrap();
        fs::write(root.join("sales/viewer.yaml"), format!("role: viewer\n{shard}")).unwrap();
        fs::write(root.join("owners/partner.yaml"), format!("role: partner\n{shard}")).unwrap();
        (dir, ws)
    }

    #[test]
    fn mirrors_visible_tables_and_relationships() {
        let (_dir, ws) = workspace();
        let export = create_bq_metadata(&ws, "viewer", "bq_project", false).unwrap();
        assert_eq!(export.documents.len(), 2);

        let parcels = fs::read_to_string(export.documents[0].clone()).unwrap();
        assert_eq!(
            parcels,
            "\
table:
  dataset: display_#timestamp#
  name: parcels
configuration:
  custom_column_names:
    id: parcel_id
  custom_name: parcel_records
  custom_root_fields: {}
array_relationships:
  - name: assessments
    using:
      manual_configuration:
        remote_table:
          name: sales
          dataset: display_#timestamp#
        column_mapping:
          id: parcel_id
  - name: sales
    using:
      manual_configuration:
        remote_table:
          name: sales
          dataset: display_#timestamp#
        column_mapping:
          id: parcel_id
select_permissions:
  - permission:
      columns:
        - id
        - zoning
      filter: {}
      limit: 1000000
      allow_aggregations: true
    role: viewer
"
        );
        let include = fs::read_to_string(&export.include_list).unwrap();
        assert_eq!(include, "- '!include viewer_parcels.yaml'\n- '!include viewer_sales.yaml'\n");
    }

    #[test]
    fn existing_output_requires_overwrite() {
        let (_dir, ws) = workspace();
        create_bq_metadata(&ws, "viewer", "bq_project", false).unwrap();
        assert!(matches!(
            create_bq_metadata(&ws, "viewer", "bq_project", false),
            Err(OrchestratorError::OutputExists(_))
        ));
        assert!(create_bq_metadata(&ws, "viewer", "bq_project", true).is_ok());
    }

    #[test]
    fn include_list_keeps_other_roles() {
        let (_dir, ws) = workspace();
        create_bq_metadata(&ws, "viewer", "bq_project", false).unwrap();
        let export = create_bq_metadata(&ws, "partner", "bq_project", false).unwrap();
        let include = fs::read_to_string(&export.include_list).unwrap();
        assert!(include.starts_with("- '!include partner_owners.yaml'\n"));
        assert!(include.contains("viewer_sales.yaml"));
    }

    #[test]
    fn role_without_shards_is_an_error() {
        let (_dir, ws) = workspace();
        assert!(matches!(
            create_bq_metadata(&ws, "ghost", "bq_project", false),
            Err(OrchestratorError::NoShardsForRole(_))
        ));
    }
}
