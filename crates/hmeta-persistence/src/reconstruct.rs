//! ---
//! hmeta_section: "04-shard-store"
//! hmeta_subsection: "reconstruct"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Rebuilds deployed per-table documents from header and role shards."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;

use hmeta_logging::{hmeta_debug, hmeta_info, LogContext};
use hmeta_schema::{write_yaml_value, TableDocument};

use crate::store::ShardStore;
use crate::{Result, StoreError};

/// Outcome of a reconstruction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructSummary {
    /// Deployed documents written.
    pub written: Vec<PathBuf>,
    /// Deployed documents left in place because `overwrite` was off.
    pub skipped: Vec<PathBuf>,
}

/// Rebuild every deployed table document from the shard store.
///
/// Tables are processed in name order and role shards in role-name order. Every
/// header is validated and every document assembled before the first write, so a
/// bad shard leaves the deployed directory untouched. A table with no role shards
/// reconstructs to its header alone.
pub fn reconstruct(store: &ShardStore, overwrite: bool) -> Result<ReconstructSummary> {
    let tables = store.list_tables()?;
    let mut documents = Vec::with_capacity(tables.len());
    for table in &tables {
        store.validate_header(table)?;
        documents.push(assemble(store, table)?);
    }

    fs::create_dir_all(store.deployed_dir())
        .map_err(|err| StoreError::io(store.deployed_dir(), err))?;

    let mut summary = ReconstructSummary::default();
    for document in documents {
        let schema = document.schema().unwrap_or("public");
        let path = store.deployed_document_path(schema, document.table_name());
        if !overwrite && path.exists() {
            hmeta_debug!(
                context = LogContext::new().with_table(document.table_name()),
                "{} exists and overwrite is off; leaving it in place",
                path.display()
            );
            summary.skipped.push(path);
            continue;
        }
        write_yaml_value(&path, &document.into_value())?;
        summary.written.push(path);
    }
    hmeta_info!(
        context = LogContext::new().with_operation("reconstruct"),
        "tables metadata reconstruction complete: {} written, {} skipped",
        summary.written.len(),
        summary.skipped.len()
    );
    Ok(summary)
}

/// Header with its role shards appended to `select_permissions`.
fn assemble(store: &ShardStore, table: &str) -> Result<TableDocument> {
    let mut document = store.read_header(table)?;
    let roles = store.list_roles(table)?;
    if roles.is_empty() {
        return Ok(document);
    }
    let mut permissions = document.select_permissions()?;
    for role in roles {
        permissions.push(store.read_role_permission(table, &role)?);
    }
    document.set_select_permissions(&permissions)?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmeta_schema::{Mapping, PermissionDefinition, RolePermission, Value};
    use tempfile::tempdir;

    fn store(dir: &std::path::Path) -> ShardStore {
        ShardStore::new(dir.join("shards"), dir.join("deployed"))
    }

    fn record(role: &str, columns: &[&str]) -> RolePermission {
        let mut permission = PermissionDefinition::default();
        permission.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        permission.filter = Some(Value::Mapping(Mapping::new()));
        RolePermission::new(role, permission)
    }

    #[test]
    fn roles_are_appended_in_name_order() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.write_header(&TableDocument::stub("orders", "public")).unwrap();
        store.write_role_permission("orders", &record("zeta", &["b", "a"])).unwrap();
        store.write_role_permission("orders", &record("alpha", &["c"])).unwrap();

        let summary = reconstruct(&store, true).unwrap();
        assert_eq!(summary.written, vec![store.deployed_document_path("public", "orders")]);
        let text = fs::read_to_string(&summary.written[0]).unwrap();
        assert_eq!(
            text,
            "table:\n  schema: public\n  name: orders\nselect_permissions:\n  - role: alpha\n    permission:\n      columns:\n        - c\n      filter: {}\n  - role: zeta\n    permission:\n      columns:\n        - a\n        - b\n      filter: {}\n"
        );
    }

    #[test]
    fn table_without_roles_keeps_empty_permissions() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.write_header(&TableDocument::stub("audit", "public")).unwrap();
        reconstruct(&store, true).unwrap();
        let text = fs::read_to_string(store.deployed_document_path("public", "audit")).unwrap();
        assert!(text.ends_with("select_permissions: []\n"));
    }

    #[test]
    fn invalid_header_aborts_before_any_write() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.write_header(&TableDocument::stub("audit", "public")).unwrap();
        store.write_header(&TableDocument::stub("orders", "public")).unwrap();
        fs::write(
            store.header_path("orders"),
            "table: {schema: public, name: orders}\nselect_permissions: []\nselect_permissions: []\n",
        )
        .unwrap();
        assert!(matches!(reconstruct(&store, true), Err(StoreError::InvalidHeader { .. })));
        assert!(!store.deployed_document_path("public", "audit").exists());
    }

    #[test]
    fn existing_documents_survive_without_overwrite() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.write_header(&TableDocument::stub("orders", "public")).unwrap();
        fs::create_dir_all(store.deployed_dir()).unwrap();
        let path = store.deployed_document_path("public", "orders");
        fs::write(&path, "kept\n").unwrap();

        let summary = reconstruct(&store, false).unwrap();
        assert_eq!(summary.skipped, vec![path.clone()]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "kept\n");

        reconstruct(&store, true).unwrap();
        assert_ne!(fs::read_to_string(&path).unwrap(), "kept\n");
    }
}
