//! ---
//! hmeta_section: "04-shard-store"
//! hmeta_subsection: "shard"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Splits deployed per-table documents into header and role shards."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use hmeta_common::paths::TABLES_INCLUDE_FILE;
use hmeta_logging::{hmeta_debug, hmeta_info, LogContext};
use hmeta_schema::{read_yaml_file, RolePermission, TableDocument, Value};
use walkdir::WalkDir;

use crate::store::ShardStore;
use crate::Result;

/// Counts reported after a sharding pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardSummary {
    /// Header shards written.
    pub tables: usize,
    /// Role shards written.
    pub role_shards: usize,
}

/// Shard every deployed table document into the store.
///
/// All documents are parsed before the store is touched, so a malformed deployed
/// file aborts the run with the existing shards intact. With `refresh` the shard
/// root is truncated first, dropping shards of roles removed only from the
/// deployed documents.
pub fn shard_monolith(store: &ShardStore, refresh: bool) -> Result<ShardSummary> {
    let documents = load_deployed_documents(store)?;
    if refresh {
        store.truncate()?;
    }

    let mut summary = ShardSummary::default();
    for (header, permissions) in documents {
        let table = header.table_name().to_string();
        store.write_header(&header)?;
        for record in &permissions {
            store.write_role_permission(&table, record)?;
        }
        hmeta_debug!(
            context = LogContext::new().with_table(&table).with_operation("shard"),
            "sharded {} into {} role shard(s)",
            table,
            permissions.len()
        );
        summary.tables += 1;
        summary.role_shards += permissions.len();
    }
    hmeta_info!(
        context = LogContext::new().with_operation("shard"),
        "sharded {} table document(s) into {}",
        summary.tables,
        store.root().display()
    );
    Ok(summary)
}

/// Every deployed table document, in file-name order. `tables.yaml` is skipped.
pub fn deployed_documents(store: &ShardStore) -> Result<Vec<TableDocument>> {
    let mut documents = Vec::new();
    for path in deployed_document_paths(store.deployed_dir())? {
        let value: Value = read_yaml_file(&path)?;
        documents.push(TableDocument::from_value(value, &path.display().to_string())?);
    }
    Ok(documents)
}

/// Split deployed documents into `(header, role records)` pairs.
fn load_deployed_documents(store: &ShardStore) -> Result<Vec<(TableDocument, Vec<RolePermission>)>> {
    let mut documents = Vec::new();
    for mut header in deployed_documents(store)? {
        let permissions = header.select_permissions()?;
        header.clear_select_permissions();
        documents.push((header, permissions));
    }
    Ok(documents)
}

fn deployed_document_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.file_name() == TABLES_INCLUDE_FILE {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) == Some("yaml") {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const ORDERS: &str = "table:\n  schema: public\n  name: orders\nobject_relationships:\n  - name: customer\n    using:\n      foreign_key_constraint_on: customer_id\nselect_permissions:\n  - role: zeta\n    permission:\n      columns:\n        - total\n        - id\n      filter: {}\n      limit: 100\n  - role: alpha\n    permission:\n      columns:\n        - id\n      filter: {}\n";

    fn seeded() -> (tempfile::TempDir, ShardStore) {
        let dir = tempdir().unwrap();
        let store = ShardStore::new(dir.path().join("shards"), dir.path().join("deployed"));
        fs::create_dir_all(store.deployed_dir()).unwrap();
        fs::write(store.deployed_dir().join("public_orders.yaml"), ORDERS).unwrap();
        fs::write(
            store.deployed_dir().join("public_audit.yaml"),
            "table:\n  schema: public\n  name: audit\n",
        )
        .unwrap();
        fs::write(store.deployed_dir().join("tables.yaml"), "- '!include public_orders.yaml'\n").unwrap();
        (dir, store)
    }

    #[test]
    fn shards_headers_and_roles() {
        let (_dir, store) = seeded();
        let summary = shard_monolith(&store, true).unwrap();
        assert_eq!(summary, ShardSummary { tables: 2, role_shards: 2 });
        assert_eq!(store.list_tables().unwrap(), vec!["audit", "orders"]);
        assert_eq!(store.list_roles("orders").unwrap(), vec!["alpha", "zeta"]);
        assert!(store.list_roles("audit").unwrap().is_empty());

        let header = fs::read_to_string(store.header_path("orders")).unwrap();
        assert!(header.ends_with("select_permissions: []\n"));
        assert!(header.contains("object_relationships:\n  - name: customer\n"));
        let zeta = store.read_role_permission("orders", "zeta").unwrap();
        assert_eq!(zeta.permission.columns_or_empty(), ["id", "total"]);
    }

    #[test]
    fn refresh_drops_stale_shards() {
        let (_dir, store) = seeded();
        store
            .write_role_permission("orders", &RolePermission::new("stale", Default::default()))
            .unwrap();
        shard_monolith(&store, false).unwrap();
        assert!(store.has_role_permission("orders", "stale"));
        shard_monolith(&store, true).unwrap();
        assert!(!store.has_role_permission("orders", "stale"));
    }

    #[test]
    fn malformed_document_leaves_shards_untouched() {
        let (_dir, store) = seeded();
        shard_monolith(&store, true).unwrap();
        fs::write(store.deployed_dir().join("public_broken.yaml"), "table: {schema: public}\n").unwrap();
        assert!(shard_monolith(&store, true).is_err());
        assert_eq!(store.list_tables().unwrap(), vec!["audit", "orders"]);
    }
}
