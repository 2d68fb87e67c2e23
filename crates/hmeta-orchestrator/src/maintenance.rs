//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "maintenance"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "In-place rewrites of role shards."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use hmeta_logging::{hmeta_info, LogContext};

use crate::workspace::MetadataWorkspace;
use crate::{OrchestratorError, Result};

/// Set `allow_aggregations` on every shard of an active role. Returns the tables
/// whose shard changed.
///
/// Inactive roles hold no shards, so asking for one is an error.
pub fn update_allow_aggregations(workspace: &MetadataWorkspace, role: &str, value: bool) -> Result<Vec<String>> {
    if !workspace.roles()?.is_active(role)? {
        return Err(OrchestratorError::RoleInactive(role.to_string()));
    }
    let store = workspace.store();
    let mut updated = Vec::new();
    for table in store.list_tables_with_role_file(role)? {
        let mut record = store.read_role_permission(&table, role)?;
        if record.permission.allow_aggregations == Some(value) {
            continue;
        }
        record.permission.allow_aggregations = Some(value);
        store.write_role_permission(&table, &record)?;
        hmeta_info!(
            context = LogContext::new().with_table(&table).with_role(role),
            "updated allow_aggregations to {} in {}",
            value,
            store.role_path(&table, role).display()
        );
        updated.push(table);
    }
    Ok(updated)
}

/// Make `computed_fields: []` and `allow_aggregations: false` explicit in every
/// role shard and re-sort columns. Returns the number of shards rewritten.
///
/// `hasura metadata export` omits both fields at their defaults; writing them out
/// keeps exports from showing up as shard diffs.
pub fn normalize_shards(workspace: &MetadataWorkspace) -> Result<usize> {
    let store = workspace.store();
    let mut rewritten = 0;
    for table in store.list_tables()? {
        for role in store.list_roles(&table)? {
            let mut record = store.read_role_permission(&table, &role)?;
            record.permission.computed_fields.get_or_insert_with(Vec::new);
            record.permission.allow_aggregations.get_or_insert(false);
            store.write_role_permission(&table, &record)?;
            rewritten += 1;
        }
    }
    hmeta_info!(
        context = LogContext::new().with_operation("normalize"),
        "normalized {} role shard(s)",
        rewritten
    );
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmeta_common::{HmetaConfig, MetadataPaths};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn workspace() -> (TempDir, MetadataWorkspace) {
        let dir = tempdir().unwrap();
        let paths = MetadataPaths::new(dir.path());
        fs::create_dir_all(paths.source_of_truth_dir()).unwrap();
        fs::write(
            paths.roles_file(),
            "viewer:\n  is_active: true\n  api_data_supersets: []\nformer:\n  is_active: false\n  api_data_supersets: []\n",
        )
        .unwrap();
        let ws = MetadataWorkspace::new(HmetaConfig::default(), paths);
        let root = ws.store().root().to_path_buf();
        fs::create_dir_all(root.join("parcels")).unwrap();
        fs::create_dir_all(root.join("sales")).unwrap();
        fs::write(
            root.join("parcels/viewer.yaml"),
            "role: viewer\npermission:\n  columns:\n    - zoning\n    - id\n  filter: {}\n  limit: 100\n",
        )
        .unwrap();
        fs::write(
            root.join("sales/viewer.yaml"),
            "role: viewer\npermission:\n  columns:\n    - id\n  filter: {}\n  limit: 100\n  allow_aggregations: true\n",
        )
        .unwrap();
        (dir, ws)
    }

    #[test]
    fn only_differing_shards_are_updated() {
        let (_dir, ws) = workspace();
        assert_eq!(update_allow_aggregations(&ws, "viewer", true).unwrap(), ["parcels"]);
        let parcels = ws.store().read_role_permission("parcels", "viewer").unwrap();
        assert_eq!(parcels.permission.allow_aggregations, Some(true));
        assert!(update_allow_aggregations(&ws, "viewer", true).unwrap().is_empty());
    }

    #[test]
    fn inactive_role_is_rejected() {
        let (_dir, ws) = workspace();
        assert!(matches!(
            update_allow_aggregations(&ws, "former", true),
            Err(OrchestratorError::RoleInactive(_))
        ));
        assert!(update_allow_aggregations(&ws, "ghost", true).is_err());
    }

    #[test]
    fn normalize_makes_defaults_explicit() {
        let (_dir, ws) = workspace();
        assert_eq!(normalize_shards(&ws).unwrap(), 2);
        let text = fs::read_to_string(ws.store().role_path("parcels", "viewer")).unwrap();
        assert!(text.contains("  columns:\n    - id\n    - zoning\n"));
        assert!(text.contains("  computed_fields: []\n"));
        assert!(text.contains("  allow_aggregations: false\n"));
        let sales = ws.store().read_role_permission("sales", "viewer").unwrap();
        assert_eq!(sales.permission.allow_aggregations, Some(true));
    }
}
