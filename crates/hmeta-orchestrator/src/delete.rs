//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "delete"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Removes every permission artifact held by a set of roles."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use hmeta_logging::{hmeta_info, hmeta_warn, log_system_event, LogContext, SystemEventOutcome};
use hmeta_persistence::{reconstruct, shard_monolith, ShardStore};
use indexmap::IndexMap;

use crate::e2e::E2eMapping;
use crate::remote_schema::RemoteSchemaDocument;
use crate::workspace::MetadataWorkspace;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// `role -> tables whose shard was deleted`.
    pub removed: IndexMap<String, Vec<String>>,
    /// e2e mapping entries dropped.
    pub e2e_entries: usize,
}

/// Delete all permissions of the roles regardless of their catalog state.
///
/// The e2e mapping and remote schema document are parsed and edited in memory
/// first. Shards are then refreshed from the deployed documents, every shard of
/// each role is removed, the deployed documents are rebuilt and the edited
/// documents are saved.
pub fn delete_roles<S: AsRef<str>>(workspace: &MetadataWorkspace, roles: &[S]) -> Result<DeleteReport> {
    let store = workspace.store();
    let mut report = DeleteReport::default();

    let mut mapping = E2eMapping::load(&workspace.paths().e2e_mapping_file())?;
    report.e2e_entries = mapping.remove(roles, &[] as &[&str], &workspace.config().e2e);
    let remote_schemas = workspace.paths().remote_schemas_file();
    let mut document = RemoteSchemaDocument::load(&remote_schemas)?;
    for role in roles.iter().map(AsRef::as_ref) {
        revoke_remote_schemas(workspace, &mut document, role)?;
    }

    shard_monolith(store, true)?;
    for role in roles.iter().map(AsRef::as_ref) {
        let removed = remove_role_shards(store, role)?;
        report.removed.insert(role.to_string(), removed);
    }
    reconstruct(store, true)?;

    mapping.save()?;
    if remote_schemas.exists() {
        document.save()?;
    }

    for (role, tables) in &report.removed {
        log_system_event(
            Some(&LogContext::new().with_role(role).with_operation("delete")),
            "delete_role",
            &format!("{} shard(s) removed", tables.len()),
            SystemEventOutcome::Success,
        );
    }
    Ok(report)
}

/// Delete every shard the role holds. Returns the affected tables.
pub(crate) fn remove_role_shards(store: &ShardStore, role: &str) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for table in store.list_tables_with_role_file(role)? {
        if store.delete_role_permission(&table, role, true)? {
            removed.push(table);
        }
    }
    hmeta_info!(
        context = LogContext::new().with_role(role).with_operation("delete"),
        "deleted {} shard(s) for {}",
        removed.len(),
        role
    );
    Ok(removed)
}

/// Drop the role from every configured remote schema present in the document.
pub(crate) fn revoke_remote_schemas(
    workspace: &MetadataWorkspace,
    document: &mut RemoteSchemaDocument,
    role: &str,
) -> Result<()> {
    for schema in &workspace.config().remote_schemas {
        if !document.has_schema(&schema.name) {
            hmeta_warn!(
                context = LogContext::new().with_role(role),
                "remote schema {} not found in {}; skipping",
                schema.name,
                document.path().display()
            );
            continue;
        }
        document.remove_permission(&schema.name, role)?;
    }
    Ok(())
}
