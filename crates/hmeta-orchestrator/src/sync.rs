//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "sync"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Role sync: prescriptions to shards, deployed documents, and derived artifacts."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! A role is either `Active` (shards follow its prescription) or `Inactive` (it
//! holds no shards). The state is read from `metadata_roles.yaml` on every run.
//!
//! The run is split in two phases. Planning loads the catalogs, resolves every
//! active role's prescription, validates it against the database when one is
//! supplied and stages the e2e mapping and remote schema changes in memory.
//! Only when every role planned cleanly does the apply phase reshard, write and
//! delete role shards, reconstruct the deployed documents and save the staged
//! documents.

use hmeta_engine::{resolve, Prescription};
use hmeta_introspection::Introspector;
use hmeta_logging::{hmeta_info, hmeta_warn, log_system_event, LogContext, SystemEventOutcome};
use hmeta_persistence::{reconstruct, shard_monolith, ShardStore};
use hmeta_schema::{RolePermission, RolesCatalog};

use crate::delete::{remove_role_shards, revoke_remote_schemas};
use crate::e2e::E2eMapping;
use crate::integrity::validate_prescription;
use crate::remote_schema::{RemoteSchemaDocument, RemoteSchemaPolicy};
use crate::workspace::MetadataWorkspace;
use crate::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleState {
    Active,
    Inactive,
}

/// What one role's sync changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleOutcome {
    pub role: String,
    pub state: RoleState,
    /// Tables whose role shard was written.
    pub written: Vec<String>,
    /// Tables whose role shard was deleted.
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub outcomes: Vec<RoleOutcome>,
    /// Tables created for the first time by a prescription.
    pub new_tables: Vec<String>,
    /// Deployed documents rewritten by the final reconstruction.
    pub reconstructed: usize,
}

impl SyncReport {
    pub fn outcome(&self, role: &str) -> Option<&RoleOutcome> {
        self.outcomes.iter().find(|outcome| outcome.role == role)
    }
}

enum RolePlan {
    Active { role: String, prescription: Prescription },
    Inactive { role: String },
}

/// Everything the apply phase writes, computed before the first write.
struct SyncPlan {
    roles: Vec<RolePlan>,
    mapping: E2eMapping,
    remote_schemas: RemoteSchemaDocument,
}

/// Sync each role against the source-of-truth catalogs.
///
/// When `introspector` is supplied every prescription is checked against it.
pub fn sync_roles<S: AsRef<str>>(
    workspace: &MetadataWorkspace,
    roles: &[S],
    introspector: Option<&dyn Introspector>,
) -> Result<SyncReport> {
    let plan = match plan(workspace, roles, introspector) {
        Ok(plan) => plan,
        Err(err) => {
            log_system_event(
                Some(&LogContext::new().with_operation("sync")),
                "sync_roles",
                &err.to_string(),
                SystemEventOutcome::Fault,
            );
            return Err(err);
        }
    };
    apply(workspace, plan)
}

fn plan<S: AsRef<str>>(
    workspace: &MetadataWorkspace,
    roles: &[S],
    introspector: Option<&dyn Introspector>,
) -> Result<SyncPlan> {
    let catalog = workspace.roles()?;
    let supersets = workspace.supersets()?;
    let mut plans = Vec::with_capacity(roles.len());
    for role in roles.iter().map(AsRef::as_ref) {
        let ctx = LogContext::new().with_role(role).with_operation("sync");
        if !catalog.is_active(role)? {
            hmeta_info!(context = ctx, "{} is INACTIVE, deleting all permissions", role);
            plans.push(RolePlan::Inactive { role: role.to_string() });
            continue;
        }
        hmeta_info!(context = ctx, "{} is ACTIVE, syncing permissions", role);
        let names = catalog.supersets_of(role)?;
        let prescription = resolve(names, &supersets)?;
        match introspector {
            Some(db) => {
                let problems = validate_prescription(db, &workspace.config().permissions.default_schema, &prescription)?;
                if !problems.is_empty() {
                    return Err(OrchestratorError::PrescriptionInvalid {
                        role: role.to_string(),
                        problems,
                    });
                }
            }
            None if workspace.config().database.validate_prescriptions => hmeta_warn!(
                context = ctx,
                "prescription validation is enabled but no database is available; skipping"
            ),
            None => {}
        }
        plans.push(RolePlan::Active {
            role: role.to_string(),
            prescription,
        });
    }

    let mut mapping = E2eMapping::load(&workspace.paths().e2e_mapping_file())?;
    let mut remote_schemas = RemoteSchemaDocument::load(&workspace.paths().remote_schemas_file())?;
    stage_derived_artifacts(workspace, &catalog, &plans, &mut mapping, &mut remote_schemas)?;
    Ok(SyncPlan {
        roles: plans,
        mapping,
        remote_schemas,
    })
}

fn apply(workspace: &MetadataWorkspace, plan: SyncPlan) -> Result<SyncReport> {
    let store = workspace.store();
    let schema = workspace.config().permissions.default_schema.as_str();
    let mut report = SyncReport::default();

    shard_monolith(store, true)?;

    for role_plan in &plan.roles {
        let outcome = match role_plan {
            RolePlan::Active { role, prescription } => {
                for table in prescription.keys() {
                    if store.ensure_table(table, schema)? && !report.new_tables.contains(table) {
                        report.new_tables.push(table.clone());
                    }
                }
                let removed = remove_unprescribed_shards(store, role, prescription)?;
                let written = write_prescription(store, role, prescription, workspace.default_limit())?;
                RoleOutcome {
                    role: role.clone(),
                    state: RoleState::Active,
                    written,
                    removed,
                }
            }
            RolePlan::Inactive { role } => RoleOutcome {
                role: role.clone(),
                state: RoleState::Inactive,
                written: Vec::new(),
                removed: remove_role_shards(store, role)?,
            },
        };
        report.outcomes.push(outcome);
    }

    report.reconstructed = reconstruct(store, true)?.written.len();
    plan.mapping.save()?;
    if workspace.paths().remote_schemas_file().exists() {
        plan.remote_schemas.save()?;
    }

    for outcome in &report.outcomes {
        let ctx = LogContext::new().with_role(&outcome.role).with_operation("sync");
        let message = format!(
            "{:?}: {} shard(s) written, {} removed",
            outcome.state,
            outcome.written.len(),
            outcome.removed.len()
        );
        log_system_event(Some(&ctx), "sync_role", &message, SystemEventOutcome::Success);
    }
    Ok(report)
}

/// Delete the role's shards on tables its prescription no longer names.
fn remove_unprescribed_shards(store: &ShardStore, role: &str, prescription: &Prescription) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for table in store.list_tables_with_role_file(role)? {
        if prescription.contains_key(&table) {
            continue;
        }
        if store.delete_role_permission(&table, role, true)? {
            hmeta_info!(
                context = LogContext::new().with_table(&table).with_role(role),
                "removed shard for table no longer prescribed: {}",
                table
            );
            removed.push(table);
        }
    }
    Ok(removed)
}

fn write_prescription(
    store: &ShardStore,
    role: &str,
    prescription: &Prescription,
    default_limit: u64,
) -> Result<Vec<String>> {
    let mut written = Vec::with_capacity(prescription.len());
    for (table, definition) in prescription {
        let record = RolePermission::new(role, definition.clone().into_prescribed(default_limit));
        store.write_role_permission(table, &record)?;
        written.push(table.clone());
    }
    Ok(written)
}

/// Apply every role's e2e mapping and remote schema changes to the loaded documents.
fn stage_derived_artifacts(
    workspace: &MetadataWorkspace,
    catalog: &RolesCatalog,
    plans: &[RolePlan],
    mapping: &mut E2eMapping,
    document: &mut RemoteSchemaDocument,
) -> Result<()> {
    let e2e = &workspace.config().e2e;
    let policies = workspace.remote_schema_policies(catalog);

    for plan in plans {
        match plan {
            RolePlan::Active { role, prescription } => {
                let tables: Vec<&str> = prescription.keys().map(String::as_str).collect();
                mapping.grant(&[role.as_str()], &tables, e2e);
                for policy in &policies {
                    if !document.has_schema(policy.name()) {
                        hmeta_warn!(
                            context = LogContext::new().with_role(role),
                            "remote schema {} not found in {}; skipping",
                            policy.name(),
                            document.path().display()
                        );
                        continue;
                    }
                    if document.add_permission(policy, role, catalog)? {
                        mapping.update_remote_schema(role, policy, false, e2e);
                    }
                }
            }
            RolePlan::Inactive { role } => {
                mapping.remove(&[role.as_str()], &[] as &[&str], e2e);
                revoke_remote_schemas(workspace, document, role)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmeta_common::{HmetaConfig, MetadataPaths};
    use hmeta_introspection::{FixtureIntrospector, IntrospectionSnapshot};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const ROLES: &str = "viewer:\n  is_active: true\n  api_data_supersets: [base, sales]\nformer:\n  is_active: false\n  api_data_supersets: [base]\n";
    const SUPERSETS: &str = "base:\n  parcels:\n    columns: [zoning, id]\n    limit: 50\nsales:\n  parcels:\n    columns: [id, area]\n    limit: 500\n    allow_aggregations: true\n  sales:\n    columns: [price, id, price]\n";

    fn workspace() -> (TempDir, MetadataWorkspace) {
        let dir = tempdir().unwrap();
        let paths = MetadataPaths::new(dir.path());
        fs::create_dir_all(paths.source_of_truth_dir()).unwrap();
        fs::write(paths.roles_file(), ROLES).unwrap();
        fs::write(paths.supersets_file(), SUPERSETS).unwrap();
        fs::create_dir_all(paths.tables_metadata_dir()).unwrap();
        fs::write(
            paths.tables_metadata_dir().join("public_parcels.yaml"),
            "table:\n  schema: public\n  name: parcels\nselect_permissions:\n  - role: former\n    permission:\n      columns:\n        - id\n      filter: {}\n",
        )
        .unwrap();
        fs::write(
            paths.tables_metadata_dir().join("public_audit.yaml"),
            "table:\n  schema: public\n  name: audit\nselect_permissions:\n  - role: viewer\n    permission:\n      columns:\n        - id\n      filter: {}\n",
        )
        .unwrap();
        fs::write(paths.tables_include_file(), "- '!include public_audit.yaml'\n- '!include public_parcels.yaml'\n").unwrap();
        (dir, MetadataWorkspace::new(HmetaConfig::default(), paths))
    }

    #[test]
    fn active_role_follows_its_prescription() {
        let (_dir, ws) = workspace();
        let report = sync_roles(&ws, &["viewer"], None).unwrap();
        let outcome = report.outcome("viewer").unwrap();
        assert_eq!(outcome.state, RoleState::Active);
        assert_eq!(outcome.written, ["parcels", "sales"]);
        assert_eq!(outcome.removed, ["audit"]);
        assert_eq!(report.new_tables, ["sales"]);

        let store = ws.store();
        let parcels = store.read_role_permission("parcels", "viewer").unwrap().permission;
        assert_eq!(parcels.columns_or_empty(), ["area", "id", "zoning"]);
        assert_eq!(parcels.limit, Some(500));
        assert_eq!(parcels.allow_aggregations, Some(true));
        let sales = store.read_role_permission("sales", "viewer").unwrap().permission;
        assert_eq!(sales.columns_or_empty(), ["id", "price"]);
        assert_eq!(sales.limit, Some(100));

        let deployed = fs::read_to_string(ws.paths().tables_metadata_dir().join("public_sales.yaml")).unwrap();
        assert!(deployed.contains("  - role: viewer\n"));
        let include = fs::read_to_string(ws.paths().tables_include_file()).unwrap();
        assert!(include.contains("!include public_sales.yaml"));

        let mapping = E2eMapping::load(&ws.paths().e2e_mapping_file()).unwrap();
        assert!(mapping.is_mapped("sales", "sales_pos", "viewer"));
    }

    #[test]
    fn inactive_role_loses_every_shard() {
        let (_dir, ws) = workspace();
        let report = sync_roles(&ws, &["former"], None).unwrap();
        assert_eq!(report.outcome("former").unwrap().removed, ["parcels"]);
        assert!(ws.store().list_tables_with_role_file("former").unwrap().is_empty());
        let deployed = fs::read_to_string(ws.paths().tables_metadata_dir().join("public_parcels.yaml")).unwrap();
        assert!(!deployed.contains("former"));
    }

    #[test]
    fn unknown_role_fails_before_any_write() {
        let (_dir, ws) = workspace();
        assert!(sync_roles(&ws, &["viewer", "ghost"], None).is_err());
        assert!(!ws.store().root().exists());
    }

    #[test]
    fn malformed_e2e_mapping_fails_before_any_write() {
        let (_dir, ws) = workspace();
        let audit = ws.paths().tables_metadata_dir().join("public_audit.yaml");
        let before = fs::read_to_string(&audit).unwrap();
        fs::create_dir_all(ws.paths().e2e_root()).unwrap();
        fs::write(ws.paths().e2e_mapping_file(), "- parcels\n- sales\n").unwrap();

        assert!(sync_roles(&ws, &["viewer"], None).is_err());
        assert_eq!(fs::read_to_string(&audit).unwrap(), before);
        assert!(!ws.paths().tables_metadata_dir().join("public_sales.yaml").exists());
        assert!(!ws.store().root().exists());
        let include = fs::read_to_string(ws.paths().tables_include_file()).unwrap();
        assert!(!include.contains("public_sales.yaml"));
    }

    #[test]
    fn malformed_remote_schemas_fail_before_any_write() {
        let (_dir, ws) = workspace();
        fs::write(ws.paths().remote_schemas_file(), "address: [\n").unwrap();
        assert!(sync_roles(&ws, &["former"], None).is_err());
        let deployed = fs::read_to_string(ws.paths().tables_metadata_dir().join("public_parcels.yaml")).unwrap();
        assert!(deployed.contains("role: former"));
        assert!(!ws.store().root().exists());
    }

    #[test]
    fn supplied_introspector_validates_without_the_config_flag() {
        let (_dir, ws) = workspace();
        assert!(!ws.config().database.validate_prescriptions);
        let db = FixtureIntrospector::new(
            serde_yaml::from_str::<IntrospectionSnapshot>("tables:\n  parcels: [id, zoning]\n  sales: [id, price]\n").unwrap(),
        );
        let err = sync_roles(&ws, &["viewer"], Some(&db as &dyn Introspector)).unwrap_err();
        match err {
            OrchestratorError::PrescriptionInvalid { problems, .. } => {
                assert_eq!(problems, ["column parcels.area not found"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_prescription_fails_before_any_write() {
        let (_dir, mut ws) = workspace();
        let mut config = ws.config().clone();
        config.database.validate_prescriptions = true;
        ws = MetadataWorkspace::new(config, ws.paths().clone());
        let db = FixtureIntrospector::new(
            serde_yaml::from_str::<IntrospectionSnapshot>("tables:\n  parcels: [id, zoning, area]\n").unwrap(),
        );
        let err = sync_roles(&ws, &["viewer"], Some(&db as &dyn Introspector)).unwrap_err();
        assert!(matches!(err, OrchestratorError::PrescriptionInvalid { .. }));
        assert!(!ws.store().root().exists());
    }
}
