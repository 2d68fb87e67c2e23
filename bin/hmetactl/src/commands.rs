//! ---
//! hmeta_section: "07-cli"
//! hmeta_subsection: "binary"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Subcommand handlers rendering workflow results to stdout."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use hmeta_introspection::{FixtureIntrospector, Introspector, PostgresIntrospector};
use hmeta_logging::{log_system_event, SystemEventOutcome};
use hmeta_orchestrator::{self as orchestrator, GroupBy, MetadataWorkspace, RoleState};
use hmeta_persistence::{reconstruct as rebuild, shard_monolith};
use hmeta_schema::{to_yaml_string, Mapping, Value};

/// Where database introspection is answered from.
#[derive(Debug)]
pub struct DbSource {
    snapshot: Option<PathBuf>,
}

impl DbSource {
    pub fn new(snapshot: Option<PathBuf>) -> Self {
        Self { snapshot }
    }

    fn open(&self, workspace: &MetadataWorkspace) -> Result<Box<dyn Introspector>> {
        match &self.snapshot {
            Some(path) => {
                let fixture = FixtureIntrospector::load(path)
                    .with_context(|| format!("loading database snapshot {}", path.display()))?;
                Ok(Box::new(fixture))
            }
            None => {
                let db = PostgresIntrospector::from_config(&workspace.config().database)
                    .context("database introspection needs database.url, DATABASE_URL or PGHOST")?;
                Ok(Box::new(db))
            }
        }
    }

    /// Introspection for prescription validation. Any snapshot is used; a live
    /// database is opened only when `database.validate_prescriptions` is set.
    /// Whatever is returned here is validated against.
    fn for_validation(&self, workspace: &MetadataWorkspace) -> Result<Option<Box<dyn Introspector>>> {
        if self.snapshot.is_some() || workspace.config().database.validate_prescriptions {
            return self.open(workspace).map(Some);
        }
        Ok(None)
    }
}

pub fn sync_roles(workspace: &MetadataWorkspace, roles: &[String], db: &DbSource) -> Result<()> {
    if roles.is_empty() {
        bail!("no roles given; expected a slash-delimited list such as viewer/analyst");
    }
    let introspector = db.for_validation(workspace)?;
    let report = orchestrator::sync_roles(workspace, roles, introspector.as_deref())?;
    for outcome in &report.outcomes {
        match outcome.state {
            RoleState::Active => println!(
                "{}: active, {} shard(s) written, {} removed",
                outcome.role,
                outcome.written.len(),
                outcome.removed.len()
            ),
            RoleState::Inactive => println!(
                "{}: inactive, {} shard(s) removed",
                outcome.role,
                outcome.removed.len()
            ),
        }
    }
    for table in &report.new_tables {
        println!("new table: {table}");
    }
    println!("{} deployed document(s) rebuilt", report.reconstructed);
    Ok(())
}

pub fn delete_roles(workspace: &MetadataWorkspace, roles: &[String]) -> Result<()> {
    if roles.is_empty() {
        bail!("no roles given; expected a slash-delimited list");
    }
    let report = orchestrator::delete_roles(workspace, roles)?;
    for (role, tables) in &report.removed {
        println!("{role}: {} shard(s) removed", tables.len());
    }
    println!("{} e2e mapping entr(ies) removed", report.e2e_entries);
    Ok(())
}

pub fn create_relationships(workspace: &MetadataWorkspace) -> Result<()> {
    let report = orchestrator::create_relationships(workspace)?;
    for name in &report.added {
        println!("added {name}");
    }
    for name in &report.skipped {
        println!("exists {name}");
    }
    for path in report.features.iter().chain(&report.queries) {
        println!("wrote {}", path.display());
    }
    Ok(())
}

pub fn reconstruct(workspace: &MetadataWorkspace, overwrite: bool) -> Result<()> {
    let summary = rebuild(workspace.store(), overwrite)?;
    println!(
        "{} document(s) written, {} left in place",
        summary.written.len(),
        summary.skipped.len()
    );
    Ok(())
}

pub fn shard(workspace: &MetadataWorkspace, refresh: bool) -> Result<()> {
    let summary = shard_monolith(workspace.store(), refresh)?;
    log_system_event(
        None,
        "shard",
        &format!("{} table(s), {} role shard(s)", summary.tables, summary.role_shards),
        SystemEventOutcome::Success,
    );
    println!("{} table(s) sharded into {} role shard(s)", summary.tables, summary.role_shards);
    Ok(())
}

pub fn create_bq_metadata(workspace: &MetadataWorkspace, role: &str, project: &str, overwrite: bool) -> Result<()> {
    let export = orchestrator::create_bq_metadata(workspace, role, project, overwrite)?;
    for path in &export.documents {
        println!("wrote {}", path.display());
    }
    println!("updated {}", export.include_list.display());
    Ok(())
}

pub fn compare_role_to_prescription(workspace: &MetadataWorkspace, roles: &[String]) -> Result<()> {
    for path in orchestrator::compare_role_to_prescription(workspace, roles)? {
        println!("{}", path.display());
    }
    Ok(())
}

pub fn compare_supersets(workspace: &MetadataWorkspace, first: &str, second: &str) -> Result<()> {
    let path = orchestrator::compare_supersets(workspace, first, second)?;
    println!("{}", path.display());
    Ok(())
}

pub fn compare_roles(workspace: &MetadataWorkspace, first: &str, second: &str) -> Result<()> {
    match orchestrator::compare_roles(workspace, first, second)? {
        Some(path) => println!("{}", path.display()),
        None => bail!("{first} and {second} must both be declared in metadata_roles.yaml"),
    }
    Ok(())
}

pub fn update_allow_agg(workspace: &MetadataWorkspace, role: &str, value: bool) -> Result<()> {
    let updated = orchestrator::update_allow_aggregations(workspace, role, value)?;
    println!("{} shard(s) updated", updated.len());
    Ok(())
}

pub fn normalize_shards(workspace: &MetadataWorkspace) -> Result<()> {
    let count = orchestrator::normalize_shards(workspace)?;
    println!("{count} shard(s) normalized");
    Ok(())
}

/// Exits non-zero when a duplicate is found so CI can gate on it.
pub fn check_duplicates(workspace: &MetadataWorkspace, tables: &[String]) -> Result<()> {
    let duplicates = orchestrator::duplicate_role_permissions(workspace.store(), tables)?;
    if duplicates.is_empty() {
        println!("no duplicate role permissions");
        return Ok(());
    }
    for (table, roles) in &duplicates {
        println!("{table}: {}", roles.join(", "));
    }
    bail!("{} table(s) declare a role more than once", duplicates.len())
}

pub fn check_db_consistency(workspace: &MetadataWorkspace, db: &DbSource) -> Result<()> {
    let introspector = db.open(workspace)?;
    let missing = orchestrator::metadata_missing_in_database(
        workspace.store(),
        introspector.as_ref(),
        &workspace.config().permissions.default_schema,
    )?;
    if missing.is_empty() {
        println!("metadata matches the database schema");
        return Ok(());
    }
    for table in &missing.tables {
        println!("missing table {table}");
    }
    for (table, columns) in &missing.columns {
        println!("missing columns in {table}: {}", columns.join(", "));
    }
    bail!("metadata references objects missing from the database")
}

/// Exits non-zero on empty or missing tables so CI can gate on it.
pub fn check_api_tables(workspace: &MetadataWorkspace, db: &DbSource, start_table: Option<&str>) -> Result<()> {
    let introspector = db.open(workspace)?;
    let audit = orchestrator::audit_api_tables(workspace, introspector.as_ref(), start_table)?;
    for table in &audit.empty {
        println!("empty: {table}");
    }
    for table in &audit.sparse {
        println!("check manually, few rows: {table}");
    }
    for (table, message) in &audit.unconfirmed {
        println!("unreadable: {table} ({message})");
    }
    for (table, message) in &audit.missing {
        println!("missing: {table} ({message})");
    }
    println!("{} table(s) checked", audit.checked);
    if audit.is_clean() {
        return Ok(());
    }
    bail!(
        "{} empty and {} missing API table(s)",
        audit.empty.len(),
        audit.missing.len()
    )
}

pub fn check_domain_rules(workspace: &MetadataWorkspace) -> Result<()> {
    let violations = orchestrator::check_domain_rules(workspace)?;
    if violations.is_empty() {
        println!("all domain rules hold");
        return Ok(());
    }
    for violation in &violations {
        println!("{violation}");
    }
    bail!("{} domain rule violation(s)", violations.len())
}

pub fn deprecate(workspace: &MetadataWorkspace) -> Result<()> {
    let report = orchestrator::apply_deprecations(workspace)?;
    for name in &report.replacements_created {
        println!("created replacement {name}");
    }
    for name in &report.relationships_removed {
        println!("removed {name}");
    }
    for name in &report.relationships_missing {
        println!("not found {name}");
    }
    println!(
        "{} column grant(s) removed from shards, {} from supersets",
        report.shard_columns_removed, report.superset_columns_removed
    );
    Ok(())
}

pub fn export_relationships(workspace: &MetadataWorkspace) -> Result<()> {
    let (path, count) = orchestrator::export_relationships(workspace)?;
    println!("{count} relationship record(s) written to {}", path.display());
    Ok(())
}

pub fn list_relationships(workspace: &MetadataWorkspace, by: GroupBy, filter: Option<&str>) -> Result<()> {
    let path = workspace.paths().relationships_export_file();
    if !path.exists() {
        bail!("{} not found; run export-relationships first", path.display());
    }
    let records = orchestrator::load_exported_relationships(&path)?;
    let grouped = orchestrator::group_relationships(&records, by, filter)?;
    print!("{}", to_yaml_string(&grouped));
    Ok(())
}

pub fn add_not_null_filter(workspace: &MetadataWorkspace, query: &Path) -> Result<()> {
    if orchestrator::add_not_null_filter(workspace, query)? {
        println!("updated {}", query.display());
    } else {
        println!("{} already has a not-null filter", query.display());
    }
    Ok(())
}

pub fn update_e2e_mapping(workspace: &MetadataWorkspace, roles: &[String], tables: &[String], negative: bool) -> Result<()> {
    if roles.is_empty() || tables.is_empty() {
        bail!("expected slash-delimited roles and tables");
    }
    orchestrator::update_e2e_mapping(workspace, roles, tables, negative)?;
    println!(
        "{} role(s) mapped {} on {} table(s)",
        roles.len(),
        if negative { "negative" } else { "positive" },
        tables.len()
    );
    Ok(())
}

pub fn dedupe_e2e_mapping(workspace: &MetadataWorkspace) -> Result<()> {
    let removed = orchestrator::dedupe_e2e_mapping(workspace)?;
    println!("{removed} duplicate e2e mapping entr(ies) removed");
    Ok(())
}

pub fn list_supersets(workspace: &MetadataWorkspace) -> Result<()> {
    let roles = workspace.roles()?;
    let mut listing = Mapping::new();
    for (key, groups) in [
        ("superset_to_roles", roles.superset_to_roles()),
        ("superset_combinations", roles.superset_combinations()),
    ] {
        let mut section = Mapping::new();
        for (name, members) in groups {
            section.insert(name.into(), Value::Sequence(members.into_iter().map(Value::from).collect()));
        }
        listing.insert(key.into(), Value::Mapping(section));
    }
    print!("{}", to_yaml_string(&Value::Mapping(listing)));
    Ok(())
}
