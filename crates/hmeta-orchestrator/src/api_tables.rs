//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "api-tables"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Finds API-exposed tables that are empty or missing from the database."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use hmeta_introspection::{IntrospectionError, Introspector};
use hmeta_logging::{hmeta_info, hmeta_warn, LogContext};
use indexmap::IndexMap;

use crate::workspace::MetadataWorkspace;
use crate::{OrchestratorError, Result};

/// Findings of one audit run, each list in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiTableAudit {
    pub checked: usize,
    /// Tables that exist and returned no rows.
    pub empty: Vec<String>,
    /// Tables returning fewer rows than `api_tables.min_expected_rows`.
    pub sparse: Vec<String>,
    /// `table -> database message` for relations that could not be read and do
    /// not appear in `information_schema.tables`.
    pub missing: IndexMap<String, String>,
    /// `table -> database message` for relations that exist but could not be read.
    pub unconfirmed: IndexMap<String, String>,
}

impl ApiTableAudit {
    /// No empty and no missing tables. Sparse and unconfirmed tables still need a look.
    pub fn is_clean(&self) -> bool {
        self.empty.is_empty() && self.missing.is_empty()
    }
}

/// Sample every table exposed through the gateway's permissions.
///
/// `start_table` resumes an interrupted run at that table. Connectivity is
/// checked first so an unreachable database is not reported as every table missing.
pub fn audit_api_tables(
    workspace: &MetadataWorkspace,
    db: &dyn Introspector,
    start_table: Option<&str>,
) -> Result<ApiTableAudit> {
    db.ping()?;
    let config = &workspace.config().api_tables;
    let schema = workspace.config().permissions.default_schema.as_str();

    let mut tables = db.exposed_tables();
    if let Some(start) = start_table {
        let index = tables
            .iter()
            .position(|table| table == start)
            .ok_or_else(|| OrchestratorError::UnknownStartTable(start.to_string()))?;
        tables.drain(..index);
    }

    let mut audit = ApiTableAudit::default();
    for table in tables {
        if config.is_skipped(&table) {
            continue;
        }
        let ctx = LogContext::new().with_table(&table).with_operation("api-tables");
        hmeta_info!(context = ctx, "currently on: {}", table);
        audit.checked += 1;
        match db.sample_rows(schema, &table, config.min_expected_rows) {
            Ok(0) => {
                hmeta_warn!(context = ctx, "EMPTY TABLE: {}", table);
                audit.empty.push(table);
            }
            Ok(rows) if rows < config.min_expected_rows as usize => {
                hmeta_warn!(context = ctx, "only {} row(s) in {}; check manually", rows, table);
                audit.sparse.push(table);
            }
            Ok(_) => {}
            Err(IntrospectionError::Query { message, .. }) => {
                if db.table_exists(schema, &table) {
                    hmeta_warn!(context = ctx, "{} exists but its rows could not be read: {}", table, message);
                    audit.unconfirmed.insert(table, message);
                } else {
                    hmeta_warn!(context = ctx, "{} not found in information_schema.tables: {}", table, message);
                    audit.missing.insert(table, message);
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(audit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmeta_common::{HmetaConfig, MetadataPaths};
    use hmeta_introspection::{FixtureIntrospector, IntrospectionSnapshot};

    const SNAPSHOT: &str = "\
tables:
  owners: [id]
  parcels: [id]
  sales: [id]
  staging: [id]
  zoning: [id]
rows:
  parcels: 120
  sales: 4
denied: [zoning]
permissions:
  viewer: [parcels, sales, owners, staging, zoning, retired]
";

    fn setup(skip: &[&str]) -> (MetadataWorkspace, FixtureIntrospector) {
        let mut config = HmetaConfig::default();
        config.api_tables.skip_tables = skip.iter().map(|name| name.to_string()).collect();
        let ws = MetadataWorkspace::new(config, MetadataPaths::new("/unused"));
        let snapshot: IntrospectionSnapshot = serde_yaml::from_str(SNAPSHOT).unwrap();
        (ws, FixtureIntrospector::new(snapshot))
    }

    #[test]
    fn classifies_every_exposed_table() {
        let (ws, db) = setup(&["staging"]);
        let audit = audit_api_tables(&ws, &db, None).unwrap();
        assert_eq!(audit.checked, 5);
        assert_eq!(audit.empty, ["owners"]);
        assert_eq!(audit.sparse, ["sales"]);
        assert_eq!(audit.missing.keys().collect::<Vec<_>>(), ["retired"]);
        assert!(audit.missing["retired"].contains("does not exist"));
        assert_eq!(audit.unconfirmed.keys().collect::<Vec<_>>(), ["zoning"]);
        assert!(!audit.is_clean());
    }

    #[test]
    fn resumes_from_a_start_table() {
        let (ws, db) = setup(&[]);
        let audit = audit_api_tables(&ws, &db, Some("sales")).unwrap();
        assert_eq!(audit.checked, 3);
        assert_eq!(audit.empty, ["staging"]);
        assert_eq!(audit.sparse, ["sales"]);

        let err = audit_api_tables(&ws, &db, Some("ghost")).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownStartTable(name) if name == "ghost"));
    }
}
