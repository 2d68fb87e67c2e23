//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "integrity"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Consistency checks between deployed metadata, prescriptions, and the database."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use hmeta_engine::Prescription;
use hmeta_introspection::Introspector;
use hmeta_logging::{hmeta_info, hmeta_warn, LogContext};
use hmeta_persistence::{deployed_documents, ShardStore};
use indexmap::IndexMap;

use crate::Result;

/// Roles declared more than once in a deployed document's `select_permissions`,
/// keyed by table. An empty `tables` list checks every table.
pub fn duplicate_role_permissions<S: AsRef<str>>(
    store: &ShardStore,
    tables: &[S],
) -> Result<IndexMap<String, Vec<String>>> {
    let mut duplicates = IndexMap::new();
    for document in deployed_documents(store)? {
        let table = document.table_name();
        if !tables.is_empty() && !tables.iter().any(|name| name.as_ref() == table) {
            continue;
        }
        let mut seen = BTreeSet::new();
        let mut repeated = Vec::new();
        for record in document.select_permissions()? {
            if !seen.insert(record.role.clone()) {
                repeated.push(record.role);
            }
        }
        if !repeated.is_empty() {
            hmeta_warn!(
                context = LogContext::new().with_table(table),
                "roles with duplicate permissions on {}: {}",
                table,
                repeated.join(", ")
            );
            duplicates.insert(table.to_string(), repeated);
        }
    }
    if duplicates.is_empty() {
        hmeta_info!("no duplicate permissions detected");
    }
    Ok(duplicates)
}

/// Tables and columns granted in deployed metadata that the database lacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingInDatabase {
    /// `schema.table` entries with no matching relation.
    pub tables: Vec<String>,
    /// `schema.table -> columns` granted but not present.
    pub columns: IndexMap<String, Vec<String>>,
}

impl MissingInDatabase {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }
}

/// Compare every deployed table document against the live schema.
///
/// Introspection degrades to empty results when the database is unreachable, so
/// connectivity is checked first instead of reporting every table missing.
pub fn metadata_missing_in_database(
    store: &ShardStore,
    db: &dyn Introspector,
    default_schema: &str,
) -> Result<MissingInDatabase> {
    db.ping()?;
    let mut missing = MissingInDatabase::default();
    for document in deployed_documents(store)? {
        let schema = document.schema().unwrap_or(default_schema).to_string();
        let table = document.table_name().to_string();
        let qualified = format!("{schema}.{table}");
        if !db.table_exists(&schema, &table) {
            missing.tables.push(qualified);
            continue;
        }
        let granted: BTreeSet<String> = document
            .select_permissions()?
            .into_iter()
            .flat_map(|record| record.permission.columns.unwrap_or_default())
            .collect();
        let present: BTreeSet<String> = db.table_columns(&schema, &table).into_iter().collect();
        let absent: Vec<String> = granted.difference(&present).cloned().collect();
        if !absent.is_empty() {
            missing.columns.insert(qualified, absent);
        }
    }
    Ok(missing)
}

/// Problems with a prescription against the live schema; empty when every
/// prescribed table and column exists.
pub fn validate_prescription(
    db: &dyn Introspector,
    default_schema: &str,
    prescription: &Prescription,
) -> Result<Vec<String>> {
    db.ping()?;
    let mut problems = Vec::new();
    for (table, definition) in prescription {
        if !db.table_exists(default_schema, table) {
            problems.push(format!("table {default_schema}.{table} not found"));
            continue;
        }
        let present: BTreeSet<String> = db.table_columns(default_schema, table).into_iter().collect();
        for column in definition.columns_or_empty() {
            if !present.contains(column) {
                problems.push(format!("column {table}.{column} not found"));
            }
        }
    }
    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmeta_introspection::{FixtureIntrospector, IntrospectionSnapshot};
    use hmeta_schema::PermissionDefinition;
    use std::fs;
    use tempfile::tempdir;

    const PARCELS: &str = "table:\n  schema: public\n  name: parcels\nselect_permissions:\n  - role: viewer\n    permission:\n      columns:\n        - id\n        - zoning\n      filter: {}\n  - role: analyst\n    permission:\n      columns:\n        - id\n        - owner_ssn\n      filter: {}\n  - role: viewer\n    permission:\n      columns:\n        - id\n      filter: {}\n";

    fn store() -> (tempfile::TempDir, ShardStore) {
        let dir = tempdir().unwrap();
        let store = ShardStore::new(dir.path().join("shards"), dir.path().join("deployed"));
        fs::create_dir_all(store.deployed_dir()).unwrap();
        fs::write(store.deployed_document_path("public", "parcels"), PARCELS).unwrap();
        fs::write(
            store.deployed_document_path("public", "ghost"),
            "table:\n  schema: public\n  name: ghost\n",
        )
        .unwrap();
        (dir, store)
    }

    fn database() -> FixtureIntrospector {
        FixtureIntrospector::new(
            serde_yaml::from_str::<IntrospectionSnapshot>("tables:\n  parcels: [id, zoning, area]\n").unwrap(),
        )
    }

    #[test]
    fn reports_repeated_roles() {
        let (_dir, store) = store();
        let duplicates = duplicate_role_permissions(&store, &["parcels"]).unwrap();
        assert_eq!(duplicates.get("parcels").unwrap(), &vec!["viewer".to_string()]);
        assert!(duplicate_role_permissions(&store, &["ghost"]).unwrap().is_empty());
    }

    #[test]
    fn finds_tables_and_columns_missing_from_the_database() {
        let (_dir, store) = store();
        let missing = metadata_missing_in_database(&store, &database(), "public").unwrap();
        assert_eq!(missing.tables, ["public.ghost"]);
        assert_eq!(missing.columns.get("public.parcels").unwrap(), &vec!["owner_ssn".to_string()]);
    }

    #[test]
    fn prescription_problems_name_table_and_column() {
        let mut prescription = Prescription::new();
        let mut parcels = PermissionDefinition::default();
        parcels.columns = Some(vec!["id".into(), "price".into()]);
        prescription.insert("parcels".into(), parcels);
        prescription.insert("sales".into(), PermissionDefinition::default());

        let problems = validate_prescription(&database(), "public", &prescription).unwrap();
        assert_eq!(problems, ["column parcels.price not found", "table public.sales not found"]);
    }
}
