//! ---
//! hmeta_section: "05-introspection"
//! hmeta_subsection: "fixture"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Offline introspection backed by a YAML snapshot."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::path::Path;

use hmeta_logging::hmeta_warn;
use hmeta_schema::read_yaml_file;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::{IntrospectionError, Introspector, Result};

/// `{tables: {name: [columns]}, permissions: {role: [tables]}, rows: {name: count}, denied: [name]}`.
///
/// Table keys without a `schema.` prefix belong to `public`. Tables missing from
/// `rows` are empty. Reading a `denied` table fails even though it exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IntrospectionSnapshot {
    #[serde(default)]
    pub tables: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub permissions: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub rows: IndexMap<String, usize>,
    #[serde(default)]
    pub denied: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureIntrospector {
    snapshot: IntrospectionSnapshot,
}

impl FixtureIntrospector {
    pub fn new(snapshot: IntrospectionSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(read_yaml_file(path)?))
    }

    fn columns(&self, schema: &str, table: &str) -> Option<&Vec<String>> {
        lookup(&self.snapshot.tables, schema, table)
    }
}

fn lookup<'a, V>(entries: &'a IndexMap<String, V>, schema: &str, table: &str) -> Option<&'a V> {
    entries
        .get(&format!("{schema}.{table}"))
        .or_else(|| (schema == "public").then(|| entries.get(table)).flatten())
}

impl Introspector for FixtureIntrospector {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn query_column(&self, sql: &str, _binds: &[&str]) -> Vec<String> {
        hmeta_warn!("fixture introspection cannot run raw SQL; returning no rows for: {}", sql);
        Vec::new()
    }

    fn table_exists(&self, schema: &str, table: &str) -> bool {
        self.columns(schema, table).is_some()
    }

    fn table_columns(&self, schema: &str, table: &str) -> Vec<String> {
        let mut columns = self.columns(schema, table).cloned().unwrap_or_default();
        columns.sort();
        columns
    }

    fn roles_with_permissions(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.snapshot.permissions.keys().cloned().collect();
        roles.sort();
        roles
    }

    fn tables_for_role(&self, role: &str) -> Vec<String> {
        let mut tables = self.snapshot.permissions.get(role).cloned().unwrap_or_default();
        tables.sort();
        tables.dedup();
        tables
    }

    fn exposed_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.snapshot.permissions.values().flatten().cloned().collect();
        tables.sort();
        tables.dedup();
        tables
    }

    fn sample_rows(&self, schema: &str, table: &str, limit: u32) -> Result<usize> {
        let relation = format!("{schema}.{table}");
        if !self.table_exists(schema, table) {
            return Err(IntrospectionError::Query {
                message: format!("relation \"{relation}\" does not exist"),
                relation,
            });
        }
        if self.snapshot.denied.iter().any(|name| *name == relation || (schema == "public" && name == table)) {
            return Err(IntrospectionError::Query {
                message: format!("permission denied for table {table}"),
                relation,
            });
        }
        let rows = lookup(&self.snapshot.rows, schema, table).copied().unwrap_or(0);
        Ok(rows.min(limit as usize))
    }
}
