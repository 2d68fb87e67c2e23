//! ---
//! hmeta_section: "05-introspection"
//! hmeta_subsection: "module"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Database introspection collaborator used by integrity checks and sync validation."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! Query failures degrade to empty results with a logged hint. Callers that need
//! to tell "no rows" apart from "unreachable" must call [`Introspector::ping`] first.

use hmeta_schema::SchemaError;

pub mod fixture;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use fixture::{FixtureIntrospector, IntrospectionSnapshot};
#[cfg(feature = "postgres")]
pub use postgres::PostgresIntrospector;

pub type Result<T> = std::result::Result<T, IntrospectionError>;

#[derive(Debug, thiserror::Error)]
pub enum IntrospectionError {
    #[error("no database connection configured; set DATABASE_URL or PGHOST")]
    NotConfigured,
    #[error("failed to build async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("database unreachable: {0}")]
    Unreachable(String),
    #[error("introspection snapshot error: {0}")]
    Snapshot(#[from] SchemaError),
    /// The database answered but the query on `relation` failed.
    #[error("query on {relation} failed: {message}")]
    Query { relation: String, message: String },
}

pub(crate) const TABLE_EXISTS_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = $1 AND table_name = $2";
pub(crate) const TABLE_COLUMNS_SQL: &str = "SELECT column_name::text FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 ORDER BY column_name";
pub(crate) const ROLES_SQL: &str =
    "SELECT DISTINCT role_name::text FROM hdb_catalog.hdb_permission ORDER BY role_name";
pub(crate) const EXPOSED_TABLES_SQL: &str =
    "SELECT DISTINCT table_name::text FROM hdb_catalog.hdb_permission ORDER BY table_name";
pub(crate) const ROLE_TABLES_SQL: &str = "SELECT DISTINCT table_name::text FROM hdb_catalog.hdb_permission \
     WHERE role_name = $1 ORDER BY table_name";

/// Read-only view of the database schema and the gateway's permission catalog.
pub trait Introspector {
    /// Explicit connectivity check.
    fn ping(&self) -> Result<()>;

    /// Run a query returning one text column. Failures yield an empty list.
    fn query_column(&self, sql: &str, binds: &[&str]) -> Vec<String>;

    fn table_exists(&self, schema: &str, table: &str) -> bool {
        !self.query_column(TABLE_EXISTS_SQL, &[schema, table]).is_empty()
    }

    fn table_columns(&self, schema: &str, table: &str) -> Vec<String> {
        self.query_column(TABLE_COLUMNS_SQL, &[schema, table])
    }

    /// Roles holding at least one permission in the running gateway.
    fn roles_with_permissions(&self) -> Vec<String> {
        self.query_column(ROLES_SQL, &[])
    }

    fn tables_for_role(&self, role: &str) -> Vec<String> {
        self.query_column(ROLE_TABLES_SQL, &[role])
    }

    /// Tables holding at least one permission in the running gateway, sorted.
    fn exposed_tables(&self) -> Vec<String> {
        self.query_column(EXPOSED_TABLES_SQL, &[])
    }

    /// Read at most `limit` rows of `schema.table` and return how many came back.
    ///
    /// Unlike the catalog lookups a failed query is returned as
    /// [`IntrospectionError::Query`], since a missing relation is itself the answer.
    fn sample_rows(&self, schema: &str, table: &str, limit: u32) -> Result<usize>;
}

impl<T: Introspector + ?Sized> Introspector for &T {
    fn ping(&self) -> Result<()> {
        (**self).ping()
    }

    fn query_column(&self, sql: &str, binds: &[&str]) -> Vec<String> {
        (**self).query_column(sql, binds)
    }

    fn table_exists(&self, schema: &str, table: &str) -> bool {
        (**self).table_exists(schema, table)
    }

    fn table_columns(&self, schema: &str, table: &str) -> Vec<String> {
        (**self).table_columns(schema, table)
    }

    fn roles_with_permissions(&self) -> Vec<String> {
        (**self).roles_with_permissions()
    }

    fn tables_for_role(&self, role: &str) -> Vec<String> {
        (**self).tables_for_role(role)
    }

    fn exposed_tables(&self) -> Vec<String> {
        (**self).exposed_tables()
    }

    fn sample_rows(&self, schema: &str, table: &str, limit: u32) -> Result<usize> {
        (**self).sample_rows(schema, table, limit)
    }
}
