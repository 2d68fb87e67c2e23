//! ---
//! hmeta_section: "05-introspection"
//! hmeta_subsection: "postgres"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "sqlx-backed introspection driven from a current-thread runtime."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use hmeta_common::DatabaseConfig;
use hmeta_logging::{hmeta_debug, hmeta_error};
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use tokio::runtime::{Builder, Runtime};

use crate::{IntrospectionError, Introspector, Result};

const CONNECTION_HINT: &str =
    "##### HINT: ##### check DATABASE_URL or the PG* variables and that PGPORT points at the intended instance";

/// Opens one connection per query; runs are short batch jobs.
pub struct PostgresIntrospector {
    url: String,
    runtime: Runtime,
}

impl std::fmt::Debug for PostgresIntrospector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresIntrospector").finish_non_exhaustive()
    }
}

impl PostgresIntrospector {
    pub fn connect_lazy(url: impl Into<String>) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(IntrospectionError::Runtime)?;
        Ok(Self {
            url: url.into(),
            runtime,
        })
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let url = config.connection_url().ok_or(IntrospectionError::NotConfigured)?;
        Self::connect_lazy(url)
    }

    async fn fetch_column(url: &str, sql: &str, binds: &[&str]) -> std::result::Result<Vec<String>, sqlx::Error> {
        let mut connection = PgConnection::connect(url).await?;
        let mut query = sqlx::query_scalar::<_, String>(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&mut connection).await?;
        connection.close().await?;
        Ok(rows)
    }
}

/// Double-quote an identifier for interpolation into SQL.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Introspector for PostgresIntrospector {
    fn ping(&self) -> Result<()> {
        self.runtime.block_on(async {
            let mut connection = PgConnection::connect(&self.url)
                .await
                .map_err(|err| IntrospectionError::Unreachable(err.to_string()))?;
            connection
                .ping()
                .await
                .map_err(|err| IntrospectionError::Unreachable(err.to_string()))?;
            connection
                .close()
                .await
                .map_err(|err| IntrospectionError::Unreachable(err.to_string()))
        })
    }

    fn query_column(&self, sql: &str, binds: &[&str]) -> Vec<String> {
        match self.runtime.block_on(Self::fetch_column(&self.url, sql, binds)) {
            Ok(rows) => {
                hmeta_debug!("introspection query returned {} row(s)", rows.len());
                rows
            }
            Err(err) => {
                hmeta_error!("introspection query failed: {}\n\n{}\n", err, CONNECTION_HINT);
                Vec::new()
            }
        }
    }

    fn sample_rows(&self, schema: &str, table: &str, limit: u32) -> Result<usize> {
        let relation = format!("{schema}.{table}");
        let sql = format!("SELECT 1 FROM {}.{} LIMIT {limit}", quote_ident(schema), quote_ident(table));
        self.runtime.block_on(async {
            let mut connection = PgConnection::connect(&self.url)
                .await
                .map_err(|err| IntrospectionError::Unreachable(err.to_string()))?;
            let rows = sqlx::query(sql.as_str())
                .fetch_all(&mut connection)
                .await
                .map_err(|err| IntrospectionError::Query {
                    relation: relation.clone(),
                    message: err.to_string(),
                })?;
            hmeta_debug!("sampled {} row(s) from {}", rows.len(), relation);
            connection
                .close()
                .await
                .map_err(|err| IntrospectionError::Unreachable(err.to_string()))?;
            Ok(rows.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_database_degrades_to_empty() {
        let db = PostgresIntrospector::connect_lazy("postgres://nobody@127.0.0.1:1/none").unwrap();
        assert!(db.table_columns("public", "parcels").is_empty());
        assert!(!db.table_exists("public", "parcels"));
        assert!(matches!(db.ping(), Err(IntrospectionError::Unreachable(_))));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("parcels"), "\"parcels\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn unreachable_database_fails_row_samples() {
        let db = PostgresIntrospector::connect_lazy("postgres://nobody@127.0.0.1:1/none").unwrap();
        assert!(matches!(
            db.sample_rows("public", "parcels", 9),
            Err(IntrospectionError::Unreachable(_))
        ));
    }

    #[test]
    fn missing_configuration_is_reported() {
        let config = DatabaseConfig {
            url: None,
            validate_prescriptions: false,
        };
        if std::env::var("DATABASE_URL").is_err() && std::env::var("PGHOST").is_err() {
            assert!(matches!(
                PostgresIntrospector::from_config(&config),
                Err(IntrospectionError::NotConfigured)
            ));
        }
    }
}
