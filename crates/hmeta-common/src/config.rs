//! ---
//! hmeta_section: "01-core-functionality"
//! hmeta_subsection: "module"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Shared configuration, path layout, and tracing primitives."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;

fn default_diff_output_dir() -> PathBuf {
    PathBuf::from("perm_def_diff")
}

fn default_limit() -> u64 {
    100
}

fn default_schema() -> String {
    "public".to_owned()
}

fn default_exempt_roles() -> Vec<String> {
    vec!["qa".to_owned()]
}

fn default_relationship_test_role() -> String {
    "test_role".to_owned()
}

fn default_dataset_placeholder() -> String {
    "display_#timestamp#".to_owned()
}

fn default_bigquery_row_limit() -> u64 {
    1_000_000
}

fn default_min_expected_rows() -> u32 {
    9
}

fn default_remote_schemas() -> Vec<RemoteSchemaConfig> {
    vec![RemoteSchemaConfig::address()]
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for the metadata tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmetaConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub e2e: E2eConfig,
    #[serde(default)]
    pub bigquery: BigQueryConfig,
    #[serde(default = "default_remote_schemas")]
    pub remote_schemas: Vec<RemoteSchemaConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api_tables: ApiTablesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`HmetaConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedHmetaConfig {
    pub config: HmetaConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl HmetaConfig {
    pub const ENV_CONFIG_PATH: &str = "HMETA_CONFIG";

    /// Load configuration from disk, respecting the `HMETA_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    ///
    /// An explicit `HMETA_CONFIG` must point at a readable file. When no candidate
    /// exists the built-in defaults are used, which is the normal mode for CI jobs
    /// that only export `REPO_ROOTDIR`.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedHmetaConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedHmetaConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedHmetaConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found, using defaults"
        );
        let config = Self::default();
        config.validate()?;
        Ok(LoadedHmetaConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<HmetaConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up the remote schema policy data by schema name.
    pub fn remote_schema(&self, name: &str) -> Option<&RemoteSchemaConfig> {
        self.remote_schemas.iter().find(|schema| schema.name == name)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.permissions.validate()?;
        self.bigquery.validate()?;
        self.e2e.validate()?;
        self.api_tables.validate()?;
        let mut seen = BTreeSet::new();
        for schema in &self.remote_schemas {
            schema.validate()?;
            if !seen.insert(schema.name.as_str()) {
                return Err(anyhow!(
                    "remote schema '{}' is declared more than once",
                    schema.name
                ));
            }
        }
        Ok(())
    }
}

impl Default for HmetaConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            permissions: PermissionsConfig::default(),
            e2e: E2eConfig::default(),
            bigquery: BigQueryConfig::default(),
            remote_schemas: default_remote_schemas(),
            database: DatabaseConfig::default(),
            api_tables: ApiTablesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for HmetaConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: HmetaConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Filesystem roots. Unset values fall back to `REPO_ROOTDIR` / `GRAPHQL2_ROOTDIR`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub repo_root: Option<PathBuf>,
    #[serde(default)]
    pub graphql_root: Option<PathBuf>,
    #[serde(default = "default_diff_output_dir")]
    pub diff_output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repo_root: None,
            graphql_root: None,
            diff_output_dir: default_diff_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Row limit written when a resolved prescription leaves `limit` undefined.
    #[serde(default = "default_limit")]
    pub default_limit: u64,
    #[serde(default = "default_schema")]
    pub default_schema: String,
    /// Roles that keep the full remote schema regardless of the roles catalog.
    #[serde(default)]
    pub legacy_full_permission_roles: Vec<String>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_schema: default_schema(),
            legacy_full_permission_roles: Vec::new(),
        }
    }
}

impl PermissionsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_limit == 0 {
            return Err(anyhow!("permissions.default_limit must be greater than zero"));
        }
        if self.default_schema.trim().is_empty() {
            return Err(anyhow!("permissions.default_schema cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct E2eConfig {
    /// Roles that never receive e2e test mappings.
    #[serde(default = "default_exempt_roles")]
    pub exempt_roles: Vec<String>,
    /// Actual table name to the alias it is exposed under in the API.
    #[serde(default)]
    pub table_aliases: IndexMap<String, String>,
    #[serde(default = "default_relationship_test_role")]
    pub relationship_test_role: String,
    /// Origin table to the feature subdirectory holding its relationship tests.
    #[serde(default)]
    pub relationship_subdirs: IndexMap<String, String>,
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            exempt_roles: default_exempt_roles(),
            table_aliases: IndexMap::new(),
            relationship_test_role: default_relationship_test_role(),
            relationship_subdirs: IndexMap::new(),
        }
    }
}

impl E2eConfig {
    pub fn validate(&self) -> Result<()> {
        for (actual, alias) in &self.table_aliases {
            if alias.trim().is_empty() {
                return Err(anyhow!("e2e.table_aliases entry '{}' has an empty alias", actual));
            }
        }
        Ok(())
    }

    /// Translate an actual table name into its API alias, if one is configured.
    pub fn alias_for<'a>(&'a self, table: &'a str) -> &'a str {
        self.table_aliases
            .get(table)
            .map(String::as_str)
            .unwrap_or(table)
    }

    pub fn is_exempt(&self, role: &str) -> bool {
        self.exempt_roles.iter().any(|exempt| exempt == role)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigQueryConfig {
    #[serde(default = "default_dataset_placeholder")]
    pub dataset_placeholder: String,
    #[serde(default = "default_bigquery_row_limit")]
    pub row_limit: u64,
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            dataset_placeholder: default_dataset_placeholder(),
            row_limit: default_bigquery_row_limit(),
        }
    }
}

impl BigQueryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.row_limit == 0 {
            return Err(anyhow!("bigquery.row_limit must be greater than zero"));
        }
        Ok(())
    }
}

/// Per-variant data for a tiered remote schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteSchemaConfig {
    pub name: String,
    pub full_schema: String,
    pub limited_schema: String,
    /// Root queries covered by e2e tests for this schema.
    #[serde(default)]
    pub queries: Vec<String>,
    /// Subset of `queries` reachable with the limited schema.
    #[serde(default)]
    pub limited_queries: Vec<String>,
}

impl RemoteSchemaConfig {
    /// Built-in address lookup schema.
    pub fn address() -> Self {
        Self {
            name: "address".to_owned(),
            full_schema: ADDRESS_FULL_SCHEMA.to_owned(),
            limited_schema: ADDRESS_LIMITED_SCHEMA.to_owned(),
            queries: vec!["address".to_owned(), "address_autocomplete".to_owned()],
            limited_queries: vec!["address".to_owned()],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("remote schema name cannot be empty"));
        }
        if self.full_schema.trim().is_empty() || self.limited_schema.trim().is_empty() {
            return Err(anyhow!(
                "remote schema '{}' must define both full_schema and limited_schema",
                self.name
            ));
        }
        if let Some(query) = self
            .limited_queries
            .iter()
            .find(|query| !self.queries.contains(query))
        {
            return Err(anyhow!(
                "remote schema '{}' lists limited query '{}' that is not in queries",
                self.name,
                query
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    /// Check prescribed tables and columns against the live schema before syncing.
    #[serde(default)]
    pub validate_prescriptions: bool,
}

impl DatabaseConfig {
    /// Resolve the connection URL from config, `DATABASE_URL`, or the libpq `PG*` variables.
    pub fn connection_url(&self) -> Option<String> {
        if let Some(url) = &self.url {
            return Some(url.clone());
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                return Some(url);
            }
        }
        let host = std::env::var("PGHOST").ok()?;
        let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_owned());
        let user = std::env::var("PGUSERNAME")
            .or_else(|_| std::env::var("PGUSER"))
            .unwrap_or_default();
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let database = std::env::var("PGDATABASE").unwrap_or_default();
        let credentials = match (user.is_empty(), password.is_empty()) {
            (true, _) => String::new(),
            (false, true) => format!("{user}@"),
            (false, false) => format!("{user}:{password}@"),
        };
        Some(format!(
            "postgres://{credentials}{host}:{port}/{database}"
        ))
    }
}

/// Row-count audit of the tables exposed through the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiTablesConfig {
    /// Tables known to be legitimately empty.
    #[serde(default)]
    pub skip_tables: Vec<String>,
    /// Row count of the smallest populated table; fewer rows flag a manual check.
    #[serde(default = "default_min_expected_rows")]
    pub min_expected_rows: u32,
}

impl Default for ApiTablesConfig {
    fn default() -> Self {
        Self {
            skip_tables: Vec::new(),
            min_expected_rows: default_min_expected_rows(),
        }
    }
}

impl ApiTablesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_expected_rows == 0 {
            return Err(anyhow!("api_tables.min_expected_rows must be greater than zero"));
        }
        Ok(())
    }

    pub fn is_skipped(&self, table: &str) -> bool {
        self.skip_tables.iter().any(|skipped| skipped == table)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// When set, a daily-rolling JSON log file is written here as well.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

pub const ADDRESS_FULL_SCHEMA: &str = "type Address {
\tcity: String
\tone_line_address: String
\tstate: String
\tstreet_name: String
\tstreet_number: String
\tzip: String
}
input AutocompleteInput {
\tcenterpoint: Coordinates
\tpartial_address: String!
}
input AutocompleteLatLongInput {
\tbounding_box: GeoBoundingBox
\tpartial_address: String!
}
type AutocompleteLatLongResult {
\tcity: String
\tlat_long: GeoPoint
\tone_line_address: String
\tstate: String
\tstreet_name: String
\tstreet_number: String
\tunit_number: String
\tunit_number_prefix: String
\tzip: String
}
input Coordinates {
\tlatitude: Float!
\tlongitude: Float!
}
input GeoBoundingBox {
\tnortheast: GeoPointInput!
\tsouthwest: GeoPointInput!
}
type GeoPoint {
\tlatitude: Float!
\tlongitude: Float!
}
input GeoPointInput {
\tlatitude: Float!
\tlongitude: Float!
}
type Query {
\taddress(address: String): Address
}
";

pub const ADDRESS_LIMITED_SCHEMA: &str = "type Address {
\tcity: String
\tone_line_address: String
\tstate: String
\tstreet_name: String
\tstreet_number: String
\tzip: String
}
type Query {
\taddress(address: String): Address
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = HmetaConfig::default();
        config.validate().unwrap();
        assert_eq!(config.permissions.default_limit, 100);
        assert_eq!(config.e2e.exempt_roles, vec!["qa".to_owned()]);
        assert!(config.remote_schema("address").is_some());
    }

    #[test]
    fn parses_partial_toml() {
        let config: HmetaConfig = r#"
            [permissions]
            legacy_full_permission_roles = ["partner_a"]

            [e2e.table_aliases]
            raw_parcels = "parcels"
        "#
        .parse()
        .unwrap();
        assert_eq!(config.permissions.default_limit, 100);
        assert_eq!(config.permissions.legacy_full_permission_roles, vec!["partner_a"]);
        assert_eq!(config.e2e.alias_for("raw_parcels"), "parcels");
        assert_eq!(config.e2e.alias_for("deeds"), "deeds");
        assert_eq!(config.remote_schemas.len(), 1);
    }

    #[test]
    fn api_table_audit_defaults_and_overrides() {
        assert_eq!(HmetaConfig::default().api_tables.min_expected_rows, 9);
        let config: HmetaConfig = "[api_tables]\nskip_tables = [\"staging_events\"]\nmin_expected_rows = 3\n"
            .parse()
            .unwrap();
        assert!(config.api_tables.is_skipped("staging_events"));
        assert_eq!(config.api_tables.min_expected_rows, 3);
        assert!("[api_tables]\nmin_expected_rows = 0\n".parse::<HmetaConfig>().is_err());
    }

    #[test]
    fn rejects_zero_limit() {
        let err = "[permissions]\ndefault_limit = 0\n"
            .parse::<HmetaConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("default_limit"));
    }

    #[test]
    fn rejects_limited_query_outside_queries() {
        let mut config = HmetaConfig::default();
        config.remote_schemas[0].limited_queries.push("geocode".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_remote_schema() {
        let mut config = HmetaConfig::default();
        config.remote_schemas.push(RemoteSchemaConfig::address());
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_database_url_wins() {
        let config = DatabaseConfig {
            url: Some("postgres://localhost/api".into()),
            validate_prescriptions: false,
        };
        assert_eq!(
            config.connection_url().as_deref(),
            Some("postgres://localhost/api")
        );
    }

    #[test]
    fn load_falls_back_to_defaults_without_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("hmeta.toml");
        let loaded = HmetaConfig::load_with_source(&[missing]).unwrap();
        assert!(loaded.source.is_none());
    }
}
