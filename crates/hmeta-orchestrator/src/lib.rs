//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "module"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Role sync, deletion, and derived metadata workflows."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! Workflows that read the source-of-truth catalogs and mutate the shard store,
//! the deployed documents and the derived artifacts (e2e mapping, remote schemas,
//! BigQuery mirror metadata).
//!
//! Every workflow resolves and validates its inputs before the first write, so a
//! failure leaves the previous on-disk state in place.

use std::path::PathBuf;

use hmeta_engine::EngineError;
use hmeta_introspection::IntrospectionError;
use hmeta_persistence::StoreError;
use hmeta_schema::SchemaError;

pub mod api_tables;
pub mod bigquery;
pub mod compare;
pub mod delete;
pub mod deprecation;
pub mod domain_rules;
pub mod e2e;
pub mod integrity;
pub mod maintenance;
pub mod relationship_index;
pub mod relationships;
pub mod remote_schema;
pub mod sync;
pub mod workspace;

pub use api_tables::{audit_api_tables, ApiTableAudit};
pub use bigquery::{create_bq_metadata, BigQueryExport};
pub use compare::{compare_role_to_prescription, compare_roles, compare_supersets};
pub use delete::{delete_roles, DeleteReport};
pub use deprecation::{apply_deprecations, DeprecationReport};
pub use domain_rules::{check_domain_rules, DomainViolation};
pub use e2e::{dedupe_e2e_mapping, update_e2e_mapping, E2eMapping, MappingEntry};
pub use integrity::{duplicate_role_permissions, metadata_missing_in_database, validate_prescription, MissingInDatabase};
pub use maintenance::{normalize_shards, update_allow_aggregations};
pub use relationship_index::{
    collect_relationships, export_relationships, group_relationships, load_exported_relationships, GroupBy,
    RelationshipRecord,
};
pub use relationships::{add_not_null_filter, create_relationships, RelationshipReport, RelationshipSpec};
pub use remote_schema::{RemoteSchemaDocument, RemoteSchemaPolicy, TieredRemoteSchema};
pub use sync::{sync_roles, RoleOutcome, RoleState, SyncReport};
pub use workspace::MetadataWorkspace;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Introspection(#[from] IntrospectionError),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The workflow only applies to roles marked `is_active: true`.
    #[error("role '{0}' is not active in metadata_roles.yaml")]
    RoleInactive(String),
    #[error("role '{0}' has no permission shards")]
    NoShardsForRole(String),
    #[error("refusing to overwrite existing output {}; pass --overwrite", .0.display())]
    OutputExists(PathBuf),
    #[error("relationship input row {index}: {reason}")]
    InvalidRelationship { index: usize, reason: String },
    #[error("origin table '{0}' has no shard directory")]
    UnknownTable(String),
    /// Prescribed tables or columns that the database does not have.
    #[error(
        "prescription for role '{role}' does not match the database: {}",
        .problems.join("; ")
    )]
    PrescriptionInvalid { role: String, problems: Vec<String> },
    #[error("remote schema '{0}' is not declared in remote_schemas.yaml")]
    UnknownRemoteSchema(String),
    #[error("{0} is not in the list of tables with API permissions")]
    UnknownStartTable(String),
    #[error("'{0}' has no entry in the relationship export")]
    NotInRelationshipExport(String),
    #[error("table '{table}' has no relationship named '{name}'")]
    UnknownRelationship { table: String, name: String },
    #[error("cannot read query {}: {reason}", .path.display())]
    MalformedQuery { path: PathBuf, reason: &'static str },
}

impl OrchestratorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OrchestratorError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Split a slash-delimited CLI list into lower-cased, non-empty names.
pub fn parse_slash_list(input: &str) -> Vec<String> {
    input
        .split('/')
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}
