//! ---
//! hmeta_section: "02-permission-model"
//! hmeta_subsection: "module"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Permission records, table documents, and source-of-truth catalogs."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! Data model for the API gateway's select-permission metadata.
//!
//! Arbitrary metadata trees (filters, relationship blocks, table configuration) are
//! carried as [`serde_yaml::Value`] so that sharding and reconstruction never drop
//! keys the tooling does not interpret.

use std::path::PathBuf;

pub mod permission;
pub mod source;
pub mod table;
pub mod yaml;

pub use permission::{PermissionDefinition, RolePermission, PERMISSION_KEYS};
pub use source::{RemoteSchemaTier, RoleDefinition, RolesCatalog, Superset, SupersetCatalog};
pub use table::{RelationshipKind, TableDocument};
pub use yaml::{read_yaml_file, to_yaml_string, write_yaml_file, write_yaml_value};

pub use serde_yaml::{Mapping, Value};

/// Result alias used throughout the schema crate.
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Error type for loading and interpreting metadata documents.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Reading or writing a metadata file failed.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A metadata file is not valid YAML or does not match the expected shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    /// An in-memory value could not be converted to or from its typed form.
    #[error("invalid {context}: {source}")]
    Convert {
        context: String,
        #[source]
        source: serde_yaml::Error,
    },
    /// A document is structurally malformed.
    #[error("malformed {context}: expected {expected}")]
    Malformed {
        context: String,
        expected: &'static str,
    },
    /// The role is not declared in `metadata_roles.yaml`.
    #[error("role '{0}' not found in metadata_roles.yaml")]
    UnknownRole(String),
    /// One or more supersets are not declared in `metadata_api_data_supersets.yaml`.
    #[error("supersets not found in metadata_api_data_supersets.yaml: {}", .0.join(", "))]
    UnknownSupersets(Vec<String>),
}
