//! ---
//! hmeta_section: "04-shard-store"
//! hmeta_subsection: "module"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Shard store, sharding, and reconstruction of deployed table metadata."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! The shard store is the only mutable persisted state the tooling owns.
//!
//! Layout under `metadata/tables/`:
//! `<table>/_table.yaml` holds the header with `select_permissions: []` and
//! `<table>/<role>.yaml` holds one `{role, permission}` record per role.

use std::path::PathBuf;

use hmeta_schema::SchemaError;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for the shard store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Wrapper for IO errors on a specific path.
    #[error("io error on {path}: {source}")]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Directory traversal failed.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    /// A shard or deployed document could not be parsed or converted.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A header shard violates the single-occurrence rule for top-level keys.
    #[error("header shard {path} failed validation: {reason}")]
    InvalidHeader {
        /// Offending `_table.yaml`.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },
    /// A role shard names a different role than its file name.
    #[error("role shard {path} declares role '{found}'")]
    RoleMismatch {
        /// Offending `<role>.yaml`.
        path: PathBuf,
        /// Role declared inside the file.
        found: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

pub mod include;
pub mod reconstruct;
pub mod shard;
pub mod store;

pub use include::TablesIncludeList;
pub use reconstruct::{reconstruct, ReconstructSummary};
pub use shard::{deployed_documents, shard_monolith, ShardSummary};
pub use store::ShardStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_error_names_the_shard() {
        let err = StoreError::InvalidHeader {
            path: PathBuf::from("metadata/tables/orders/_table.yaml"),
            reason: "`select_permissions` appears 2 times".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "header shard metadata/tables/orders/_table.yaml failed validation: `select_permissions` appears 2 times"
        );
    }
}
