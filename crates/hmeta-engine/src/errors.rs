//! ---
//! hmeta_section: "03-merge-engine"
//! hmeta_subsection: "module"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Superset merge, prescription resolution, and permission diffing."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use hmeta_schema::SchemaError;
use thiserror::Error;

use crate::merge::MergeError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A superset declares keys the merge rules cannot interpret.
    #[error(
        "superset '{superset}' table '{table}' declares unexpected permission key(s): {}",
        .keys.join(", ")
    )]
    UnknownKeys {
        superset: String,
        table: String,
        keys: Vec<String>,
    },
    /// Two superset contributions for the same table cannot be combined.
    #[error(
        "cannot merge table '{table}': superset '{superset}' conflicts with {}: {source}",
        .contributors.join(", ")
    )]
    Conflict {
        table: String,
        superset: String,
        contributors: Vec<String>,
        #[source]
        source: MergeError,
    },
}
