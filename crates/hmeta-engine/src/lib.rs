//! ---
//! hmeta_section: "03-merge-engine"
//! hmeta_subsection: "module"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Superset merge, prescription resolution, and permission diffing."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! Pure permission logic: nothing in this crate touches the filesystem.

pub mod diff;
pub mod errors;
pub mod merge;
pub mod report;
pub mod resolver;

pub use diff::{diff, DiffCase, FieldDiff, PermissionDiff, TableDiff};
pub use errors::{EngineError, Result};
pub use merge::{merge, MergeError};
pub use report::{render_report, ReportSubject};
pub use resolver::{resolve, Prescription};
