//! ---
//! hmeta_section: "01-core-functionality"
//! hmeta_subsection: "module"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Shared configuration, path layout, and tracing primitives."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! Shared primitives for the hmeta workspace.
//! This crate exposes configuration loading, the metadata repository layout,
//! and tracing setup consumed by the engine, orchestrator, and CLI.

pub mod config;
pub mod logging;
pub mod paths;

pub use config::{
    ApiTablesConfig, BigQueryConfig, DatabaseConfig, E2eConfig, HmetaConfig, LoadedHmetaConfig, LoggingConfig,
    PathsConfig, PermissionsConfig, RemoteSchemaConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use paths::{MetadataPaths, TABLES_INCLUDE_FILE, TABLE_HEADER_FILE};
