//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "workspace"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Configuration, path layout, and shard store bundled for one run."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use hmeta_common::{HmetaConfig, MetadataPaths};
use hmeta_persistence::ShardStore;
use hmeta_schema::{RolesCatalog, SupersetCatalog};

use crate::remote_schema::TieredRemoteSchema;
use crate::{OrchestratorError, Result};

/// Everything a workflow needs to locate and interpret the metadata repository.
///
/// Catalogs are loaded on every call rather than cached, so a flipped `is_active`
/// flag is observed by the next workflow in the same process.
#[derive(Debug, Clone)]
pub struct MetadataWorkspace {
    config: HmetaConfig,
    paths: MetadataPaths,
    store: ShardStore,
}

impl MetadataWorkspace {
    pub fn new(config: HmetaConfig, paths: MetadataPaths) -> Self {
        let store = ShardStore::from_paths(&paths);
        Self { config, paths, store }
    }

    pub fn config(&self) -> &HmetaConfig {
        &self.config
    }

    pub fn paths(&self) -> &MetadataPaths {
        &self.paths
    }

    pub fn store(&self) -> &ShardStore {
        &self.store
    }

    pub fn default_limit(&self) -> u64 {
        self.config.permissions.default_limit
    }

    pub fn roles(&self) -> Result<RolesCatalog> {
        Ok(RolesCatalog::load(&self.paths.roles_file())?)
    }

    pub fn supersets(&self) -> Result<SupersetCatalog> {
        Ok(SupersetCatalog::load(&self.paths.supersets_file())?)
    }

    /// One policy per configured remote schema.
    pub fn remote_schema_policies(&self, roles: &RolesCatalog) -> Vec<TieredRemoteSchema> {
        self.config
            .remote_schemas
            .iter()
            .map(|schema| TieredRemoteSchema::from_config(schema, &self.config.permissions, roles))
            .collect()
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| OrchestratorError::io(parent, err))?;
    }
    Ok(())
}
