//! ---
//! hmeta_section: "01-core-functionality"
//! hmeta_subsection: "module"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Shared configuration, path layout, and tracing primitives."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use path_absolutize::Absolutize;

use crate::config::PathsConfig;

pub const ENV_REPO_ROOT: &str = "REPO_ROOTDIR";
pub const ENV_GRAPHQL_ROOT: &str = "GRAPHQL2_ROOTDIR";

/// Header shard file name inside every table directory.
pub const TABLE_HEADER_FILE: &str = "_table.yaml";
/// Include list naming every deployed table document.
pub const TABLES_INCLUDE_FILE: &str = "tables.yaml";

/// Canonical locations of every file the tooling reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPaths {
    graphql_root: PathBuf,
    diff_output_dir: PathBuf,
}

impl MetadataPaths {
    /// Construct the layout rooted at the API server directory (`servers/graphql2`).
    pub fn new<P: AsRef<Path>>(graphql_root: P) -> Self {
        Self {
            graphql_root: graphql_root.as_ref().to_path_buf(),
            diff_output_dir: PathBuf::from("perm_def_diff"),
        }
    }

    /// Resolve roots from configuration, falling back to `GRAPHQL2_ROOTDIR` and then
    /// `REPO_ROOTDIR/servers/graphql2`.
    pub fn from_config(config: &PathsConfig) -> Result<Self> {
        let graphql_root = match (&config.graphql_root, &config.repo_root) {
            (Some(root), _) => root.clone(),
            (None, repo_root) => match std::env::var(ENV_GRAPHQL_ROOT) {
                Ok(root) if !root.trim().is_empty() => PathBuf::from(root),
                _ => {
                    let repo_root = match repo_root {
                        Some(root) => root.clone(),
                        None => std::env::var(ENV_REPO_ROOT).map(PathBuf::from).map_err(|_| {
                            anyhow!(
                                "unable to locate metadata: set paths.graphql_root, paths.repo_root, {} or {}",
                                ENV_GRAPHQL_ROOT,
                                ENV_REPO_ROOT
                            )
                        })?,
                    };
                    repo_root.join("servers").join("graphql2")
                }
            },
        };
        let graphql_root = graphql_root
            .absolutize()
            .with_context(|| format!("unable to resolve {}", graphql_root.display()))?
            .into_owned();
        Ok(Self {
            graphql_root,
            diff_output_dir: config.diff_output_dir.clone(),
        })
    }

    /// Override where diff reports are written.
    pub fn with_diff_output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.diff_output_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn graphql_root(&self) -> &Path {
        &self.graphql_root
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.graphql_root.join("metadata")
    }

    /// Root of the per-table shard directories (`metadata/tables`).
    pub fn shard_root(&self) -> PathBuf {
        self.metadata_dir().join("tables")
    }

    /// Deployed per-table documents (`metadata/databases/default/tables`).
    pub fn tables_metadata_dir(&self) -> PathBuf {
        self.metadata_dir()
            .join("databases")
            .join("default")
            .join("tables")
    }

    pub fn tables_include_file(&self) -> PathBuf {
        self.tables_metadata_dir().join(TABLES_INCLUDE_FILE)
    }

    pub fn remote_schemas_file(&self) -> PathBuf {
        self.metadata_dir().join("remote_schemas.yaml")
    }

    pub fn relationships_input_file(&self) -> PathBuf {
        self.metadata_dir().join("hasura_relationships_metadata.txt")
    }

    pub fn source_of_truth_dir(&self) -> PathBuf {
        self.metadata_dir().join("source_of_truth")
    }

    pub fn supersets_file(&self) -> PathBuf {
        self.source_of_truth_dir()
            .join("metadata_api_data_supersets.yaml")
    }

    pub fn roles_file(&self) -> PathBuf {
        self.source_of_truth_dir().join("metadata_roles.yaml")
    }

    pub fn domain_rules_file(&self) -> PathBuf {
        self.source_of_truth_dir().join("domain_rules.yaml")
    }

    pub fn deprecations_file(&self) -> PathBuf {
        self.source_of_truth_dir().join("metadata_deprecations.yaml")
    }

    /// Flat relationship listing exported from the table metadata.
    pub fn relationships_export_file(&self) -> PathBuf {
        self.graphql_root.join("tooling").join("metadata_relationships.yaml")
    }

    /// Root of the permissions end-to-end test suite.
    pub fn e2e_root(&self) -> PathBuf {
        self.graphql_root
            .join("tests")
            .join("feature")
            .join("features")
    }

    pub fn e2e_mapping_file(&self) -> PathBuf {
        self.e2e_root().join("hasura_perm_metadata.yaml")
    }

    pub fn relationships_e2e_dir(&self) -> PathBuf {
        self.e2e_root().join("relationships")
    }

    /// Mirror metadata directory for a BigQuery project.
    pub fn bigquery_tables_dir(&self, project: &str) -> PathBuf {
        self.graphql_root
            .join(project)
            .join("metadata")
            .join("databases")
            .join(project)
            .join("tables")
    }

    pub fn diff_output_dir(&self) -> &Path {
        &self.diff_output_dir
    }

    pub fn role_vs_prescription_diff_dir(&self) -> PathBuf {
        self.diff_output_dir.join("role_perm_vs_prescription")
    }

    pub fn superset_vs_superset_diff_dir(&self) -> PathBuf {
        self.diff_output_dir.join("superset_vs_superset")
    }

    pub fn role_vs_role_diff_dir(&self) -> PathBuf {
        self.diff_output_dir.join("role_vs_role")
    }
}
