//! ---
//! hmeta_section: "04-shard-store"
//! hmeta_subsection: "store"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Directory-per-table shard layout with header and per-role files."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use hmeta_common::paths::{MetadataPaths, TABLES_INCLUDE_FILE, TABLE_HEADER_FILE};
use hmeta_logging::{hmeta_error, hmeta_info, LogContext};
use hmeta_schema::table::SELECT_PERMISSIONS_KEY;
use hmeta_schema::{
    read_yaml_file, write_yaml_file, write_yaml_value, PermissionDefinition, RelationshipKind,
    RolePermission, TableDocument, Value,
};
use indexmap::IndexMap;
use walkdir::WalkDir;

use crate::include::TablesIncludeList;
use crate::{Result, StoreError};

const YAML_EXTENSION: &str = "yaml";

/// Shard directory plus the deployed-metadata directory it reconstructs into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardStore {
    root: PathBuf,
    deployed_dir: PathBuf,
}

impl ShardStore {
    /// Store over explicit directories.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(shard_root: P, deployed_dir: Q) -> Self {
        Self {
            root: shard_root.as_ref().to_path_buf(),
            deployed_dir: deployed_dir.as_ref().to_path_buf(),
        }
    }

    /// Store over the repository layout.
    pub fn from_paths(paths: &MetadataPaths) -> Self {
        Self::new(paths.shard_root(), paths.tables_metadata_dir())
    }

    /// `metadata/tables`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `metadata/databases/default/tables`.
    pub fn deployed_dir(&self) -> &Path {
        &self.deployed_dir
    }

    /// Shard directory of a table.
    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.root.join(table)
    }

    /// `_table.yaml` of a table.
    pub fn header_path(&self, table: &str) -> PathBuf {
        self.table_dir(table).join(TABLE_HEADER_FILE)
    }

    /// `<role>.yaml` of a table.
    pub fn role_path(&self, table: &str, role: &str) -> PathBuf {
        self.table_dir(table).join(format!("{role}.{YAML_EXTENSION}"))
    }

    /// Deployed document of a table (`<schema>_<table>.yaml`).
    pub fn deployed_document_path(&self, schema: &str, table: &str) -> PathBuf {
        self.deployed_dir.join(format!("{schema}_{table}.{YAML_EXTENSION}"))
    }

    /// `tables.yaml` include list path.
    pub fn include_list_path(&self) -> PathBuf {
        self.deployed_dir.join(TABLES_INCLUDE_FILE)
    }

    /// Remove and recreate the shard root.
    ///
    /// Destructive: the directory is empty until the next sharding pass.
    pub fn truncate(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|err| StoreError::io(&self.root, err))?;
        }
        fs::create_dir_all(&self.root).map_err(|err| StoreError::io(&self.root, err))?;
        hmeta_info!(
            context = LogContext::new().with_operation("truncate"),
            "truncated and recreated {}",
            self.root.display()
        );
        Ok(())
    }

    /// Whether a shard directory exists for the table.
    pub fn has_table(&self, table: &str) -> bool {
        self.table_dir(table).is_dir()
    }

    /// Whether the table has a shard for the role.
    pub fn has_role_permission(&self, table: &str, role: &str) -> bool {
        self.role_path(table, role).is_file()
    }

    /// Write a table's header shard, creating its directory.
    pub fn write_header(&self, header: &TableDocument) -> Result<()> {
        let dir = self.table_dir(header.table_name());
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
        write_yaml_value(&self.header_path(header.table_name()), &header.to_value())?;
        Ok(())
    }

    /// Read a table's header shard.
    pub fn read_header(&self, table: &str) -> Result<TableDocument> {
        let path = self.header_path(table);
        let value: Value = read_yaml_file(&path)?;
        Ok(TableDocument::from_value(value, &path.display().to_string())?)
    }

    /// Persist one role's permission for a table. Columns are written sorted.
    pub fn write_role_permission(&self, table: &str, record: &RolePermission) -> Result<()> {
        let dir = self.table_dir(table);
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
        let mut record = record.clone();
        record.permission.sort_columns();
        write_yaml_file(&self.role_path(table, &record.role), &record)?;
        Ok(())
    }

    /// Read one role's permission for a table. Columns come back sorted.
    pub fn read_role_permission(&self, table: &str, role: &str) -> Result<RolePermission> {
        let path = self.role_path(table, role);
        let mut record: RolePermission = read_yaml_file(&path)?;
        if record.role != role {
            return Err(StoreError::RoleMismatch {
                path,
                found: record.role,
            });
        }
        record.permission.sort_columns();
        Ok(record)
    }

    /// Table directories, sorted by name.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut tables = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            if entry.file_type().is_dir() {
                tables.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(tables)
    }

    /// Roles with a shard in the table directory, sorted by role name.
    pub fn list_roles(&self, table: &str) -> Result<Vec<String>> {
        let dir = self.table_dir(table);
        let mut roles = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() || entry.file_name() == TABLE_HEADER_FILE {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(YAML_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                roles.push(stem.to_string());
            }
        }
        roles.sort();
        Ok(roles)
    }

    /// Tables holding a shard for the role, sorted.
    pub fn list_tables_with_role_file(&self, role: &str) -> Result<Vec<String>> {
        Ok(self
            .list_tables()?
            .into_iter()
            .filter(|table| self.has_role_permission(table, role))
            .collect())
    }

    /// A role's actual permissions, `table -> definition`.
    pub fn role_permissions(&self, role: &str) -> Result<IndexMap<String, PermissionDefinition>> {
        let mut permissions = IndexMap::new();
        for table in self.list_tables_with_role_file(role)? {
            let record = self.read_role_permission(&table, role)?;
            permissions.insert(table, record.permission);
        }
        Ok(permissions)
    }

    /// Delete one role shard. Returns whether a file was removed.
    ///
    /// An absent shard is fine during cleanup sweeps. When `expect_existing` is set,
    /// absence is logged as an invariant violation but still does not fail, so batch
    /// cleanup can continue.
    pub fn delete_role_permission(&self, table: &str, role: &str, expect_existing: bool) -> Result<bool> {
        let path = self.role_path(table, role);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if expect_existing {
                    hmeta_error!(
                        context = LogContext::new().with_table(table).with_role(role),
                        "shard deletion failed, file not found: {}",
                        path.display()
                    );
                }
                Ok(false)
            }
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    /// Check a header shard before reconstruction.
    ///
    /// The raw text must declare `table` and hold at most one top-level
    /// `object_relationships`, `array_relationships` and `select_permissions` key.
    pub fn validate_header(&self, table: &str) -> Result<()> {
        let path = self.header_path(table);
        let text = fs::read_to_string(&path).map_err(|err| StoreError::io(&path, err))?;
        let count = |key: &str| {
            text.lines()
                .filter(|line| {
                    line.strip_prefix(key)
                        .and_then(|rest| rest.strip_prefix(':'))
                        .is_some()
                })
                .count()
        };
        if count("table") < 1 {
            return Err(StoreError::InvalidHeader {
                path,
                reason: "missing top-level `table` key".to_string(),
            });
        }
        let keys = [
            RelationshipKind::Object.key(),
            RelationshipKind::Array.key(),
            SELECT_PERMISSIONS_KEY,
        ];
        for key in keys {
            let occurrences = count(key);
            if occurrences > 1 {
                return Err(StoreError::InvalidHeader {
                    path,
                    reason: format!("`{key}` appears {occurrences} times"),
                });
            }
        }
        Ok(())
    }

    /// Create a shard directory with a stub header for a table that has none, and
    /// register its deployed document in `tables.yaml`. Returns `true` when created.
    pub fn ensure_table(&self, table: &str, schema: &str) -> Result<bool> {
        if self.has_table(table) {
            return Ok(false);
        }
        self.write_header(&TableDocument::stub(table, schema))?;
        let mut includes = TablesIncludeList::load(&self.include_list_path())?;
        if includes.append(TablesIncludeList::entry_for(schema, table)) {
            includes.save()?;
        }
        hmeta_info!(
            context = LogContext::new().with_table(table),
            "created shard directory and stub header for new table {}",
            table
        );
        Ok(true)
    }

    /// Header with `select_permissions` holding only the role's record.
    pub fn read_table_view(&self, table: &str, role: &str) -> Result<TableDocument> {
        let mut header = self.read_header(table)?;
        let record = self.read_role_permission(table, role)?;
        header.set_select_permissions(&[record])?;
        Ok(header)
    }
}
