//! ---
//! hmeta_section: "04-shard-store"
//! hmeta_subsection: "include-list"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "The deployed tables.yaml include list."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use hmeta_schema::{read_yaml_file, write_yaml_value, Value};

use crate::Result;

const INCLUDE_TAG: &str = "!include";

/// Ordered `!include <schema>_<table>.yaml` entries of `tables.yaml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablesIncludeList {
    path: PathBuf,
    entries: Vec<String>,
}

impl TablesIncludeList {
    /// Load the list, treating a missing file as empty.
    ///
    /// Entries may be quoted strings (`'!include a.yaml'`) or tagged scalars
    /// (`!include a.yaml`); both normalize to the string form.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let raw: Option<Vec<Value>> = read_yaml_file(path)?;
            raw.unwrap_or_default()
                .into_iter()
                .filter_map(|value| match value {
                    Value::String(entry) => Some(entry),
                    Value::Tagged(tagged) => tagged
                        .value
                        .as_str()
                        .map(|file| format!("{} {}", tagged.tag, file)),
                    _ => None,
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// An empty list that will be saved to `path`.
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: Vec::new(),
        }
    }

    /// The include entry for a table document.
    pub fn entry_for(schema: &str, table: &str) -> String {
        format!("{INCLUDE_TAG} {schema}_{table}.yaml")
    }

    /// Entries in file order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Whether `entry` is already listed.
    pub fn contains(&self, entry: &str) -> bool {
        self.entries.iter().any(|existing| existing == entry)
    }

    /// Append `entry` unless already present. Returns `true` when appended.
    pub fn append(&mut self, entry: String) -> bool {
        if self.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Sort entries lexicographically.
    pub fn sort(&mut self) {
        self.entries.sort();
    }

    /// Write the list back to its file.
    pub fn save(&self) -> Result<()> {
        let value = Value::Sequence(self.entries.iter().map(|e| Value::from(e.as_str())).collect());
        write_yaml_value(&self.path, &value)?;
        Ok(())
    }
}
