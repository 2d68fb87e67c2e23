//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "e2e"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Permissions e2e test mapping (hasura_perm_metadata.yaml)."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! The mapping tells the e2e suite which roles should (`<alias>_pos`) or should
//! not (`<alias>_neg`) be able to query each table:
//!
//! ```yaml
//! parcels:
//!   parcels_pos:
//!     - parcels_pos: viewer
//!   parcels_neg:
//!     - parcels_neg: partner
//! ```

use std::path::{Path, PathBuf};

use hmeta_common::E2eConfig;
use hmeta_logging::{hmeta_debug, hmeta_info, LogContext};
use hmeta_schema::{read_yaml_file, write_yaml_value, Mapping, SchemaError, Value};
use indexmap::IndexMap;

use crate::remote_schema::RemoteSchemaPolicy;
use crate::workspace::{ensure_parent, MetadataWorkspace};
use crate::Result;

const POS_SUFFIX: &str = "_pos";
const NEG_SUFFIX: &str = "_neg";

/// One `{group: role}` item of a mapping group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingEntry {
    pub group: String,
    pub role: String,
}

impl MappingEntry {
    fn new(group: &str, role: &str) -> Self {
        Self {
            group: group.to_string(),
            role: role.to_string(),
        }
    }
}

type Groups = IndexMap<String, Vec<MappingEntry>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct E2eMapping {
    path: PathBuf,
    tables: IndexMap<String, Groups>,
}

impl E2eMapping {
    /// Load the mapping; a missing file starts empty. Groups written as bare
    /// `group:` keys (null) are read as empty lists.
    pub fn load(path: &Path) -> Result<Self> {
        let mut tables = IndexMap::new();
        if path.exists() {
            let raw: Value = read_yaml_file(path)?;
            let context = path.display().to_string();
            match raw {
                Value::Null => {}
                Value::Mapping(entries) => {
                    for (alias, groups) in entries {
                        let alias = scalar(&alias, &context)?;
                        tables.insert(alias, parse_groups(groups, &context)?);
                    }
                }
                _ => return Err(malformed(&context, "a mapping of table aliases").into()),
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            tables,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Entries of one group, empty when the alias or group is absent.
    pub fn group(&self, alias: &str, group: &str) -> &[MappingEntry] {
        self.tables
            .get(alias)
            .and_then(|groups| groups.get(group))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `role` is mapped into `group` of `alias`.
    pub fn is_mapped(&self, alias: &str, group: &str, role: &str) -> bool {
        self.group(alias, group)
            .iter()
            .any(|entry| entry.group == group && entry.role == role)
    }

    /// Map roles to the positive scenario of every table, dropping negative mappings.
    /// A role already present in any `*_pos` group of the table is left alone.
    pub fn grant<S: AsRef<str>, T: AsRef<str>>(&mut self, roles: &[S], tables: &[T], config: &E2eConfig) {
        for table in tables {
            let alias = config.alias_for(table.as_ref()).to_string();
            let (pos, neg) = group_keys(&alias);
            let groups = self.ensure_groups(&alias);
            for role in roles.iter().map(AsRef::as_ref) {
                if config.is_exempt(role) {
                    continue;
                }
                let mapped = groups
                    .iter()
                    .filter(|(key, _)| key.ends_with(POS_SUFFIX))
                    .any(|(key, entries)| entries.contains(&MappingEntry::new(key, role)));
                if !mapped {
                    push_unique(groups, &pos, role);
                }
                remove_entry(groups, &neg, role);
            }
        }
    }

    /// Map roles to the negative scenario of every table, dropping positive mappings.
    pub fn deny<S: AsRef<str>, T: AsRef<str>>(&mut self, roles: &[S], tables: &[T], config: &E2eConfig) {
        for table in tables {
            let alias = config.alias_for(table.as_ref()).to_string();
            let (pos, neg) = group_keys(&alias);
            let groups = self.ensure_groups(&alias);
            for role in roles.iter().map(AsRef::as_ref) {
                if config.is_exempt(role) {
                    continue;
                }
                push_unique(groups, &neg, role);
                remove_entry(groups, &pos, role);
            }
        }
    }

    /// Strip every mapping of the roles from the given tables, or from all tables
    /// when `tables` is empty. Returns the number of entries removed.
    pub fn remove<S: AsRef<str>, T: AsRef<str>>(&mut self, roles: &[S], tables: &[T], config: &E2eConfig) -> usize {
        let targets: Vec<&str> = tables
            .iter()
            .map(|table| config.alias_for(table.as_ref()))
            .collect();
        let mut removed = 0;
        for (alias, groups) in self.tables.iter_mut() {
            if !targets.is_empty() && !targets.contains(&alias.as_str()) {
                continue;
            }
            for entries in groups.values_mut() {
                let before = entries.len();
                entries.retain(|entry| !roles.iter().any(|role| role.as_ref() == entry.role));
                removed += before - entries.len();
            }
        }
        if removed > 0 {
            hmeta_info!(
                context = LogContext::new().with_operation("e2e-remove"),
                "removed {} e2e mapping(s)",
                removed
            );
        }
        removed
    }

    /// Drop repeated entries inside each group, keeping the first occurrence.
    pub fn dedupe(&mut self) -> usize {
        let mut removed = 0;
        for (alias, groups) in self.tables.iter_mut() {
            for (group, entries) in groups.iter_mut() {
                let mut seen = Vec::with_capacity(entries.len());
                entries.retain(|entry| {
                    if seen.contains(entry) {
                        hmeta_info!(
                            context = LogContext::new().with_table(alias).with_role(&entry.role),
                            "deleting duplicate entry {}: {}",
                            group,
                            entry.role
                        );
                        removed += 1;
                        false
                    } else {
                        seen.push(entry.clone());
                        true
                    }
                });
            }
        }
        removed
    }

    /// Maintain the remote-schema query groups for a role.
    ///
    /// Queries in the policy's limited set are positive for every eligible role;
    /// the rest are positive only for roles granted the full schema.
    pub fn update_remote_schema(
        &mut self,
        role: &str,
        policy: &dyn RemoteSchemaPolicy,
        remove: bool,
        config: &E2eConfig,
    ) {
        if !remove && config.is_exempt(role) {
            return;
        }
        for query in policy.queries() {
            let (pos, neg) = group_keys(query);
            let groups = self.ensure_groups(query);
            if remove {
                remove_entry(groups, &pos, role);
                remove_entry(groups, &neg, role);
            } else if policy.limited_queries().contains(query) || policy.grants_full(role) {
                push_unique(groups, &pos, role);
                remove_entry(groups, &neg, role);
            } else {
                push_unique(groups, &neg, role);
                remove_entry(groups, &pos, role);
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        ensure_parent(&self.path)?;
        write_yaml_value(&self.path, &self.to_value())?;
        hmeta_debug!("wrote e2e mapping {}", self.path.display());
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        let mut root = Mapping::new();
        for (alias, groups) in &self.tables {
            let mut body = Mapping::new();
            for (group, entries) in groups {
                let items = entries
                    .iter()
                    .map(|entry| {
                        let mut item = Mapping::new();
                        item.insert(Value::from(entry.group.as_str()), Value::from(entry.role.as_str()));
                        Value::Mapping(item)
                    })
                    .collect();
                body.insert(Value::from(group.as_str()), Value::Sequence(items));
            }
            root.insert(Value::from(alias.as_str()), Value::Mapping(body));
        }
        Value::Mapping(root)
    }

    fn ensure_groups(&mut self, alias: &str) -> &mut Groups {
        let (pos, neg) = group_keys(alias);
        self.tables.entry(alias.to_string()).or_insert_with(|| {
            let mut groups = Groups::new();
            groups.insert(pos, Vec::new());
            groups.insert(neg, Vec::new());
            groups
        })
    }
}

/// Map roles to the positive scenarios of the tables, or to the negative ones
/// with `negative`, and save the mapping.
pub fn update_e2e_mapping(
    workspace: &MetadataWorkspace,
    roles: &[String],
    tables: &[String],
    negative: bool,
) -> Result<()> {
    let config = &workspace.config().e2e;
    let mut mapping = E2eMapping::load(&workspace.paths().e2e_mapping_file())?;
    if negative {
        mapping.deny(roles, tables, config);
    } else {
        mapping.grant(roles, tables, config);
    }
    mapping.save()
}

/// Drop repeated entries from the saved mapping. Returns the number removed.
pub fn dedupe_e2e_mapping(workspace: &MetadataWorkspace) -> Result<usize> {
    let mut mapping = E2eMapping::load(&workspace.paths().e2e_mapping_file())?;
    let removed = mapping.dedupe();
    if removed > 0 {
        mapping.save()?;
    }
    Ok(removed)
}

fn group_keys(alias: &str) -> (String, String) {
    (format!("{alias}{POS_SUFFIX}"), format!("{alias}{NEG_SUFFIX}"))
}

fn push_unique(groups: &mut Groups, group: &str, role: &str) {
    let entries = groups.entry(group.to_string()).or_default();
    let entry = MappingEntry::new(group, role);
    if !entries.contains(&entry) {
        entries.push(entry);
        hmeta_info!(
            context = LogContext::new().with_role(role),
            "added mapping: {} to {}",
            role,
            group
        );
    }
}

fn remove_entry(groups: &mut Groups, group: &str, role: &str) {
    if let Some(entries) = groups.get_mut(group) {
        let entry = MappingEntry::new(group, role);
        let before = entries.len();
        entries.retain(|existing| existing != &entry);
        if entries.len() != before {
            hmeta_info!(
                context = LogContext::new().with_role(role),
                "removed mapping: {} to {}",
                role,
                group
            );
        }
    }
}

fn parse_groups(value: Value, context: &str) -> std::result::Result<Groups, SchemaError> {
    let mut groups = Groups::new();
    let map = match value {
        Value::Null => return Ok(groups),
        Value::Mapping(map) => map,
        _ => return Err(malformed(context, "a mapping of test groups per table")),
    };
    for (group, items) in map {
        let group = scalar(&group, context)?;
        let items = match items {
            Value::Null => Vec::new(),
            Value::Sequence(items) => items,
            _ => return Err(malformed(context, "a list of {group: role} entries")),
        };
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let Value::Mapping(item) = item else {
                return Err(malformed(context, "a {group: role} entry"));
            };
            for (key, role) in item {
                entries.push(MappingEntry {
                    group: scalar(&key, context)?,
                    role: scalar(&role, context)?,
                });
            }
        }
        groups.insert(group, entries);
    }
    Ok(groups)
}

fn scalar(value: &Value, context: &str) -> std::result::Result<String, SchemaError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        _ => Err(malformed(context, "string keys and role names")),
    }
}

fn malformed(context: &str, expected: &'static str) -> SchemaError {
    SchemaError::Malformed {
        context: context.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_schema::TieredRemoteSchema;
    use hmeta_common::RemoteSchemaConfig;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::tempdir;

    fn config() -> E2eConfig {
        let mut config = E2eConfig::default();
        config
            .table_aliases
            .insert("raw_parcels".to_string(), "parcels".to_string());
        config
    }

    #[test]
    fn grant_creates_groups_and_clears_negative_mapping() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hasura_perm_metadata.yaml");
        fs::write(&path, "parcels:\n  parcels_pos:\n  parcels_neg:\n    - parcels_neg: viewer\n").unwrap();
        let mut mapping = E2eMapping::load(&path).unwrap();

        mapping.grant(&["viewer", "qa"], &["raw_parcels", "sales"], &config());
        assert!(mapping.is_mapped("parcels", "parcels_pos", "viewer"));
        assert!(!mapping.is_mapped("parcels", "parcels_neg", "viewer"));
        assert!(mapping.is_mapped("sales", "sales_pos", "viewer"));
        assert!(!mapping.is_mapped("sales", "sales_pos", "qa"));

        mapping.save().unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "parcels:\n  parcels_pos:\n    - parcels_pos: viewer\n  parcels_neg: []\nsales:\n  sales_pos:\n    - sales_pos: viewer\n  sales_neg: []\n"
        );
    }

    #[test]
    fn grant_respects_existing_positive_groups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mapping.yaml");
        fs::write(
            &path,
            "parcels:\n  parcels_pos:\n    - parcels_pos: analyst\n  parcels_county_pos:\n    - parcels_county_pos: viewer\n  parcels_neg: []\n",
        )
        .unwrap();
        let mut mapping = E2eMapping::load(&path).unwrap();
        mapping.grant(&["viewer", "analyst"], &["parcels"], &config());
        assert_eq!(mapping.group("parcels", "parcels_pos").len(), 1);
    }

    #[test]
    fn deny_then_remove() {
        let dir = tempdir().unwrap();
        let mut mapping = E2eMapping::load(&dir.path().join("missing.yaml")).unwrap();
        mapping.grant(&["viewer"], &["parcels", "sales"], &config());
        mapping.deny(&["viewer"], &["parcels"], &config());
        assert!(mapping.is_mapped("parcels", "parcels_neg", "viewer"));
        assert!(!mapping.is_mapped("parcels", "parcels_pos", "viewer"));

        assert_eq!(mapping.remove(&["viewer"], &["sales"], &config()), 1);
        assert!(mapping.is_mapped("parcels", "parcels_neg", "viewer"));
        assert_eq!(mapping.remove(&["viewer"], &[] as &[&str], &config()), 1);
        assert!(!mapping.is_mapped("parcels", "parcels_neg", "viewer"));
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mapping.yaml");
        fs::write(
            &path,
            "parcels:\n  parcels_pos:\n    - parcels_pos: viewer\n    - parcels_pos: analyst\n    - parcels_pos: viewer\n",
        )
        .unwrap();
        let mut mapping = E2eMapping::load(&path).unwrap();
        assert_eq!(mapping.dedupe(), 1);
        let roles: Vec<_> = mapping
            .group("parcels", "parcels_pos")
            .iter()
            .map(|entry| entry.role.as_str())
            .collect();
        assert_eq!(roles, ["viewer", "analyst"]);
    }

    #[test]
    fn remote_schema_groups_follow_the_tier() {
        let dir = tempdir().unwrap();
        let mut mapping = E2eMapping::load(&dir.path().join("mapping.yaml")).unwrap();
        let full: BTreeSet<String> = ["partner".to_string()].into();
        let policy = TieredRemoteSchema::new(RemoteSchemaConfig::address(), full);

        mapping.update_remote_schema("viewer", &policy, false, &config());
        mapping.update_remote_schema("partner", &policy, false, &config());
        assert!(mapping.is_mapped("address", "address_pos", "viewer"));
        assert!(mapping.is_mapped("address_autocomplete", "address_autocomplete_neg", "viewer"));
        assert!(mapping.is_mapped("address_autocomplete", "address_autocomplete_pos", "partner"));

        mapping.update_remote_schema("viewer", &policy, true, &config());
        assert!(!mapping.is_mapped("address", "address_pos", "viewer"));
        assert!(!mapping.is_mapped("address_autocomplete", "address_autocomplete_neg", "viewer"));
    }

    #[test]
    fn rejects_non_mapping_documents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mapping.yaml");
        fs::write(&path, "- parcels\n").unwrap();
        assert!(E2eMapping::load(&path).is_err());
    }

    #[test]
    fn workspace_mapping_updates_are_saved() {
        use hmeta_common::{HmetaConfig, MetadataPaths};

        let dir = tempdir().unwrap();
        let mut hmeta = HmetaConfig::default();
        hmeta.e2e = config();
        let ws = MetadataWorkspace::new(hmeta, MetadataPaths::new(dir.path()));
        let path = ws.paths().e2e_mapping_file();
        let roles = ["viewer".to_string()];

        update_e2e_mapping(&ws, &roles, &["raw_parcels".to_string()], false).unwrap();
        update_e2e_mapping(&ws, &roles, &["sales".to_string()], true).unwrap();
        let mapping = E2eMapping::load(&path).unwrap();
        assert!(mapping.is_mapped("parcels", "parcels_pos", "viewer"));
        assert!(mapping.is_mapped("sales", "sales_neg", "viewer"));

        fs::write(
            &path,
            "sales:\n  sales_pos: []\n  sales_neg:\n    - sales_neg: viewer\n    - sales_neg: viewer\n",
        )
        .unwrap();
        assert_eq!(dedupe_e2e_mapping(&ws).unwrap(), 1);
        assert_eq!(dedupe_e2e_mapping(&ws).unwrap(), 0);
        assert_eq!(E2eMapping::load(&path).unwrap().group("sales", "sales_neg").len(), 1);
    }
}
