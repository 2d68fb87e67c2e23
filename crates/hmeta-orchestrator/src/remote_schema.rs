//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "remote-schema"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Tiered remote schema policies and remote_schemas.yaml permissions."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use hmeta_common::{PermissionsConfig, RemoteSchemaConfig};
use hmeta_logging::{hmeta_info, LogContext};
use hmeta_schema::{read_yaml_file, write_yaml_value, Mapping, RolesCatalog, SchemaError, Value};

use crate::workspace::ensure_parent;
use crate::{OrchestratorError, Result};

/// Role eligibility and schema text for one remote schema.
pub trait RemoteSchemaPolicy {
    fn name(&self) -> &str;

    /// Roles allowed to receive a permission entry, in catalog order.
    fn eligible_roles(&self, roles: &RolesCatalog) -> Vec<String>;

    /// SDL granted to `role`.
    fn schema_for(&self, role: &str) -> &str;

    /// Root queries exercised by the e2e suite.
    fn queries(&self) -> &[String];

    /// Queries reachable without the full schema.
    fn limited_queries(&self) -> &[String];

    fn grants_full(&self, role: &str) -> bool;

    fn is_eligible(&self, role: &str, roles: &RolesCatalog) -> bool {
        self.eligible_roles(roles).iter().any(|name| name == role)
    }
}

/// A remote schema with a full and a limited SDL.
///
/// Eligible roles are those listing the schema under `api_remote_schemas`.
/// Roles in the full set receive the full SDL; every other eligible role the
/// limited one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieredRemoteSchema {
    config: RemoteSchemaConfig,
    full_roles: BTreeSet<String>,
}

impl TieredRemoteSchema {
    pub fn new(config: RemoteSchemaConfig, full_roles: BTreeSet<String>) -> Self {
        Self { config, full_roles }
    }

    /// Full roles are the configured legacy list plus roles marked
    /// `remote_schema_permissions: full` in the catalog.
    pub fn from_config(config: &RemoteSchemaConfig, permissions: &PermissionsConfig, roles: &RolesCatalog) -> Self {
        let mut full_roles = roles.full_remote_schema_roles();
        full_roles.extend(permissions.legacy_full_permission_roles.iter().cloned());
        Self::new(config.clone(), full_roles)
    }
}

impl RemoteSchemaPolicy for TieredRemoteSchema {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn eligible_roles(&self, roles: &RolesCatalog) -> Vec<String> {
        roles.roles_for_remote_schema(&self.config.name)
    }

    fn schema_for(&self, role: &str) -> &str {
        if self.grants_full(role) {
            &self.config.full_schema
        } else {
            &self.config.limited_schema
        }
    }

    fn queries(&self) -> &[String] {
        &self.config.queries
    }

    fn limited_queries(&self) -> &[String] {
        &self.config.limited_queries
    }

    fn grants_full(&self, role: &str) -> bool {
        self.full_roles.contains(role)
    }
}

/// `metadata/remote_schemas.yaml`: a list of remote schema declarations, each
/// with a `permissions` list of `{role, definition: {schema}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSchemaDocument {
    path: PathBuf,
    schemas: Vec<Value>,
}

impl RemoteSchemaDocument {
    /// Load the document; a missing file reads as an empty list.
    pub fn load(path: &Path) -> Result<Self> {
        let schemas = if path.exists() {
            let raw: Option<Vec<Value>> = read_yaml_file(path)?;
            raw.unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            schemas,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Roles holding a permission entry on the schema, in file order.
    pub fn permission_roles(&self, name: &str) -> Vec<String> {
        self.position(name)
            .and_then(|index| self.schemas[index].get("permissions"))
            .and_then(Value::as_sequence)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("role").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// SDL currently granted to a role, if any.
    pub fn permission_schema(&self, name: &str, role: &str) -> Option<&str> {
        let index = self.position(name)?;
        self.schemas[index]
            .get("permissions")?
            .as_sequence()?
            .iter()
            .find(|entry| entry.get("role").and_then(Value::as_str) == Some(role))?
            .get("definition")?
            .get("schema")?
            .as_str()
    }

    /// Grant (or regrant) the role its tier of the schema. Ineligible roles are
    /// skipped; returns whether an entry was written.
    pub fn add_permission(&mut self, policy: &dyn RemoteSchemaPolicy, role: &str, roles: &RolesCatalog) -> Result<bool> {
        let ctx = LogContext::new().with_role(role).with_operation("remote-schema");
        if !policy.is_eligible(role, roles) {
            hmeta_info!(
                context = ctx,
                "role {} is not included for the remote schema {}",
                role,
                policy.name()
            );
            return Ok(false);
        }
        let permissions = self.permissions_mut(policy.name())?;
        let before = permissions.len();
        permissions.retain(|entry| entry.get("role").and_then(Value::as_str) != Some(role));
        if permissions.len() != before {
            hmeta_info!(context = ctx, "overriding remote schema permission for {}", role);
        }
        permissions.push(permission_entry(role, policy.schema_for(role)));
        sort_by_role(permissions);
        hmeta_info!(
            context = ctx,
            "added remote schema permission {} for {}",
            policy.name(),
            role
        );
        Ok(true)
    }

    /// Drop the role's entry. Returns whether one existed.
    pub fn remove_permission(&mut self, name: &str, role: &str) -> Result<bool> {
        let permissions = self.permissions_mut(name)?;
        let before = permissions.len();
        permissions.retain(|entry| entry.get("role").and_then(Value::as_str) != Some(role));
        sort_by_role(permissions);
        let removed = permissions.len() != before;
        if removed {
            hmeta_info!(
                context = LogContext::new().with_role(role).with_operation("remote-schema"),
                "removed remote schema permission {} for {}",
                name,
                role
            );
        }
        Ok(removed)
    }

    pub fn save(&self) -> Result<()> {
        ensure_parent(&self.path)?;
        write_yaml_value(&self.path, &Value::Sequence(self.schemas.clone()))?;
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.schemas
            .iter()
            .position(|schema| schema.get("name").and_then(Value::as_str) == Some(name))
    }

    fn permissions_mut(&mut self, name: &str) -> Result<&mut Vec<Value>> {
        let index = self
            .position(name)
            .ok_or_else(|| OrchestratorError::UnknownRemoteSchema(name.to_string()))?;
        let Value::Mapping(schema) = &mut self.schemas[index] else {
            return Err(SchemaError::Malformed {
                context: format!("remote schema '{name}'"),
                expected: "a mapping",
            }
            .into());
        };
        if !matches!(schema.get("permissions"), Some(Value::Sequence(_))) {
            schema.insert(Value::from("permissions"), Value::Sequence(Vec::new()));
        }
        match schema.get_mut("permissions") {
            Some(Value::Sequence(entries)) => Ok(entries),
            _ => Err(SchemaError::Malformed {
                context: format!("remote schema '{name}' permissions"),
                expected: "a list",
            }
            .into()),
        }
    }
}

fn permission_entry(role: &str, schema: &str) -> Value {
    let mut definition = Mapping::new();
    definition.insert(Value::from("schema"), Value::from(schema));
    let mut entry = Mapping::new();
    entry.insert(Value::from("role"), Value::from(role));
    entry.insert(Value::from("definition"), Value::Mapping(definition));
    Value::Mapping(entry)
}

fn sort_by_role(permissions: &mut [Value]) {
    permissions.sort_by(|a, b| {
        let key = |entry: &Value| entry.get("role").and_then(Value::as_str).map(str::to_string);
        key(a).cmp(&key(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmeta_common::config::{ADDRESS_FULL_SCHEMA, ADDRESS_LIMITED_SCHEMA};
    use hmeta_schema::RoleDefinition;
    use std::fs;
    use tempfile::tempdir;

    const DOCUMENT: &str = "- name: address\n  definition:\n    url_from_env: ADDRESS_URL\n  permissions:\n    - role: zeta\n      definition:\n        schema: |\n          type Query {\n          \taddress(address: String): Address\n          }\n";

    fn catalog() -> RolesCatalog {
        let role = |schemas: &[&str]| RoleDefinition {
            is_active: true,
            api_data_supersets: vec!["base".into()],
            api_remote_schemas: schemas.iter().map(|s| s.to_string()).collect(),
            remote_schema_permissions: None,
        };
        RolesCatalog::from_roles([
            ("viewer".to_string(), role(&["address"])),
            ("partner".to_string(), role(&["address"])),
            ("zeta".to_string(), role(&["address"])),
            ("internal".to_string(), role(&[])),
        ])
    }

    fn policy() -> TieredRemoteSchema {
        let permissions = PermissionsConfig {
            legacy_full_permission_roles: vec!["partner".into()],
            ..PermissionsConfig::default()
        };
        TieredRemoteSchema::from_config(&RemoteSchemaConfig::address(), &permissions, &catalog())
    }

    #[test]
    fn tier_follows_full_role_set() {
        let policy = policy();
        assert_eq!(policy.schema_for("partner"), ADDRESS_FULL_SCHEMA);
        assert_eq!(policy.schema_for("viewer"), ADDRESS_LIMITED_SCHEMA);
        assert_eq!(policy.eligible_roles(&catalog()), ["viewer", "partner", "zeta"]);
        assert!(!policy.is_eligible("internal", &catalog()));
    }

    #[test]
    fn add_replaces_and_sorts_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("remote_schemas.yaml");
        fs::write(&path, DOCUMENT).unwrap();
        let mut document = RemoteSchemaDocument::load(&path).unwrap();

        assert!(document.add_permission(&policy(), "zeta", &catalog()).unwrap());
        assert!(document.add_permission(&policy(), "viewer", &catalog()).unwrap());
        assert!(!document.add_permission(&policy(), "internal", &catalog()).unwrap());
        assert_eq!(document.permission_roles("address"), ["viewer", "zeta"]);
        assert_eq!(document.permission_schema("address", "zeta"), Some(ADDRESS_LIMITED_SCHEMA));

        document.save().unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("- name: address\n  definition:\n    url_from_env: ADDRESS_URL\n  permissions:\n    - role: viewer\n      definition:\n        schema: |\n          type Address {\n          \tcity: String\n"));
        let reloaded = RemoteSchemaDocument::load(&path).unwrap();
        assert_eq!(reloaded, document);
    }

    #[test]
    fn remove_reports_presence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("remote_schemas.yaml");
        fs::write(&path, DOCUMENT).unwrap();
        let mut document = RemoteSchemaDocument::load(&path).unwrap();
        assert!(document.remove_permission("address", "zeta").unwrap());
        assert!(!document.remove_permission("address", "zeta").unwrap());
        assert!(document.permission_roles("address").is_empty());
    }

    #[test]
    fn unknown_schema_is_an_error() {
        let dir = tempdir().unwrap();
        let mut document = RemoteSchemaDocument::load(&dir.path().join("missing.yaml")).unwrap();
        assert!(!document.has_schema("address"));
        assert!(matches!(
            document.add_permission(&policy(), "viewer", &catalog()),
            Err(OrchestratorError::UnknownRemoteSchema(_))
        ));
    }
}
