//! ---
//! hmeta_section: "02-permission-model"
//! hmeta_subsection: "source-of-truth"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Role and data-superset catalogs loaded from the source-of-truth documents."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::permission::PermissionDefinition;
use crate::yaml::read_yaml_file;
use crate::{Result, SchemaError};

/// A named bundle of per-table permission attributes, in declaration order.
pub type Superset = IndexMap<String, PermissionDefinition>;

/// Remote-schema access tier recorded for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteSchemaTier {
    Full,
    Limited,
}

/// One entry of `metadata_roles.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub api_data_supersets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_remote_schemas: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_schema_permissions: Option<RemoteSchemaTier>,
}

/// Declared API roles, keyed by role name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RolesCatalog {
    roles: IndexMap<String, RoleDefinition>,
}

impl RolesCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        read_yaml_file(path)
    }

    pub fn from_roles<I>(roles: I) -> Self
    where
        I: IntoIterator<Item = (String, RoleDefinition)>,
    {
        Self {
            roles: roles.into_iter().collect(),
        }
    }

    pub fn get(&self, role: &str) -> Option<&RoleDefinition> {
        self.roles.get(role)
    }

    pub fn role(&self, role: &str) -> Result<&RoleDefinition> {
        self.get(role)
            .ok_or_else(|| SchemaError::UnknownRole(role.to_string()))
    }

    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RoleDefinition)> {
        self.roles.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// Whether the role should hold permissions. Undeclared roles are an error.
    pub fn is_active(&self, role: &str) -> Result<bool> {
        Ok(self.role(role)?.is_active)
    }

    pub fn supersets_of(&self, role: &str) -> Result<&[String]> {
        Ok(&self.role(role)?.api_data_supersets)
    }

    pub fn active_roles(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, def)| def.is_active)
            .map(|(name, _)| name)
    }

    /// Roles marked `remote_schema_permissions: full`.
    pub fn full_remote_schema_roles(&self) -> BTreeSet<String> {
        self.iter()
            .filter(|(_, def)| def.remote_schema_permissions == Some(RemoteSchemaTier::Full))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Roles listing `schema` under `api_remote_schemas`, in declaration order.
    pub fn roles_for_remote_schema(&self, schema: &str) -> Vec<String> {
        self.iter()
            .filter(|(_, def)| def.api_remote_schemas.iter().any(|name| name == schema))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// `superset -> roles inheriting it`.
    pub fn superset_to_roles(&self) -> IndexMap<String, Vec<String>> {
        let mut transposed: IndexMap<String, Vec<String>> = IndexMap::new();
        for (role, def) in self.iter() {
            for superset in &def.api_data_supersets {
                transposed
                    .entry(superset.clone())
                    .or_default()
                    .push(role.to_string());
            }
        }
        transposed
    }

    /// Groups roles that declare the same superset list (keyed by the slash-joined list).
    pub fn superset_combinations(&self) -> IndexMap<String, Vec<String>> {
        let mut combinations: IndexMap<String, Vec<String>> = IndexMap::new();
        for (role, def) in self.iter() {
            combinations
                .entry(def.api_data_supersets.join("/"))
                .or_default()
                .push(role.to_string());
        }
        combinations
    }
}

/// Declared data supersets, keyed by superset name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupersetCatalog {
    supersets: IndexMap<String, Superset>,
}

impl SupersetCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        read_yaml_file(path)
    }

    pub fn from_supersets<I>(supersets: I) -> Self
    where
        I: IntoIterator<Item = (String, Superset)>,
    {
        Self {
            supersets: supersets.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Superset> {
        self.supersets.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.supersets.keys().map(String::as_str)
    }

    /// Fails listing every name that is not declared.
    pub fn check_exist<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        let missing: Vec<String> = names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| !self.supersets.contains_key(*name))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::UnknownSupersets(missing))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROLES: &str = "\
analyst:
  is_active: true
  api_data_supersets: [core, billing]
  api_remote_schemas: [address]
  remote_schema_permissions: full
viewer:
  is_active: false
  api_data_supersets: [core]
partner:
  is_active: true
  api_data_supersets: [core, billing]
  remote_schema_permissions: limited
";

    fn roles() -> RolesCatalog {
        serde_yaml::from_str(ROLES).unwrap()
    }

    #[test]
    fn activity_is_looked_up_per_role() {
        let catalog = roles();
        assert!(catalog.is_active("analyst").unwrap());
        assert!(!catalog.is_active("viewer").unwrap());
        assert!(matches!(
            catalog.is_active("ghost"),
            Err(SchemaError::UnknownRole(name)) if name == "ghost"
        ));
        assert_eq!(catalog.active_roles().collect::<Vec<_>>(), vec!["analyst", "partner"]);
    }

    #[test]
    fn remote_schema_membership() {
        let catalog = roles();
        assert_eq!(catalog.roles_for_remote_schema("address"), vec!["analyst"]);
        assert_eq!(
            catalog.full_remote_schema_roles().into_iter().collect::<Vec<_>>(),
            vec!["analyst"]
        );
    }

    #[test]
    fn transpositions_preserve_declaration_order() {
        let catalog = roles();
        let by_superset = catalog.superset_to_roles();
        assert_eq!(by_superset["core"], vec!["analyst", "viewer", "partner"]);
        assert_eq!(by_superset["billing"], vec!["analyst", "partner"]);
        let combos = catalog.superset_combinations();
        assert_eq!(combos["core/billing"], vec!["analyst", "partner"]);
        assert_eq!(combos["core"], vec!["viewer"]);
    }

    #[test]
    fn missing_supersets_are_all_reported() {
        let catalog: SupersetCatalog =
            serde_yaml::from_str("core:\n  orders:\n    columns: [id]\n    limit: 10\n").unwrap();
        assert!(catalog.check_exist(&["core"]).is_ok());
        match catalog.check_exist(&["core", "nope", "gone"]) {
            Err(SchemaError::UnknownSupersets(missing)) => assert_eq!(missing, vec!["nope", "gone"]),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(catalog.get("core").unwrap()["orders"].limit, Some(10));
    }
}
