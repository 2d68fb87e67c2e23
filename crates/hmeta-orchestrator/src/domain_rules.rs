//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "domain-rules"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Checks deployed permissions against the business rules in domain_rules.yaml."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! Three rules are checked against the deployed table documents:
//!
//! - every UI role holds the prescribed grant on every lookup table;
//! - roles marked inactive hold no grants at all;
//! - private tables are granted only to their owner's analogous roles and to superusers.

use std::collections::BTreeSet;
use std::fmt;

use hmeta_engine::{diff, DiffCase, TableDiff};
use hmeta_logging::{hmeta_info, hmeta_warn, LogContext};
use hmeta_persistence::deployed_documents;
use hmeta_schema::{read_yaml_file, PermissionDefinition};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::workspace::MetadataWorkspace;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DomainRules {
    #[serde(rename = "ui_role_lookup_tables", alias = "test_ui_roles_lkp_tables_permdef")]
    pub lookup_tables: LookupTableRules,
    #[serde(
        rename = "private_tables",
        alias = "test_private_tables_only_accessible_by_owner_and_superusers"
    )]
    pub private_tables: PrivateTableRules,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LookupTableRules {
    pub ui_roles: Vec<String>,
    /// `lookup table -> grant every UI role must hold`.
    #[serde(alias = "lkp_permdef_reqs_for_ui_roles")]
    pub requirements: IndexMap<String, PermissionDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PrivateTableRules {
    pub superuser_roles: Vec<String>,
    /// Keyed by owning role.
    pub private_roles: IndexMap<String, PrivateOwner>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PrivateOwner {
    pub analogous_roles: Vec<String>,
    pub private_tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainViolation {
    LookupGrantMissing { table: String, role: String },
    /// `fields` names the permission fields that differ from the requirement.
    LookupGrantDiffers { table: String, role: String, fields: Vec<&'static str> },
    InactiveRoleGranted { role: String, tables: Vec<String> },
    PrivateTableExposed { table: String, owner: String, roles: Vec<String> },
}

impl fmt::Display for DomainViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainViolation::LookupGrantMissing { table, role } => {
                write!(f, "UI role {role} has no select permission on lookup table {table}")
            }
            DomainViolation::LookupGrantDiffers { table, role, fields } => write!(
                f,
                "UI role {role} on lookup table {table} differs from the required grant in: {}",
                fields.join(", ")
            ),
            DomainViolation::InactiveRoleGranted { role, tables } => {
                write!(f, "inactive role {role} still has permissions on: {}", tables.join(", "))
            }
            DomainViolation::PrivateTableExposed { table, owner, roles } => write!(
                f,
                "private table {table} of {owner} is granted to: {}",
                roles.join(", ")
            ),
        }
    }
}

fn differing_fields(diff: &TableDiff) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if !diff.columns_only_in_first.is_empty() || !diff.columns_only_in_second.is_empty() {
        fields.push("columns");
    }
    if diff.filter.is_some() {
        fields.push("filter");
    }
    if diff.limit.is_some() {
        fields.push("limit");
    }
    if diff.computed_fields.is_some() {
        fields.push("computed_fields");
    }
    if diff.allow_aggregations.is_some() {
        fields.push("allow_aggregations");
    }
    fields
}

/// Evaluate `domain_rules.yaml` against the deployed documents. An empty result
/// means every rule holds.
pub fn check_domain_rules(workspace: &MetadataWorkspace) -> Result<Vec<DomainViolation>> {
    let rules: DomainRules = read_yaml_file(&workspace.paths().domain_rules_file())?;
    let roles = workspace.roles()?;

    let mut grants: IndexMap<String, IndexMap<String, PermissionDefinition>> = IndexMap::new();
    for document in deployed_documents(workspace.store())? {
        let by_role = document
            .select_permissions()?
            .into_iter()
            .map(|record| (record.role, record.permission))
            .collect();
        grants.insert(document.table_name().to_string(), by_role);
    }

    let mut violations = Vec::new();
    for (table, required) in &rules.lookup_tables.requirements {
        for role in &rules.lookup_tables.ui_roles {
            let Some(actual) = grants.get(table).and_then(|by_role| by_role.get(role)) else {
                violations.push(DomainViolation::LookupGrantMissing {
                    table: table.clone(),
                    role: role.clone(),
                });
                continue;
            };
            let actual = IndexMap::from([(table.clone(), actual.clone())]);
            let required = IndexMap::from([(table.clone(), required.clone())]);
            if let Some(table_diff) = diff(&actual, &required, DiffCase::RoleVsPrescription).differing.get(table) {
                violations.push(DomainViolation::LookupGrantDiffers {
                    table: table.clone(),
                    role: role.clone(),
                    fields: differing_fields(table_diff),
                });
            }
        }
    }

    for (role, definition) in roles.iter() {
        if definition.is_active {
            continue;
        }
        let tables: Vec<String> = grants
            .iter()
            .filter(|(_, by_role)| by_role.contains_key(role))
            .map(|(table, _)| table.clone())
            .collect();
        if !tables.is_empty() {
            violations.push(DomainViolation::InactiveRoleGranted {
                role: role.to_string(),
                tables,
            });
        }
    }

    let superusers: BTreeSet<&str> = rules
        .private_tables
        .superuser_roles
        .iter()
        .map(String::as_str)
        .collect();
    for (owner, private) in &rules.private_tables.private_roles {
        for table in &private.private_tables {
            let Some(by_role) = grants.get(table) else {
                continue;
            };
            let exposed: Vec<String> = by_role
                .keys()
                .filter(|role| !superusers.contains(role.as_str()) && !private.analogous_roles.contains(role))
                .cloned()
                .collect();
            if !exposed.is_empty() {
                violations.push(DomainViolation::PrivateTableExposed {
                    table: table.clone(),
                    owner: owner.clone(),
                    roles: exposed,
                });
            }
        }
    }

    let ctx = LogContext::new().with_operation("domain-rules");
    for violation in &violations {
        hmeta_warn!(context = ctx, "{}", violation);
    }
    hmeta_info!(
        context = ctx,
        "checked {} lookup table(s) and {} private owner(s); {} violation(s)",
        rules.lookup_tables.requirements.len(),
        rules.private_tables.private_roles.len(),
        violations.len()
    );
    Ok(violations)
}
