//! ---
//! hmeta_section: "03-merge-engine"
//! hmeta_subsection: "resolver"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Expands a role's supersets into one permission definition per table."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use hmeta_logging::{hmeta_debug, hmeta_warn, LogContext};
use hmeta_schema::{PermissionDefinition, SupersetCatalog};
use indexmap::IndexMap;

use crate::errors::{EngineError, Result};
use crate::merge::merge;

/// `table -> consolidated definition`, in first-contribution order.
pub type Prescription = IndexMap<String, PermissionDefinition>;

/// Consolidate the named supersets into one definition per table.
///
/// Supersets are processed in the order given, tables in declaration order within
/// each superset. Every name is checked against the catalog before anything is merged.
pub fn resolve<S: AsRef<str>>(names: &[S], catalog: &SupersetCatalog) -> Result<Prescription> {
    catalog.check_exist(names)?;

    let mut prescription = Prescription::new();
    let mut contributors: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut visited: Vec<&str> = Vec::with_capacity(names.len());

    for name in names.iter().map(AsRef::as_ref) {
        if visited.contains(&name) {
            hmeta_debug!(
                context = LogContext::new().with_superset(name),
                "superset listed more than once; skipping repeat"
            );
            continue;
        }
        visited.push(name);
        let Some(superset) = catalog.get(name) else {
            continue;
        };

        for (table, contribution) in superset {
            match prescription.get_mut(table) {
                None => {
                    let keys = contribution.unrecognized_keys();
                    if !keys.is_empty() {
                        return Err(EngineError::UnknownKeys {
                            superset: name.to_string(),
                            table: table.clone(),
                            keys,
                        });
                    }
                    let mut definition = contribution.clone();
                    let duplicates = definition.dedup_columns();
                    if !duplicates.is_empty() {
                        hmeta_warn!(
                            context = LogContext::new().with_superset(name).with_table(table),
                            "duplicate column(s) [{}] in {}.{}; deduplicated, fix metadata_api_data_supersets.yaml",
                            duplicates.join(", "),
                            name,
                            table
                        );
                    }
                    prescription.insert(table.clone(), definition);
                    contributors.insert(table.clone(), vec![name.to_string()]);
                }
                Some(existing) => {
                    let seen = contributors.entry(table.clone()).or_default();
                    *existing = merge(existing, contribution).map_err(|source| {
                        EngineError::Conflict {
                            table: table.clone(),
                            superset: name.to_string(),
                            contributors: seen.clone(),
                            source,
                        }
                    })?;
                    seen.push(name.to_string());
                }
            }
        }
    }
    Ok(prescription)
}
