//! ---
//! hmeta_section: "06-orchestration"
//! hmeta_subsection: "compare"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Writes role, superset, and prescription diff reports."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use hmeta_engine::{diff, render_report, resolve, Prescription, ReportSubject};
use hmeta_logging::{hmeta_info, hmeta_warn, LogContext};
use hmeta_schema::{RolesCatalog, SchemaError};

use crate::workspace::{ensure_parent, MetadataWorkspace};
use crate::{OrchestratorError, Result};

/// Compare each role's shards with what its supersets prescribe.
///
/// Writes `<diff_output_dir>/role_perm_vs_prescription/<role>.txt` per known
/// role and returns the written paths. Roles missing from the catalog are skipped.
pub fn compare_role_to_prescription<S: AsRef<str>>(workspace: &MetadataWorkspace, roles: &[S]) -> Result<Vec<PathBuf>> {
    let catalog = workspace.roles()?;
    let supersets = workspace.supersets()?;
    let dir = workspace.paths().role_vs_prescription_diff_dir();
    let mut written = Vec::new();
    for role in roles.iter().map(AsRef::as_ref) {
        if !known_role(&catalog, role) {
            continue;
        }
        let prescription: Prescription = resolve(catalog.supersets_of(role)?, &supersets)?
            .into_iter()
            .map(|(table, definition)| (table, definition.into_prescribed(workspace.default_limit())))
            .collect();
        let actual = workspace.store().role_permissions(role)?;
        let subject = ReportSubject::RoleVsPrescription { role };
        let result = diff(&actual, &prescription, subject.case());
        written.push(write_report(&dir, &subject, &render_report(&subject, &result)?)?);
    }
    Ok(written)
}

/// Compare two supersets as declared in the catalog.
pub fn compare_supersets(workspace: &MetadataWorkspace, first: &str, second: &str) -> Result<PathBuf> {
    let supersets = workspace.supersets()?;
    supersets.check_exist(&[first, second])?;
    let (Some(a), Some(b)) = (supersets.get(first), supersets.get(second)) else {
        return Err(SchemaError::UnknownSupersets(vec![first.to_string(), second.to_string()]).into());
    };
    let subject = ReportSubject::SupersetVsSuperset { first, second };
    let result = diff(a, b, subject.case());
    write_report(
        &workspace.paths().superset_vs_superset_diff_dir(),
        &subject,
        &render_report(&subject, &result)?,
    )
}

/// Compare the shards of two roles. Returns `None` when either role is unknown.
pub fn compare_roles(workspace: &MetadataWorkspace, first: &str, second: &str) -> Result<Option<PathBuf>> {
    let catalog = workspace.roles()?;
    if !known_role(&catalog, first) || !known_role(&catalog, second) {
        return Ok(None);
    }
    let a = workspace.store().role_permissions(first)?;
    let b = workspace.store().role_permissions(second)?;
    let subject = ReportSubject::RoleVsRole { first, second };
    let result = diff(&a, &b, subject.case());
    write_report(
        &workspace.paths().role_vs_role_diff_dir(),
        &subject,
        &render_report(&subject, &result)?,
    )
    .map(Some)
}

fn known_role(catalog: &RolesCatalog, role: &str) -> bool {
    if catalog.contains(role) {
        return true;
    }
    hmeta_warn!(
        context = LogContext::new().with_role(role).with_operation("compare"),
        "{} is not a valid role in metadata_roles.yaml; skipping",
        role
    );
    false
}

fn write_report(dir: &Path, subject: &ReportSubject<'_>, text: &str) -> Result<PathBuf> {
    let path = dir.join(subject.file_name());
    ensure_parent(&path)?;
    fs::write(&path, text).map_err(|err| OrchestratorError::io(&path, err))?;
    hmeta_info!("wrote diff report {}", path.display());
    Ok(path)
}
