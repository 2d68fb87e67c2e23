//! ---
//! hmeta_section: "03-merge-engine"
//! hmeta_subsection: "report"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Plain-text rendering of permission diffs."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
use std::fmt::Write as _;

use hmeta_schema::to_yaml_string;

use crate::diff::{DiffCase, PermissionDiff};
use crate::errors::Result;

/// What a report compares, used for its title, banners and file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSubject<'a> {
    RoleVsPrescription { role: &'a str },
    SupersetVsSuperset { first: &'a str, second: &'a str },
    RoleVsRole { first: &'a str, second: &'a str },
}

impl ReportSubject<'_> {
    pub fn case(&self) -> DiffCase {
        match self {
            ReportSubject::RoleVsPrescription { .. } => DiffCase::RoleVsPrescription,
            ReportSubject::SupersetVsSuperset { .. } => DiffCase::SupersetVsSuperset,
            ReportSubject::RoleVsRole { .. } => DiffCase::RoleVsRole,
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            ReportSubject::RoleVsPrescription { role } => format!("{role}.txt"),
            ReportSubject::SupersetVsSuperset { first, second }
            | ReportSubject::RoleVsRole { first, second } => format!("{first}-vs-{second}.txt"),
        }
    }

    fn title(&self) -> String {
        match self {
            ReportSubject::RoleVsPrescription { role } => format!("\nROLE-VS-PRESCRIPTION for {role}\n"),
            ReportSubject::SupersetVsSuperset { first, second } => {
                format!("SUPERSET1: {first} =VS= SUPERSET2: {second}\n")
            }
            ReportSubject::RoleVsRole { first, second } => {
                format!("ROLE1: {first} =VS= ROLE2: {second}\n")
            }
        }
    }

    /// Banners for (only-in-first present, all-first-present, only-in-second present,
    /// all-second-present).
    fn banners(&self) -> [String; 4] {
        match self {
            ReportSubject::RoleVsPrescription { .. } => [
                "ONLY IN ROLE ACTUAL PERMISSIONS".to_string(),
                "ALL ACTUAL TABLE PERMISSIONS PRESENT IN PERMISSIONS PRESCRIPTION".to_string(),
                "PERMISSION PRESCRIPTION MISSING IN ROLE ACTUAL PERMISSIONS".to_string(),
                "ALL TABLE PERMISSIONS IN PRESCRIPTION PRESENT IN ROLE ACTUAL PERMISSIONS".to_string(),
            ],
            ReportSubject::SupersetVsSuperset { first, second } => [
                format!("ONLY IN SUPERSET1 ({first})"),
                format!("ALL TABLES PERMS IN SUPERSET1 ({first}) PRESENT IN SUPERSET2 ({second})"),
                format!("ONLY IN SUPERSET2 ({second})"),
                format!("ALL TABLE PERMS IN SUPERSET2 ({second}) PRESENT IN SUPERSET1 ({first})"),
            ],
            ReportSubject::RoleVsRole { first, second } => [
                format!("ONLY IN ROLE1 ({first}) PERMISSIONS"),
                format!("ALL ROLE1 ({first}) PERMISSIONS PRESENT IN ROLE2 ({second}) PERMISSIONS"),
                format!("ONLY IN ROLE2 ({second}) PERMISSIONS"),
                format!("ALL ROLE2 ({second}) PERMISSIONS PRESENT IN ROLE1 ({first}) PERMISSIONS"),
            ],
        }
    }
}

/// Render a diff as the sectioned text report written under the diff output directory.
pub fn render_report(subject: &ReportSubject<'_>, diff: &PermissionDiff) -> Result<String> {
    let mut out = subject.title();
    let [only_first, all_first, only_second, all_second] = subject.banners();

    if diff.only_in_first.is_empty() {
        banner(&mut out, &all_first);
    } else {
        banner(&mut out, &only_first);
        out.push_str(&to_yaml_string(&diff.only_in_first_value()?));
    }
    if diff.only_in_second.is_empty() {
        banner(&mut out, &all_second);
    } else {
        banner(&mut out, &only_second);
        out.push_str(&to_yaml_string(&diff.only_in_second_value()?));
    }
    if !diff.differing.is_empty() {
        banner(&mut out, "TABLE PERMISSIONS THAT EXIST IN BOTH BUT DIFFER IN DEFINITION");
        out.push_str(&to_yaml_string(&diff.differing_value()));
    }
    Ok(out)
}

fn banner(out: &mut String, text: &str) {
    let _ = write!(out, "\n###### {text} #######\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use hmeta_schema::PermissionDefinition;
    use indexmap::IndexMap;

    fn set(text: &str) -> IndexMap<String, PermissionDefinition> {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn identical_sets_render_only_the_all_present_banners() {
        let a = set("t1: {columns: [a], limit: 1}\n");
        let subject = ReportSubject::RoleVsRole { first: "r1", second: "r2" };
        let text = render_report(&subject, &diff(&a, &a, subject.case())).unwrap();
        assert!(text.starts_with("ROLE1: r1 =VS= ROLE2: r2\n"));
        assert!(text.contains("ALL ROLE1 (r1) PERMISSIONS PRESENT IN ROLE2 (r2) PERMISSIONS"));
        assert!(!text.contains("DIFFER IN DEFINITION"));
        assert_eq!(subject.file_name(), "r1-vs-r2.txt");
    }

    #[test]
    fn differences_are_listed_under_banners() {
        let actual = set("t1: {columns: [a, b], limit: 1}\nt2: {columns: [x], limit: 1}\n");
        let prescribed = set("t1: {columns: [a], limit: 1}\n");
        let subject = ReportSubject::RoleVsPrescription { role: "analyst" };
        let text = render_report(&subject, &diff(&actual, &prescribed, subject.case())).unwrap();
        assert!(text.contains("###### ONLY IN ROLE ACTUAL PERMISSIONS #######\nt2:\n"));
        assert!(text.contains("columns_only_in_role_actual_perms:\n    - b\n"));
        assert_eq!(subject.file_name(), "analyst.txt");
    }
}
