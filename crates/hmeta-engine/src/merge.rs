//! ---
//! hmeta_section: "03-merge-engine"
//! hmeta_subsection: "merge"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Pairwise union of two permission definitions."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! Pairwise merge of two permission definitions.
//!
//! Access only grows when supersets are combined: columns are unioned, the larger
//! limit wins and aggregation is enabled if either side enables it. Filters and
//! computed fields are structural, so two different non-empty values are rejected
//! instead of picking one.

use std::collections::BTreeSet;

use hmeta_schema::{PermissionDefinition, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    #[error("unexpected permission definition key(s): {}", .0.join(", "))]
    UnknownKeys(Vec<String>),
    #[error("neither permission definition declares `{0}`")]
    MissingField(&'static str),
    #[error("`{field}` differs and is non-empty on both sides, cannot auto-merge: {first} vs {second}")]
    Ambiguous {
        field: &'static str,
        first: String,
        second: String,
    },
}

/// Merge two definitions of the same table.
///
/// A field is present in the result when either input declares it. `columns` and
/// `limit` must be declared by at least one side; `limit` takes the larger value.
pub fn merge(
    first: &PermissionDefinition,
    second: &PermissionDefinition,
) -> Result<PermissionDefinition, MergeError> {
    let unknown: BTreeSet<String> = first
        .unrecognized_keys()
        .into_iter()
        .chain(second.unrecognized_keys())
        .collect();
    if !unknown.is_empty() {
        return Err(MergeError::UnknownKeys(unknown.into_iter().collect()));
    }

    let columns = match (&first.columns, &second.columns) {
        (None, None) => return Err(MergeError::MissingField("columns")),
        _ => first
            .columns_or_empty()
            .iter()
            .chain(second.columns_or_empty())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    };

    let limit = match (first.limit, second.limit) {
        (None, None) => return Err(MergeError::MissingField("limit")),
        (a, b) => a.max(b),
    };

    let allow_aggregations = match (first.allow_aggregations, second.allow_aggregations) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(false) || b.unwrap_or(false)),
    };

    let computed_fields = match (&first.computed_fields, &second.computed_fields) {
        (None, None) => None,
        _ => Some(merge_computed_fields(
            first.computed_fields_or_empty(),
            second.computed_fields_or_empty(),
        )?),
    };

    let filter = match (&first.filter, &second.filter) {
        (None, None) => None,
        _ => Some(merge_filter(first, second)?),
    };

    Ok(PermissionDefinition {
        columns: Some(columns),
        filter,
        limit,
        computed_fields,
        allow_aggregations,
        ..PermissionDefinition::default()
    })
}

fn merge_computed_fields(first: &[String], second: &[String]) -> Result<Vec<String>, MergeError> {
    if first.is_empty() {
        Ok(second.to_vec())
    } else if second.is_empty() || first == second {
        Ok(first.to_vec())
    } else {
        Err(MergeError::Ambiguous {
            field: "computed_fields",
            first: render_list(first),
            second: render_list(second),
        })
    }
}

fn merge_filter(
    first: &PermissionDefinition,
    second: &PermissionDefinition,
) -> Result<Value, MergeError> {
    match (first.filter_is_empty(), second.filter_is_empty()) {
        (true, _) => Ok(second.filter_or_empty()),
        (false, true) => Ok(first.filter_or_empty()),
        (false, false) if first.filter == second.filter => Ok(first.filter_or_empty()),
        (false, false) => Err(MergeError::Ambiguous {
            field: "filter",
            first: render_value(&first.filter_or_empty()),
            second: render_value(&second.filter_or_empty()),
        }),
    }
}

fn render_list(items: &[String]) -> String {
    format!("[{}]", items.join(", "))
}

/// Single-line rendering of a predicate tree for error messages.
pub(crate) fn render_value(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("{value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(text: &str) -> PermissionDefinition {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn columns_are_unioned_and_limit_takes_the_maximum() {
        let merged = merge(&def("columns: [b, a]\nlimit: 10\n"), &def("columns: [c, a]\nlimit: 25\n")).unwrap();
        assert_eq!(merged.columns_or_empty(), ["a", "b", "c"]);
        assert_eq!(merged.limit, Some(25));
        assert_eq!(merged.allow_aggregations, None);
        assert_eq!(merged.filter, None);
    }

    #[test]
    fn limit_from_one_side_is_enough() {
        let merged = merge(&def("columns: [a]\n"), &def("columns: [b]\nlimit: 3\n")).unwrap();
        assert_eq!(merged.limit, Some(3));
    }

    #[test]
    fn missing_limit_on_both_sides_fails() {
        let err = merge(&def("columns: [a]\n"), &def("columns: [b]\n")).unwrap_err();
        assert_eq!(err, MergeError::MissingField("limit"));
    }

    #[test]
    fn missing_columns_on_both_sides_fails() {
        let err = merge(&def("limit: 1\n"), &def("limit: 2\n")).unwrap_err();
        assert_eq!(err, MergeError::MissingField("columns"));
    }

    #[test]
    fn aggregation_is_or_ed() {
        let merged = merge(
            &def("columns: [a]\nlimit: 1\nallow_aggregations: true\n"),
            &def("columns: [a]\nlimit: 1\nallow_aggregations: false\n"),
        )
        .unwrap();
        assert_eq!(merged.allow_aggregations, Some(true));
        let merged = merge(
            &def("columns: [a]\nlimit: 1\n"),
            &def("columns: [a]\nlimit: 1\nallow_aggregations: false\n"),
        )
        .unwrap();
        assert_eq!(merged.allow_aggregations, Some(false));
    }

    #[test]
    fn empty_filter_defers_to_the_other_side() {
        let restricted = def("columns: [a]\nlimit: 1\nfilter: {org_id: {_eq: X-Hasura-Org-Id}}\n");
        let open = def("columns: [a]\nlimit: 1\nfilter: {}\n");
        let merged = merge(&open, &restricted).unwrap();
        assert_eq!(merged.filter, restricted.filter);
        let merged = merge(&restricted, &def("columns: [a]\nlimit: 1\n")).unwrap();
        assert_eq!(merged.filter, restricted.filter);
    }

    #[test]
    fn equal_filters_pass_through() {
        let a = def("columns: [a]\nlimit: 1\nfilter: {id: {_gt: 0}}\n");
        let b = def("columns: [b]\nlimit: 2\nfilter: {id: {_gt: 0}}\n");
        assert_eq!(merge(&a, &b).unwrap().filter, a.filter);
    }

    #[test]
    fn differing_filters_are_ambiguous() {
        let a = def("columns: [a]\nlimit: 1\nfilter: {id: {_gt: 0}}\n");
        let b = def("columns: [a]\nlimit: 1\nfilter: {id: {_lt: 9}}\n");
        match merge(&a, &b).unwrap_err() {
            MergeError::Ambiguous { field, first, second } => {
                assert_eq!(field, "filter");
                assert!(first.contains("_gt"));
                assert!(second.contains("_lt"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn computed_fields_follow_the_filter_policy() {
        let none = def("columns: [a]\nlimit: 1\n");
        let empty = def("columns: [a]\nlimit: 1\ncomputed_fields: []\n");
        let full = def("columns: [a]\nlimit: 1\ncomputed_fields: [total]\n");
        let other = def("columns: [a]\nlimit: 1\ncomputed_fields: [score]\n");
        assert_eq!(merge(&none, &full).unwrap().computed_fields, Some(vec!["total".to_string()]));
        assert_eq!(merge(&full, &empty).unwrap().computed_fields, Some(vec!["total".to_string()]));
        assert_eq!(merge(&full, &full).unwrap().computed_fields, Some(vec!["total".to_string()]));
        assert_eq!(merge(&none, &empty).unwrap().computed_fields, Some(Vec::new()));
        assert!(matches!(
            merge(&full, &other),
            Err(MergeError::Ambiguous { field: "computed_fields", .. })
        ));
    }

    #[test]
    fn unknown_keys_fail_closed() {
        let err = merge(
            &def("columns: [a]\nlimit: 1\nquery_root_fields: [select]\n"),
            &def("columns: [a]\nlimit: 1\n"),
        )
        .unwrap_err();
        assert_eq!(err, MergeError::UnknownKeys(vec!["query_root_fields".to_string()]));
    }

    #[test]
    fn merge_is_commutative_and_idempotent_without_conflicts() {
        let a = def("columns: [x, y]\nlimit: 5\nfilter: {}\nallow_aggregations: true\n");
        let b = def("columns: [y, z]\nlimit: 9\nfilter: {id: {_eq: 1}}\ncomputed_fields: [f]\n");
        let ab = merge(&a, &b).unwrap();
        let ba = merge(&b, &a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(merge(&ab, &a).unwrap(), ab);
        assert_eq!(merge(&ab, &b).unwrap(), ab);
    }
}
