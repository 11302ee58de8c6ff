use indexmap::IndexMap;

use flexstr::ToSharedStr;

use crate::types::{ConditionName, ReplicateColumn};

// fully-qualified columns are "group_timepoint_replicate"
const FULLY_QUALIFIED_TOKENS: usize = 3;

fn tokens(name: &str) -> Vec<&str> {
    name.split('_').collect()
}

/// The logical condition of a replicate column: the column name with its
/// last token (the replicate suffix) dropped.
pub fn logical_condition(column: &ReplicateColumn) -> ConditionName {
    let column_tokens = tokens(column);
    let keep = column_tokens.len().saturating_sub(1);
    column_tokens[..keep].join("_").to_shared_str()
}

/// Expand user-chosen logical conditions to the matching fully-qualified
/// replicate columns.
///
/// A requested name that is already fully qualified (3 tokens) is included
/// verbatim; anything shorter matches every column whose logical condition
/// (the column minus its replicate token) equals it exactly, so a bare
/// group name matches nothing.  An empty request defaults to every distinct
/// logical condition present in `all_columns`.  The result is sorted and
/// de-duplicated.
pub fn expand(logical_conditions: &[ConditionName],
              all_columns: &[ReplicateColumn])
    -> Vec<ReplicateColumn>
{
    let requested: Vec<ConditionName> =
        if logical_conditions.is_empty() {
            let mut defaults: Vec<ConditionName> =
                all_columns.iter().map(logical_condition).collect();
            defaults.sort();
            defaults.dedup();
            defaults
        } else {
            logical_conditions.to_vec()
        };

    let mut expanded = vec![];

    for requested_condition in &requested {
        let requested_tokens = tokens(requested_condition);

        if requested_tokens.len() == FULLY_QUALIFIED_TOKENS {
            expanded.push(requested_condition.clone());
            continue;
        }

        for column in all_columns {
            let column_tokens = tokens(column);
            let logical_len = column_tokens.len().saturating_sub(1);

            if column_tokens[..logical_len] == requested_tokens[..] {
                expanded.push(column.clone());
            }
        }
    }

    expanded.sort();
    expanded.dedup();

    expanded
}

/// Stable re-ordering of expanded columns by their timepoint token, so that
/// plots read in day order regardless of group name.
pub fn sort_for_display(columns: &mut [ReplicateColumn]) {
    columns.sort_by_key(|column| {
        column.split('_').nth(1).unwrap_or_default().to_shared_str()
    });
}

/// Group fully-qualified columns by their first two tokens (group +
/// timepoint), dropping the replicate token, for replicate-averaged
/// exports.  Group order follows first appearance in the input.
pub fn group_for_averaging(columns: &[ReplicateColumn])
    -> Vec<(ConditionName, Vec<ReplicateColumn>)>
{
    let mut groups: IndexMap<ConditionName, Vec<ReplicateColumn>> = IndexMap::new();

    for column in columns {
        let column_tokens = tokens(column);
        let keep = column_tokens.len().min(FULLY_QUALIFIED_TOKENS - 1);
        let group_name: ConditionName =
            column_tokens[..keep].join("_").to_shared_str();

        groups.entry(group_name)
            .or_insert_with(Vec::new)
            .push(column.clone());
    }

    groups.into_iter().collect()
}
