//! `affected_row_id` strings as the audit trigger writes them
//!
//! - single-column primary key: the column's text value (`42`, `3f2c...`)
//! - composite primary key: compact JSON object, keys sorted bytewise
//!   (`{"course_id":1,"user_id":"u-9"}`)
//! - no primary key: the row's `id` field, or an empty string
//!
//! Keep this in sync with `ledgerline_audit_row()` in the migrations.

use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Row id for `row` given the table's primary-key columns
pub fn canonical_row_id(row: &Map<String, JsonValue>, key_columns: &[&str]) -> String {
    match key_columns {
        [] => row.get("id").map(text_value).unwrap_or_default(),
        [column] => row.get(*column).map(text_value).unwrap_or_default(),
        columns => {
            let sorted: BTreeMap<&str, &JsonValue> = columns
                .iter()
                .map(|c| (*c, row.get(*c).unwrap_or(&JsonValue::Null)))
                .collect();

            let parts = sorted
                .into_iter()
                .map(|(column, value)| format!("{}:{}", JsonValue::from(column), value))
                .collect::<Vec<_>>();

            format!("{{{}}}", parts.join(","))
        },
    }
}

/// Postgres `->>` semantics: strings unquoted, `null` as absent, others as JSON text
fn text_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}
