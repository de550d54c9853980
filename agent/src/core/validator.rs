//! Result validator: compares a parser's table against the expected table.
//!
//! Comparison is order-sensitive. Row `i` of the actual table must match row `i`
//! of the expected table; statements are assumed to be chronologically sorted,
//! so no row matching or sorting is attempted.

use std::collections::BTreeSet;

use crate::core::normalize::canonical;
use crate::core::table::Table;
use crate::core::types::{MismatchedCell, ValidationResult};

/// Validate `actual` against `expected`.
///
/// A schema mismatch short-circuits cell comparison. Otherwise every row index
/// present in both tables is compared column by column after normalization.
pub fn validate(actual: &Table, expected: &Table) -> ValidationResult {
    let row_count_expected = expected.row_count();
    let row_count_actual = actual.row_count();

    if let Some(schema_mismatch) = describe_schema_mismatch(&actual.columns, &expected.columns) {
        return ValidationResult {
            passed: false,
            row_count_expected,
            row_count_actual,
            mismatched_cells: Vec::new(),
            schema_mismatch: Some(schema_mismatch),
        };
    }

    let mut mismatched_cells = Vec::new();
    for (row_idx, (actual_row, expected_row)) in actual.rows.iter().zip(&expected.rows).enumerate()
    {
        for (col_idx, column) in expected.columns.iter().enumerate() {
            let expected_value = expected_row.get(col_idx).map(canonical).unwrap_or_default();
            let actual_value = actual_row.get(col_idx).map(canonical).unwrap_or_default();
            if expected_value != actual_value {
                mismatched_cells.push(MismatchedCell {
                    row: row_idx,
                    column: column.clone(),
                    expected: expected_value,
                    actual: actual_value,
                });
            }
        }
    }

    let passed = row_count_expected == row_count_actual && mismatched_cells.is_empty();
    ValidationResult {
        passed,
        row_count_expected,
        row_count_actual,
        mismatched_cells,
        schema_mismatch: None,
    }
}

fn describe_schema_mismatch(actual: &[String], expected: &[String]) -> Option<String> {
    if actual == expected {
        return None;
    }

    let actual_set: BTreeSet<&str> = actual.iter().map(String::as_str).collect();
    let expected_set: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
    let missing: Vec<&str> = expected
        .iter()
        .map(String::as_str)
        .filter(|column| !actual_set.contains(column))
        .collect();
    let unexpected: Vec<&str> = actual
        .iter()
        .map(String::as_str)
        .filter(|column| !expected_set.contains(column))
        .collect();

    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing columns {missing:?}"));
    }
    if !unexpected.is_empty() {
        parts.push(format!("unexpected columns {unexpected:?}"));
    }
    if parts.is_empty() {
        parts.push("column order differs".to_string());
    }
    Some(format!(
        "{}; expected {expected:?}, got {actual:?}",
        parts.join(", ")
    ))
}
