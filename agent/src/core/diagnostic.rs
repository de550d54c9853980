//! Deterministic failure summaries fed into correction prompts and final reports.

use crate::core::types::{Attempt, AttemptError, ValidationResult};

/// Mismatched cells listed before the remainder is summarized as a count.
const MAX_LISTED_CELLS: usize = 15;

/// Tracebacks keep their tail, where the raising frame lives.
const MAX_MESSAGE_BYTES: usize = 3_000;

/// Render the diagnostic for a failed attempt. Returns `None` for a passing attempt.
pub fn describe_attempt(attempt: &Attempt) -> Option<String> {
    if attempt.passed() {
        return None;
    }
    if let Some(error) = &attempt.execution_error {
        return Some(describe_error(error));
    }
    match &attempt.validation_result {
        Some(result) => Some(describe_validation(result)),
        None => Some("attempt produced no result".to_string()),
    }
}

/// Short one-line label for progress output.
pub fn failure_label(attempt: &Attempt) -> Option<String> {
    if attempt.passed() {
        return None;
    }
    if let Some(error) = &attempt.execution_error {
        return Some(error.label().to_string());
    }
    let result = attempt.validation_result.as_ref()?;
    if result.schema_mismatch.is_some() {
        return Some("schema mismatch".to_string());
    }
    Some(format!(
        "{} mismatched cells, {}/{} rows",
        result.mismatched_cells.len(),
        result.row_count_actual,
        result.row_count_expected
    ))
}

pub fn describe_error(error: &AttemptError) -> String {
    match error {
        AttemptError::Compile { message } => {
            format!("Compile error: the module failed to load.\n{}", tail(message))
        }
        AttemptError::Runtime { message } => {
            format!("Runtime error while calling parse().\n{}", tail(message))
        }
        AttemptError::MissingEntryPoint => {
            "Missing entry point: the module must define a top-level function `parse(pdf_path: str) -> pd.DataFrame`.".to_string()
        }
        AttemptError::Timeout { timeout_secs } => format!(
            "Timeout: parse() did not return within {timeout_secs}s. Avoid unbounded loops and per-character processing."
        ),
        AttemptError::EmptyResponse => {
            "Empty response: no Python source was found in the reply. Return only a single Python code block.".to_string()
        }
    }
}

pub fn describe_validation(result: &ValidationResult) -> String {
    if let Some(schema) = &result.schema_mismatch {
        return format!("Schema mismatch: {schema}");
    }
    let mut lines = Vec::new();
    if result.row_count_actual != result.row_count_expected {
        lines.push(format!(
            "Row count mismatch: expected {} rows, got {}.",
            result.row_count_expected, result.row_count_actual
        ));
    }
    if !result.mismatched_cells.is_empty() {
        lines.push(format!(
            "{} cell(s) differ (rows are compared in order, after trimming and normalizing numbers and dates):",
            result.mismatched_cells.len()
        ));
        for cell in result.mismatched_cells.iter().take(MAX_LISTED_CELLS) {
            lines.push(format!(
                "- row {}, column '{}': expected '{}', got '{}'",
                cell.row, cell.column, cell.expected, cell.actual
            ));
        }
        let remaining = result.mismatched_cells.len().saturating_sub(MAX_LISTED_CELLS);
        if remaining > 0 {
            lines.push(format!("- ... and {remaining} more"));
        }
    }
    if lines.is_empty() {
        lines.push("Validation failed.".to_string());
    }
    lines.join("\n")
}

fn tail(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.len() <= MAX_MESSAGE_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_MESSAGE_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("[... {start} bytes omitted]\n{}", &trimmed[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MismatchedCell;

    fn mismatch(count: usize) -> ValidationResult {
        ValidationResult {
            passed: false,
            row_count_expected: 3,
            row_count_actual: 2,
            mismatched_cells: (0..count)
                .map(|row| MismatchedCell {
                    row,
                    column: "Balance".to_string(),
                    expected: "10".to_string(),
                    actual: "11".to_string(),
                })
                .collect(),
            schema_mismatch: None,
        }
    }

    #[test]
    fn validation_diagnostic_lists_cells_and_row_counts() {
        let text = describe_validation(&mismatch(2));
        assert!(text.contains("expected 3 rows, got 2"));
        assert!(text.contains("- row 1, column 'Balance': expected '10', got '11'"));
    }

    #[test]
    fn long_mismatch_lists_are_capped() {
        let text = describe_validation(&mismatch(20));
        assert!(text.contains("... and 5 more"));
        assert!(!text.contains("- row 15,"));
    }

    #[test]
    fn runtime_messages_keep_their_tail() {
        let message = format!("{}ValueError: boom", "x".repeat(5_000));
        let text = describe_error(&AttemptError::Runtime { message });
        assert!(text.ends_with("ValueError: boom"));
        assert!(text.contains("bytes omitted"));
    }

    #[test]
    fn passing_attempt_has_no_diagnostic() {
        let mut attempt = Attempt::new(1);
        attempt.validation_result = Some(ValidationResult {
            passed: true,
            ..mismatch(0)
        });
        assert_eq!(describe_attempt(&attempt), None);
        assert_eq!(failure_label(&attempt), None);
    }

    #[test]
    fn execution_error_takes_precedence_in_labels() {
        let mut attempt = Attempt::new(2);
        attempt.execution_error = Some(AttemptError::Timeout { timeout_secs: 30 });
        assert_eq!(failure_label(&attempt).as_deref(), Some("timeout"));
        assert!(
            describe_attempt(&attempt)
                .expect("diagnostic")
                .contains("within 30s")
        );
    }
}
