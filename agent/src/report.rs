//! User-facing text for attempt progress and terminal outcomes (stdout).

use crate::core::types::{AgentRunOutcome, AttemptSummary, RunStatus};
use crate::verify::VerifyOutcome;

/// Diagnostics shown when the budget is exhausted.
const REPORTED_ATTEMPTS: usize = 3;

pub fn attempt_line(summary: &AttemptSummary, max_attempts: u32) -> String {
    match (&summary.failure, summary.passed) {
        (_, true) => format!("attempt {}/{max_attempts}: passed", summary.index),
        (Some(failure), false) => {
            format!("attempt {}/{max_attempts}: failed ({failure})", summary.index)
        }
        (None, false) => format!("attempt {}/{max_attempts}: failed", summary.index),
    }
}

pub fn render_outcome(bank: &str, outcome: &AgentRunOutcome) -> String {
    match outcome.status {
        RunStatus::Success => {
            let path = outcome
                .final_parser_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            format!(
                "{bank}: parser accepted after {} attempt(s), written to {path}",
                outcome.attempts.len()
            )
        }
        RunStatus::ExhaustedRetries => {
            let mut out = format!(
                "{bank}: no parser passed after {} attempts",
                outcome.attempts.len()
            );
            let skip = outcome.attempts.len().saturating_sub(REPORTED_ATTEMPTS);
            for summary in outcome.attempts.iter().skip(skip) {
                out.push_str(&format!("\n\n--- attempt {} ---\n", summary.index));
                out.push_str(summary.diagnostic.as_deref().unwrap_or("(no diagnostic)"));
            }
            out
        }
        RunStatus::FatalError => match &outcome.fatal {
            Some(condition) => format!("{bank}: fatal: {condition}"),
            None => format!("{bank}: fatal error"),
        },
    }
}

pub fn render_verify(bank: &str, outcome: &VerifyOutcome) -> String {
    match outcome {
        VerifyOutcome::Matches { parser_path, rows } => format!(
            "{bank}: {} reproduces the expected table ({rows} rows)",
            parser_path.display()
        ),
        VerifyOutcome::Mismatch {
            parser_path,
            diagnostic,
        } => format!(
            "{bank}: {} no longer matches the expected table\n{diagnostic}",
            parser_path.display()
        ),
        VerifyOutcome::Fatal(condition) => format!("{bank}: fatal: {condition}"),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::types::FatalCondition;

    fn failed(index: u32) -> AttemptSummary {
        AttemptSummary {
            index,
            passed: false,
            failure: Some("runtime error".to_string()),
            diagnostic: Some(format!("diagnostic {index}")),
        }
    }

    #[test]
    fn attempt_lines_show_progress_and_failure_label() {
        assert_eq!(attempt_line(&failed(2), 3), "attempt 2/3: failed (runtime error)");
        let passed = AttemptSummary {
            index: 3,
            passed: true,
            failure: None,
            diagnostic: None,
        };
        assert_eq!(attempt_line(&passed, 3), "attempt 3/3: passed");
    }

    #[test]
    fn exhausted_report_lists_every_diagnostic() {
        let outcome = AgentRunOutcome {
            status: RunStatus::ExhaustedRetries,
            attempts: vec![failed(1), failed(2), failed(3)],
            final_parser_path: None,
            fatal: None,
        };
        let text = render_outcome("icici", &outcome);

        assert!(text.starts_with("icici: no parser passed after 3 attempts"));
        for index in 1..=3 {
            assert!(text.contains(&format!("--- attempt {index} ---\ndiagnostic {index}")));
        }
    }

    #[test]
    fn fatal_report_names_the_condition() {
        let outcome = AgentRunOutcome::fatal(
            FatalCondition::QuotaExhausted {
                message: "HTTP 429".to_string(),
            },
            Vec::new(),
        );
        let text = render_outcome("sbi", &outcome);
        assert!(text.contains("quota exhausted"));
        assert!(text.contains("HTTP 429"));
    }

    #[test]
    fn success_report_names_the_parser() {
        let outcome = AgentRunOutcome {
            status: RunStatus::Success,
            attempts: vec![failed(1)],
            final_parser_path: Some(PathBuf::from("custom_parsers/icici_parser.py")),
            fatal: None,
        };
        assert_eq!(
            render_outcome("icici", &outcome),
            "icici: parser accepted after 1 attempt(s), written to custom_parsers/icici_parser.py"
        );
    }
}
