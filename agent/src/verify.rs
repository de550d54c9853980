//! `parser-agent verify`: re-run a persisted parser against its sample.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::diagnostic::{describe_error, describe_validation};
use crate::core::types::FatalCondition;
use crate::core::validator::validate;
use crate::exit_codes;
use crate::io::artifact::read_parser;
use crate::io::config::AgentConfig;
use crate::io::executor::{ExecOutcome, ExecRequest, ParserExecutor};
use crate::io::samples::{Target, load_sample};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The parser still reproduces the expected table.
    Matches { parser_path: PathBuf, rows: usize },
    Mismatch {
        parser_path: PathBuf,
        diagnostic: String,
    },
    Fatal(FatalCondition),
}

impl VerifyOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            VerifyOutcome::Matches { .. } => exit_codes::OK,
            VerifyOutcome::Mismatch { .. } => exit_codes::EXHAUSTED,
            VerifyOutcome::Fatal(_) => exit_codes::FATAL,
        }
    }
}

#[instrument(skip_all, fields(bank = %target.name))]
pub fn verify_parser<X: ParserExecutor>(
    target: &Target,
    config: &AgentConfig,
    executor: &X,
) -> Result<VerifyOutcome> {
    let sample = match load_sample(target) {
        Ok(sample) => sample,
        Err(err) => return Ok(VerifyOutcome::Fatal(err.into_fatal())),
    };
    let parser_path = target.output_parser_path.clone();
    let Some(source) = read_parser(&parser_path)? else {
        return Ok(VerifyOutcome::Fatal(FatalCondition::MissingParser {
            path: parser_path,
        }));
    };

    let outcome = executor.execute(&ExecRequest {
        source,
        pdf_path: sample.pdf_path.clone(),
        log_path: None,
        timeout: config.exec_timeout(),
        output_limit_bytes: config.executor.output_limit_bytes,
    })?;

    let verdict = match outcome {
        ExecOutcome::Failed(err) => VerifyOutcome::Mismatch {
            parser_path,
            diagnostic: describe_error(&err),
        },
        ExecOutcome::Parsed(table) => {
            let result = validate(&table, &sample.expected);
            if result.passed {
                VerifyOutcome::Matches {
                    parser_path,
                    rows: result.row_count_actual,
                }
            } else {
                VerifyOutcome::Mismatch {
                    parser_path,
                    diagnostic: describe_validation(&result),
                }
            }
        }
    };
    info!(exit_code = verdict.exit_code(), "verification finished");
    Ok(verdict)
}
