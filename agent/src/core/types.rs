//! Shared deterministic types for the self-fix loop.
//!
//! These types define stable contracts between the orchestrator and its
//! collaborators. They carry no I/O. The attempt-level types serialize
//! deterministically into per-attempt metadata on disk.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// One cell that differs between the actual and expected tables (after normalization).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MismatchedCell {
    /// Zero-based row index.
    pub row: usize,
    pub column: String,
    pub expected: String,
    pub actual: String,
}

/// Outcome of comparing a parser's table against the expected table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub row_count_expected: usize,
    pub row_count_actual: usize,
    /// Row-major order.
    pub mismatched_cells: Vec<MismatchedCell>,
    pub schema_mismatch: Option<String>,
}

/// Why an attempt produced no table worth validating.
///
/// All variants consume the self-fix budget and are fed back into the next prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptError {
    #[error("generation returned no usable source text")]
    EmptyResponse,
    #[error("candidate module failed to load:\n{message}")]
    Compile { message: String },
    #[error("candidate module does not define a callable parse(pdf_path)")]
    MissingEntryPoint,
    #[error("parse() failed:\n{message}")]
    Runtime { message: String },
    #[error("parse() exceeded the {timeout_secs}s wall-clock limit")]
    Timeout { timeout_secs: u64 },
}

impl AttemptError {
    /// Short label for progress lines.
    pub fn label(&self) -> &'static str {
        match self {
            AttemptError::EmptyResponse => "empty response",
            AttemptError::Compile { .. } => "compile error",
            AttemptError::MissingEntryPoint => "missing parse()",
            AttemptError::Runtime { .. } => "runtime error",
            AttemptError::Timeout { .. } => "timeout",
        }
    }
}

/// One generate/execute/validate cycle. Owned by the orchestrator while in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based, strictly increasing within a run.
    pub index: u32,
    pub generated_source: String,
    pub execution_error: Option<AttemptError>,
    pub validation_result: Option<ValidationResult>,
}

impl Attempt {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            generated_source: String::new(),
            execution_error: None,
            validation_result: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.execution_error.is_none()
            && self
                .validation_result
                .as_ref()
                .is_some_and(|result| result.passed)
    }
}

/// What remains of an attempt once it is superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptSummary {
    pub index: u32,
    pub passed: bool,
    /// Short failure label (`None` when passed).
    pub failure: Option<String>,
    /// Full diagnostic as embedded into the next prompt (`None` when passed).
    pub diagnostic: Option<String>,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    ExhaustedRetries,
    FatalError,
}

/// Condition that ended a run without exhausting the attempt budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalCondition {
    InvalidTarget { name: String },
    MissingSample { bank: String, searched: Vec<PathBuf> },
    MalformedExpectedTable { path: PathBuf, reason: String },
    MissingApiKey,
    QuotaExhausted { message: String },
    ServiceUnavailable { message: String },
    MissingParser { path: PathBuf },
}

impl fmt::Display for FatalCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalCondition::InvalidTarget { name } => write!(
                f,
                "invalid target '{name}': use letters, digits, '-' or '_' only"
            ),
            FatalCondition::MissingSample { bank, searched } => {
                let paths: Vec<String> = searched.iter().map(|p| p.display().to_string()).collect();
                write!(
                    f,
                    "sample files for '{bank}' not found (searched: {})",
                    paths.join(", ")
                )
            }
            FatalCondition::MalformedExpectedTable { path, reason } => {
                write!(f, "expected table {} is malformed: {reason}", path.display())
            }
            FatalCondition::MissingApiKey => {
                write!(f, "no API key: pass --api-key or set GROQ_API_KEY")
            }
            FatalCondition::QuotaExhausted { message } => write!(
                f,
                "generation quota exhausted, retry after the provider's limit resets ({message})"
            ),
            FatalCondition::ServiceUnavailable { message } => write!(
                f,
                "generation service failed twice in the same attempt ({message})"
            ),
            FatalCondition::MissingParser { path } => write!(
                f,
                "no generated parser at {} (run `parser-agent run` first)",
                path.display()
            ),
        }
    }
}

/// Terminal record of one agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRunOutcome {
    pub status: RunStatus,
    pub attempts: Vec<AttemptSummary>,
    /// Present iff `status == Success`.
    pub final_parser_path: Option<PathBuf>,
    /// Present iff `status == FatalError`.
    pub fatal: Option<FatalCondition>,
}

impl AgentRunOutcome {
    pub fn fatal(condition: FatalCondition, attempts: Vec<AttemptSummary>) -> Self {
        Self {
            status: RunStatus::FatalError,
            attempts,
            final_parser_path: None,
            fatal: Some(condition),
        }
    }
}
