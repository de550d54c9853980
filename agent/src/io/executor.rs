//! Parser executor: runs candidate source against a sample PDF.
//!
//! The [`ParserExecutor`] trait decouples the orchestrator from how candidates
//! are run. [`PythonExecutor`] loads each candidate in a fresh interpreter
//! process inside a throwaway directory, so no module state survives between
//! attempts. Tests use scripted executors that return predetermined outcomes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::table::{Cell, Table};
use crate::core::types::AttemptError;
use crate::io::config::ExecutorConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};

const HARNESS_SOURCE: &str = include_str!("harness.py");

/// Parameters for one executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Candidate module source.
    pub source: String,
    /// Statement passed to `parse()`.
    pub pdf_path: PathBuf,
    /// Where to write captured stdout/stderr, if anywhere.
    pub log_path: Option<PathBuf>,
    /// Wall-clock limit for loading and calling the candidate.
    pub timeout: Duration,
    /// Truncate captured output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// What a candidate produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    Parsed(Table),
    Failed(AttemptError),
}

/// Abstraction over candidate execution backends.
///
/// `Err` is reserved for faults of the executor itself (cannot spawn the
/// interpreter, cannot create a scratch directory); candidate failures are
/// reported as [`ExecOutcome::Failed`].
pub trait ParserExecutor {
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutcome>;
}

/// Executor that spawns a Python interpreter running the embedded harness.
#[derive(Debug, Clone)]
pub struct PythonExecutor {
    command: Vec<String>,
}

impl PythonExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            command: config.command.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum HarnessResult {
    Ok {
        columns: Vec<String>,
        rows: Vec<Vec<Cell>>,
    },
    CompileError {
        message: String,
    },
    MissingEntryPoint,
    RuntimeError {
        message: String,
    },
}

impl ParserExecutor for PythonExecutor {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), pdf = %request.pdf_path.display()))]
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutcome> {
        let (program, args) = self
            .command
            .split_first()
            .context("executor command must not be empty")?;
        let pdf_path = fs::canonicalize(&request.pdf_path)
            .with_context(|| format!("resolve {}", request.pdf_path.display()))?;

        let scratch = tempfile::Builder::new()
            .prefix("parser-agent-")
            .tempdir()
            .context("create scratch directory")?;
        let harness_path = scratch.path().join("harness.py");
        let candidate_path = scratch.path().join("candidate.py");
        let result_path = scratch.path().join("result.json");
        fs::write(&harness_path, HARNESS_SOURCE)
            .with_context(|| format!("write {}", harness_path.display()))?;
        fs::write(&candidate_path, &request.source)
            .with_context(|| format!("write {}", candidate_path.display()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&harness_path)
            .arg(&candidate_path)
            .arg(&pdf_path)
            .arg(&result_path)
            .current_dir(scratch.path());

        info!(program = %program, "running candidate parser");
        let output = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)
            .context("run candidate parser")?;

        if let Some(log_path) = &request.log_path {
            write_executor_log(log_path, &output, request.output_limit_bytes)?;
        }

        if output.timed_out {
            warn!("candidate parser timed out");
            return Ok(ExecOutcome::Failed(AttemptError::Timeout {
                timeout_secs: request.timeout.as_secs(),
            }));
        }

        let outcome = read_harness_result(&result_path, &output)?;
        debug!(outcome = ?outcome_label(&outcome), "candidate parser finished");
        Ok(outcome)
    }
}

fn read_harness_result(path: &Path, output: &CommandOutput) -> Result<ExecOutcome> {
    if !path.exists() {
        return Ok(ExecOutcome::Failed(AttemptError::Runtime {
            message: format!(
                "interpreter exited ({}) without producing a result\n{}",
                describe_exit(output),
                output.stderr_lossy().trim()
            ),
        }));
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read harness result {}", path.display()))?;
    let result: HarnessResult = match serde_json::from_str(&contents) {
        Ok(result) => result,
        Err(err) => {
            return Ok(ExecOutcome::Failed(AttemptError::Runtime {
                message: format!("parse() output could not be decoded: {err}"),
            }));
        }
    };

    let outcome = match result {
        HarnessResult::Ok { columns, rows } => {
            let table = Table::new(columns, rows);
            match table.first_ragged_row() {
                Some(row) => ExecOutcome::Failed(AttemptError::Runtime {
                    message: format!("parse() returned a ragged table (row {row})"),
                }),
                None => ExecOutcome::Parsed(table),
            }
        }
        HarnessResult::CompileError { message } => {
            ExecOutcome::Failed(AttemptError::Compile { message })
        }
        HarnessResult::MissingEntryPoint => ExecOutcome::Failed(AttemptError::MissingEntryPoint),
        HarnessResult::RuntimeError { message } => {
            ExecOutcome::Failed(AttemptError::Runtime { message })
        }
    };
    Ok(outcome)
}

fn describe_exit(output: &CommandOutput) -> String {
    match output.status.code() {
        Some(code) => format!("exit code {code}"),
        None => "killed by signal".to_string(),
    }
}

fn outcome_label(outcome: &ExecOutcome) -> &'static str {
    match outcome {
        ExecOutcome::Parsed(_) => "parsed",
        ExecOutcome::Failed(err) => err.label(),
    }
}

fn write_executor_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create executor log dir {}", parent.display()))?;
    }
    let mut buf = output.render_log();
    if buf.len() > output_limit {
        let mut end = output_limit;
        while !buf.is_char_boundary(end) {
            end -= 1;
        }
        let dropped = buf.len() - end;
        buf.truncate(end);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }
    fs::write(path, buf).with_context(|| format!("write executor log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_available(module: Option<&str>) -> bool {
        let mut cmd = Command::new("python3");
        match module {
            Some(name) => cmd.args(["-c", &format!("import {name}")]),
            None => cmd.arg("--version"),
        };
        cmd.output().map(|out| out.status.success()).unwrap_or(false)
    }

    fn request(temp: &Path, source: &str, timeout: Duration) -> ExecRequest {
        let pdf_path = temp.join("sample.pdf");
        fs::write(&pdf_path, b"%PDF-1.4\n").expect("write pdf");
        ExecRequest {
            source: source.to_string(),
            pdf_path,
            log_path: Some(temp.join("executor.log")),
            timeout,
            output_limit_bytes: 10_000,
        }
    }

    fn run(source: &str, timeout: Duration) -> Option<ExecOutcome> {
        if !python_available(None) {
            eprintln!("skipping: python3 not available");
            return None;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = PythonExecutor::new(&ExecutorConfig::default());
        Some(
            executor
                .execute(&request(temp.path(), source, timeout))
                .expect("execute"),
        )
    }

    #[test]
    fn syntax_errors_are_compile_errors() {
        let Some(outcome) = run("def parse(p)\n    return 1\n", Duration::from_secs(20)) else {
            return;
        };
        match outcome {
            ExecOutcome::Failed(AttemptError::Compile { message }) => {
                assert!(message.contains("SyntaxError"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn modules_without_parse_are_missing_entry_point() {
        let Some(outcome) = run("def extract(p):\n    return None\n", Duration::from_secs(20))
        else {
            return;
        };
        assert_eq!(
            outcome,
            ExecOutcome::Failed(AttemptError::MissingEntryPoint)
        );
    }

    #[test]
    fn exceptions_are_runtime_errors_with_traceback() {
        let source = "def parse(p):\n    raise ValueError('cannot read ' + p.split('/')[-1])\n";
        let Some(outcome) = run(source, Duration::from_secs(20)) else {
            return;
        };
        match outcome {
            ExecOutcome::Failed(AttemptError::Runtime { message }) => {
                assert!(message.contains("ValueError: cannot read sample.pdf"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn slow_candidates_time_out() {
        let source = "import time\n\ndef parse(p):\n    time.sleep(30)\n";
        let Some(outcome) = run(source, Duration::from_secs(1)) else {
            return;
        };
        assert_eq!(
            outcome,
            ExecOutcome::Failed(AttemptError::Timeout { timeout_secs: 1 })
        );
    }

    #[cfg(unix)]
    #[test]
    fn spawned_children_do_not_hold_the_timeout_open() {
        let source = "import subprocess, time\n\ndef parse(p):\n    subprocess.Popen(['sleep', '30'])\n    time.sleep(60)\n";
        let started = std::time::Instant::now();
        let Some(outcome) = run(source, Duration::from_secs(1)) else {
            return;
        };
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "returned after {:?}",
            started.elapsed()
        );
        assert_eq!(
            outcome,
            ExecOutcome::Failed(AttemptError::Timeout { timeout_secs: 1 })
        );
    }

    #[cfg(unix)]
    #[test]
    fn spawned_children_do_not_outlive_a_finished_parse() {
        let source = "import subprocess\n\ndef parse(p):\n    subprocess.Popen(['sleep', '30'])\n    raise ValueError('no rows')\n";
        let started = std::time::Instant::now();
        let Some(outcome) = run(source, Duration::from_secs(20)) else {
            return;
        };
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "returned after {:?}",
            started.elapsed()
        );
        match outcome {
            ExecOutcome::Failed(AttemptError::Runtime { message }) => {
                assert!(message.contains("ValueError: no rows"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hard_exits_are_runtime_errors() {
        let source = "import os\n\ndef parse(p):\n    os._exit(7)\n";
        let Some(outcome) = run(source, Duration::from_secs(20)) else {
            return;
        };
        match outcome {
            ExecOutcome::Failed(AttemptError::Runtime { message }) => {
                assert!(message.contains("exit code 7"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dataframes_are_returned_as_tables() {
        if !python_available(Some("pandas")) {
            eprintln!("skipping: pandas not available");
            return;
        }
        let source = r#"
import pandas as pd

def parse(pdf_path):
    return pd.DataFrame(
        {
            "Date": ["01-08-2024", "02-08-2024"],
            "Debit Amt": [None, 1652.61],
            "Balance": [6864.58, 5211.97],
        }
    )
"#;
        let Some(outcome) = run(source, Duration::from_secs(60)) else {
            return;
        };
        match outcome {
            ExecOutcome::Parsed(table) => {
                assert_eq!(table.columns, vec!["Date", "Debit Amt", "Balance"]);
                assert_eq!(table.rows.len(), 2);
                assert_eq!(table.rows[0][1], Cell::Null);
                assert_eq!(table.rows[1][1].raw(), "1652.61");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_result_file_is_a_runtime_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo boom >&2; exit 1"]);
        let output = run_command_with_timeout(cmd, Duration::from_secs(5), 1_000).expect("run");
        let outcome = read_harness_result(&temp.path().join("result.json"), &output).expect("read");
        match outcome {
            ExecOutcome::Failed(AttemptError::Runtime { message }) => {
                assert!(message.contains("exit code 1"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
