//! Test-only doubles for the generation client and parser executor, plus a
//! throwaway workspace laid out the way `parser-agent` expects.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::core::table::Table;
use crate::io::config::AgentConfig;
use crate::io::executor::{ExecOutcome, ExecRequest, ParserExecutor};
use crate::io::generation::{CompletionClient, GenerationError};
use crate::io::samples::{Target, read_expected_table};

/// Expected table written by [`TestWorkspace::new`].
pub const SAMPLE_CSV: &str = "\
Date,Description,Debit Amt,Credit Amt,Balance
01-08-2024,Salary Credit XYZ Pvt Ltd,,1935.3,6864.58
02-08-2024,Salary Credit XYZ Pvt Ltd,1652.61,,5211.97
03-08-2024,IMPS UPI Payment Amazon,,2876.84,8088.81
";

/// Completion client that replays a fixed script and records every prompt.
pub struct ScriptedClient {
    responses: RefCell<VecDeque<Result<String, GenerationError>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl CompletionClient for ScriptedClient {
    fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(GenerationError::Service {
                    message: "script exhausted".to_string(),
                })
            })
    }
}

/// Parser executor that replays fixed outcomes and records the sources it was given.
pub struct ScriptedExecutor {
    outcomes: RefCell<VecDeque<ExecOutcome>>,
    requests: RefCell<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: Vec<ExecOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Sources passed to `execute`, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl ParserExecutor for ScriptedExecutor {
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutcome> {
        self.requests.borrow_mut().push(request.source.clone());
        self.outcomes
            .borrow_mut()
            .pop_front()
            .context("scripted executor has no outcome left")
    }
}

/// Wrap `source` in a fenced reply the way chat models usually answer.
pub fn fenced_reply(source: &str) -> String {
    format!("Here is the parser:\n```python\n{source}```\n")
}

/// Temporary root with `data/<bank>/<bank>_sample.pdf` and `data/<bank>/result.csv`.
pub struct TestWorkspace {
    temp: TempDir,
    bank: String,
}

impl TestWorkspace {
    pub fn new(bank: &str) -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let bank_dir = temp.path().join("data").join(bank);
        fs::create_dir_all(&bank_dir).context("create bank dir")?;
        fs::write(bank_dir.join(format!("{bank}_sample.pdf")), b"%PDF-1.4\n%%EOF\n")
            .context("write sample pdf")?;
        fs::write(bank_dir.join("result.csv"), SAMPLE_CSV).context("write expected csv")?;
        Ok(Self {
            temp,
            bank: bank.to_string(),
        })
    }

    /// Workspace without any sample files.
    pub fn empty(bank: &str) -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir().context("create tempdir")?,
            bank: bank.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Defaults with no pause before in-place retries.
    pub fn config(&self) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.llm.service_retry_delay_ms = 0;
        config
    }

    pub fn target(&self) -> Target {
        Target::resolve(self.root(), &self.bank, &self.config())
            .unwrap_or_else(|err| panic!("resolve test target: {err}"))
    }

    pub fn expected_table(&self) -> Table {
        read_expected_table(&self.target().expected_csv_path)
            .unwrap_or_else(|err| panic!("read expected table: {err}"))
    }

    pub fn parser_path(&self) -> PathBuf {
        self.target().output_parser_path
    }

    pub fn write_parser(&self, source: &str) -> Result<()> {
        let path = self.parser_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create parsers dir")?;
        }
        fs::write(&path, source).context("write parser")
    }

    /// Directory holding attempt `n`'s logs.
    pub fn attempt_dir(&self, attempt: u32) -> PathBuf {
        self.root()
            .join(&self.config().state_dir)
            .join("attempts")
            .join(&self.bank)
            .join(attempt.to_string())
    }
}
