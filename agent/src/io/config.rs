//! Agent configuration stored in `parser-agent.toml` at the workspace root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved relative to the workspace root.
pub const CONFIG_FILE_NAME: &str = "parser-agent.toml";

/// Environment variable consulted when `--api-key` is not given.
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Agent configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults below.
/// The API key is deliberately absent: it comes from the CLI or environment only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory holding `<bank>/<bank>_sample.pdf` and `<bank>/result.csv`.
    pub data_dir: PathBuf,

    /// Directory where accepted parsers are written.
    pub parsers_dir: PathBuf,

    /// Directory for per-attempt logs.
    pub state_dir: PathBuf,

    /// Prompts larger than this drop low-priority sections first.
    pub prompt_budget_bytes: usize,

    pub llm: LlmConfig,

    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (`/chat/completions` is appended).
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    /// Pause before the single in-place retry after a transient service error.
    pub service_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Interpreter invocation, e.g. `["python3", "-B"]`.
    pub command: Vec<String>,
    /// Wall-clock limit for one `parse()` call.
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            parsers_dir: PathBuf::from("custom_parsers"),
            state_dir: PathBuf::from(".parser-agent"),
            prompt_budget_bytes: 40_000,
            llm: LlmConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama3-8b-8192".to_string(),
            temperature: 0.1,
            request_timeout_secs: 120,
            service_retry_delay_ms: 1_000,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), "-B".to_string()],
            timeout_secs: 30,
            output_limit_bytes: 200_000,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(anyhow!("llm.base_url must not be empty"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(anyhow!("llm.model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow!("llm.temperature must be within 0.0..=2.0"));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(anyhow!("llm.request_timeout_secs must be > 0"));
        }
        if self.executor.command.is_empty() || self.executor.command[0].trim().is_empty() {
            return Err(anyhow!("executor.command must be a non-empty array"));
        }
        if self.executor.timeout_secs == 0 {
            return Err(anyhow!("executor.timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.executor.timeout_secs)
    }

    pub fn service_retry_delay(&self) -> Duration {
        Duration::from_millis(self.llm.service_retry_delay_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Pick the API key: explicit flag first, then the environment. Blank values count as absent.
pub fn resolve_api_key(flag: Option<String>, env: Option<String>) -> Option<String> {
    flag.into_iter()
        .chain(env)
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.exec_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[llm]\nmodel = \"llama-3.3-70b-versatile\"\n\n[executor]\ntimeout_secs = 5\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.llm.model, "llama-3.3-70b-versatile");
        assert_eq!(cfg.llm.base_url, LlmConfig::default().base_url);
        assert_eq!(cfg.executor.timeout_secs, 5);
        assert_eq!(cfg.executor.command, ExecutorConfig::default().command);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[executor]\ncommand = []\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("executor.command"));
    }

    #[test]
    fn api_key_prefers_flag_and_skips_blanks() {
        assert_eq!(
            resolve_api_key(Some("flag".into()), Some("env".into())).as_deref(),
            Some("flag")
        );
        assert_eq!(
            resolve_api_key(Some("  ".into()), Some("env".into())).as_deref(),
            Some("env")
        );
        assert_eq!(resolve_api_key(None, None), None);
    }
}
