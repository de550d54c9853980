//! `parser-agent`: generate, test and self-fix bank statement parsers.

use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use parser_agent::core::machine::MAX_ATTEMPTS;
use parser_agent::core::types::{AgentRunOutcome, FatalCondition};
use parser_agent::exit_codes;
use parser_agent::io::config::{
    API_KEY_ENV, AgentConfig, CONFIG_FILE_NAME, load_config, resolve_api_key,
};
use parser_agent::io::executor::PythonExecutor;
use parser_agent::io::generation::ChatCompletionClient;
use parser_agent::io::samples::Target;
use parser_agent::logging;
use parser_agent::orchestrator::run_agent;
use parser_agent::report;
use parser_agent::verify::verify_parser;

#[derive(Parser)]
#[command(
    name = "parser-agent",
    version,
    about = "Generate, test and self-fix bank statement parsers with an LLM"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a parser for one bank, retrying with feedback up to three times.
    Run {
        /// Bank name; samples are read from `data/<target>/`.
        #[arg(long)]
        target: String,
        /// API key for the generation service (falls back to `GROQ_API_KEY`).
        #[arg(long)]
        api_key: Option<String>,
        /// Override `llm.model` from the config file.
        #[arg(long)]
        model: Option<String>,
        #[command(flatten)]
        workspace: WorkspaceArgs,
    },
    /// Re-run the persisted parser for one bank and compare it with the expected table.
    Verify {
        #[arg(long)]
        target: String,
        #[command(flatten)]
        workspace: WorkspaceArgs,
    },
}

#[derive(Args)]
struct WorkspaceArgs {
    /// Workspace root holding `data/` and `custom_parsers/`.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Config file (default: `<root>/parser-agent.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl WorkspaceArgs {
    fn load_config(&self) -> Result<AgentConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| self.root.join(CONFIG_FILE_NAME));
        load_config(&path)
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            process::exit(exit_codes::FATAL);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            target,
            api_key,
            model,
            workspace,
        } => cmd_run(&target, api_key, model, &workspace),
        Command::Verify { target, workspace } => cmd_verify(&target, &workspace),
    }
}

fn cmd_run(
    name: &str,
    api_key: Option<String>,
    model: Option<String>,
    workspace: &WorkspaceArgs,
) -> Result<i32> {
    let mut config = workspace.load_config()?;
    if let Some(model) = model {
        config.llm.model = model;
        config.validate().context("invalid --model")?;
    }

    let target = match Target::resolve(&workspace.root, name, &config) {
        Ok(target) => target,
        Err(err) => return Ok(report_fatal(name, err.into_fatal())),
    };
    let Some(api_key) = resolve_api_key(api_key, env::var(API_KEY_ENV).ok()) else {
        return Ok(report_fatal(name, FatalCondition::MissingApiKey));
    };

    let client = ChatCompletionClient::new(&config.llm, api_key);
    let executor = PythonExecutor::new(&config.executor);
    let outcome = run_agent(
        &workspace.root,
        &target,
        &config,
        &client,
        &executor,
        |summary| println!("{}", report::attempt_line(summary, MAX_ATTEMPTS)),
    )?;
    println!("{}", report::render_outcome(name, &outcome));
    Ok(exit_codes::for_status(outcome.status))
}

fn cmd_verify(name: &str, workspace: &WorkspaceArgs) -> Result<i32> {
    let config = workspace.load_config()?;
    let target = match Target::resolve(&workspace.root, name, &config) {
        Ok(target) => target,
        Err(err) => return Ok(report_fatal(name, err.into_fatal())),
    };
    let executor = PythonExecutor::new(&config.executor);
    let outcome = verify_parser(&target, &config, &executor)?;
    println!("{}", report::render_verify(name, &outcome));
    Ok(outcome.exit_code())
}

fn report_fatal(name: &str, condition: FatalCondition) -> i32 {
    let outcome = AgentRunOutcome::fatal(condition, Vec::new());
    println!("{}", report::render_outcome(name, &outcome));
    exit_codes::for_status(outcome.status)
}
