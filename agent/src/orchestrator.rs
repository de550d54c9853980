//! Plan → generate → test → self-fix loop for `parser-agent run`.
//!
//! Side effects happen here; every phase change goes through [`Machine`], so the
//! attempt budget and the in-place service retry are decided in one place.

use std::path::Path;
use std::thread;
use std::time::Instant;

use anyhow::{Result, bail};
use chrono::{SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::core::diagnostic::{describe_attempt, failure_label};
use crate::core::extract::{fallback_plan, parse_plan};
use crate::core::machine::{Event, MAX_ATTEMPTS, Machine, Phase};
use crate::core::types::{
    AgentRunOutcome, Attempt, AttemptError, AttemptSummary, FatalCondition, RunStatus,
};
use crate::core::validator::validate;
use crate::io::artifact::persist_parser;
use crate::io::attempt_log::{
    AttemptMeta, AttemptPaths, reset_bank_logs, write_candidate, write_outcome,
};
use crate::io::config::AgentConfig;
use crate::io::executor::{ExecOutcome, ExecRequest, ParserExecutor};
use crate::io::generation::{CompletionClient, GenerationError, generate_source};
use crate::io::prompt::{Correction, PromptBuilder, TargetBrief};
use crate::io::samples::{Sample, Target, load_sample};

/// Run the agent for one target until success, exhaustion or a fatal condition.
///
/// `on_attempt` is called once per finished attempt, in order. Infrastructure
/// failures (attempt log or parser cannot be written, interpreter cannot be
/// spawned) are returned as errors; everything else ends up in the outcome.
#[instrument(skip_all, fields(bank = %target.name))]
pub fn run_agent<C, X, F>(
    root: &Path,
    target: &Target,
    config: &AgentConfig,
    client: &C,
    executor: &X,
    mut on_attempt: F,
) -> Result<AgentRunOutcome>
where
    C: CompletionClient,
    X: ParserExecutor,
    F: FnMut(&AttemptSummary),
{
    let mut machine = Machine::new(MAX_ATTEMPTS);
    let mut summaries: Vec<AttemptSummary> = Vec::new();

    let sample = match load_sample(target) {
        Ok(sample) => sample,
        Err(err) => {
            warn!(err = %err, "sample rejected");
            machine.apply(Event::InputRejected)?;
            return Ok(AgentRunOutcome::fatal(err.into_fatal(), summaries));
        }
    };

    let state_dir = root.join(&config.state_dir);
    reset_bank_logs(&state_dir, &target.name)?;

    let prompts = PromptBuilder::new(config.prompt_budget_bytes)?;
    let parser_file = target
        .output_parser_path
        .strip_prefix(root)
        .unwrap_or(&target.output_parser_path)
        .display()
        .to_string();
    let brief = TargetBrief::new(&target.name, &parser_file, &sample.expected);

    let plan = match request_plan(client, &prompts.build_plan(&brief)?) {
        Ok(plan) => plan,
        Err(message) => {
            machine.apply(Event::QuotaExhausted)?;
            return Ok(AgentRunOutcome::fatal(
                FatalCondition::QuotaExhausted { message },
                summaries,
            ));
        }
    };
    info!(steps = plan.len(), "plan ready");
    machine.apply(Event::PlanReady)?;

    let mut previous_source = String::new();
    loop {
        let index = machine.attempt();
        let started = Instant::now();
        let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let prompt = match summaries.split_last() {
            None => prompts.build_generate(&brief, &plan)?,
            Some((last, earlier)) => prompts.build_fix(
                &brief,
                &plan,
                &Correction {
                    attempt: index,
                    max_attempts: machine.max_attempts(),
                    previous_index: last.index,
                    previous_source: &previous_source,
                    diagnostic: last.diagnostic.as_deref().unwrap_or_default(),
                    earlier,
                },
            )?,
        };

        let mut attempt = Attempt::new(index);
        let generated = loop {
            match generate_source(client, &prompt) {
                Ok(source) => break Some(source),
                Err(GenerationError::EmptyResponse) => break None,
                Err(GenerationError::Quota { message }) => {
                    machine.apply(Event::QuotaExhausted)?;
                    return Ok(AgentRunOutcome::fatal(
                        FatalCondition::QuotaExhausted { message },
                        summaries,
                    ));
                }
                Err(GenerationError::Service { message }) => {
                    if machine.apply(Event::ServiceFailed)? == Phase::FatalError {
                        return Ok(AgentRunOutcome::fatal(
                            FatalCondition::ServiceUnavailable { message },
                            summaries,
                        ));
                    }
                    warn!(attempt = index, message = %message, "generation failed, retrying in place");
                    thread::sleep(config.service_retry_delay());
                }
            }
        };

        let paths = AttemptPaths::new(&state_dir, &target.name, index);
        let phase = match generated {
            None => {
                attempt.execution_error = Some(AttemptError::EmptyResponse);
                machine.apply(Event::AttemptFailed)?
            }
            Some(source) => {
                attempt.generated_source = source;
                machine.apply(Event::SourceGenerated)?;
                write_candidate(&paths, &attempt.generated_source)?;
                test_candidate(&mut attempt, &sample, &paths, config, executor)?;
                machine.apply(Event::ExecutionFinished)?;
                if attempt.passed() {
                    machine.apply(Event::AttemptPassed)?
                } else {
                    machine.apply(Event::AttemptFailed)?
                }
            }
        };

        if phase == Phase::Success {
            persist_parser(&target.output_parser_path, &attempt.generated_source)?;
        }

        let summary = AttemptSummary {
            index,
            passed: attempt.passed(),
            failure: failure_label(&attempt),
            diagnostic: describe_attempt(&attempt),
        };
        write_outcome(
            &paths,
            &AttemptMeta {
                bank: target.name.clone(),
                attempt: index,
                passed: summary.passed,
                failure: summary.failure.clone(),
                execution_error: attempt.execution_error.clone(),
                validation: attempt.validation_result.clone(),
                started_at,
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            },
            summary.diagnostic.as_deref(),
        )?;
        info!(
            attempt = index,
            passed = summary.passed,
            failure = summary.failure.as_deref().unwrap_or(""),
            "attempt finished"
        );
        on_attempt(&summary);
        summaries.push(summary);

        match phase {
            Phase::Success => {
                return Ok(AgentRunOutcome {
                    status: RunStatus::Success,
                    attempts: summaries,
                    final_parser_path: Some(target.output_parser_path.clone()),
                    fatal: None,
                });
            }
            Phase::ExhaustedRetries => {
                return Ok(AgentRunOutcome {
                    status: RunStatus::ExhaustedRetries,
                    attempts: summaries,
                    final_parser_path: None,
                    fatal: None,
                });
            }
            Phase::Retrying => {
                machine.apply(Event::RetryPrepared)?;
                previous_source = attempt.generated_source;
            }
            other => bail!("attempt {index} ended in non-final phase {other:?}"),
        }
    }
}

/// Ask for a plan. Only quota exhaustion is an error; anything else falls back
/// to the default plan.
fn request_plan<C: CompletionClient>(client: &C, prompt: &str) -> Result<Vec<String>, String> {
    match client.complete(prompt) {
        Ok(response) => Ok(parse_plan(&response).unwrap_or_else(|| {
            warn!("plan response was not a JSON list, using fallback plan");
            fallback_plan()
        })),
        Err(GenerationError::Quota { message }) => Err(message),
        Err(err) => {
            warn!(err = %err, "planning failed, using fallback plan");
            Ok(fallback_plan())
        }
    }
}

fn test_candidate<X: ParserExecutor>(
    attempt: &mut Attempt,
    sample: &Sample,
    paths: &AttemptPaths,
    config: &AgentConfig,
    executor: &X,
) -> Result<()> {
    let outcome = executor.execute(&ExecRequest {
        source: attempt.generated_source.clone(),
        pdf_path: sample.pdf_path.clone(),
        log_path: Some(paths.executor_log_path.clone()),
        timeout: config.exec_timeout(),
        output_limit_bytes: config.executor.output_limit_bytes,
    })?;
    match outcome {
        ExecOutcome::Parsed(table) => {
            attempt.validation_result = Some(validate(&table, &sample.expected));
        }
        ExecOutcome::Failed(err) => attempt.execution_error = Some(err),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedClient;

    #[test]
    fn plan_is_parsed_from_json_list() {
        let client = ScriptedClient::new(vec![Ok(
            "```json\n[\"Extract text\", \"Build frame\"]\n```".to_string()
        )]);
        assert_eq!(
            request_plan(&client, "plan"),
            Ok(vec!["Extract text".to_string(), "Build frame".to_string()])
        );
    }

    #[test]
    fn unparseable_or_failed_plans_fall_back() {
        let client = ScriptedClient::new(vec![
            Ok("I would start by reading the PDF.".to_string()),
            Err(GenerationError::Service {
                message: "HTTP 502".to_string(),
            }),
        ]);
        assert_eq!(request_plan(&client, "plan"), Ok(fallback_plan()));
        assert_eq!(request_plan(&client, "plan"), Ok(fallback_plan()));
    }

    #[test]
    fn quota_during_planning_is_an_error() {
        let client = ScriptedClient::new(vec![Err(GenerationError::Quota {
            message: "HTTP 429".to_string(),
        })]);
        assert_eq!(request_plan(&client, "plan"), Err("HTTP 429".to_string()));
    }
}
