//! Prompt builder for the plan, generation and correction requests.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! After rendering, droppable sections are removed in a fixed order until the
//! prompt fits the byte budget; required sections are only ever truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::table::Table;
use crate::core::types::AttemptSummary;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const FIX_TEMPLATE: &str = include_str!("prompts/fix.md");

/// Expected-table rows shown to the model.
const PREVIEW_ROWS: usize = 5;

/// Droppable sections, least important first.
const DROP_ORDER: &[&str] = &["history", "preview", "plan"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker pattern is valid")
});

#[derive(Debug, Clone, Serialize)]
struct ColumnBrief {
    name: String,
    kind: &'static str,
}

/// What every prompt says about the target and its expected table.
#[derive(Debug, Clone)]
pub struct TargetBrief {
    pub bank: String,
    /// Where the accepted parser will live, as shown to the model.
    pub parser_file: String,
    columns: Vec<ColumnBrief>,
    row_count: usize,
    preview: String,
}

impl TargetBrief {
    pub fn new(bank: &str, parser_file: &str, expected: &Table) -> Self {
        let columns = expected
            .columns
            .iter()
            .zip(expected.column_kinds())
            .map(|(name, kind)| ColumnBrief {
                name: name.clone(),
                kind: kind.as_str(),
            })
            .collect();
        Self {
            bank: bank.to_string(),
            parser_file: parser_file.to_string(),
            columns,
            row_count: expected.row_count(),
            preview: expected.preview_csv(PREVIEW_ROWS).trim_end().to_string(),
        }
    }
}

/// The failed attempt a correction prompt responds to.
#[derive(Debug, Clone, Copy)]
pub struct Correction<'a> {
    /// Index of the attempt being written.
    pub attempt: u32,
    pub max_attempts: u32,
    pub previous_index: u32,
    pub previous_source: &'a str,
    pub diagnostic: &'a str,
    /// Summaries of failed attempts before `previous_index`.
    pub earlier: &'a [AttemptSummary],
}

#[derive(Debug, Clone, Serialize)]
struct HistoryItem<'a> {
    index: u32,
    failure: &'a str,
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output at section markers, keeping non-empty or required sections.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop sections in [`DROP_ORDER`], then truncate the largest remaining one.
fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    let excess = total - budget;
    let before_len = largest.content.len();
    let keep = before_len
        .saturating_sub(excess)
        .saturating_sub(TRUNCATION_MARKER.len());
    truncate_at_boundary(&mut largest.content, keep);
    largest.content.push_str(TRUNCATION_MARKER);
    debug!(
        section = largest.key,
        before_len,
        after_len = largest.content.len(),
        "truncated section for budget"
    );
}

fn truncate_at_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Renders budgeted prompts from the embedded templates.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("plan", PLAN_TEMPLATE)
            .context("load plan template")?;
        env.add_template("generate", GENERATE_TEMPLATE)
            .context("load generate template")?;
        env.add_template("fix", FIX_TEMPLATE)
            .context("load fix template")?;
        Ok(Self { env, budget_bytes })
    }

    /// Prompt asking for a JSON list of implementation steps.
    pub fn build_plan(&self, brief: &TargetBrief) -> Result<String> {
        let rendered = self
            .env
            .get_template("plan")?
            .render(context! {
                bank => &brief.bank,
                parser_file => &brief.parser_file,
                columns => &brief.columns,
                row_count => &brief.row_count,
                preview => &brief.preview,
            })
            .context("render plan prompt")?;
        Ok(self.finish(&rendered))
    }

    /// Prompt for the first attempt.
    pub fn build_generate(&self, brief: &TargetBrief, plan: &[String]) -> Result<String> {
        let rendered = self
            .env
            .get_template("generate")?
            .render(context! {
                bank => &brief.bank,
                parser_file => &brief.parser_file,
                columns => &brief.columns,
                row_count => &brief.row_count,
                preview => &brief.preview,
                plan => plan,
            })
            .context("render generate prompt")?;
        Ok(self.finish(&rendered))
    }

    /// Prompt for attempts after the first: embeds the previous source and its diagnostic.
    pub fn build_fix(
        &self,
        brief: &TargetBrief,
        plan: &[String],
        correction: &Correction<'_>,
    ) -> Result<String> {
        let history: Vec<HistoryItem<'_>> = correction
            .earlier
            .iter()
            .filter_map(|summary| {
                summary.failure.as_deref().map(|failure| HistoryItem {
                    index: summary.index,
                    failure,
                })
            })
            .collect();
        let rendered = self
            .env
            .get_template("fix")?
            .render(context! {
                bank => &brief.bank,
                parser_file => &brief.parser_file,
                columns => &brief.columns,
                row_count => &brief.row_count,
                preview => &brief.preview,
                plan => plan,
                attempt => correction.attempt,
                max_attempts => correction.max_attempts,
                previous_index => correction.previous_index,
                previous_source => correction.previous_source.trim_end(),
                diagnostic => correction.diagnostic.trim(),
                history => history,
            })
            .context("render fix prompt")?;
        Ok(self.finish(&rendered))
    }

    fn finish(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::Cell;

    fn expected() -> Table {
        Table::new(
            vec![
                "Date".to_string(),
                "Description".to_string(),
                "Balance".to_string(),
            ],
            vec![
                vec![
                    Cell::Text("01-08-2024".to_string()),
                    Cell::Text("Salary Credit XYZ Pvt Ltd".to_string()),
                    Cell::Text("6864.58".to_string()),
                ],
                vec![
                    Cell::Text("02-08-2024".to_string()),
                    Cell::Text("Salary, bonus".to_string()),
                    Cell::Text("5211.97".to_string()),
                ],
            ],
        )
    }

    fn brief() -> TargetBrief {
        TargetBrief::new("icici", "custom_parsers/icici_parser.py", &expected())
    }

    fn plan() -> Vec<String> {
        vec!["Extract text".to_string(), "Build DataFrame".to_string()]
    }

    #[test]
    fn plan_prompt_describes_columns_and_asks_for_json() {
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .build_plan(&brief())
            .expect("prompt");

        assert!(prompt.contains("Bank: ICICI"));
        assert!(prompt.contains("- Date (date)"));
        assert!(prompt.contains("- Balance (number)"));
        assert!(prompt.contains("\"Salary, bonus\""));
        assert!(prompt.contains("JSON list of strings"));
        assert!(!prompt.contains("<!--"));
    }

    #[test]
    fn generate_prompt_numbers_plan_steps_in_order() {
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .build_generate(&brief(), &plan())
            .expect("prompt");

        let contract = prompt.find("### Parser Contract").expect("contract");
        let columns = prompt.find("### Expected Columns").expect("columns");
        let step_one = prompt.find("1. Extract text").expect("step one");
        let step_two = prompt.find("2. Build DataFrame").expect("step two");
        assert!(contract < columns);
        assert!(columns < step_one);
        assert!(step_one < step_two);
        assert!(prompt.contains("custom_parsers/icici_parser.py"));
    }

    #[test]
    fn fix_prompt_embeds_previous_source_diagnostic_and_history() {
        let earlier = vec![AttemptSummary {
            index: 1,
            passed: false,
            failure: Some("runtime error".to_string()),
            diagnostic: Some("Runtime error while calling parse().".to_string()),
        }];
        let correction = Correction {
            attempt: 3,
            max_attempts: 3,
            previous_index: 2,
            previous_source: "def parse(pdf_path):\n    return None\n",
            diagnostic: "Schema mismatch: missing columns [Balance]",
            earlier: &earlier,
        };
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .build_fix(&brief(), &plan(), &correction)
            .expect("prompt");

        assert!(prompt.contains("Attempt: 3 of 3"));
        assert!(prompt.contains("### Previous Attempt 2"));
        assert!(prompt.contains("```python\ndef parse(pdf_path):\n    return None\n```"));
        assert!(prompt.contains("Schema mismatch: missing columns [Balance]"));
        assert!(prompt.contains("- Attempt 1: runtime error"));
    }

    #[test]
    fn fix_prompt_omits_empty_history() {
        let correction = Correction {
            attempt: 2,
            max_attempts: 3,
            previous_index: 1,
            previous_source: "import pandas as pd\n",
            diagnostic: "Missing entry point",
            earlier: &[],
        };
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .build_fix(&brief(), &plan(), &correction)
            .expect("prompt");

        assert!(!prompt.contains("### Earlier Attempts"));
    }

    #[test]
    fn budget_drops_preview_and_plan_before_required_sections() {
        let long_plan: Vec<String> = (0..50).map(|i| format!("step {i} {}", "x".repeat(40))).collect();
        let correction = Correction {
            attempt: 2,
            max_attempts: 3,
            previous_index: 1,
            previous_source: "def parse(pdf_path):\n    raise ValueError('x')\n",
            diagnostic: "Runtime error while calling parse().",
            earlier: &[],
        };
        let prompt = PromptBuilder::new(1_800)
            .expect("builder")
            .build_fix(&brief(), &long_plan, &correction)
            .expect("prompt");

        assert!(!prompt.contains("### Implementation Plan"));
        assert!(!prompt.contains("### Expected Output Sample"));
        assert!(prompt.contains("### Parser Contract"));
        assert!(prompt.contains("raise ValueError('x')"));
        assert!(prompt.contains("Runtime error while calling parse()."));
    }

    #[test]
    fn oversized_required_section_is_truncated_on_char_boundary() {
        let mut sections = vec![
            ParsedSection {
                key: "contract".to_string(),
                required: true,
                content: "contract".to_string(),
            },
            ParsedSection {
                key: "previous".to_string(),
                required: true,
                content: "é".repeat(500),
            },
        ];
        apply_budget(&mut sections, 200);

        assert_eq!(sections.len(), 2);
        assert!(sections[1].content.ends_with("[truncated]"));
        assert!(total_len(&sections) <= 200);
        assert_eq!(sections[0].content, "contract");
    }
}
