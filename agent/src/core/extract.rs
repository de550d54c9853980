//! Pull usable payloads out of free-form LLM responses.

use serde_json::Value;

/// Plan used when the model does not return a parseable step list.
pub const FALLBACK_PLAN: &[&str] = &[
    "Extract text from the PDF page by page with pdfplumber",
    "Clean and normalize the extracted lines",
    "Identify transaction rows with regular expressions",
    "Parse dates, descriptions, debit/credit amounts and balances",
    "Build a pandas DataFrame with exactly the expected columns in order",
    "Handle wrapped descriptions, page headers and empty amounts",
];

/// Fence tags accepted as Python, compared case-insensitively.
const PYTHON_TAGS: &[&str] = &["python", "py", "python3", "py3"];

/// Line prefixes that mark the start of Python source when no fence is present.
const CODE_LINE_PREFIXES: &[&str] = &[
    "import ", "from ", "def ", "class ", "#", "\"\"\"", "'''", "@",
];

/// Extract module source from a completion.
///
/// Prefers the first block tagged as Python (`python`, `py`, `python3`), then the
/// first fenced block of any language, then the whole response with leading and
/// trailing prose dropped. Returns `None` when nothing but whitespace remains.
pub fn extract_source(response: &str) -> Option<String> {
    let source = fenced_block(response, PYTHON_TAGS)
        .or_else(|| fenced_block(response, &[]))
        .unwrap_or_else(|| strip_prose(response));
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut out = trimmed.to_string();
    out.push('\n');
    Some(out)
}

/// Parse a plan as a list of step strings.
///
/// Accepts a ```` ```json ```` fence or the outermost `[...]` span. Object steps are
/// rendered as compact JSON so nothing the model said is lost.
pub fn parse_plan(response: &str) -> Option<Vec<String>> {
    let candidate = match fenced_block(response, &["json"]) {
        Some(block) => block,
        None => {
            let start = response.find('[')?;
            let end = response.rfind(']')?;
            if end <= start {
                return None;
            }
            response[start..=end].to_string()
        }
    };
    let steps: Vec<Value> = serde_json::from_str(candidate.trim()).ok()?;
    let steps: Vec<String> = steps
        .into_iter()
        .map(|step| match step {
            Value::String(text) => text,
            other => other.to_string(),
        })
        .filter(|step| !step.trim().is_empty())
        .collect();
    (!steps.is_empty()).then_some(steps)
}

pub fn fallback_plan() -> Vec<String> {
    FALLBACK_PLAN.iter().map(|step| step.to_string()).collect()
}

/// Return the body of the first fenced block whose tag is one of `languages`.
/// An empty `languages` matches any block.
///
/// An unterminated fence runs to the end of the text.
fn fenced_block(text: &str, languages: &[&str]) -> Option<String> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find("```") {
        let fence_start = search_from + offset;
        let after_ticks = fence_start + 3;
        let line_end = text[after_ticks..]
            .find('\n')
            .map(|idx| after_ticks + idx)
            .unwrap_or(text.len());
        let tag = text[after_ticks..line_end].trim();
        let body_start = (line_end + 1).min(text.len());

        let matches = languages.is_empty()
            || languages.iter().any(|lang| tag.eq_ignore_ascii_case(lang));
        let body_end = text[body_start..]
            .find("```")
            .map(|idx| body_start + idx)
            .unwrap_or(text.len());
        if matches {
            return Some(text[body_start..body_end].to_string());
        }
        // Skip past this block's closing fence.
        search_from = (body_end + 3).min(text.len());
        if search_from >= text.len() {
            break;
        }
    }
    None
}

/// Keep the span from the first code-looking line through the last line that is
/// not trailing commentary.
fn strip_prose(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let Some(first_code) = lines.iter().position(|line| starts_like_code(line)) else {
        return text.to_string();
    };
    let last_code = lines
        .iter()
        .rposition(|line| !line.trim().is_empty() && !is_prose_line(line))
        .unwrap_or(first_code)
        .max(first_code);
    lines[first_code..=last_code].join("\n")
}

fn starts_like_code(line: &str) -> bool {
    let trimmed = line.trim_start();
    CODE_LINE_PREFIXES
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}

/// Unindented sentence or list item that cannot be a Python statement.
///
/// Python statements at column zero start with a lowercase keyword, an
/// identifier followed by `=`, or a code prefix; commentary usually starts
/// with a capital letter or a list marker.
fn is_prose_line(line: &str) -> bool {
    if line.starts_with(char::is_whitespace) || starts_like_code(line) || line.contains('=') {
        return false;
    }
    let numbered = line.split_once(". ").is_some_and(|(marker, _)| {
        !marker.is_empty() && marker.chars().all(|c| c.is_ascii_digit())
    });
    numbered
        || line.starts_with("- ")
        || line.starts_with("* ")
        || line.starts_with(|c: char| c.is_ascii_uppercase())
}
