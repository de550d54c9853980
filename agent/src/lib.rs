//! LLM-driven generator of bank statement parsers.
//!
//! Given a sample statement PDF and the table it should produce, the agent asks
//! a chat model for a Python module exposing `parse(pdf_path)`, runs it against
//! the sample, compares the result with the expected CSV and feeds failures back
//! into the next request, for at most three attempts. The crate is split into:
//!
//! - **[`core`]**: Pure, deterministic logic (normalization, validation, the
//!   self-fix state machine, response extraction, diagnostics). No I/O.
//! - **[`io`]**: Side effects (sample files, HTTP generation, Python execution,
//!   prompts, attempt logs, the persisted parser).
//!
//! [`orchestrator`] and [`verify`] combine the two to implement the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod verify;
