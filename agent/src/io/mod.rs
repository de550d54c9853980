//! I/O for agent runs: samples, generation, execution and on-disk artifacts.

pub mod artifact;
pub mod attempt_log;
pub mod config;
pub mod executor;
pub mod generation;
pub mod process;
pub mod prompt;
pub mod samples;
