//! Deterministic, pure logic shared by the agent.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod diagnostic;
pub mod extract;
pub mod machine;
pub mod normalize;
pub mod table;
pub mod types;
pub mod validator;
