//! Deterministic, pure logic shared by the repair loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod conversation;
pub mod feedback;
pub mod generation;
pub mod harness;
pub mod parser;
pub mod syntax;
pub mod types;
