//! Iterative code-repair agent.
//!
//! An attempt alternates between asking a generator for the next step and
//! running proposed code in a confined interpreter, feeding each result back
//! into the conversation until a verified answer is produced or the
//! iteration budget runs out. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (harness composition, output
//!   parsing, feedback, budgets). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (sandboxed processes, generator
//!   calls, config and task files, transcripts). Behind traits where tests
//!   need doubles.
//!
//! Orchestration modules ([`looping`], [`step`]) coordinate core logic with
//! I/O to implement the control loop.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
