//! I/O for repair commands: processes, sandbox, generator, files.

pub mod config;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod task;
pub mod transcript;
