//! Stable exit codes for repair CLI commands.

/// Attempt accepted, or execution succeeded.
pub const OK: i32 = 0;
/// Invalid input/config, or a host or generator failure.
pub const INVALID: i32 = 1;
/// `repair run` used its iteration budget without an accepted answer.
pub const EXHAUSTED: i32 = 2;
/// `repair exec` ran the code and it failed or timed out.
pub const FAILED: i32 = 3;
