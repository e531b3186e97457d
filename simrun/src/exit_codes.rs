//! Stable exit codes for simrun CLI commands.

/// Command succeeded and, where a verdict applies, the run converged.
pub const OK: i32 = 0;
/// Command failed: invalid config, required stage failure, or other errors.
pub const FAILED: i32 = 1;
/// `simrun run` or `simrun check` completed but the run did not converge.
pub const NOT_CONVERGED: i32 = 2;
