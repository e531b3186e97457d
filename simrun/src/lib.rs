//! Single-run driver for external numerical simulations.
//!
//! One invocation prepares a working directory, materializes inputs, runs the
//! simulation program, parses its output, decides whether the run converged,
//! and then prunes, archives and optionally removes the directory. The crate
//! keeps the same split as the rest of the tooling:
//!
//! - **[`core`]**: Pure, deterministic logic (stage ordering, exclusion rules,
//!   marker matching). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, processes, archives,
//!   config files). Collaborators sit behind traits so tests can script them.
//!
//! [`pipeline`] composes both into the fixed-order run.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
