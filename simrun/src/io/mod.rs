//! Side-effecting operations: filesystem, child processes, archives and
//! configuration files.

pub mod archive;
pub mod cleanup;
pub mod config;
pub mod convergence;
pub mod inputs;
pub mod library;
pub mod parser;
pub mod process;
pub mod removal;
pub mod workdir;
