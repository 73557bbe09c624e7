//! Command-line interface for the `rocketdesk` binary.
//!
//! Provides argument parsing and command dispatch.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands};
