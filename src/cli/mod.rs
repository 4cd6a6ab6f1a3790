//! CLI module for the keel tool.
//!
//! This module provides the command-line interface for planning and
//! applying stacks.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, RunArgs, StateCommands};
pub use output::OutputFormatter;
