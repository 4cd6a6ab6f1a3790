//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Keel - declarative resource graph reconciliation.
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the stack file.
    #[arg(short, long, global = true, env = "KEEL_STACK")]
    pub stack: Option<PathBuf>,

    /// Target environment; overrides the stack file.
    #[arg(short, long, global = true, env = "KEEL_ENVIRONMENT")]
    pub environment: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Executor flags shared by `apply` and `destroy`.
#[derive(clap::Args, Debug, Clone, Copy, Default)]
pub struct RunArgs {
    /// Maximum provider calls in flight.
    #[arg(long, env = "KEEL_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Per-resource operation timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Runs to attempt while every failure is transient.
    #[arg(long, default_value = "1")]
    pub attempts: u32,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stack.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the stack file.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what apply would change.
    Plan {
        /// Plan the deletion of every applied resource instead.
        #[arg(long)]
        destroy: bool,
    },

    /// Plan and apply changes.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Executor flags.
        #[command(flatten)]
        run: RunArgs,
    },

    /// Delete every applied resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Executor flags.
        #[command(flatten)]
        run: RunArgs,
    },

    /// Compare applied records with live provider state.
    Drift,

    /// Show stack outputs from the last successful apply.
    Outputs,

    /// Inspect and manage state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the state summary and recent runs.
    Show,

    /// List applied resources.
    List,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },

    /// Forget a resource without deleting it.
    Rm {
        /// Resource name.
        #[arg(required_unless_present = "all")]
        name: Option<String>,

        /// Forget every resource.
        #[arg(long, conflicts_with = "name")]
        all: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per log event.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply_flags() {
        let cli = Cli::try_parse_from([
            "keel",
            "--environment",
            "prod",
            "apply",
            "--yes",
            "--concurrency",
            "2",
            "--timeout-secs",
            "30",
            "--attempts",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.environment.as_deref(), Some("prod"));
        let Commands::Apply { yes, run } = cli.command else {
            panic!("expected apply");
        };
        assert!(yes);
        assert_eq!(run.concurrency, Some(2));
        assert_eq!(run.timeout_secs, Some(30));
        assert_eq!(run.attempts, 3);
    }

    #[test]
    fn test_parse_state_rm_and_json_output() {
        let cli = Cli::try_parse_from(["keel", "state", "rm", "svc", "--output", "json"]).unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::State { command: StateCommands::Rm { ref name, all: false } } if name.as_deref() == Some("svc")
        ));
    }

    #[test]
    fn test_parse_state_rm_all() {
        let cli = Cli::try_parse_from(["keel", "state", "rm", "--all"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::State { command: StateCommands::Rm { name: None, all: true } }
        ));
        assert!(Cli::try_parse_from(["keel", "state", "rm"]).is_err());
    }

    #[test]
    fn test_verify_command() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
