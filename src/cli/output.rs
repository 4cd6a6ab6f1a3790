//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use std::collections::BTreeMap;
use std::fmt::Write;

use colored::Colorize;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::planner::{Action, InputHasher, NodeStatus, Plan};
use crate::reconciler::{DriftReport, DriftStatus, ReconciliationResult};
use crate::state::{LockInfo, StateFile};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan entry row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Node outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Time")]
    duration: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Applied record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Depends on")]
    dependencies: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn json<T: serde::Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_default()
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => Self::json(plan),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &Plan) -> String {
        if plan.is_empty() {
            return format!("{} No changes required - state is up to date.\n", "✓".green());
        }

        let mut output = String::from("\nPlan\n\n");

        let rows: Vec<PlanRow> = plan
            .actionable()
            .into_iter()
            .enumerate()
            .map(|(i, entry)| PlanRow {
                index: i + 1,
                action: Self::format_action(entry.action),
                resource: entry.id.to_string(),
                resource_type: entry.resource_type.clone(),
                reason: Self::truncate(&entry.reason, 50),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        for entry in plan.actionable().into_iter().filter(|e| !e.changes.is_empty()) {
            let _ = writeln!(output, "\n  {} {}", Self::format_action(entry.action), entry.id);
            for change in &entry.changes {
                let _ = writeln!(output, "      {change}");
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            plan.count(Action::Create).to_string().green(),
            plan.count(Action::Update).to_string().yellow(),
            plan.count(Action::Delete).to_string().red(),
            plan.count(Action::NoOp)
        );

        output
    }

    /// Formats an apply or destroy result.
    #[must_use]
    pub fn format_reconciliation(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => Self::json(result),
            OutputFormat::Text => {
                let report = &result.report;
                let status = if result.success() {
                    format!("{} {} complete", "✓".green(), result.operation)
                } else {
                    format!("{} {} failed", "✗".red(), result.operation)
                };

                let mut output = format!("{status}\n\n");

                let rows: Vec<OutcomeRow> = report
                    .outcomes
                    .iter()
                    .map(|o| OutcomeRow {
                        resource: o.id.to_string(),
                        action: o.action.to_string(),
                        status: Self::format_status(o.status),
                        duration: format!("{}ms", o.duration_ms),
                        detail: match (&o.error, &o.blocked_by) {
                            (Some(error), _) => Self::truncate(error, 60),
                            (None, Some(dep)) => format!("blocked by {dep}"),
                            (None, None) => String::new(),
                        },
                    })
                    .collect();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let _ = writeln!(output, "\n{report}");
                if result.attempts > 1 {
                    let _ = writeln!(output, "Attempts: {}", result.attempts);
                }

                if !result.outputs.is_empty() {
                    output.push_str("\nOutputs:\n");
                    output.push_str(&Self::format_outputs_text(&result.outputs));
                }

                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => Self::json(report),
            OutputFormat::Text => {
                if !report.has_drift() {
                    return format!("{} No drift detected - state is converged.\n", "✓".green());
                }

                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for entry in &report.entries {
                    let status = match &entry.status {
                        DriftStatus::InSync => continue,
                        DriftStatus::Missing => entry.status.to_string().red().to_string(),
                        DriftStatus::Changed(_) | DriftStatus::Error(_) => {
                            entry.status.to_string().yellow().to_string()
                        }
                    };
                    let _ = writeln!(output, "   - {} ({}): {status}", entry.id, entry.resource_type);
                }
                let _ = write!(
                    output,
                    "\n{}/{} resources have drifted.\n",
                    report.drifted().len(),
                    report.entries.len()
                );
                output
            }
        }
    }

    /// Formats stack outputs.
    #[must_use]
    pub fn format_outputs(&self, outputs: &BTreeMap<String, serde_json::Value>) -> String {
        match self.format {
            OutputFormat::Json => Self::json(outputs),
            OutputFormat::Text if outputs.is_empty() => String::from("No outputs.\n"),
            OutputFormat::Text => Self::format_outputs_text(outputs),
        }
    }

    fn format_outputs_text(outputs: &BTreeMap<String, serde_json::Value>) -> String {
        let mut output = String::new();
        for (name, value) in outputs {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = writeln!(output, "   {} = {rendered}", name.bold());
        }
        output
    }

    /// Formats the state summary.
    #[must_use]
    pub fn format_state(&self, state: &StateFile, lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => Self::json(state),
            OutputFormat::Text => {
                let mut output = String::from("\nState\n\n");

                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Serial: {}", state.serial);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.resources.len());
                let _ = writeln!(output, "   Outputs: {}", state.outputs.len());
                match lock {
                    Some(lock) => {
                        let _ = writeln!(
                            output,
                            "   Lock: {} held by {} ({}s left)",
                            lock.lock_id,
                            lock.holder,
                            lock.remaining().num_seconds()
                        );
                    }
                    None => output.push_str("   Lock: none\n"),
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent runs ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} applied, {} failed, {} blocked)",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.applied.len(),
                            entry.failed.len(),
                            entry.blocked.len()
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats the applied records as a table.
    #[must_use]
    pub fn format_records(&self, state: &StateFile) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&state.resources),
            OutputFormat::Text if state.resources.is_empty() => String::from("No resources applied.\n"),
            OutputFormat::Text => {
                let rows: Vec<RecordRow> = state
                    .resources
                    .iter()
                    .map(|(id, record)| RecordRow {
                        resource: id.to_string(),
                        resource_type: record.resource_type.clone(),
                        hash: InputHasher::short_hash(&record.inputs_hash),
                        dependencies: record
                            .dependencies
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", "),
                        updated: record.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Stack is valid.\n", "✓".green())
                } else {
                    let mut out = format!("{} {} error(s):\n", "✗".red(), result.error_count());
                    for error in &result.errors {
                        let _ = writeln!(out, "   - {error}");
                    }
                    out
                };

                if show_warnings && result.warning_count() > 0 {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats a one-line message.
    #[must_use]
    pub fn format_message(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&serde_json::json!({ "message": message })),
            OutputFormat::Text => format!("{message}\n"),
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        match action {
            Action::Create => "+create".green().to_string(),
            Action::Update => "~update".yellow().to_string(),
            Action::Delete => "-delete".red().to_string(),
            Action::NoOp => "no-op".dimmed().to_string(),
        }
    }

    /// Formats a node status with color.
    fn format_status(status: NodeStatus) -> String {
        let text = status.to_string();
        match status {
            NodeStatus::Applied => text.green().to_string(),
            NodeStatus::Failed => text.red().to_string(),
            NodeStatus::Blocked | NodeStatus::Cancelled => text.yellow().to_string(),
            NodeStatus::Unchanged => text.dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
