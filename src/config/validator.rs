//! Stack validation.
//!
//! Collects every problem in one pass. Errors stop a run before planning;
//! warnings are printed and ignored. Self-references and references to
//! undeclared resources are only warnings here: the graph builder reports
//! the former as cycles and the planner the latter as unresolvable.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::error::{ConfigError, KeelError, Result};
use crate::resource::{Reference, Value};

use super::spec::{ResourceConfig, StackConfig, to_value};

/// Validator for stack files.
#[derive(Debug, Default)]
pub struct StackValidator {
    /// Type tags with a registered provider; empty disables the check.
    known_types: BTreeSet<String>,
}

/// Validation result containing all problems found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl StackValidator {
    /// Creates a validator that accepts any type tag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Warns about type tags outside `types`.
    #[must_use]
    pub fn with_known_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Collects every problem in `stack` without failing.
    #[must_use]
    pub fn check(&self, stack: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_meta(stack, &mut result);
        Self::validate_settings(stack, &mut result);
        self.validate_resources(stack, &mut result);
        Self::validate_outputs(stack, &mut result);

        result
    }

    /// Validates a stack.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, stack: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(stack);

        match result.errors.first() {
            None => {
                debug!("Stack validation passed");
                Ok(result)
            }
            Some(first) => Err(KeelError::Config(ConfigError::ValidationError {
                message: first.message.clone(),
                field: Some(first.field.clone()),
            })),
        }
    }

    fn validate_meta(stack: &StackConfig, result: &mut ValidationResult) {
        if stack.stack.name.is_empty() {
            result.error("stack.name", "Stack name cannot be empty");
        } else if !is_valid_name(&stack.stack.name) {
            result.error(
                "stack.name",
                format!(
                    "Stack name '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                    stack.stack.name
                ),
            );
        }

        if stack.stack.environment.is_empty() {
            result.error("stack.environment", "Environment cannot be empty");
        }

        for (i, name) in stack.required_env.iter().enumerate() {
            if name.is_empty() || name.contains(['=', '\0']) {
                result.error(
                    format!("required_env[{i}]"),
                    format!("'{name}' is not a valid environment variable name"),
                );
            }
        }
    }

    fn validate_settings(stack: &StackConfig, result: &mut ValidationResult) {
        if stack.settings.concurrency == Some(0) {
            result.error("settings.concurrency", "Concurrency must be at least 1");
        }
        if stack.settings.timeout_secs == Some(0) {
            result.error("settings.timeout_secs", "Timeout must be at least 1 second");
        }
    }

    fn validate_resources(&self, stack: &StackConfig, result: &mut ValidationResult) {
        if stack.resources.is_empty() {
            result.warnings.push(String::from("No resources defined in stack"));
            return;
        }

        let declared: HashSet<&str> = stack.resources.iter().map(|r| r.name.as_str()).collect();
        let environment = stack.stack.environment.as_str();
        let mut seen = HashSet::new();

        for (i, resource) in stack.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !is_valid_name(&resource.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                        resource.name
                    ),
                );
            }

            if resource.included_in(environment) && !seen.insert(resource.name.as_str()) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Duplicate resource name in {environment}: {}", resource.name),
                );
            }

            if resource.resource_type.is_empty() {
                result.error(format!("{prefix}.type"), "Resource type cannot be empty");
            } else if !self.known_types.is_empty() && !self.known_types.contains(&resource.resource_type) {
                result.warnings.push(format!(
                    "{prefix}: no provider registered for type '{}'",
                    resource.resource_type
                ));
            }

            Self::validate_conditions(resource, &prefix, result);
            Self::validate_dependencies(resource, &prefix, &declared, result);
            Self::validate_properties(resource, &prefix, &declared, result);
        }
    }

    fn validate_conditions(resource: &ResourceConfig, prefix: &str, result: &mut ValidationResult) {
        if !resource.only_in.is_empty() && !resource.except_in.is_empty() {
            result.warnings.push(format!(
                "{prefix}: both only_in and except_in are set; except_in wins on overlap"
            ));
        }
    }

    fn validate_dependencies(
        resource: &ResourceConfig,
        prefix: &str,
        declared: &HashSet<&str>,
        result: &mut ValidationResult,
    ) {
        for (j, dep) in resource.depends_on.iter().enumerate() {
            let field = format!("{prefix}.depends_on[{j}]");
            if *dep == resource.name {
                result.warnings.push(format!("{field}: resource '{}' depends on itself", resource.name));
            } else if !declared.contains(dep.as_str()) {
                result.error(field, format!("Unknown dependency '{dep}'"));
            }
        }
    }

    fn validate_properties(
        resource: &ResourceConfig,
        prefix: &str,
        declared: &HashSet<&str>,
        result: &mut ValidationResult,
    ) {
        for (name, raw) in &resource.properties {
            let field = format!("{prefix}.properties.{name}");
            match to_value(raw, &field) {
                Ok(value) => {
                    let mut references = Vec::new();
                    value.collect_references(&field, &mut references);
                    for (path, reference) in references {
                        if reference.resource.as_str() == resource.name {
                            result
                                .warnings
                                .push(format!("{path}: resource '{}' references itself", resource.name));
                        } else if !declared.contains(reference.resource.as_str()) {
                            result
                                .warnings
                                .push(format!("{path}: reference to undeclared resource '{}'", reference.resource));
                        }
                    }
                }
                Err(e) => result.error(field, e.to_string()),
            }
        }

        if resource.resource_type == "command" && !resource.properties.contains_key("create") {
            result.error(
                format!("{prefix}.properties.create"),
                "Command resources need a 'create' command",
            );
        }
    }

    fn validate_outputs(stack: &StackConfig, result: &mut ValidationResult) {
        let declared: HashSet<&str> = stack.resources.iter().map(|r| r.name.as_str()).collect();

        for (name, raw) in &stack.outputs {
            let field = format!("outputs.{name}");
            match to_value(raw, &field) {
                Ok(Value::Reference(Reference { resource, .. })) if !declared.contains(resource.as_str()) => {
                    result.error(field, format!("Output references undeclared resource '{resource}'"));
                }
                Ok(_) => {}
                Err(e) => result.error(field, e.to_string()),
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens or underscores,
/// starting with a letter.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') {
        return false;
    }

    // Cannot end with a separator
    if name.ends_with(['-', '_']) {
        return false;
    }

    !name.contains("--")
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
