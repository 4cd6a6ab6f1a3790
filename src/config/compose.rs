//! Environment composition.
//!
//! Turns a stack into the unconditional resource set for one environment.
//! Resources excluded by `only_in` / `except_in` simply do not exist in
//! the composed set, so the graph builder never sees a conditional edge.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::{ConfigError, Result};
use crate::graph::DependencyGraph;
use crate::resource::{Resource, ResourceId, Value};

use super::spec::{StackConfig, to_value};
use super::validator::StackValidator;

/// A validated stack composed for its environment.
#[derive(Debug)]
pub struct MaterializedStack {
    /// Dependency graph of the included resources.
    pub graph: DependencyGraph,
    /// Stack outputs, references not yet resolved.
    pub outputs: BTreeMap<String, Value>,
    /// Non-fatal validation findings.
    pub warnings: Vec<String>,
}

/// Validates `stack`, composes it for `stack.environment` and builds the graph.
///
/// Reference problems are left to the graph builder and the planner, which
/// report them as cycles and unresolvable references.
///
/// # Errors
///
/// Returns the first validation error, a composition error, or a
/// [`GraphError`](crate::error::GraphError) from building the graph.
pub fn materialize(stack: &StackConfig, validator: &StackValidator) -> Result<MaterializedStack> {
    let validation = validator.validate(stack)?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let resources = compose(stack, &stack.stack.environment)?;
    let outputs = stack.output_values()?;
    let graph = DependencyGraph::build(resources)?;

    Ok(MaterializedStack {
        graph,
        outputs,
        warnings: validation.warnings,
    })
}

/// Materializes the resources of `stack` that apply to `environment`.
///
/// # Errors
///
/// Returns [`ConfigError::DuplicateName`] if two included resources share
/// a name, or a validation error for malformed references.
pub fn compose(stack: &StackConfig, environment: &str) -> Result<Vec<Resource>> {
    let mut resources: Vec<Resource> = Vec::with_capacity(stack.resources.len());

    for (i, declared) in stack.resources.iter().enumerate() {
        if !declared.included_in(environment) {
            debug!("Skipping {} in environment {environment}", declared.name);
            continue;
        }

        if resources.iter().any(|r| r.id.as_str() == declared.name) {
            return Err(ConfigError::DuplicateName {
                name: declared.name.clone(),
            }
            .into());
        }

        let mut resource = Resource::new(declared.name.as_str(), declared.resource_type.as_str());
        for (name, raw) in &declared.properties {
            let value = to_value(raw, &format!("resources[{i}].properties.{name}"))?;
            resource.properties.insert(name.clone(), value);
        }
        resource.depends_on = declared
            .depends_on
            .iter()
            .map(|d| ResourceId::from(d.as_str()))
            .collect();

        resources.push(resource);
    }

    debug!(
        "Composed {} of {} resources for {environment}",
        resources.len(),
        stack.resources.len()
    );
    Ok(resources)
}
