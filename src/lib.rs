// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Keel
//!
//! A declarative, idempotent reconciliation engine for resource graphs.
//!
//! ## Overview
//!
//! Keel takes a set of declared resources, works out how they depend on
//! each other, compares them with what was last applied, and drives
//! provider adapters until the real world matches the declaration:
//!
//! - Declare resources in a YAML stack file, per environment
//! - Wire resources together with references to each other's outputs
//! - Plan before applying and see every create, update and delete
//! - Apply with bounded concurrency; a failure only blocks its dependents
//! - Rerun safely: an applied stack plans to all no-ops
//!
//! ## Architecture
//!
//! A run flows through these stages:
//!
//! 1. **Configuration**: the stack file is loaded and composed for one environment
//! 2. **Graph**: references and explicit dependencies become a DAG
//! 3. **Planner**: declared resources are diffed against stored records
//! 4. **Executor**: plan entries run in dependency order against providers
//! 5. **State**: each finished node is committed durably on its own
//!
//! ## Modules
//!
//! - [`resource`]: Resources, values and references
//! - [`graph`]: Dependency graph construction and ordering
//! - [`planner`]: Plans, diffs and plan execution
//! - [`provider`]: Provider adapters and the registry
//! - [`state`]: State storage backends
//! - [`config`]: Stack file parsing, validation and composition
//! - [`reconciler`]: Whole runs under the state lock
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: web
//!   environment: prod
//!
//! resources:
//!   - name: net
//!     type: "null"
//!     properties:
//!       cidr: 10.0.0.0/16
//!   - name: svc
//!     type: command
//!     properties:
//!       create: "deploy --network $NETWORK"
//!       environment:
//!         NETWORK: { ref: net.id }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod resource;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{StackConfig, StackParser, StackValidator, compose};
pub use error::{KeelError, Result};
pub use graph::DependencyGraph;
pub use planner::{ApplyReport, Plan, PlanExecutor, Planner};
pub use provider::{Provider, ProviderRegistry};
pub use reconciler::{DriftReport, ReconciliationResult, Reconciler};
pub use resource::{Reference, Resource, ResourceId, Value};
pub use state::{LocalStateStore, MemoryStateStore, StateStore};
