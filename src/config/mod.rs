//! Stack configuration.
//!
//! This module handles everything that happens before a graph is built:
//! - Parsing `keel.yaml` and loading `.env` files
//! - Checking required environment variables and `${env:NAME}` interpolation
//! - Validating the stack
//! - Composing the resource set for one environment and building its graph

mod compose;
mod parser;
mod spec;
mod validator;

pub use compose::{MaterializedStack, compose, materialize};
pub use parser::{
    DEFAULT_STACK_FILES, StackParser, check_required_env, find_stack_file, interpolate_str, prepare,
};
pub use spec::{FORMAT_KEY, REF_KEY, ResourceConfig, Settings, StackConfig, StackMeta, to_value};
pub use validator::{StackValidator, ValidationError, ValidationResult, is_valid_name};
