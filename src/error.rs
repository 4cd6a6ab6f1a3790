//! Error types for the keel reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, graph construction, planning, provider calls, state
//! management, and reconciliation.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for keel.
#[derive(Debug, Error)]
pub enum KeelError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dependency graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Provider adapter errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
///
/// All of these are raised before a dependency graph is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stack file was not found.
    #[error("Stack file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The stack file could not be parsed.
    #[error("Failed to parse stack file: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Stack validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A required environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate resource name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },
}

/// Dependency graph errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The declared resources do not form a DAG.
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    Cycle {
        /// Resources on the cycle, first node repeated at the end.
        cycle: Vec<String>,
    },

    /// An explicit dependency names a resource that is not declared.
    #[error("Resource '{resource}' depends on undeclared resource '{dependency}'")]
    UnknownDependency {
        /// The declaring resource.
        resource: String,
        /// The missing dependency.
        dependency: String,
    },

    /// Two resources share a logical name.
    #[error("Duplicate resource name in graph: {name}")]
    DuplicateResource {
        /// The duplicated name.
        name: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A reference target will never be computed.
    #[error("Unresolvable reference in '{resource}.{property}' to '{target}': {reason}")]
    UnresolvableReference {
        /// Resource holding the reference.
        resource: String,
        /// Property path holding the reference.
        property: String,
        /// Referenced `resource.attribute`.
        target: String,
        /// Why it can never resolve.
        reason: String,
    },
}

/// Classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderErrorKind {
    /// May succeed on a later run without input change.
    Transient,
    /// Will not succeed without an input change.
    Permanent,
}

/// Error reported by a provider adapter for a single node.
#[derive(Debug, Clone, Error)]
#[error("{kind} failure in {resource_type} provider: {message}")]
pub struct ProviderError {
    /// Failure classification.
    pub kind: ProviderErrorKind,
    /// Type tag of the provider that failed.
    pub resource_type: String,
    /// Human-readable cause.
    pub message: String,
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Writing state failed.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State format version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: u32,
        /// Found state version.
        found: u32,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// One or more nodes did not apply.
    #[error("{failed} node(s) failed, {blocked} blocked")]
    NodesFailed {
        /// Number of failed nodes.
        failed: usize,
        /// Number of blocked nodes.
        blocked: usize,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for keel operations.
pub type Result<T> = std::result::Result<T, KeelError>;

impl KeelError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError {
                kind: ProviderErrorKind::Transient,
                ..
            }) | Self::State(StateError::LockedByOther { .. } | StateError::LockFailed { .. })
        )
    }

    /// Process exit code for this error.
    ///
    /// Graph and planning failures exit with 2, everything else with 1.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Graph(_) | Self::Plan(_) => 2,
            _ => 1,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error without a source location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient provider error.
    #[must_use]
    pub fn transient(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            resource_type: resource_type.into(),
            message: message.into(),
        }
    }

    /// Creates a permanent provider error.
    #[must_use]
    pub fn permanent(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            resource_type: resource_type.into(),
            message: message.into(),
        }
    }

    /// Returns true if a later run may succeed unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, ProviderErrorKind::Transient)
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        };
        write!(f, "{s}")
    }
}
