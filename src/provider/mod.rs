//! Provider adapters.
//!
//! A [`Provider`] performs create, read, update and delete against some
//! backing system for one resource type. Providers are looked up by type
//! tag in a [`ProviderRegistry`].

mod command;
mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::resource::{Outputs, ResolvedResource};

pub use command::CommandProvider;
pub use memory::{Call, CallKind, MemoryProvider};

/// Per-call context handed to providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    /// Run-wide cancellation signal. Advisory for in-flight calls.
    pub cancel: CancellationToken,
}

impl ProviderContext {
    /// Creates a context bound to a run's cancellation token.
    #[must_use]
    pub const fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

/// Adapter between the engine and a backing system.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates the resource and returns its live outputs.
    async fn create(
        &self,
        resource: &ResolvedResource,
        ctx: &ProviderContext,
    ) -> Result<Outputs, ProviderError>;

    /// Reads live outputs; `None` when the resource no longer exists.
    async fn read(
        &self,
        resource: &ResolvedResource,
        outputs: &Outputs,
        ctx: &ProviderContext,
    ) -> Result<Option<Outputs>, ProviderError>;

    /// Updates the resource in place from its prior outputs.
    async fn update(
        &self,
        resource: &ResolvedResource,
        prior: &Outputs,
        ctx: &ProviderContext,
    ) -> Result<Outputs, ProviderError>;

    /// Deletes the resource. Deleting a missing resource succeeds.
    async fn delete(
        &self,
        resource: &ResolvedResource,
        outputs: &Outputs,
        ctx: &ProviderContext,
    ) -> Result<(), ProviderError>;
}

/// Providers keyed by resource type tag.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled `null` and `command` providers.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("null", Arc::new(MemoryProvider::new()));
        registry.register("command", Arc::new(CommandProvider::new()));
        registry
    }

    /// Registers `provider` for `resource_type`, replacing any previous one.
    pub fn register(&mut self, resource_type: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(resource_type.into(), provider);
    }

    /// Looks up the provider for a type tag.
    ///
    /// # Errors
    ///
    /// Returns a permanent error for unknown type tags.
    pub fn get(&self, resource_type: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers.get(resource_type).cloned().ok_or_else(|| {
            ProviderError::permanent(
                resource_type,
                format!("no provider registered for type '{resource_type}'"),
            )
        })
    }

    /// Registered type tags.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;

    #[test]
    fn test_builtin_types() {
        let registry = ProviderRegistry::with_builtin();
        assert_eq!(registry.types(), vec!["command", "null"]);
    }

    #[test]
    fn test_unknown_type_is_permanent() {
        let registry = ProviderRegistry::new();
        let err = registry.get("dns").err().unwrap();
        assert_eq!(err.kind, ProviderErrorKind::Permanent);
        assert_eq!(err.resource_type, "dns");
    }
}
