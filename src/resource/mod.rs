//! Resource model.
//!
//! A [`Resource`] is a typed, named unit of desired state. Its properties
//! are [`Value`] trees that may embed [`Reference`]s to other resources'
//! outputs; those references are implicit dependency edges.

mod reference;
mod value;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use reference::Reference;
pub use value::{Substituted, Value};

/// Live attributes reported by a provider after an apply.
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// Stable logical name of a resource, unique within a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates an identifier from a logical name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the logical name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl std::borrow::Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A declared unit of desired state.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Logical name.
    pub id: ResourceId,
    /// Type tag; selects the provider adapter.
    pub resource_type: String,
    /// Property name to value-or-reference.
    pub properties: BTreeMap<String, Value>,
    /// Explicit dependencies.
    pub depends_on: Vec<ResourceId>,
}

/// A resource with every reference replaced by a concrete value.
///
/// This is what provider adapters receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedResource {
    /// Logical name.
    pub id: ResourceId,
    /// Type tag.
    pub resource_type: String,
    /// Fully resolved properties.
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Resource {
    /// Creates a resource with no properties.
    #[must_use]
    pub fn new(name: impl Into<ResourceId>, resource_type: impl Into<String>) -> Self {
        Self {
            id: name.into(),
            resource_type: resource_type.into(),
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Sets a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn depends_on(mut self, dependency: impl Into<ResourceId>) -> Self {
        let dependency = dependency.into();
        if !self.depends_on.contains(&dependency) {
            self.depends_on.push(dependency);
        }
        self
    }

    /// Every reference in the properties, with its property path.
    #[must_use]
    pub fn references(&self) -> Vec<(String, &Reference)> {
        let mut out = Vec::new();
        for (name, value) in &self.properties {
            value.collect_references(name, &mut out);
        }
        out
    }

    /// Explicit dependencies followed by referenced resources, deduplicated.
    #[must_use]
    pub fn dependencies(&self) -> Vec<ResourceId> {
        let mut deps = self.depends_on.clone();
        for (_, reference) in self.references() {
            if !deps.contains(&reference.resource) {
                deps.push(reference.resource.clone());
            }
        }
        deps
    }

    /// Substitutes references using `lookup`, leaving placeholders for the rest.
    ///
    /// Returns the substituted properties and the references left deferred.
    pub fn substitute<F>(&self, lookup: &F) -> (BTreeMap<String, serde_json::Value>, Vec<Reference>)
    where
        F: Fn(&Reference) -> Option<serde_json::Value>,
    {
        let mut deferred = Vec::new();
        let properties = self
            .properties
            .iter()
            .map(|(name, value)| {
                let substituted = value.substitute(lookup);
                deferred.extend(substituted.deferred);
                (name.clone(), substituted.value)
            })
            .collect();
        (properties, deferred)
    }

    /// Fully resolves the resource.
    ///
    /// # Errors
    ///
    /// Returns the first reference that `lookup` could not answer.
    pub fn resolve<F>(&self, lookup: &F) -> std::result::Result<ResolvedResource, Reference>
    where
        F: Fn(&Reference) -> Option<serde_json::Value>,
    {
        let (properties, deferred) = self.substitute(lookup);
        if let Some(missing) = deferred.into_iter().next() {
            return Err(missing);
        }
        Ok(ResolvedResource {
            id: self.id.clone(),
            resource_type: self.resource_type.clone(),
            properties,
        })
    }
}

impl ResolvedResource {
    /// Reads a string property.
    #[must_use]
    pub fn str_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(serde_json::Value::as_str)
    }
}
