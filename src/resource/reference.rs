//! References to other resources' outputs.

use serde_json::json;

use super::{Outputs, ResourceId};

/// Lazy pointer from a property to another resource's output attribute.
///
/// The attribute is a dotted path into the target's outputs. Numeric
/// segments index into arrays, so `records.0.rrdata` reads the `rrdata`
/// field of the first record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Target resource.
    pub resource: ResourceId,
    /// Dotted attribute path in the target's outputs.
    pub attribute: String,
    /// Optional template; `{}` is replaced by the resolved value.
    pub format: Option<String>,
}

impl Reference {
    /// Creates a reference to `resource`'s `attribute` output.
    #[must_use]
    pub fn new(resource: impl Into<ResourceId>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
            format: None,
        }
    }

    /// Sets a format template applied to the resolved value.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Parses `resource.attribute[.more]` notation.
    ///
    /// An `outputs.` segment right after the resource name is accepted and
    /// dropped, so `net.outputs.id` and `net.id` are equivalent.
    #[must_use]
    pub fn parse(target: &str) -> Option<Self> {
        let (resource, attribute) = target.split_once('.')?;
        let attribute = attribute.strip_prefix("outputs.").unwrap_or(attribute);
        if resource.is_empty() || attribute.is_empty() {
            return None;
        }
        Some(Self::new(resource, attribute))
    }

    /// Looks the attribute up in the target's outputs and applies the format.
    #[must_use]
    pub fn resolve(&self, outputs: &Outputs) -> Option<serde_json::Value> {
        let mut segments = self.attribute.split('.');
        let mut current = outputs.get(segments.next()?)?;

        for segment in segments {
            current = match current {
                serde_json::Value::Object(map) => map.get(segment)?,
                serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        Some(self.apply_format(current.clone()))
    }

    /// Placeholder used in place of a value that is not known yet.
    #[must_use]
    pub fn placeholder(&self) -> serde_json::Value {
        match &self.format {
            Some(format) => json!({ "$ref": self.to_string(), "$format": format }),
            None => json!({ "$ref": self.to_string() }),
        }
    }

    fn apply_format(&self, value: serde_json::Value) -> serde_json::Value {
        let Some(format) = &self.format else {
            return value;
        };

        let rendered = match &value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        serde_json::Value::String(format.replace("{}", &rendered))
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}
