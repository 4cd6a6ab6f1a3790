//! Stack file types.
//!
//! These structs map one-to-one onto `keel.yaml`. Property values stay as
//! raw JSON trees until composition turns them into resource values, so a
//! `{ref: "net.id"}` map is only recognized as a reference at that point.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::resource::{Reference, Value};

/// Key marking a property map as a reference.
pub const REF_KEY: &str = "ref";

/// Optional format template next to [`REF_KEY`].
pub const FORMAT_KEY: &str = "format";

/// Root of a stack file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Stack identity.
    pub stack: StackMeta,
    /// Environment variables that must be set before anything is planned.
    #[serde(default)]
    pub required_env: Vec<String>,
    /// Run settings.
    #[serde(default)]
    pub settings: Settings,
    /// Declared resources.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Stack outputs: name to literal or reference.
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
}

/// Stack identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackMeta {
    /// Stack name.
    pub name: String,
    /// Target environment (e.g. "dev", "stage", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Run settings; command-line flags take precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Maximum provider calls in flight.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Per-node timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// State file location, relative to the stack file.
    #[serde(default)]
    pub state_path: Option<String>,
}

/// One declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Logical name.
    pub name: String,
    /// Type tag.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Properties; `{ref: "res.attr"}` maps become references.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Explicit dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Only include in these environments.
    #[serde(default)]
    pub only_in: Vec<String>,
    /// Include everywhere except these environments.
    #[serde(default)]
    pub except_in: Vec<String>,
}

fn default_environment() -> String {
    String::from("dev")
}

impl ResourceConfig {
    /// Returns true if this resource belongs in `environment`.
    #[must_use]
    pub fn included_in(&self, environment: &str) -> bool {
        let allowed = self.only_in.is_empty() || self.only_in.iter().any(|e| e == environment);
        let excluded = self.except_in.iter().any(|e| e == environment);
        allowed && !excluded
    }
}

impl StackConfig {
    /// Stack outputs converted to values.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed references.
    pub fn output_values(&self) -> Result<BTreeMap<String, Value>, ConfigError> {
        self.outputs
            .iter()
            .map(|(name, raw)| Ok((name.clone(), to_value(raw, &format!("outputs.{name}"))?)))
            .collect()
    }
}

/// Converts a raw property tree into a value, recognizing references.
///
/// # Errors
///
/// Returns a validation error naming `field` when a reference map is
/// malformed.
pub fn to_value(raw: &serde_json::Value, field: &str) -> Result<Value, ConfigError> {
    match raw {
        serde_json::Value::Object(map) if map.contains_key(REF_KEY) => parse_reference(map, field),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), to_value(v, &format!("{field}.{k}"))?)))
            .collect::<Result<_, _>>()
            .map(Value::Map),
        serde_json::Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| to_value(v, &format!("{field}[{i}]")))
            .collect::<Result<_, _>>()
            .map(Value::List),
        other => Ok(Value::from(other.clone())),
    }
}

fn parse_reference(
    map: &serde_json::Map<String, serde_json::Value>,
    field: &str,
) -> Result<Value, ConfigError> {
    if let Some(extra) = map.keys().find(|k| *k != REF_KEY && *k != FORMAT_KEY) {
        return Err(ConfigError::validation(
            format!("unexpected key '{extra}' in reference"),
            field,
        ));
    }

    let target = map
        .get(REF_KEY)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ConfigError::validation("'ref' must be a string", field))?;

    let mut reference = Reference::parse(target).ok_or_else(|| {
        ConfigError::validation(
            format!("reference '{target}' must look like 'resource.attribute'"),
            field,
        )
    })?;

    if let Some(format) = map.get(FORMAT_KEY) {
        let format = format
            .as_str()
            .ok_or_else(|| ConfigError::validation("'format' must be a string", field))?;
        reference = reference.with_format(format);
    }

    Ok(Value::Reference(reference))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_map_becomes_reference() {
        let raw = json!({"ref": "net.outputs.id", "format": "net/{}"});
        let value = to_value(&raw, "properties.network").unwrap();
        assert_eq!(
            value,
            Value::Reference(Reference::new("net", "id").with_format("net/{}"))
        );
    }

    #[test]
    fn test_nested_reference() {
        let raw = json!({"labels": {"zone": {"ref": "net.zone"}}, "ports": [80, {"ref": "lb.port"}]});
        let Value::Map(map) = to_value(&raw, "properties").unwrap() else {
            panic!("expected map");
        };
        assert!(matches!(&map["ports"], Value::List(items) if matches!(items[1], Value::Reference(_))));
    }

    #[test]
    fn test_malformed_reference() {
        let err = to_value(&json!({"ref": "net"}), "properties.network").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError { field: Some(ref f), .. } if f == "properties.network"
        ));

        assert!(to_value(&json!({"ref": "net.id", "extra": 1}), "p").is_err());
        assert!(to_value(&json!({"ref": 3}), "p").is_err());
    }

    #[test]
    fn test_included_in() {
        let mut res = ResourceConfig {
            name: String::from("binding"),
            resource_type: String::from("null"),
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
            only_in: vec![String::from("prod")],
            except_in: Vec::new(),
        };
        assert!(res.included_in("prod"));
        assert!(!res.included_in("stage"));

        res.only_in.clear();
        res.except_in = vec![String::from("stage")];
        assert!(res.included_in("prod"));
        assert!(!res.included_in("stage"));
    }
}
