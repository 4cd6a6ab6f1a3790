//! Property values.

use std::collections::BTreeMap;

use super::reference::Reference;

/// A property value: either a literal tree or a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Numeric literal.
    Number(serde_json::Number),
    /// String literal.
    String(String),
    /// Ordered list.
    List(Vec<Value>),
    /// Map with sorted keys.
    Map(BTreeMap<String, Value>),
    /// Deferred pointer to another resource's output.
    Reference(Reference),
}

/// Outcome of substituting references in a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Substituted {
    /// The value with every known reference replaced.
    pub value: serde_json::Value,
    /// References that had no known value and were left as placeholders.
    pub deferred: Vec<Reference>,
}

impl Value {
    /// Replaces references with values from `lookup`.
    ///
    /// References that `lookup` cannot answer become placeholders and are
    /// reported in [`Substituted::deferred`].
    pub fn substitute<F>(&self, lookup: &F) -> Substituted
    where
        F: Fn(&Reference) -> Option<serde_json::Value>,
    {
        let mut deferred = Vec::new();
        let value = self.substitute_into(lookup, &mut deferred);
        Substituted { value, deferred }
    }

    fn substitute_into<F>(&self, lookup: &F, deferred: &mut Vec<Reference>) -> serde_json::Value
    where
        F: Fn(&Reference) -> Option<serde_json::Value>,
    {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| item.substitute_into(lookup, deferred))
                    .collect(),
            ),
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.substitute_into(lookup, deferred)))
                    .collect(),
            ),
            Self::Reference(reference) => lookup(reference).unwrap_or_else(|| {
                deferred.push(reference.clone());
                reference.placeholder()
            }),
        }
    }

    /// Collects every reference in this value with its property path.
    pub fn collect_references<'a>(&'a self, path: &str, out: &mut Vec<(String, &'a Reference)>) {
        match self {
            Self::Reference(reference) => out.push((path.to_string(), reference)),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_references(&format!("{path}[{i}]"), out);
                }
            }
            Self::Map(entries) => {
                for (key, value) in entries {
                    value.collect_references(&format!("{path}.{key}"), out);
                }
            }
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Reference> for Value {
    fn from(reference: Reference) -> Self {
        Self::Reference(reference)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_substitute_known_and_deferred() {
        let mut entries = BTreeMap::new();
        entries.insert(String::from("network"), Value::from(Reference::new("net", "id")));
        entries.insert(String::from("zone"), Value::from(Reference::new("zone", "name")));
        entries.insert(String::from("port"), Value::from(8080));
        let value = Value::Map(entries);

        let substituted = value.substitute(&|r: &Reference| {
            (r.resource.as_str() == "net").then(|| json!("net-123"))
        });

        assert_eq!(
            substituted.value,
            json!({ "network": "net-123", "port": 8080, "zone": { "$ref": "zone.name" } })
        );
        assert_eq!(substituted.deferred, vec![Reference::new("zone", "name")]);
    }

    #[test]
    fn test_collect_nested_references() {
        let value = Value::List(vec![
            Value::from("literal"),
            Value::from(Reference::new("record", "rrdata")),
        ]);

        let mut refs = Vec::new();
        value.collect_references("rrdatas", &mut refs);

        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0, "rrdatas[1]");
    }
}
