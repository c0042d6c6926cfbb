//! Dynamic parameter values.
//!
//! Skills receive free-form parameters and return free-form payloads. Rather
//! than passing raw JSON maps around, parameters are held as [`ParamValue`]s
//! inside an ordered [`ExecutionParams`] map, with explicit conversions to and
//! from `serde_json::Value` at the protocol boundary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A single dynamically typed parameter value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Absent / JSON `null`.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Ordered list of values.
    List(Vec<ParamValue>),
    /// Nested string-keyed map.
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// Get the string content if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the boolean if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the integer if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the nested map if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, ParamValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Check whether this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert into a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Number((*i).into()),
            Self::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(ParamValue::to_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                // u64 values beyond i64::MAX and all non-integers land here
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(ParamValue::from).collect()),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, ParamValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&ParamValue> for Value {
    fn from(value: &ParamValue) -> Self {
        value.to_json()
    }
}

impl From<ParamValue> for Value {
    fn from(value: ParamValue) -> Self {
        value.to_json()
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

/// Renders the value the way it is handed to a script: strings verbatim,
/// scalars in their natural form, `null` as empty text and containers as
/// compact JSON.
impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => f.write_str(s),
            Self::List(_) | Self::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

/// Parameters for a single skill execution.
///
/// Keys are kept sorted so that anything derived from the parameters
/// (command-line arguments, environment) is deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionParams(BTreeMap<String, ParamValue>);

impl ExecutionParams {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert a parameter, returning the previous value for the key.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Option<ParamValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Get a parameter by key.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    /// Get a string parameter by key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(ParamValue::as_str)
    }

    /// Remove a parameter.
    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.0.remove(key)
    }

    /// Check whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the parameter set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Build from a JSON object.
    pub fn from_json_map(map: Map<String, Value>) -> Self {
        Self(
            map.into_iter()
                .map(|(k, v)| (k, ParamValue::from(v)))
                .collect(),
        )
    }

    /// Convert into a JSON object.
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

impl FromIterator<(String, ParamValue)> for ExecutionParams {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ExecutionParams {
    type Item = (String, ParamValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, ParamValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ExecutionParams {
    type Item = (&'a String, &'a ParamValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, ParamValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion_preserves_shape() {
        let original = json!({
            "name": "node-1",
            "count": 3,
            "ratio": 0.5,
            "enabled": true,
            "tags": ["a", "b"],
            "nested": {"key": null}
        });

        let value = ParamValue::from(original.clone());
        assert!(matches!(value, ParamValue::Map(_)));
        assert_eq!(value.to_json(), original);
    }

    #[test]
    fn test_integers_stay_integers() {
        assert_eq!(ParamValue::from(json!(42)), ParamValue::Int(42));
        assert_eq!(ParamValue::from(json!(1.25)), ParamValue::Float(1.25));
    }

    #[test]
    fn test_display_for_marshaling() {
        assert_eq!(ParamValue::from("v1.28.0").to_string(), "v1.28.0");
        assert_eq!(ParamValue::Int(3).to_string(), "3");
        assert_eq!(ParamValue::Bool(false).to_string(), "false");
        assert_eq!(ParamValue::Null.to_string(), "");
        assert_eq!(ParamValue::from(json!(["a", 1])).to_string(), r#"["a",1]"#);
    }

    #[test]
    fn test_execution_params_ordered() {
        let params = ExecutionParams::new()
            .with("zeta", "z")
            .with("alpha", 1i64)
            .with("mid", true);

        let keys: Vec<_> = params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
        assert_eq!(params.get_str("zeta"), Some("z"));
        assert_eq!(params.get_str("alpha"), None);
    }

    #[test]
    fn test_execution_params_serde_is_plain_object() {
        let params = ExecutionParams::new().with("action", "create");
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json, json!({"action": "create"}));

        let back: ExecutionParams = serde_json::from_value(json).unwrap();
        assert_eq!(back, params);
    }
}
