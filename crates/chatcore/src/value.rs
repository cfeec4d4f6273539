use serde::{Deserialize, Serialize, Serializer};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Dynamic value type for node inputs and computed instances.
///
/// Serializes as plain JSON so flow files written by the visual editor load
/// without any tagging. `Opaque` values only ever come from node
/// implementations and never from JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
    Opaque(Opaque),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Value::Opaque(o) => Some(o),
            _ => None,
        }
    }

    /// Downcast an opaque instance to a concrete node result type.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.as_opaque().and_then(|o| o.downcast_ref::<T>())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text used when this value is spliced into a template string.
    pub fn to_template_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Opaque(o) => o.label().to_string(),
            other => other.to_json().to_string(),
        }
    }

    /// Plain JSON view. Opaque instances render as `{"$instance": label}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Opaque(o) => serde_json::json!({ "$instance": o.label() }),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

/// Shared handle to a node's computed result.
///
/// Cloning copies the handle, never the result, so an instance keeps its
/// identity through every clone of the node data that carries it.
#[derive(Clone)]
pub struct Opaque {
    label: Arc<str>,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    pub fn new<T: Any + Send + Sync>(label: impl Into<String>, value: T) -> Self {
        Self {
            label: Arc::from(label.into()),
            inner: Arc::new(value),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.label)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Value::Opaque(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Retriever {
        k: usize,
    }

    #[test]
    fn opaque_survives_clone_by_reference() {
        let original = Value::Opaque(Opaque::new("Retriever", Retriever { k: 4 }));
        let copy = original.clone();

        let (a, b) = (original.as_opaque().unwrap(), copy.as_opaque().unwrap());
        assert!(a.ptr_eq(b));
        assert_eq!(copy.downcast_ref::<Retriever>().map(|r| r.k), Some(4));
    }

    #[test]
    fn json_round_trip_is_untagged() {
        let json = serde_json::json!({ "temperature": 0.7, "tags": ["a", "b"], "name": "x" });
        let value = Value::from(json.clone());
        assert_eq!(serde_json::to_value(&value).unwrap(), json);
    }

    #[test]
    fn template_strings() {
        assert_eq!(Value::Number(3.0).to_template_string(), "3");
        assert_eq!(Value::Number(0.5).to_template_string(), "0.5");
        assert_eq!(Value::Null.to_template_string(), "");
        assert_eq!(
            Value::Opaque(Opaque::new("LLMChain", ())).to_template_string(),
            "LLMChain"
        );
    }
}
