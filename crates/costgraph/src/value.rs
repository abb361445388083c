//! value representation
//!
//! Raw attribute trees of parsed resources use the following data types
//! - null (unknown or absent)
//! - boolean (true/false)
//! - integer (signed, i64)
//! - float (f64)
//! - string (utf-8)
//! - array ("list" of values)
//! - object (order-preserving "map"/"dictionary", where the key is of type string)
//!
//! Values are read through path queries, see [Value::get] and [Value::query].
//!
//! Path syntax:
//! - segments are separated by `.`
//! - a numeric segment indexes into an array (`ebs_block_device.0.volume_size`)
//! - `#` applies the rest of the path to every element of an array (`tag.#.key`)
//!
use rust_decimal::Decimal;
use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serializer,
};

static NULL: Value = Value::Null;

/// All possible value types
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(indexmap::IndexMap<String, Value>),
}

impl Value {
    /// Follow `path` and return the value found there, [Value::Null] for any missing step
    pub fn get(&self, path: &str) -> &Value {
        if path.is_empty() {
            return self;
        }

        let mut current = self;
        for segment in path.split('.') {
            current = match current.step(segment) {
                Some(next) => next,
                None => return &NULL,
            };
        }

        current
    }

    /// Like [Value::get] but supports `#` segments, returning every value reached
    pub fn query(&self, path: &str) -> Vec<&Value> {
        let segments: Vec<&str> = if path.is_empty() {
            vec![]
        } else {
            path.split('.').collect()
        };

        let mut found = vec![];
        self.query_segments(&segments, &mut found);
        found
    }

    fn query_segments<'a>(&'a self, segments: &[&str], found: &mut Vec<&'a Value>) {
        let Some((head, rest)) = segments.split_first() else {
            if !self.is_null() {
                found.push(self);
            }
            return;
        };

        if *head == "#" {
            if let Value::Array(elements) = self {
                for element in elements {
                    element.query_segments(rest, found);
                }
            }
            return;
        }

        if let Some(next) = self.step(head) {
            next.query_segments(rest, found);
        }
    }

    fn step(&self, segment: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(segment),
            Value::Array(elements) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| elements.get(index)),
            _ => None,
        }
    }

    /// Elements of an array, the value itself for scalars and objects, nothing for null
    pub fn list(&self) -> Vec<&Value> {
        match self {
            Value::Null => vec![],
            Value::Array(elements) => elements.iter().collect(),
            other => vec![other],
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn exists(&self) -> bool {
        !self.is_null()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// String form of scalars, used for identity and address matching
    pub fn to_key_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Lenient string accessor; missing and non-scalar values read as `default`
    pub fn str_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.as_str().unwrap_or(default)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => Some(f.floor() as i64),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Integer(i) => Some(Decimal::from(*i)),
            Value::Float(f) => decimal_from_f64(*f),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&indexmap::IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Object entries with scalar values rendered as strings
    pub fn string_map(&self) -> indexmap::IndexMap<String, String> {
        self.as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.to_key_string().map(|v| (k.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recursive merge, `other` wins for scalars, objects are merged key by key
    pub fn merge(&mut self, other: &Value) {
        match (self, other) {
            (Value::Object(mine), Value::Object(theirs)) => {
                for (key, value) in theirs {
                    match mine.get_mut(key) {
                        Some(existing) => existing.merge(value),
                        None => {
                            mine.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            (mine, theirs) => *mine = theirs.clone(),
        }
    }
}

/// Shortest round-trip decimal rendering of a float
///
/// `0.1_f64` becomes `0.1` instead of its exact binary expansion.
pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    value.to_string().parse().ok()
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl<K: ToString, V: Into<Value>> From<indexmap::IndexMap<K, V>> for Value {
    fn from(value: indexmap::IndexMap<K, V>) -> Self {
        Value::Object(
            value
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.into()))
                .collect(),
        )
    }
}

impl From<hcl::Number> for Value {
    fn from(value: hcl::Number) -> Self {
        if let Some(int) = value.as_i64() {
            return Value::Integer(int);
        }

        value.as_f64().map(Value::Float).unwrap_or(Value::Null)
    }
}

impl From<hcl::Value> for Value {
    fn from(value: hcl::Value) -> Value {
        match value {
            hcl::Value::Null => Value::Null,
            hcl::Value::Bool(b) => b.into(),
            hcl::Value::Number(n) => n.into(),
            hcl::Value::String(s) => s.into(),
            hcl::Value::Array(a) => a.into(),
            hcl::Value::Object(o) => o.into(),
        }
    }
}

impl From<Value> for hcl::Value {
    fn from(value: Value) -> hcl::Value {
        match value {
            Value::Null => hcl::Value::Null,
            Value::Boolean(b) => hcl::Value::Bool(b),
            Value::Integer(i) => hcl::Value::Number(i.into()),
            Value::Float(f) => hcl::Number::from_f64(f).map(hcl::Value::Number).unwrap_or(hcl::Value::Null),
            Value::String(s) => hcl::Value::String(s),
            Value::Array(a) => hcl::Value::Array(a.into_iter().map(Into::into).collect()),
            Value::Object(o) => hcl::Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => b.into(),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(int) => Value::Integer(int),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => s.into(),
            serde_json::Value::Array(a) => a.into(),
            serde_json::Value::Object(o) => Value::Object(
                o.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Float(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Array(value) => {
                let mut ser = serializer.serialize_seq(Some(value.len()))?;
                for element in value {
                    ser.serialize_element(element)?;
                }
                ser.end()
            }
            Value::Object(value) => {
                let mut ser = serializer.serialize_map(Some(value.len()))?;
                for (element_key, element_value) in value {
                    ser.serialize_entry(element_key, element_value)?;
                }
                ser.end()
            }
        }
    }
}

impl<'de> serde::de::Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(Into::into)
    }
}

/// Build a [Value] from json syntax
#[macro_export]
macro_rules! value {
    ($($json:tt)+) => {
        $crate::value::Value::from($crate::serde_json::json!($($json)+))
    };
}
