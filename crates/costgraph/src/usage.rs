//! user supplied usage estimates
//!
//! Usage estimates are keyed by resource address and consumed only while applying usage to an
//! already structurally built resource (see [crate::registry::CoreResource::populate_usage]).
//! A missing key means "not supplied", never an error.
//!
//! Usage file format:
//! ```yaml
//! version: 0.1
//! resource_type_default_usage:
//!   aws_lambda_function:
//!     monthly_requests: 1000000
//! resource_usage:
//!   aws_lambda_function.api:
//!     request_duration_ms: 350
//!   module.workers[*].aws_lambda_function.job:
//!     monthly_requests: 50000
//! ```
use crate::resource::kind_from_address;
use crate::value::Value;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use std::path::Path;

const SUPPORTED_VERSIONS: &[&str] = &["0.1"];

/// Usage estimates of one resource address
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageData {
    pub address: String,
    attributes: IndexMap<String, Value>,
}

impl UsageData {
    pub fn new(address: impl Into<String>, attributes: IndexMap<String, Value>) -> Self {
        Self {
            address: address.into(),
            attributes,
        }
    }

    pub fn empty(address: impl Into<String>) -> Self {
        Self::new(address, Default::default())
    }

    /// Value for `key`; `key[3]` falls back to `key[*]`
    pub fn get(&self, key: &str) -> &Value {
        static NULL: Value = Value::Null;

        if let Some(value) = self.attributes.get(key).filter(|v| !v.is_null()) {
            return value;
        }

        if let (Some(open), Some(close)) = (key.rfind('['), key.rfind(']')) {
            if open < close {
                let wildcard = format!("{}*{}", &key[..=open], &key[close..]);
                if let Some(value) = self.attributes.get(&wildcard) {
                    return value;
                }
            }
        }

        &NULL
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).as_i64()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).as_f64()
    }

    pub fn get_decimal(&self, key: &str) -> Option<Decimal> {
        self.get(key).as_decimal()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).to_key_string()
    }

    /// Missing, null, empty string, empty list or empty object
    pub fn is_empty(&self, key: &str) -> bool {
        match self.get(key) {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            _ => false,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// New usage data with the keys of `other` that are not already present
    pub fn merge(&self, other: &UsageData) -> UsageData {
        let mut merged = self.clone();
        for (key, value) in &other.attributes {
            if !merged.attributes.contains_key(key) {
                merged.attributes.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Copy with one value replaced, used by plugins that forward usage to nested templates
    pub fn with(&self, key: &str, value: impl Into<Value>) -> UsageData {
        let mut usage = self.clone();
        usage.attributes.insert(key.to_string(), value.into());
        usage
    }
}

#[derive(Debug)]
struct Wildcard {
    raw: String,
    regex: regex::Regex,
}

impl Wildcard {
    fn new(raw: &str) -> Result<Self, regex::Error> {
        let pattern = raw
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Ok(Self {
            raw: raw.to_string(),
            regex: regex::Regex::new(&format!("^{pattern}$"))?,
        })
    }

    /// fewer wildcards first, then longer literal text, then by key
    fn specificity(&self) -> (usize, std::cmp::Reverse<usize>, &str) {
        let wildcards = self.raw.matches('*').count();
        let literal = self.raw.len() - wildcards;
        (wildcards, std::cmp::Reverse(literal), &self.raw)
    }
}

/// Address keyed usage estimates for a whole run
#[derive(Debug, Default)]
pub struct UsageMap {
    type_defaults: IndexMap<String, Value>,
    data: IndexMap<String, Value>,
    wildcards: Vec<Wildcard>,
}

impl UsageMap {
    /// Build from address keyed attribute objects; keys may contain `*` wildcards
    pub fn new(
        type_defaults: IndexMap<String, IndexMap<String, Value>>,
        data: IndexMap<String, IndexMap<String, Value>>,
    ) -> Self {
        let mut wildcards: Vec<Wildcard> = data
            .keys()
            .filter(|key| key.contains('*'))
            .filter_map(|key| match Wildcard::new(key) {
                Ok(wildcard) => Some(wildcard),
                Err(error) => {
                    tracing::warn!(key, %error, "ignoring invalid usage key");
                    None
                }
            })
            .collect();
        wildcards.sort_by(|a, b| a.specificity().cmp(&b.specificity()));

        Self {
            type_defaults: type_defaults
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect(),
            data: data.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            wildcards,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.type_defaults.is_empty() && self.data.is_empty()
    }

    /// Usage for `address`, merged from lowest to highest precedence:
    /// 1. defaults for the resource kind
    /// 2. the most specific matching wildcard key
    /// 3. the exact address
    pub fn get(&self, address: &str) -> UsageData {
        let mut merged: Option<Value> = None;
        let mut apply = |value: &Value| match merged.as_mut() {
            Some(existing) => existing.merge(value),
            None => merged = Some(value.clone()),
        };

        if let Some(defaults) = self.type_defaults.get(kind_from_address(address)) {
            apply(defaults);
        }

        if let Some(wildcard) = self.wildcards.iter().find(|w| w.regex.is_match(address)) {
            tracing::trace!(address, key = %wildcard.raw, "wildcard usage matched");
            apply(&self.data[&wildcard.raw]);
        }

        if let Some(exact) = self.data.get(address) {
            apply(exact);
        }

        let attributes = match merged {
            Some(Value::Object(attributes)) => attributes,
            _ => Default::default(),
        };

        UsageData::new(address, attributes)
    }

    pub fn load_file(path: &Path) -> Result<Self, UsageFileError> {
        tracing::info!(path = %path.display(), "loading usage file");
        let contents = std::fs::read_to_string(path)?;
        contents.parse()
    }
}

#[derive(serde::Deserialize)]
struct UsageFile {
    version: Value,
    #[serde(default)]
    resource_type_default_usage: Option<IndexMap<String, IndexMap<String, Value>>>,
    #[serde(default)]
    resource_usage: Option<IndexMap<String, IndexMap<String, Value>>>,
}

impl std::str::FromStr for UsageMap {
    type Err = UsageFileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let file: UsageFile = serde_yaml::from_str(s)?;

        let version = file.version.to_key_string().unwrap_or_default();
        if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
            return Err(UsageFileError::UnsupportedVersion(version));
        }

        Ok(UsageMap::new(
            file.resource_type_default_usage.unwrap_or_default(),
            file.resource_usage.unwrap_or_default(),
        ))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum UsageFileError {
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse usage YAML")]
    YamlParseFailed(#[from] serde_yaml::Error),
    #[error("Unsupported usage file version {0:?}, supported versions are {SUPPORTED_VERSIONS:?}")]
    UnsupportedVersion(String),
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn usage_map(yaml: &str) -> UsageMap {
        yaml.parse().expect("valid usage file")
    }

    #[test]
    fn exact_over_wildcard_over_type_defaults() {
        let usage = usage_map(
            r#"
version: 0.1
resource_type_default_usage:
  aws_lambda_function:
    monthly_requests: 1
    request_duration_ms: 1
    storage_gb: 1
resource_usage:
  aws_lambda_function.api[*]:
    monthly_requests: 700000000
    request_duration_ms: 750
  aws_lambda_function.api["foo"]:
    request_duration_ms: 100
"#,
        );

        let data = usage.get("aws_lambda_function.api[\"foo\"]");
        assert_eq!(data.get_i64("monthly_requests"), Some(700000000));
        assert_eq!(data.get_i64("request_duration_ms"), Some(100));
        assert_eq!(data.get_i64("storage_gb"), Some(1));

        let other = usage.get("aws_lambda_function.other");
        assert_eq!(other.get_i64("monthly_requests"), Some(1));
    }

    #[test]
    fn more_specific_wildcard_wins() {
        let usage = usage_map(
            r#"
version: 0.1
resource_usage:
  module.mod[*].aws_lambda_function.f[*]:
    monthly_requests: 1
  module.mod["a"].aws_lambda_function.f[*]:
    monthly_requests: 2
"#,
        );

        assert_eq!(
            usage
                .get("module.mod[\"a\"].aws_lambda_function.f[0]")
                .get_i64("monthly_requests"),
            Some(2)
        );
        assert_eq!(
            usage
                .get("module.mod[\"b\"].aws_lambda_function.f[0]")
                .get_i64("monthly_requests"),
            Some(1)
        );
    }

    #[test]
    fn missing_address_is_empty_not_error() {
        let usage = UsageMap::default();
        let data = usage.get("aws_instance.web");

        assert_eq!(data.address, "aws_instance.web");
        assert!(data.is_empty("instances"));
        assert_eq!(data.get_i64("instances"), None);
    }

    #[test]
    fn array_keys_fall_back_to_wildcard() {
        let usage = usage_map(
            r#"
version: 0.1
resource_usage:
  aws_instance.web:
    ebs_block_device[*]:
      monthly_standard_io_requests: 10
"#,
        );

        let data = usage.get("aws_instance.web");
        assert_eq!(
            data.get("ebs_block_device[2]")
                .get("monthly_standard_io_requests")
                .as_decimal(),
            Some(dec!(10))
        );
    }

    #[test]
    fn nested_objects_merge() {
        let usage = usage_map(
            r#"
version: 0.1
resource_type_default_usage:
  aws_dynamodb_table:
    capacity: { read: 1, write: 1 }
resource_usage:
  aws_dynamodb_table.t:
    capacity: { write: 5 }
"#,
        );

        let data = usage.get("aws_dynamodb_table.t");
        assert_eq!(data.get("capacity").get("read").as_i64(), Some(1));
        assert_eq!(data.get("capacity").get("write").as_i64(), Some(5));
    }

    #[test]
    fn rejects_unknown_version() {
        let error = "version: 9.9\n".parse::<UsageMap>().expect_err("must error");
        assert!(matches!(error, UsageFileError::UnsupportedVersion(v) if v == "9.9"));
    }

    #[test]
    fn merge_keeps_existing_keys() {
        let a = UsageData::empty("x").with("a", 1i64);
        let b = UsageData::empty("x").with("a", 2i64).with("b", 3i64);

        let merged = a.merge(&b);
        assert_eq!(merged.get_i64("a"), Some(1));
        assert_eq!(merged.get_i64("b"), Some(3));
    }
}
