//! parsed resources, the input of a cost run
//!
//! A [Plan] is what the (external) parser hands to the engine: every declared resource as a
//! [RawResource] plus the provider configuration blocks that apply to them.
//! Raw resources are never mutated by the engine.
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Stable index of a resource inside a [crate::graph::ResolvedGraph]
///
/// The arena is sorted by address, so ids order the same way addresses do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceId(pub(crate) usize);

impl ResourceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One parsed infrastructure resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResource {
    /// unique path within the IaC graph, e.g. `module.web.aws_instance.app[0]`
    pub address: String,
    /// resource kind, e.g. `aws_instance`
    #[serde(rename = "type")]
    pub kind: String,
    /// provider configuration key, e.g. `aws` or `aws.west`
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub values: Value,
    /// external identifiers supplied by the parser in addition to the ones derived from values
    #[serde(default)]
    pub identities: Vec<String>,
}

impl RawResource {
    pub fn new(address: impl Into<String>, kind: impl Into<String>, values: Value) -> Self {
        let kind = kind.into();
        Self {
            address: address.into(),
            provider_name: provider_prefix(&kind).to_string(),
            kind,
            values,
            identities: vec![],
        }
    }

    pub fn with_provider(mut self, provider_name: impl Into<String>) -> Self {
        self.provider_name = provider_name.into();
        self
    }

    pub fn with_identities(mut self, identities: Vec<String>) -> Self {
        self.identities = identities;
        self
    }

    /// `aws` for `aws_instance`
    pub fn provider_prefix(&self) -> &str {
        provider_prefix(&self.kind)
    }

    /// `module.a.module.b.` for `module.a.module.b.aws_instance.x`, empty for root resources
    pub fn module_path(&self) -> &str {
        module_path(&self.address)
    }
}

pub fn provider_prefix(kind: &str) -> &str {
    kind.split('_').next().unwrap_or(kind)
}

pub fn module_path(address: &str) -> &str {
    let mut end = 0;
    let mut rest = address;
    while let Some(after_module) = rest.strip_prefix("module.") {
        // module name, optionally followed by an index like `["a.b"]` or `[0]`
        let Some(dot) = find_segment_end(after_module) else {
            break;
        };
        let consumed = "module.".len() + dot + 1;
        end += consumed;
        rest = &rest[consumed..];
    }

    &address[..end]
}

/// Position of the first `.` outside of brackets and quotes
fn find_segment_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '[' if !quoted => depth += 1,
            ']' if !quoted => depth = depth.saturating_sub(1),
            '.' if !quoted && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// `aws_instance` for `module.a.aws_instance.web["x"]`
pub fn kind_from_address(address: &str) -> &str {
    let resource_part = &address[module_path(address).len()..];
    let resource_part = resource_part.strip_prefix("data.").unwrap_or(resource_part);
    resource_part.split('.').next().unwrap_or(resource_part)
}

/// Address with any trailing `[...]` index removed
pub fn strip_index(address: &str) -> &str {
    match address.strip_suffix(']').and_then(|s| s.rfind('[')) {
        Some(open) => &address[..open],
        None => address,
    }
}

/// Configuration of one provider block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub region: Option<String>,
    /// provider level default tags (aws `default_tags`, google `default_labels`)
    #[serde(default)]
    pub default_tags: Option<IndexMap<String, String>>,
}

/// Everything a parser produced for one project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub resources: Vec<RawResource>,
    /// keyed by provider configuration key (`aws`, `aws.west`)
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
}

impl Plan {
    pub fn new(resources: Vec<RawResource>) -> Self {
        Self {
            resources,
            providers: Default::default(),
        }
    }

    pub fn with_provider(mut self, name: impl Into<String>, config: ProviderConfig) -> Self {
        self.providers.insert(name.into(), config);
        self
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
