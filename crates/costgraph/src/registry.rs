//! catalog of supported resource kinds
//!
//! The [Registry] maps a resource kind (`aws_instance`) to a [RegistryItem] describing
//! - which attributes point at other resources ([ReferenceSpec])
//! - how the kind is identified when other resources point at it (see [Registry::identities])
//! - how it is constructed ([Protocol])
//! - how its tags are read ([TagSupport])
//!
//! It is built once at startup and only read afterwards.
use crate::cost::CostedResource;
use crate::data::ResourceData;
use crate::resource::{provider_prefix, RawResource};
use crate::tags::TagParsingConfig;
use crate::usage::UsageData;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Extra keys other resources may use to reference a resource
pub type IdentityFn = fn(&RawResource) -> Vec<String>;

/// Single call construction from attributes and usage
pub type LegacyFn = fn(&ResourceData, &UsageData) -> CostedResource;

/// Structural construction, usage is applied afterwards
pub type StagedFn = fn(&ResourceData) -> Box<dyn CoreResource>;

/// Adds kind specific tags after the generic sources were merged
pub type TagSynthesizer =
    fn(&ResourceData, Option<&IndexMap<String, String>>, &TagParsingConfig, &mut IndexMap<String, String>);

/// Structural representation of a resource following the two phase protocol
///
/// Created from attributes only, then usage is applied with [CoreResource::populate_usage] and
/// finally [CoreResource::build_resource] produces the cost tree.
pub trait CoreResource {
    fn core_type(&self) -> &'static str;

    /// Usage keys the estimate depends on
    ///
    /// Keys absent from the usage file are reported on the built resource. Kinds that declare
    /// none are judged by their usage based components.
    fn usage_schema(&self) -> &'static [&'static str] {
        &[]
    }

    /// Apply user supplied usage estimates
    fn populate_usage(&mut self, _usage: &UsageData) {}

    fn build_resource(self: Box<Self>) -> CostedResource;
}

/// How a resource kind is constructed
#[derive(Clone, Copy)]
pub enum Protocol {
    Legacy(LegacyFn),
    Staged(StagedFn),
    /// known to be free of charge
    Free,
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Legacy(_) => f.write_str("Legacy"),
            Protocol::Staged(_) => f.write_str("Staged"),
            Protocol::Free => f.write_str("Free"),
        }
    }
}

/// An attribute whose values designate other resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceSpec {
    /// values of `attribute` on this resource
    Forward { attribute: &'static str },
    /// resources of `from_kind` whose `attribute` points at this resource
    Reverse {
        from_kind: &'static str,
        attribute: &'static str,
    },
}

impl ReferenceSpec {
    pub fn forward(attribute: &'static str) -> Self {
        Self::Forward { attribute }
    }

    pub fn reverse(from_kind: &'static str, attribute: &'static str) -> Self {
        Self::Reverse {
            from_kind,
            attribute,
        }
    }

    /// Key the resolved targets are stored under
    pub fn key(&self) -> String {
        match self {
            ReferenceSpec::Forward { attribute } => attribute.to_string(),
            ReferenceSpec::Reverse {
                from_kind,
                attribute,
            } => format!("{from_kind}.{attribute}"),
        }
    }
}

/// Where and how a kind declares tags
#[derive(Clone, Copy)]
pub struct TagSupport {
    /// inline map attribute, `tags` (aws, azure) or `labels` (google)
    pub attribute: &'static str,
    /// repeated block with `key`, `value` and `propagate_at_launch`
    pub block: Option<&'static str>,
    /// inherits provider default tags
    pub default_tags: bool,
    pub synthesize: Option<TagSynthesizer>,
}

impl TagSupport {
    pub const fn tags() -> Self {
        Self {
            attribute: "tags",
            block: None,
            default_tags: true,
            synthesize: None,
        }
    }

    pub const fn labels() -> Self {
        Self {
            attribute: "labels",
            block: None,
            default_tags: true,
            synthesize: None,
        }
    }

    pub fn block(mut self, block: &'static str) -> Self {
        self.block = Some(block);
        self
    }

    pub fn without_default_tags(mut self) -> Self {
        self.default_tags = false;
        self
    }

    pub fn synthesize(mut self, synthesize: TagSynthesizer) -> Self {
        self.synthesize = Some(synthesize);
        self
    }
}

impl std::fmt::Debug for TagSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagSupport")
            .field("attribute", &self.attribute)
            .field("block", &self.block)
            .field("default_tags", &self.default_tags)
            .field("synthesize", &self.synthesize.is_some())
            .finish()
    }
}

/// Plugin contract of one resource kind
#[derive(Clone)]
pub struct RegistryItem {
    pub name: &'static str,
    pub protocol: Protocol,
    pub references: Vec<ReferenceSpec>,
    pub custom_identity: Option<IdentityFn>,
    pub notes: Vec<&'static str>,
    pub tags: Option<TagSupport>,
}

impl std::fmt::Debug for RegistryItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryItem")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("references", &self.references)
            .field("custom_identity", &self.custom_identity.is_some())
            .field("notes", &self.notes)
            .field("tags", &self.tags)
            .finish()
    }
}

impl RegistryItem {
    fn new(name: &'static str, protocol: Protocol) -> Self {
        Self {
            name,
            protocol,
            references: vec![],
            custom_identity: None,
            notes: vec![],
            tags: None,
        }
    }

    pub fn legacy(name: &'static str, build: LegacyFn) -> Self {
        Self::new(name, Protocol::Legacy(build))
    }

    pub fn staged(name: &'static str, build: StagedFn) -> Self {
        Self::new(name, Protocol::Staged(build))
    }

    pub fn free(name: &'static str) -> Self {
        Self::new(name, Protocol::Free)
    }

    pub fn references(mut self, references: impl IntoIterator<Item = ReferenceSpec>) -> Self {
        self.references.extend(references);
        self
    }

    pub fn custom_identity(mut self, identity: IdentityFn) -> Self {
        self.custom_identity = Some(identity);
        self
    }

    pub fn note(mut self, note: &'static str) -> Self {
        self.notes.push(note);
        self
    }

    pub fn tags(mut self, tags: TagSupport) -> Self {
        self.tags = Some(tags);
        self
    }
}

/// Read-only catalog, see module documentation
#[derive(Default)]
pub struct Registry {
    items: HashMap<&'static str, RegistryItem>,
    provider_identities: HashMap<&'static str, IdentityFn>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.kinds())
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, kind: &str) -> Option<&RegistryItem> {
        self.items.get(kind)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.items.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Every key `raw` can be referenced by, apart from its address
    ///
    /// Provider defaults (keyed by kind prefix) come first, then the kind's custom identity,
    /// then identities supplied by the parser. Empty and duplicate keys are dropped.
    pub fn identities(&self, raw: &RawResource) -> Vec<String> {
        let provider = self
            .provider_identities
            .get(provider_prefix(&raw.kind))
            .copied()
            .unwrap_or(id_identity);

        let mut identities = provider(raw);
        if let Some(custom) = self.get(&raw.kind).and_then(|item| item.custom_identity) {
            identities.extend(custom(raw));
        }
        identities.extend(raw.identities.iter().cloned());

        let mut seen = std::collections::HashSet::new();
        identities.retain(|identity| !identity.is_empty() && seen.insert(identity.clone()));
        identities
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    items: HashMap<&'static str, RegistryItem>,
    provider_identities: HashMap<&'static str, IdentityFn>,
}

impl RegistryBuilder {
    /// Register a kind, a later registration of the same kind replaces the earlier one
    pub fn register(mut self, item: RegistryItem) -> Self {
        if self.items.insert(item.name, item).is_some() {
            tracing::debug!("resource kind registered twice, keeping the last registration");
        }
        self
    }

    pub fn register_all(self, items: impl IntoIterator<Item = RegistryItem>) -> Self {
        items.into_iter().fold(self, Self::register)
    }

    /// Default identity of every kind starting with `prefix_`
    pub fn provider_identity(mut self, prefix: &'static str, identity: IdentityFn) -> Self {
        self.provider_identities.insert(prefix, identity);
        self
    }

    /// Add the identity functions of the known providers
    pub fn default_provider_identities(self) -> Self {
        self.provider_identity("aws", aws_identity)
            .provider_identity("google", google_identity)
            .provider_identity("azurerm", id_identity)
    }

    pub fn build(self) -> Registry {
        Registry {
            items: self.items,
            provider_identities: self.provider_identities,
        }
    }
}

/// Values of the given attributes that render as strings
pub fn attribute_identities(raw: &RawResource, attributes: &[&str]) -> Vec<String> {
    attributes
        .iter()
        .filter_map(|attribute| raw.values.get(attribute).to_key_string())
        .collect()
}

pub fn id_identity(raw: &RawResource) -> Vec<String> {
    attribute_identities(raw, &["id"])
}

pub fn aws_identity(raw: &RawResource) -> Vec<String> {
    attribute_identities(raw, &["id", "arn"])
}

pub fn google_identity(raw: &RawResource) -> Vec<String> {
    attribute_identities(raw, &["id", "self_link"])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value;
    use pretty_assertions::assert_eq;

    fn name_identity(raw: &RawResource) -> Vec<String> {
        attribute_identities(raw, &["name"])
    }

    fn registry() -> Registry {
        Registry::builder()
            .default_provider_identities()
            .register(
                RegistryItem::free("aws_launch_template").custom_identity(name_identity),
            )
            .register(RegistryItem::free("aws_vpc"))
            .build()
    }

    #[test]
    fn provider_identities_by_prefix() {
        let registry = registry();

        let raw = RawResource::new(
            "aws_vpc.main",
            "aws_vpc",
            value!({ "id": "vpc-1", "arn": "arn:aws:ec2:vpc/vpc-1" }),
        );
        assert_eq!(registry.identities(&raw), vec!["vpc-1", "arn:aws:ec2:vpc/vpc-1"]);

        let raw = RawResource::new(
            "google_compute_network.n",
            "google_compute_network",
            value!({ "id": "n-1", "self_link": "https://x/n-1", "arn": "ignored" }),
        );
        assert_eq!(registry.identities(&raw), vec!["n-1", "https://x/n-1"]);

        let raw = RawResource::new("foo_thing.t", "foo_thing", value!({ "id": "t", "arn": "a" }));
        assert_eq!(registry.identities(&raw), vec!["t"]);
    }

    #[test]
    fn custom_identity_adds_to_defaults() {
        let registry = registry();
        let raw = RawResource::new(
            "aws_launch_template.lt",
            "aws_launch_template",
            value!({ "id": "lt-1", "name": "web" }),
        )
        .with_identities(vec!["lt-1".into(), "external".into()]);

        assert_eq!(registry.identities(&raw), vec!["lt-1", "web", "external"]);
    }

    #[test]
    fn reference_keys() {
        assert_eq!(ReferenceSpec::forward("subnet_id").key(), "subnet_id");
        assert_eq!(
            ReferenceSpec::reverse("aws_eip_association", "allocation_id").key(),
            "aws_eip_association.allocation_id"
        );
    }

    #[test]
    fn kinds_are_sorted() {
        assert_eq!(registry().kinds(), vec!["aws_launch_template", "aws_vpc"]);
        assert!(registry().get("aws_instance").is_none());
    }
}
