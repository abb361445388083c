//! reference resolution
//!
//! [ResolvedGraph::resolve] turns a [Plan] into an arena of resources sorted by address and, for
//! every resource, the targets of each of its declared reference attributes.
//!
//! A reference value is matched against
//! 1. addresses: as written, then prefixed with the referrer's module path, then both again with
//!    a `[0]` count index appended
//! 2. identities (ids, arns, custom keys, see [Registry::identities]): every resource carrying
//!    the value, in address order
//!
//! Reverse references (`aws_eip` is referenced by `aws_eip_association.allocation_id`) are the
//! forward matches of the referring kind's attribute, inverted once per kind and attribute.
//!
//! Resolution never fails. Unmatched values are dropped, self references are dropped, and the
//! result only depends on the set of input resources, not their order.
use crate::registry::{ReferenceSpec, Registry};
use crate::resource::{module_path, Plan, ProviderConfig, RawResource, ResourceId};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Attribute key to targets, in resolution order
pub type References = IndexMap<String, Vec<ResourceId>>;

#[derive(Debug, Default)]
pub struct ResolvedGraph {
    resources: Vec<RawResource>,
    index: HashMap<String, ResourceId>,
    references: Vec<References>,
    providers: IndexMap<String, ProviderConfig>,
}

/// Shorthand for [ResolvedGraph::resolve]
pub fn resolve(plan: Plan, registry: &Registry) -> ResolvedGraph {
    ResolvedGraph::resolve(plan, registry)
}

impl ResolvedGraph {
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn resolve(plan: Plan, registry: &Registry) -> ResolvedGraph {
        let Plan {
            mut resources,
            providers,
        } = plan;

        // stable sort keeps the first of duplicate addresses in front
        resources.sort_by(|a, b| a.address.cmp(&b.address));
        resources.dedup_by(|later, first| {
            let duplicate = later.address == first.address;
            if duplicate {
                tracing::warn!(address = %later.address, "duplicate resource address, keeping first");
            }
            duplicate
        });

        let index: HashMap<String, ResourceId> = resources
            .iter()
            .enumerate()
            .map(|(i, raw)| (raw.address.clone(), ResourceId(i)))
            .collect();

        let mut graph = ResolvedGraph {
            references: vec![References::new(); resources.len()],
            resources,
            index,
            providers,
        };

        let matcher = Matcher::new(&graph, registry);
        let mut references = Vec::with_capacity(graph.resources.len());
        for (i, raw) in graph.resources.iter().enumerate() {
            let id = ResourceId(i);
            let mut resolved = References::new();

            let Some(item) = registry.get(&raw.kind) else {
                references.push(resolved);
                continue;
            };

            for spec in &item.references {
                let targets = match spec {
                    ReferenceSpec::Forward { attribute } => matcher.forward(id, attribute),
                    ReferenceSpec::Reverse {
                        from_kind,
                        attribute,
                    } => matcher.reverse(id, (*from_kind, *attribute)),
                };

                if targets.is_empty() {
                    tracing::debug!(address = %raw.address, key = %spec.key(), "unresolved reference");
                }
                resolved.insert(spec.key(), targets);
            }

            references.push(resolved);
        }

        graph.references = references;
        graph
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ResourceId> {
        (0..self.resources.len()).map(ResourceId)
    }

    pub fn resource(&self, id: ResourceId) -> &RawResource {
        &self.resources[id.0]
    }

    pub fn resources(&self) -> &[RawResource] {
        &self.resources
    }

    pub fn id(&self, address: &str) -> Option<ResourceId> {
        self.index.get(address).copied()
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn providers(&self) -> &IndexMap<String, ProviderConfig> {
        &self.providers
    }

    /// All resolved reference attributes of `id`
    pub fn references(&self, id: ResourceId) -> &References {
        &self.references[id.0]
    }

    /// Targets of one reference attribute, empty when unresolved or undeclared
    pub fn references_of(&self, id: ResourceId, key: &str) -> &[ResourceId] {
        self.references[id.0]
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Distinct resources `id` depends on, ascending
    pub fn dependencies(&self, id: ResourceId) -> BTreeSet<ResourceId> {
        self.references[id.0]
            .values()
            .flatten()
            .copied()
            .filter(|target| *target != id)
            .collect()
    }

    /// Every resource once, dependencies before dependents where possible
    ///
    /// Among ready resources the smallest address goes first. When only cycles remain the
    /// smallest remaining address is released.
    pub fn dependency_order(&self) -> Vec<ResourceId> {
        let count = self.resources.len();
        let mut pending: Vec<usize> = vec![0; count];
        let mut dependents: Vec<Vec<ResourceId>> = vec![vec![]; count];

        for id in self.ids() {
            let dependencies = self.dependencies(id);
            pending[id.0] = dependencies.len();
            for dependency in dependencies {
                dependents[dependency.0].push(id);
            }
        }

        let mut ready: BTreeSet<ResourceId> =
            self.ids().filter(|id| pending[id.0] == 0).collect();
        let mut remaining: BTreeSet<ResourceId> = self.ids().collect();
        let mut order = Vec::with_capacity(count);

        while !remaining.is_empty() {
            let next = match ready.pop_first() {
                Some(next) => next,
                None => {
                    // cycle, release the smallest address
                    let Some(next) = remaining.first().copied() else {
                        break;
                    };
                    tracing::debug!(address = %self.resource(next).address, "breaking reference cycle");
                    next
                }
            };

            if !remaining.remove(&next) {
                continue;
            }
            order.push(next);

            for dependent in &dependents[next.0] {
                let count = &mut pending[dependent.0];
                *count = count.saturating_sub(1);
                if *count == 0 && remaining.contains(dependent) {
                    ready.insert(*dependent);
                }
            }
        }

        order
    }

    /// address -> attribute -> target addresses, empty attributes omitted
    pub fn address_map(&self) -> BTreeMap<&str, BTreeMap<&str, Vec<&str>>> {
        self.ids()
            .map(|id| {
                let attributes = self.references[id.0]
                    .iter()
                    .filter(|(_, targets)| !targets.is_empty())
                    .map(|(key, targets)| {
                        let addresses = targets
                            .iter()
                            .map(|target| self.resource(*target).address.as_str())
                            .collect();
                        (key.as_str(), addresses)
                    })
                    .collect();
                (self.resource(id).address.as_str(), attributes)
            })
            .collect()
    }
}

/// `(from_kind, attribute)` to target to referrers
type ReverseIndex = HashMap<(&'static str, &'static str), HashMap<ResourceId, Vec<ResourceId>>>;

/// Lookup tables used while resolving
struct Matcher<'g> {
    graph: &'g ResolvedGraph,
    identities: HashMap<String, Vec<ResourceId>>,
    by_kind: HashMap<&'g str, Vec<ResourceId>>,
    reverse: ReverseIndex,
}

impl<'g> Matcher<'g> {
    fn new(graph: &'g ResolvedGraph, registry: &Registry) -> Self {
        let mut identities: HashMap<String, Vec<ResourceId>> = HashMap::new();
        let mut by_kind: HashMap<&str, Vec<ResourceId>> = HashMap::new();

        // ids are visited ascending, so every list is in address order
        for id in graph.ids() {
            let raw = graph.resource(id);
            for identity in registry.identities(raw) {
                identities.entry(identity).or_default().push(id);
            }
            by_kind.entry(raw.kind.as_str()).or_default().push(id);
        }

        let mut matcher = Self {
            graph,
            identities,
            by_kind,
            reverse: ReverseIndex::new(),
        };
        matcher.reverse = matcher.reverse_index(registry);
        matcher
    }

    /// Inverted forward matches of every attribute a kind in the graph is reverse referenced by
    fn reverse_index(&self, registry: &Registry) -> ReverseIndex {
        let mut index = ReverseIndex::new();

        for kind in self.by_kind.keys() {
            let Some(item) = registry.get(kind) else {
                continue;
            };

            for spec in &item.references {
                let ReferenceSpec::Reverse { from_kind, attribute } = spec else {
                    continue;
                };
                if index.contains_key(&(*from_kind, *attribute)) {
                    continue;
                }

                // referrers are visited ascending, so every list is in address order
                let mut referrers: HashMap<ResourceId, Vec<ResourceId>> = HashMap::new();
                for referrer in self.by_kind.get(*from_kind).into_iter().flatten().copied() {
                    for target in self.forward(referrer, attribute) {
                        referrers.entry(target).or_default().push(referrer);
                    }
                }
                index.insert((*from_kind, *attribute), referrers);
            }
        }

        index
    }

    fn forward(&self, referrer: ResourceId, attribute: &str) -> Vec<ResourceId> {
        let raw = self.graph.resource(referrer);
        let mut targets = vec![];

        for value in raw.values.query(attribute) {
            for element in value.list() {
                let Some(key) = element.to_key_string() else {
                    continue;
                };
                for target in self.match_value(raw, &key) {
                    if target != referrer && !targets.contains(&target) {
                        tracing::trace!(from = %raw.address, attribute, to = %self.graph.resource(target).address, "resolved");
                        targets.push(target);
                    }
                }
            }
        }

        targets
    }

    fn reverse(&self, target: ResourceId, key: (&'static str, &'static str)) -> Vec<ResourceId> {
        self.reverse
            .get(&key)
            .and_then(|targets| targets.get(&target))
            .cloned()
            .unwrap_or_default()
    }

    fn match_value(&self, referrer: &RawResource, value: &str) -> Vec<ResourceId> {
        if is_ignored(value) {
            return vec![];
        }

        let module = module_path(&referrer.address);
        let candidates = [
            value.to_string(),
            format!("{module}{value}"),
            format!("{value}[0]"),
            format!("{module}{value}[0]"),
        ];
        if let Some(id) = candidates.iter().find_map(|address| self.graph.id(address)) {
            return vec![id];
        }

        self.identities.get(value).cloned().unwrap_or_default()
    }
}

/// Expressions a parser may leave unevaluated
fn is_ignored(value: &str) -> bool {
    value.is_empty()
        || value.starts_with("var.")
        || value.starts_with("each.")
        || value == "count.index"
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::RegistryItem;
    use crate::value;
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        Registry::builder()
            .default_provider_identities()
            .register(
                RegistryItem::free("aws_instance")
                    .references([ReferenceSpec::forward("subnet_id"), ReferenceSpec::forward("vpc_security_group_ids")]),
            )
            .register(RegistryItem::free("aws_subnet").references([ReferenceSpec::forward("vpc_id")]))
            .register(RegistryItem::free("aws_vpc"))
            .register(RegistryItem::free("aws_security_group").references([ReferenceSpec::forward("vpc_id")]))
            .register(
                RegistryItem::free("aws_eip")
                    .references([ReferenceSpec::reverse("aws_eip_association", "allocation_id")]),
            )
            .register(RegistryItem::free("aws_eip_association").references([ReferenceSpec::forward("allocation_id")]))
            .build()
    }

    fn plan() -> Plan {
        Plan::new(vec![
            RawResource::new(
                "aws_instance.web",
                "aws_instance",
                value!({ "subnet_id": "aws_subnet.a", "vpc_security_group_ids": ["sg-1", "sg-2", "sg-1"] }),
            ),
            RawResource::new("aws_subnet.a", "aws_subnet", value!({ "vpc_id": "vpc-1" })),
            RawResource::new("aws_vpc.main", "aws_vpc", value!({ "id": "vpc-1" })),
            RawResource::new("aws_security_group.b", "aws_security_group", value!({ "id": "sg-2", "vpc_id": "aws_vpc.main" })),
            RawResource::new("aws_security_group.a", "aws_security_group", value!({ "id": "sg-1" })),
            RawResource::new("aws_eip.ip", "aws_eip", value!({ "id": "eipalloc-1" })),
            RawResource::new("aws_eip_association.assoc", "aws_eip_association", value!({ "allocation_id": "eipalloc-1" })),
        ])
    }

    fn addresses<'a>(graph: &'a ResolvedGraph, ids: &[ResourceId]) -> Vec<&'a str> {
        ids.iter().map(|id| graph.resource(*id).address.as_str()).collect()
    }

    #[test]
    fn resolves_addresses_and_identities() {
        let graph = resolve(plan(), &registry());
        let web = graph.id("aws_instance.web").unwrap();

        assert_eq!(addresses(&graph, graph.references_of(web, "subnet_id")), vec!["aws_subnet.a"]);
        assert_eq!(
            addresses(&graph, graph.references_of(web, "vpc_security_group_ids")),
            vec!["aws_security_group.a", "aws_security_group.b"]
        );

        let subnet = graph.id("aws_subnet.a").unwrap();
        assert_eq!(addresses(&graph, graph.references_of(subnet, "vpc_id")), vec!["aws_vpc.main"]);
    }

    #[test]
    fn resolves_reverse_references() {
        let graph = resolve(plan(), &registry());
        let eip = graph.id("aws_eip.ip").unwrap();

        assert_eq!(
            addresses(&graph, graph.references_of(eip, "aws_eip_association.allocation_id")),
            vec!["aws_eip_association.assoc"]
        );
    }

    #[test]
    fn reverse_references_of_many_referrers() {
        let mut resources = vec![];
        for i in 0..2000 {
            resources.push(RawResource::new(format!("aws_eip.ip{i}"), "aws_eip", value!({ "id": format!("eipalloc-{i}") })));
            resources.push(RawResource::new(
                format!("aws_eip_association.assoc{i}"),
                "aws_eip_association",
                value!({ "allocation_id": format!("eipalloc-{i}") }),
            ));
        }
        // a second association of the first address, by address
        resources.push(RawResource::new(
            "aws_eip_association.again",
            "aws_eip_association",
            value!({ "allocation_id": "aws_eip.ip0" }),
        ));
        let graph = resolve(Plan::new(resources), &registry());

        let first = graph.id("aws_eip.ip0").unwrap();
        assert_eq!(
            addresses(&graph, graph.references_of(first, "aws_eip_association.allocation_id")),
            vec!["aws_eip_association.again", "aws_eip_association.assoc0"]
        );

        let last = graph.id("aws_eip.ip1999").unwrap();
        assert_eq!(
            addresses(&graph, graph.references_of(last, "aws_eip_association.allocation_id")),
            vec!["aws_eip_association.assoc1999"]
        );

        let associated = graph
            .ids()
            .filter(|id| graph.resource(*id).kind == "aws_eip")
            .filter(|id| graph.references_of(*id, "aws_eip_association.allocation_id").len() == 1)
            .count();
        assert_eq!(associated, 1999);
    }

    #[test]
    fn unresolved_and_undeclared_are_empty() {
        let plan = Plan::new(vec![RawResource::new(
            "aws_subnet.orphan",
            "aws_subnet",
            value!({ "vpc_id": "var.vpc_id" }),
        )]);
        let graph = resolve(plan, &registry());
        let id = graph.id("aws_subnet.orphan").unwrap();

        assert!(graph.references_of(id, "vpc_id").is_empty());
        assert!(graph.references_of(id, "not_declared").is_empty());
        assert!(graph.dependencies(id).is_empty());
    }

    #[test]
    fn module_relative_and_count_addresses() {
        let plan = Plan::new(vec![
            RawResource::new("module.net.aws_instance.web", "aws_instance", value!({ "subnet_id": "aws_subnet.a" })),
            RawResource::new("module.net.aws_subnet.a[0]", "aws_subnet", value!({})),
            RawResource::new("aws_subnet.a", "aws_subnet", value!({})),
        ]);
        let graph = resolve(plan, &registry());
        let web = graph.id("module.net.aws_instance.web").unwrap();

        // the literal root address wins over the module relative one
        assert_eq!(addresses(&graph, graph.references_of(web, "subnet_id")), vec!["aws_subnet.a"]);

        let plan = Plan::new(vec![
            RawResource::new("module.net.aws_instance.web", "aws_instance", value!({ "subnet_id": "aws_subnet.a" })),
            RawResource::new("module.net.aws_subnet.a[0]", "aws_subnet", value!({})),
        ]);
        let graph = resolve(plan, &registry());
        let web = graph.id("module.net.aws_instance.web").unwrap();
        assert_eq!(
            addresses(&graph, graph.references_of(web, "subnet_id")),
            vec!["module.net.aws_subnet.a[0]"]
        );
    }

    #[test]
    fn independent_of_input_order() {
        let registry = registry();
        let mut reversed = plan();
        reversed.resources.reverse();

        let a = resolve(plan(), &registry);
        let b = resolve(reversed, &registry);

        assert_eq!(a.address_map(), b.address_map());
        assert_eq!(a.dependency_order(), b.dependency_order());
    }

    #[test]
    fn duplicate_addresses_keep_first() {
        let plan = Plan::new(vec![
            RawResource::new("aws_vpc.main", "aws_vpc", value!({ "id": "first" })),
            RawResource::new("aws_vpc.main", "aws_vpc", value!({ "id": "second" })),
        ]);
        let graph = resolve(plan, &registry());

        assert_eq!(graph.len(), 1);
        assert_eq!(graph.resources()[0].values.get("id").as_str(), Some("first"));
    }

    #[test]
    fn dependency_order_puts_targets_first() {
        let graph = resolve(plan(), &registry());
        let order: Vec<_> = addresses(&graph, &graph.dependency_order());

        let position = |address: &str| order.iter().position(|a| *a == address).unwrap();
        assert!(position("aws_vpc.main") < position("aws_subnet.a"));
        assert!(position("aws_subnet.a") < position("aws_instance.web"));
        assert!(position("aws_security_group.b") < position("aws_instance.web"));
        assert!(position("aws_eip_association.assoc") < position("aws_eip.ip"));
        assert_eq!(order.len(), graph.len());
    }

    #[test]
    fn cycles_are_broken_by_address() {
        let registry = Registry::builder()
            .register(RegistryItem::free("test_node").references([ReferenceSpec::forward("next")]))
            .build();
        let plan = Plan::new(vec![
            RawResource::new("test_node.b", "test_node", value!({ "next": "test_node.a" })),
            RawResource::new("test_node.a", "test_node", value!({ "next": "test_node.b" })),
            RawResource::new("test_node.c", "test_node", value!({ "next": "test_node.a" })),
        ]);
        let graph = resolve(plan, &registry);

        assert_eq!(
            addresses(&graph, &graph.dependency_order()),
            vec!["test_node.a", "test_node.b", "test_node.c"]
        );
    }
}
