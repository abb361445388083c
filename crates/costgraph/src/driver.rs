//! construction of cost trees
//!
//! Every resource of a [ResolvedGraph] is constructed by its registered plugin ([Protocol]):
//! - `Legacy`: one call with attributes and usage
//! - `Staged`: structural build, then [CoreResource::populate_usage], then
//!   [CoreResource::build_resource]
//! - `Free`: a free resource node without cost
//!
//! Kinds without a registry entry become "unsupported" nodes, the run continues. So does a
//! plugin that panics: its resource is reported as skipped.
//!
//! ## Passes
//!
//! Pass 1 constructs all resources concurrently. Constructors only see raw attributes of their
//! references, asking for already built references ([ResourceData::built_references]) marks the
//! construction as deferred.
//!
//! Pass 2 repeats the deferred constructions with the outputs of pass 1. Deferred resources that
//! depend on other deferred resources are built in later waves, so a chain of them sees the
//! rebuilt outputs. Cycles among deferred resources see the pass 1 output of the other side.
//!
//! [CoreResource::populate_usage]: crate::registry::CoreResource::populate_usage
//! [CoreResource::build_resource]: crate::registry::CoreResource::build_resource
use crate::cost::CostedResource;
use crate::data::ResourceData;
use crate::graph::ResolvedGraph;
use crate::registry::{Protocol, Registry};
use crate::resource::ResourceId;
use crate::tags::{merge_tags, TagParsingConfig};
use crate::usage::UsageMap;
use rayon::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// worker threads, 0 uses the global rayon pool
    pub concurrency: usize,
    /// checked before each resource is constructed
    pub cancel: Arc<AtomicBool>,
    pub tags: TagParsingConfig,
}

impl BuildOptions {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("Build was cancelled")]
    Cancelled,
    #[error("Unable to create worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

struct Construction {
    resource: CostedResource,
    deferred: bool,
}

pub struct Driver<'a> {
    graph: &'a ResolvedGraph,
    registry: &'a Registry,
    usage: &'a UsageMap,
    options: &'a BuildOptions,
}

/// Shorthand for [Driver::build]
pub fn build(
    graph: &ResolvedGraph,
    registry: &Registry,
    usage: &UsageMap,
    options: &BuildOptions,
) -> Result<Vec<CostedResource>, BuildError> {
    Driver::new(graph, registry, usage, options).build()
}

impl<'a> Driver<'a> {
    pub fn new(
        graph: &'a ResolvedGraph,
        registry: &'a Registry,
        usage: &'a UsageMap,
        options: &'a BuildOptions,
    ) -> Self {
        Self {
            graph,
            registry,
            usage,
            options,
        }
    }

    /// Cost trees of all resources, in address order
    pub fn build(&self) -> Result<Vec<CostedResource>, BuildError> {
        if self.options.concurrency == 0 {
            return self.run();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.concurrency)
            .build()?;
        pool.install(|| self.run())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    fn run(&self) -> Result<Vec<CostedResource>, BuildError> {
        let order = self.graph.dependency_order();

        let first_pass: Vec<(ResourceId, Option<Construction>)> = order
            .par_iter()
            .map(|id| (*id, self.construct_unless_cancelled(*id, None)))
            .collect();

        let mut outputs = vec![CostedResource::default(); self.graph.len()];
        let mut deferred = vec![false; self.graph.len()];
        for (id, construction) in first_pass {
            let construction = construction.ok_or(BuildError::Cancelled)?;
            outputs[id.index()] = construction.resource;
            deferred[id.index()] = construction.deferred;
        }
        self.check_cancelled()?;

        let waves = self.deferred_waves(&order, &deferred);
        tracing::debug!(
            deferred = deferred.iter().filter(|d| **d).count(),
            waves = waves.len(),
            "first pass done"
        );

        for wave in waves {
            let snapshot = outputs.as_slice();
            let rebuilt: Vec<(ResourceId, Option<Construction>)> = wave
                .par_iter()
                .map(|id| (*id, self.construct_unless_cancelled(*id, Some(snapshot))))
                .collect();

            for (id, construction) in rebuilt {
                outputs[id.index()] = construction.ok_or(BuildError::Cancelled)?.resource;
            }
            self.check_cancelled()?;
        }

        Ok(outputs)
    }

    fn check_cancelled(&self) -> Result<(), BuildError> {
        if self.options.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        Ok(())
    }

    /// Deferred resources grouped so that each group only depends on earlier groups
    fn deferred_waves(&self, order: &[ResourceId], deferred: &[bool]) -> Vec<Vec<ResourceId>> {
        let mut levels: Vec<Option<usize>> = vec![None; self.graph.len()];
        let mut waves: Vec<Vec<ResourceId>> = vec![];

        for id in order.iter().copied().filter(|id| deferred[id.index()]) {
            let level = self
                .graph
                .dependencies(id)
                .into_iter()
                .filter_map(|dependency| levels[dependency.index()])
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);
            levels[id.index()] = Some(level);

            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[level].push(id);
        }

        for wave in &mut waves {
            wave.sort();
        }
        waves
    }

    fn construct_unless_cancelled(&self, id: ResourceId, built: Option<&[CostedResource]>) -> Option<Construction> {
        if self.options.is_cancelled() {
            return None;
        }
        Some(self.construct(id, built))
    }

    fn construct(&self, id: ResourceId, built: Option<&[CostedResource]>) -> Construction {
        let data = ResourceData::new(self.graph, id, built);
        let raw = data.raw();

        let Some(item) = self.registry.get(&raw.kind) else {
            tracing::debug!(address = %raw.address, kind = %raw.kind, "unsupported resource kind");
            let mut resource = CostedResource::unsupported(&raw.address, &raw.kind);
            resource.tags = merge_tags(&data, None, &self.options.tags);
            return Construction {
                resource,
                deferred: false,
            };
        };

        let usage = self.usage.get(&raw.address);
        let constructed = catch_unwind(AssertUnwindSafe(|| match item.protocol {
            Protocol::Legacy(build) => build(&data, &usage),
            Protocol::Staged(build) => {
                let mut core = build(&data);
                tracing::trace!(address = %raw.address, core = core.core_type(), "populating usage");
                core.populate_usage(&usage);
                let schema = core.usage_schema();
                let mut resource = core.build_resource();
                if !schema.is_empty() {
                    resource.missing_usage = Some(
                        schema
                            .iter()
                            .filter(|key| usage.is_empty(key))
                            .map(|key| key.to_string())
                            .collect(),
                    );
                }
                resource
            }
            Protocol::Free => CostedResource::free(&raw.address),
        }));

        let mut resource = match constructed {
            Ok(resource) => resource,
            Err(_) => {
                tracing::warn!(address = %raw.address, kind = %raw.kind, "resource plugin panicked, skipping");
                CostedResource::skipped(&raw.address, "Cost calculation failed for this resource")
            }
        };

        resource.name = raw.address.clone();
        resource.resource_type = raw.kind.clone();
        if let Some(support) = &item.tags {
            resource.provider_supports_default_tags = support.default_tags;
            if support.default_tags {
                resource.default_tags = data.provider_default_tags().cloned();
            }
        }
        resource.tags = merge_tags(&data, item.tags.as_ref(), &self.options.tags);

        Construction {
            resource,
            deferred: data.deferred(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cost::{CostComponent, PriceFilter, ProductFilter};
    use crate::graph::resolve;
    use crate::pricing::attach_prices;
    use crate::registry::{CoreResource, ReferenceSpec, RegistryItem};
    use crate::resource::{Plan, RawResource};
    use crate::usage::UsageData;
    use crate::value;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Disk {
        size: Decimal,
        iops: Option<Decimal>,
    }

    impl CoreResource for Disk {
        fn core_type(&self) -> &'static str {
            "Disk"
        }

        fn populate_usage(&mut self, usage: &UsageData) {
            self.iops = usage.get_decimal("monthly_iops");
        }

        fn build_resource(self: Box<Self>) -> CostedResource {
            let mut components = vec![CostComponent::new("Storage", "GB").monthly(self.size)];
            if let Some(iops) = self.iops {
                components.push(CostComponent::new("IOPS", "IOPS").monthly(iops));
            }
            CostedResource::new("").with_components(components)
        }
    }

    fn disk(data: &ResourceData) -> Box<dyn CoreResource> {
        Box::new(Disk {
            size: data.get("size").as_decimal().unwrap_or(dec!(8)),
            iops: None,
        })
    }

    /// costs as much storage as all referenced disks together
    fn copy(data: &ResourceData, _: &UsageData) -> CostedResource {
        let size: Decimal = data
            .built_references("source")
            .iter()
            .flat_map(|r| r.all_components())
            .filter_map(|c| c.monthly_quantity)
            .sum();
        CostedResource::new("").with_components(vec![CostComponent::new("Storage", "GB").monthly(size)])
    }

    /// squares its size without guarding against overflow
    fn careless(data: &ResourceData, _: &UsageData) -> CostedResource {
        let size = data.get("size").as_decimal().unwrap_or(Decimal::ONE);
        CostedResource::new("").with_components(vec![CostComponent::new("Storage", "GB").monthly(size * size)])
    }

    fn registry() -> Registry {
        Registry::builder()
            .register(RegistryItem::staged("test_disk", disk))
            .register(RegistryItem::legacy("test_copy", copy).references([ReferenceSpec::forward("source")]))
            .register(RegistryItem::legacy("test_careless", careless))
            .register(RegistryItem::free("test_network"))
            .build()
    }

    fn plan() -> Plan {
        Plan::new(vec![
            RawResource::new("test_disk.a", "test_disk", value!({ "size": 10 })),
            RawResource::new("test_disk.b", "test_disk", value!({})),
            RawResource::new("test_copy.of_a", "test_copy", value!({ "source": "test_disk.a" })),
            RawResource::new("test_copy.of_copy", "test_copy", value!({ "source": "test_copy.of_a" })),
            RawResource::new("test_network.n", "test_network", value!({})),
            RawResource::new("test_unknown.u", "test_unknown", value!({ "tags": { "a": "b" } })),
        ])
    }

    fn build_plan(usage: &UsageMap, options: &BuildOptions) -> Result<Vec<CostedResource>, BuildError> {
        let graph = resolve(plan(), &registry());
        build(&graph, &registry(), usage, options)
    }

    fn quantity(resource: &CostedResource, component: &str) -> Option<Decimal> {
        resource.component(component).and_then(|c| c.monthly_quantity)
    }

    #[test]
    fn builds_every_resource_in_address_order() {
        let resources = build_plan(&UsageMap::default(), &BuildOptions::default()).unwrap();
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "test_copy.of_a",
                "test_copy.of_copy",
                "test_disk.a",
                "test_disk.b",
                "test_network.n",
                "test_unknown.u"
            ]
        );
        assert_eq!(resources[2].resource_type, "test_disk");
    }

    #[test]
    fn staged_resources_get_usage() {
        let usage = "version: 0.1\nresource_usage:\n  test_disk.b:\n    monthly_iops: 300\n"
            .parse()
            .unwrap();
        let resources = build_plan(&usage, &BuildOptions::default()).unwrap();

        assert_eq!(quantity(&resources[2], "Storage"), Some(dec!(10)));
        assert_eq!(quantity(&resources[2], "IOPS"), None);
        assert_eq!(quantity(&resources[3], "Storage"), Some(dec!(8)));
        assert_eq!(quantity(&resources[3], "IOPS"), Some(dec!(300)));
    }

    #[test]
    fn second_pass_sees_built_references() {
        let resources = build_plan(&UsageMap::default(), &BuildOptions::default()).unwrap();

        assert_eq!(quantity(&resources[0], "Storage"), Some(dec!(10)));
        // built in a later wave than the copy it references
        assert_eq!(quantity(&resources[1], "Storage"), Some(dec!(10)));
    }

    #[test]
    fn free_and_unsupported_are_reported() {
        let resources = build_plan(&UsageMap::default(), &BuildOptions::default()).unwrap();

        let free = &resources[4];
        assert!(free.no_price && free.is_skipped);
        assert_eq!(free.tags, None);

        let unsupported = &resources[5];
        assert!(unsupported.is_skipped);
        assert_eq!(unsupported.skip_message.as_deref(), Some("This resource is not currently supported"));
        assert_eq!(unsupported.tags.as_ref().and_then(|t| t.get("a")).map(String::as_str), Some("b"));
    }

    #[test]
    fn dedicated_pool_gives_same_result() {
        let global = build_plan(&UsageMap::default(), &BuildOptions::default()).unwrap();
        let pooled = build_plan(
            &UsageMap::default(),
            &BuildOptions {
                concurrency: 2,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(global, pooled);
    }

    #[test]
    fn cancelled_build_fails() {
        let options = BuildOptions::default();
        options.cancel.store(true, Ordering::Relaxed);

        let result = build_plan(&UsageMap::default(), &options);
        assert!(matches!(result, Err(BuildError::Cancelled)));
    }

    #[test]
    fn deferral_does_not_need_cycles_resolved() {
        let plan = Plan::new(vec![
            RawResource::new("test_copy.a", "test_copy", value!({ "source": "test_copy.b" })),
            RawResource::new("test_copy.b", "test_copy", value!({ "source": "test_copy.a" })),
        ]);
        let graph = resolve(plan, &registry());
        let resources = build(&graph, &registry(), &UsageMap::default(), &BuildOptions::default()).unwrap();

        assert_eq!(resources.len(), 2);
        assert_eq!(quantity(&resources[0], "Storage"), Some(Decimal::ZERO));
    }

    #[test]
    fn extreme_usage_does_not_abort_the_build() {
        let usage = "version: 0.1\nresource_usage:\n  test_disk.b:\n    monthly_iops: \"79228162514264337593543950335\"\n"
            .parse()
            .unwrap();
        let mut resources = build_plan(&usage, &BuildOptions::default()).unwrap();
        let flat = |_: &ProductFilter, _: Option<&PriceFilter>| Some(dec!(2));
        attach_prices(&mut resources, &flat);

        assert_eq!(resources.len(), 6);
        assert_eq!(quantity(&resources[3], "IOPS"), Some(Decimal::MAX));
        assert_eq!(resources[3].monthly_cost, Some(Decimal::MAX));
        assert_eq!(quantity(&resources[2], "Storage"), Some(dec!(10)));
    }

    #[test]
    fn panicking_plugin_is_skipped() {
        let plan = Plan::new(vec![
            RawResource::new("test_careless.huge", "test_careless", value!({ "size": 10000000000000000i64 })),
            RawResource::new("test_careless.small", "test_careless", value!({ "size": 3 })),
            RawResource::new("test_disk.a", "test_disk", value!({ "size": 10 })),
        ]);
        let graph = resolve(plan, &registry());
        let resources = build(&graph, &registry(), &UsageMap::default(), &BuildOptions::default()).unwrap();

        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["test_careless.huge", "test_careless.small", "test_disk.a"]);

        let huge = &resources[0];
        assert!(huge.is_skipped);
        assert_eq!(huge.resource_type, "test_careless");
        assert_eq!(huge.skip_message.as_deref(), Some("Cost calculation failed for this resource"));

        assert_eq!(quantity(&resources[1], "Storage"), Some(dec!(9)));
        assert_eq!(quantity(&resources[2], "Storage"), Some(dec!(10)));
    }
}
