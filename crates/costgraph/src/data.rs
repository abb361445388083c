//! read-only view of one resource for plugin constructors
use crate::cost::CostedResource;
use crate::graph::ResolvedGraph;
use crate::resource::{RawResource, ResourceId};
use crate::value::Value;
use indexmap::IndexMap;
use std::cell::Cell;
use std::rc::Rc;

/// Attributes, metadata and resolved references of one resource
///
/// Views returned by [ResourceData::references] share the construction state of the view they
/// were obtained from, so a chained lookup of built references still defers the constructing
/// resource.
#[derive(Clone)]
pub struct ResourceData<'g> {
    graph: &'g ResolvedGraph,
    id: ResourceId,
    /// outputs of the previous pass, indexed by [ResourceId]
    built: Option<&'g [CostedResource]>,
    deferred: Rc<Cell<bool>>,
}

impl<'g> ResourceData<'g> {
    pub fn new(graph: &'g ResolvedGraph, id: ResourceId, built: Option<&'g [CostedResource]>) -> Self {
        Self {
            graph,
            id,
            built,
            deferred: Rc::new(Cell::new(false)),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn raw(&self) -> &'g RawResource {
        self.graph.resource(self.id)
    }

    pub fn address(&self) -> &'g str {
        &self.raw().address
    }

    pub fn kind(&self) -> &'g str {
        &self.raw().kind
    }

    pub fn provider_name(&self) -> &'g str {
        &self.raw().provider_name
    }

    pub fn identities(&self) -> &'g [String] {
        &self.raw().identities
    }

    /// Attribute at `path`, see [Value::get]
    pub fn get(&self, path: &str) -> &'g Value {
        self.raw().values.get(path)
    }

    /// Every value at `path`, see [Value::query]
    pub fn query(&self, path: &str) -> Vec<&'g Value> {
        self.raw().values.query(path)
    }

    /// `region` attribute, else the region of the resource's provider configuration
    pub fn region(&self) -> Option<&'g str> {
        if let Some(region) = self.get("region").as_str().filter(|r| !r.is_empty()) {
            return Some(region);
        }

        self.provider_config()
            .and_then(|config| config.region.as_deref())
    }

    pub fn region_or(&self, default: &'g str) -> &'g str {
        self.region().unwrap_or(default)
    }

    /// Default tags of the resource's provider configuration
    pub fn provider_default_tags(&self) -> Option<&'g IndexMap<String, String>> {
        self.provider_config()
            .and_then(|config| config.default_tags.as_ref())
    }

    /// Provider block by its full key (`aws.west`), falling back to the unaliased provider
    fn provider_config(&self) -> Option<&'g crate::resource::ProviderConfig> {
        let raw = self.raw();
        self.graph
            .provider(&raw.provider_name)
            .or_else(|| self.graph.provider(raw.provider_prefix()))
    }

    /// Views of the resources referenced through `key`
    pub fn references(&self, key: &str) -> Vec<ResourceData<'g>> {
        self.graph
            .references_of(self.id, key)
            .iter()
            .map(|target| ResourceData {
                graph: self.graph,
                id: *target,
                built: self.built,
                deferred: Rc::clone(&self.deferred),
            })
            .collect()
    }

    /// First referenced resource, targets are in address order
    pub fn reference(&self, key: &str) -> Option<ResourceData<'g>> {
        self.references(key).into_iter().next()
    }

    /// Reference keys with at least one target
    pub fn reference_keys(&self) -> Vec<&'g str> {
        self.graph
            .references(self.id)
            .iter()
            .filter(|(_, targets)| !targets.is_empty())
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Already constructed cost trees of the resources referenced through `key`
    ///
    /// These are only known once every resource was constructed once. Before that this returns
    /// nothing and marks the current construction as deferred, it is repeated with the outputs
    /// of the first pass.
    pub fn built_references(&self, key: &str) -> Vec<&'g CostedResource> {
        let targets = self.graph.references_of(self.id, key);
        if targets.is_empty() {
            return vec![];
        }

        match self.built {
            Some(built) => targets.iter().filter_map(|t| built.get(t.index())).collect(),
            None => {
                tracing::trace!(address = self.address(), key, "built references unavailable, deferring");
                self.deferred.set(true);
                vec![]
            }
        }
    }

    /// Whether a construction using this view asked for unavailable built references
    pub fn deferred(&self) -> bool {
        self.deferred.get()
    }
}

impl std::fmt::Debug for ResourceData<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceData")
            .field("address", &self.address())
            .field("deferred", &self.deferred())
            .finish()
    }
}
