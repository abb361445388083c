//! end to end cost estimate of a [Plan]
use crate::cost::{saturating_add, CostedResource};
use crate::driver::{build, BuildError, BuildOptions};
use crate::graph::resolve;
use crate::pricing::{attach_prices, PriceLookup};
use crate::registry::{Protocol, Registry};
use crate::resource::Plan;
use crate::usage::UsageMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Priced cost trees of all resources and their totals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakdown {
    /// in address order
    pub resources: Vec<CostedResource>,
    pub total_hourly_cost: Option<Decimal>,
    pub total_monthly_cost: Option<Decimal>,
    pub total_monthly_usage_cost: Option<Decimal>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_resources: usize,
    pub supported_resources: usize,
    pub free_resources: usize,
    pub unsupported_resources: usize,
    /// resources whose cost depends on usage estimates that were not supplied
    pub estimated_usage_missing: usize,
    pub unsupported_kinds: BTreeMap<String, usize>,
}

/// Resolve references, build every resource, attach prices and roll up costs
#[tracing::instrument(level = "trace", skip_all)]
pub fn estimate(
    plan: Plan,
    registry: &Registry,
    usage: &UsageMap,
    prices: &dyn PriceLookup,
    options: &BuildOptions,
) -> Result<Breakdown, BuildError> {
    let graph = resolve(plan, registry);
    let mut resources = build(&graph, registry, usage, options)?;
    // quantities are zero filled once prices are attached
    let missing: Vec<bool> = resources.iter().map(missing_usage).collect();
    attach_prices(&mut resources, prices);

    let mut summary = Summary {
        total_resources: resources.len(),
        ..Default::default()
    };
    for ((raw, resource), missing) in graph.resources().iter().zip(&resources).zip(missing) {
        match registry.get(&raw.kind).map(|item| item.protocol) {
            None => {
                summary.unsupported_resources += 1;
                *summary.unsupported_kinds.entry(raw.kind.clone()).or_default() += 1;
            }
            Some(Protocol::Free) => summary.free_resources += 1,
            Some(_) if resource.no_price => summary.free_resources += 1,
            Some(_) => {
                summary.supported_resources += 1;
                if missing {
                    summary.estimated_usage_missing += 1;
                }
            }
        }
    }

    tracing::debug!(?summary, "estimate done");
    Ok(Breakdown {
        total_hourly_cost: total(&resources, |r| r.hourly_cost),
        total_monthly_cost: total(&resources, |r| r.monthly_cost),
        total_monthly_usage_cost: total(&resources, |r| r.monthly_usage_cost),
        resources,
        summary,
    })
}

/// `None` when no resource has a cost
fn total(resources: &[CostedResource], cost: impl Fn(&CostedResource) -> Option<Decimal>) -> Option<Decimal> {
    resources
        .iter()
        .filter_map(cost)
        .fold(None, |sum, cost| Some(saturating_add(sum.unwrap_or_default(), cost)))
}

/// Declared usage keys that were not supplied, else usage based components without a quantity
fn missing_usage(resource: &CostedResource) -> bool {
    match &resource.missing_usage {
        Some(keys) => !keys.is_empty(),
        None => resource
            .all_components()
            .iter()
            .any(|c| c.usage_based && c.hourly_quantity.is_none() && c.monthly_quantity.is_none()),
    }
}
