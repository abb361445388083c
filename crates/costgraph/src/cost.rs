//! cost components and costed resource trees
//!
//! A [CostedResource] is the output of constructing one resource: a named node with
//! [CostComponent]s and sub-resources. Quantities are filled in by resource plugins, unit
//! prices by the external pricing lookup ([crate::pricing]), and costs by
//! [CostComponent::materialize] / [CostedResource::calculate_costs].
//!
//! Every component carries either an hourly or a monthly quantity. The other one is derived
//! with [HOURS_IN_MONTH] the first time costs are materialized.
//!
//! Quantities come from user supplied usage and can be arbitrarily large. All arithmetic on them
//! goes through [saturating_mul] / [saturating_add], a product that does not fit a [Decimal] is
//! clamped to [Decimal::MAX] instead of aborting the estimate.
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Average hours per month, identical for every resource kind
pub const HOURS_IN_MONTH: Decimal = dec!(730);

#[derive(Debug, Clone, Default, PartialEq, Serialize, derive_new::new)]
#[serde(rename_all = "camelCase")]
pub struct AttributeFilter {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_regex: Option<String>,
}

impl AttributeFilter {
    pub fn exact(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key.into(), Some(value.into()), None)
    }

    pub fn regex(key: impl Into<String>, value_regex: impl Into<String>) -> Self {
        Self::new(key.into(), None, Some(value_regex.into()))
    }
}

/// Declarative description of the product a component is priced by
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attribute_filters: Vec<AttributeFilter>,
}

impl ProductFilter {
    pub fn new(vendor_name: &str, service: &str, product_family: &str, region: &str) -> Self {
        Self {
            vendor_name: Some(vendor_name.to_string()),
            service: Some(service.to_string()),
            product_family: Some(product_family.to_string()),
            region: (!region.is_empty()).then(|| region.to_string()),
            sku: None,
            attribute_filters: vec![],
        }
    }

    pub fn attribute(mut self, filter: AttributeFilter) -> Self {
        self.attribute_filters.push(filter);
        self
    }
}

/// Tie-break rules applied to the prices of a matched product
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_regex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_length: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_purchase_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_offering_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_usage_amount: Option<Decimal>,
}

impl PriceFilter {
    pub fn purchase_option(option: &str) -> Self {
        Self {
            purchase_option: Some(option.to_string()),
            ..Default::default()
        }
    }

    pub fn starting_at(mut self, start_usage_amount: Decimal) -> Self {
        self.start_usage_amount = Some(start_usage_amount);
        self
    }
}

/// One billable dimension of a resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostComponent {
    pub name: String,
    pub unit: String,
    /// display scaling, e.g. `1_000_000` for a "1M requests" unit
    pub unit_multiplier: Decimal,
    pub hourly_quantity: Option<Decimal>,
    pub monthly_quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_filter: Option<ProductFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_filter: Option<PriceFilter>,
    pub usage_based: bool,
    /// drop the component instead of reporting "price not found"
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignore_if_missing_price: bool,
    pub price: Option<Decimal>,
    pub hourly_cost: Option<Decimal>,
    pub monthly_cost: Option<Decimal>,
}

impl CostComponent {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            unit_multiplier: Decimal::ONE,
            hourly_quantity: None,
            monthly_quantity: None,
            product_filter: None,
            price_filter: None,
            usage_based: false,
            ignore_if_missing_price: false,
            price: None,
            hourly_cost: None,
            monthly_cost: None,
        }
    }

    pub fn hourly(mut self, quantity: impl Into<Option<Decimal>>) -> Self {
        self.hourly_quantity = quantity.into();
        self
    }

    pub fn monthly(mut self, quantity: impl Into<Option<Decimal>>) -> Self {
        self.monthly_quantity = quantity.into();
        self
    }

    pub fn unit_multiplier(mut self, multiplier: Decimal) -> Self {
        self.unit_multiplier = multiplier;
        self
    }

    pub fn product(mut self, filter: ProductFilter) -> Self {
        self.product_filter = Some(filter);
        self
    }

    pub fn price_filter(mut self, filter: PriceFilter) -> Self {
        self.price_filter = Some(filter);
        self
    }

    pub fn usage_based(mut self) -> Self {
        self.usage_based = true;
        self
    }

    pub fn ignore_if_missing_price(mut self) -> Self {
        self.ignore_if_missing_price = true;
        self
    }

    /// Attach the unit price returned by the pricing lookup
    pub fn set_price(&mut self, price: Decimal) {
        self.price = Some(price);
    }

    /// Derive the missing quantity and compute costs from the attached unit price
    ///
    /// Without a price the costs are zero, which is reported as "price not found".
    /// Calling this again yields the same result.
    pub fn materialize(&mut self) {
        match (self.hourly_quantity, self.monthly_quantity) {
            (None, None) => {
                self.hourly_quantity = Some(Decimal::ZERO);
                self.monthly_quantity = Some(Decimal::ZERO);
            }
            (Some(hourly), None) => self.monthly_quantity = Some(saturating_mul(hourly, HOURS_IN_MONTH)),
            (None, Some(monthly)) => self.hourly_quantity = Some(monthly / HOURS_IN_MONTH),
            (Some(_), Some(_)) => {}
        }

        let price = self.price.unwrap_or_default();
        self.hourly_cost = self.hourly_quantity.map(|q| saturating_mul(price, q));
        self.monthly_cost = self.monthly_quantity.map(|q| saturating_mul(price, q));
    }

    /// Materialized without a price
    pub fn price_not_found(&self) -> bool {
        self.price.is_none() && self.monthly_cost.is_some()
    }

    /// Quantity in display units
    pub fn unit_monthly_quantity(&self) -> Option<Decimal> {
        self.monthly_quantity.map(|q| divide_by_multiplier(q, self.unit_multiplier))
    }

    /// Price in display units
    pub fn unit_price(&self) -> Option<Decimal> {
        self.price.map(|p| saturating_mul(p, self.unit_multiplier))
    }
}

fn divide_by_multiplier(quantity: Decimal, multiplier: Decimal) -> Decimal {
    if multiplier.is_zero() {
        return quantity;
    }
    quantity
        .checked_div(multiplier)
        .unwrap_or_else(|| saturated(quantity.is_sign_negative() != multiplier.is_sign_negative()))
}

/// `a * b`, clamped to [Decimal::MAX] or [Decimal::MIN] when the product overflows
pub fn saturating_mul(a: Decimal, b: Decimal) -> Decimal {
    a.checked_mul(b).unwrap_or_else(|| {
        tracing::debug!(%a, %b, "quantity overflow, saturating");
        saturated(a.is_sign_negative() != b.is_sign_negative())
    })
}

/// `a + b`, clamped like [saturating_mul]
pub fn saturating_add(a: Decimal, b: Decimal) -> Decimal {
    a.checked_add(b).unwrap_or_else(|| {
        tracing::debug!(%a, %b, "cost overflow, saturating");
        saturated(a.is_sign_negative())
    })
}

fn saturated(negative: bool) -> Decimal {
    if negative {
        Decimal::MIN
    } else {
        Decimal::MAX
    }
}

/// Output tree node of one constructed resource
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostedResource {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_type: String,
    pub cost_components: Vec<CostComponent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_resources: Vec<CostedResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<IndexMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_tags: Option<IndexMap<String, String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub provider_supports_default_tags: bool,
    pub is_skipped: bool,
    pub no_price: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_message: Option<String>,
    /// usage keys the estimate depends on that were not supplied, `None` when the kind declares none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_usage: Option<Vec<String>>,
    pub hourly_cost: Option<Decimal>,
    pub monthly_cost: Option<Decimal>,
    pub monthly_usage_cost: Option<Decimal>,
}

impl CostedResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_components(mut self, components: Vec<CostComponent>) -> Self {
        self.cost_components = components;
        self
    }

    pub fn with_sub_resources(mut self, sub_resources: Vec<CostedResource>) -> Self {
        self.sub_resources = sub_resources;
        self
    }

    /// A registered resource that is free of charge
    pub fn free(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_skipped: true,
            no_price: true,
            ..Default::default()
        }
    }

    /// A resource the registry has no plugin for
    pub fn unsupported(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: kind.into(),
            is_skipped: true,
            skip_message: Some("This resource is not currently supported".to_string()),
            ..Default::default()
        }
    }

    pub fn skipped(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_skipped: true,
            skip_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Multiply every quantity in this tree, see [scale]
    pub fn scale(&mut self, multiplier: Decimal) {
        scale(self, multiplier)
    }

    /// Materialize every component and roll costs up the tree
    ///
    /// Costs are recomputed from the components each time, repeated calls are stable.
    /// Rolled up costs stay `None` when nothing in the tree has a cost.
    pub fn calculate_costs(&mut self) {
        let mut hourly = Decimal::ZERO;
        let mut monthly = Decimal::ZERO;
        let mut monthly_usage: Option<Decimal> = None;
        let mut has_cost = false;

        for component in &mut self.cost_components {
            component.materialize();
            if component.hourly_cost.is_some() || component.monthly_cost.is_some() {
                has_cost = true;
            }
            hourly = saturating_add(hourly, component.hourly_cost.unwrap_or_default());
            if let Some(cost) = component.monthly_cost {
                monthly = saturating_add(monthly, cost);
                if component.usage_based {
                    monthly_usage = Some(saturating_add(monthly_usage.unwrap_or_default(), cost));
                }
            }
        }

        for sub_resource in &mut self.sub_resources {
            sub_resource.calculate_costs();
            if sub_resource.hourly_cost.is_some()
                || sub_resource.monthly_cost.is_some()
                || sub_resource.monthly_usage_cost.is_some()
            {
                has_cost = true;
            }
            hourly = saturating_add(hourly, sub_resource.hourly_cost.unwrap_or_default());
            monthly = saturating_add(monthly, sub_resource.monthly_cost.unwrap_or_default());
            if let Some(cost) = sub_resource.monthly_usage_cost {
                monthly_usage = Some(saturating_add(monthly_usage.unwrap_or_default(), cost));
            }
        }

        if has_cost {
            self.hourly_cost = Some(hourly);
            self.monthly_cost = Some(monthly);
            self.monthly_usage_cost = monthly_usage;
        } else {
            self.hourly_cost = None;
            self.monthly_cost = None;
            self.monthly_usage_cost = None;
        }

        if self.no_price {
            tracing::debug!(resource = %self.name, "skipping free resource");
        }
    }

    /// Drop components that asked to be dropped when no price was found
    pub fn remove_unpriced_ignorable(&mut self) {
        self.cost_components
            .retain(|c| !(c.ignore_if_missing_price && c.price.is_none()));
        for sub_resource in &mut self.sub_resources {
            sub_resource.remove_unpriced_ignorable();
        }
    }

    /// All sub-resources of the tree, depth first
    pub fn flattened_sub_resources(&self) -> Vec<&CostedResource> {
        let mut resources = Vec::with_capacity(self.sub_resources.len());
        for sub_resource in &self.sub_resources {
            resources.push(sub_resource);
            resources.extend(sub_resource.flattened_sub_resources());
        }
        resources
    }

    /// Every component of the tree, own components first
    pub fn all_components(&self) -> Vec<&CostComponent> {
        let mut components: Vec<&CostComponent> = self.cost_components.iter().collect();
        for sub_resource in &self.sub_resources {
            components.extend(sub_resource.all_components());
        }
        components
    }

    pub fn all_components_mut(&mut self) -> Vec<&mut CostComponent> {
        let mut components: Vec<&mut CostComponent> = self.cost_components.iter_mut().collect();
        for sub_resource in &mut self.sub_resources {
            components.extend(sub_resource.all_components_mut());
        }
        components
    }

    pub fn component(&self, name: &str) -> Option<&CostComponent> {
        self.cost_components.iter().find(|c| c.name == name)
    }

    pub fn sub_resource(&self, name: &str) -> Option<&CostedResource> {
        self.sub_resources.iter().find(|r| r.name == name)
    }
}

/// Multiply every hourly and monthly quantity in the tree by `multiplier`
///
/// This is a plain multiply: calling it twice scales twice. Overflowing quantities saturate.
pub fn scale(resource: &mut CostedResource, multiplier: Decimal) {
    for component in &mut resource.cost_components {
        component.hourly_quantity = component.hourly_quantity.map(|q| saturating_mul(q, multiplier));
        component.monthly_quantity = component.monthly_quantity.map(|q| saturating_mul(q, multiplier));
    }

    for sub_resource in &mut resource.sub_resources {
        scale(sub_resource, multiplier);
    }
}
