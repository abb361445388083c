//! unit prices
//!
//! Cost components describe their product with a [ProductFilter] and an optional [PriceFilter].
//! A [PriceLookup] turns such a description into zero or one unit price. Prices are not cached
//! or retried here, a missing price is reported per component.
//!
//! [PriceTable] is a file backed lookup:
//! ```yaml
//! products:
//!   - vendor_name: aws
//!     service: AmazonEC2
//!     product_family: Compute Instance
//!     region: us-east-1
//!     attributes:
//!       instanceType: t3.micro
//!       tenancy: Shared
//!     prices:
//!       - price: "0.0104"
//!         unit: Hrs
//!         purchase_option: on_demand
//! ```
use crate::cost::{AttributeFilter, CostedResource, PriceFilter, ProductFilter};
use dashmap::DashMap;
use indexmap::IndexMap;
use rayon::prelude::*;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

pub trait PriceLookup: Sync {
    fn lookup(&self, product: &ProductFilter, price: Option<&PriceFilter>) -> Option<Decimal>;
}

impl<F> PriceLookup for F
where
    F: Fn(&ProductFilter, Option<&PriceFilter>) -> Option<Decimal> + Sync,
{
    fn lookup(&self, product: &ProductFilter, price: Option<&PriceFilter>) -> Option<Decimal> {
        self(product, price)
    }
}

/// Attach unit prices to every component and roll up costs
///
/// Components marked `ignore_if_missing_price` are removed when no price was found.
#[tracing::instrument(level = "trace", skip_all)]
pub fn attach_prices(resources: &mut [CostedResource], prices: &dyn PriceLookup) {
    resources.par_iter_mut().for_each(|resource| {
        let name = resource.name.clone();
        for component in resource.all_components_mut() {
            let Some(product) = &component.product_filter else {
                continue;
            };

            match prices.lookup(product, component.price_filter.as_ref()) {
                Some(price) => component.set_price(price),
                None => tracing::debug!(resource = %name, component = %component.name, "price not found"),
            }
        }

        resource.remove_unpriced_ignorable();
        resource.calculate_costs();
    });
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceTable {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(skip)]
    patterns: Patterns,
}

/// Compiled filter regexes by pattern, shared by concurrent lookups
///
/// Invalid patterns are remembered as `None` and never match.
#[derive(Debug, Clone, Default)]
struct Patterns(DashMap<String, Option<Regex>>);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Product {
    pub vendor_name: String,
    pub service: String,
    pub product_family: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
    #[serde(default)]
    pub prices: Vec<Price>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Price {
    pub price: Decimal,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub purchase_option: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_usage_amount: Option<Decimal>,
    #[serde(default)]
    pub term_length: Option<String>,
    #[serde(default)]
    pub term_purchase_option: Option<String>,
    #[serde(default)]
    pub term_offering_class: Option<String>,
}

impl Price {
    fn start(&self) -> Decimal {
        self.start_usage_amount.unwrap_or_default()
    }
}

impl PriceTable {
    /// Load a `.json`, `.yaml` or `.yml` price file
    pub fn load_file(path: &Path) -> Result<Self, PriceTableError> {
        tracing::info!(path = %path.display(), "loading price table");
        let contents = std::fs::read_to_string(path)?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&contents)?),
            _ => Ok(serde_yaml::from_str(&contents)?),
        }
    }

    fn products<'a>(&'a self, filter: &'a ProductFilter) -> impl Iterator<Item = &'a Product> + 'a {
        self.products
            .iter()
            .filter(move |product| product.matches(filter, &self.patterns))
    }
}

impl std::str::FromStr for PriceTable {
    type Err = PriceTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_yaml::from_str(s)?)
    }
}

impl PriceLookup for PriceTable {
    /// Lowest start usage amount wins, then declaration order
    fn lookup(&self, product: &ProductFilter, price: Option<&PriceFilter>) -> Option<Decimal> {
        let mut best: Option<&Price> = None;
        for candidate in self
            .products(product)
            .flat_map(|p| p.prices.iter())
            .filter(|p| price.map(|filter| p.matches(filter, &self.patterns)).unwrap_or(true))
        {
            if best.map(|b| candidate.start() < b.start()).unwrap_or(true) {
                best = Some(candidate);
            }
        }

        best.map(|p| p.price)
    }
}

impl Product {
    fn matches(&self, filter: &ProductFilter, patterns: &Patterns) -> bool {
        fn field(expected: &Option<String>, actual: Option<&str>) -> bool {
            match expected {
                Some(expected) => actual == Some(expected.as_str()),
                None => true,
            }
        }

        field(&filter.vendor_name, Some(&self.vendor_name))
            && field(&filter.service, Some(&self.service))
            && field(&filter.product_family, Some(&self.product_family))
            && field(&filter.region, self.region.as_deref())
            && field(&filter.sku, self.sku.as_deref())
            && filter
                .attribute_filters
                .iter()
                .all(|attribute| attribute_matches(attribute, self.attributes.get(&attribute.key), patterns))
    }
}

impl Price {
    fn matches(&self, filter: &PriceFilter, patterns: &Patterns) -> bool {
        fn field(expected: &Option<String>, actual: &Option<String>) -> bool {
            expected.is_none() || expected == actual
        }

        field(&filter.purchase_option, &self.purchase_option)
            && field(&filter.unit, &self.unit)
            && field(&filter.description, &self.description)
            && field(&filter.term_length, &self.term_length)
            && field(&filter.term_purchase_option, &self.term_purchase_option)
            && field(&filter.term_offering_class, &self.term_offering_class)
            && filter
                .description_regex
                .as_deref()
                .map(|pattern| patterns.is_match(pattern, self.description.as_deref().unwrap_or_default()))
                .unwrap_or(true)
            && filter
                .start_usage_amount
                .map(|start| start == self.start())
                .unwrap_or(true)
    }
}

fn attribute_matches(filter: &AttributeFilter, actual: Option<&String>, patterns: &Patterns) -> bool {
    let Some(actual) = actual else {
        return false;
    };

    if let Some(value) = &filter.value {
        return value == actual;
    }
    if let Some(pattern) = &filter.value_regex {
        return patterns.is_match(pattern, actual);
    }
    true
}

impl Patterns {
    fn is_match(&self, pattern: &str, value: &str) -> bool {
        if let Some(regex) = self.0.get(pattern) {
            return regex.as_ref().is_some_and(|regex| regex.is_match(value));
        }

        let regex = compile(pattern);
        let matched = regex.as_ref().is_some_and(|regex| regex.is_match(value));
        self.0.insert(pattern.to_string(), regex);
        matched
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.len()
    }
}

/// `/pattern/` or `/pattern/i`, undelimited patterns are used as written
fn compile(pattern: &str) -> Option<Regex> {
    let (body, case_insensitive) = match pattern.strip_prefix('/') {
        Some(rest) => match rest.strip_suffix("/i") {
            Some(body) => (body, true),
            None => (rest.strip_suffix('/').unwrap_or(rest), false),
        },
        None => (pattern, false),
    };

    match regex::RegexBuilder::new(body)
        .case_insensitive(case_insensitive)
        .build()
    {
        Ok(regex) => Some(regex),
        Err(error) => {
            tracing::warn!(pattern, %error, "invalid price filter regex");
            None
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PriceTableError {
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse price table YAML")]
    YamlParseFailed(#[from] serde_yaml::Error),
    #[error("Unable to parse price table JSON")]
    JsonParseFailed(#[from] serde_json::Error),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cost::CostComponent;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    const TABLE: &str = r#"
products:
  - vendor_name: aws
    service: AmazonEC2
    product_family: Compute Instance
    region: us-east-1
    attributes:
      instanceType: t3.micro
      operatingSystem: Linux
    prices:
      - price: "0.0104"
        unit: Hrs
        purchase_option: on_demand
      - price: "0.0031"
        unit: Hrs
        purchase_option: spot
  - vendor_name: aws
    service: AWSCertificateManager
    product_family: Certificate Management
    region: us-east-1
    attributes:
      usagetype: USE1-PaidPrivateCA
    prices:
      - price: "0.35"
        start_usage_amount: "1000"
      - price: "0.75"
        start_usage_amount: "0"
      - price: "0.001"
        start_usage_amount: "10000"
"#;

    fn table() -> PriceTable {
        TABLE.parse().unwrap()
    }

    fn ec2() -> ProductFilter {
        ProductFilter::new("aws", "AmazonEC2", "Compute Instance", "us-east-1")
            .attribute(AttributeFilter::exact("instanceType", "t3.micro"))
    }

    #[test]
    fn filters_products_and_prices() {
        let table = table();

        assert_eq!(table.lookup(&ec2(), Some(&PriceFilter::purchase_option("on_demand"))), Some(dec!(0.0104)));
        assert_eq!(table.lookup(&ec2(), Some(&PriceFilter::purchase_option("spot"))), Some(dec!(0.0031)));
        assert_eq!(table.lookup(&ec2(), Some(&PriceFilter::purchase_option("reserved"))), None);

        let other_region = ProductFilter::new("aws", "AmazonEC2", "Compute Instance", "eu-west-1");
        assert_eq!(table.lookup(&other_region, None), None);
    }

    #[test]
    fn regex_attribute_filters() {
        let table = table();
        let filter = ProductFilter::new("aws", "AmazonEC2", "Compute Instance", "us-east-1")
            .attribute(AttributeFilter::regex("operatingSystem", "/linux/i"));

        assert_eq!(table.lookup(&filter, Some(&PriceFilter::purchase_option("on_demand"))), Some(dec!(0.0104)));

        let filter = ProductFilter::new("aws", "AmazonEC2", "Compute Instance", "us-east-1")
            .attribute(AttributeFilter::regex("operatingSystem", "/linux/"));
        assert_eq!(table.lookup(&filter, None), None);
    }

    #[test]
    fn patterns_are_compiled_once() {
        let table = table();
        let linux = ProductFilter::new("aws", "AmazonEC2", "Compute Instance", "us-east-1")
            .attribute(AttributeFilter::regex("operatingSystem", "/linux/i"));
        let broken = ProductFilter::new("aws", "AmazonEC2", "Compute Instance", "us-east-1")
            .attribute(AttributeFilter::regex("operatingSystem", "/(linux/"));

        for _ in 0..3 {
            assert_eq!(table.lookup(&linux, Some(&PriceFilter::purchase_option("spot"))), Some(dec!(0.0031)));
            assert_eq!(table.lookup(&broken, None), None);
        }
        assert_eq!(table.patterns.len(), 2);

        // cached per table, a fresh one starts empty
        assert_eq!(TABLE.parse::<PriceTable>().unwrap().patterns.len(), 0);
    }

    #[test]
    fn lowest_start_usage_amount_wins() {
        let table = table();
        let filter = ProductFilter::new("aws", "AWSCertificateManager", "Certificate Management", "us-east-1")
            .attribute(AttributeFilter::exact("usagetype", "USE1-PaidPrivateCA"));

        assert_eq!(table.lookup(&filter, None), Some(dec!(0.75)));
        assert_eq!(
            table.lookup(&filter, Some(&PriceFilter::default().starting_at(dec!(1000)))),
            Some(dec!(0.35))
        );
    }

    #[test]
    fn attach_prices_rolls_up() {
        let mut resources = vec![CostedResource::new("aws_instance.web").with_components(vec![
            CostComponent::new("Instance usage", "hours")
                .hourly(dec!(1))
                .product(ec2())
                .price_filter(PriceFilter::purchase_option("on_demand")),
            CostComponent::new("Unpriced", "GB")
                .monthly(dec!(1))
                .product(ProductFilter::new("aws", "Nothing", "Nothing", "us-east-1")),
            CostComponent::new("Dropped", "GB")
                .monthly(dec!(1))
                .product(ProductFilter::new("aws", "Nothing", "Nothing", "us-east-1"))
                .ignore_if_missing_price(),
        ])];

        attach_prices(&mut resources, &table());

        let resource = &resources[0];
        assert_eq!(resource.cost_components.len(), 2);
        assert_eq!(resource.monthly_cost, Some(dec!(7.592)));
        assert!(resource.component("Unpriced").unwrap().price_not_found());
    }

    #[test]
    fn closures_are_lookups() {
        let flat = |_: &ProductFilter, _: Option<&PriceFilter>| Some(dec!(1));
        let mut resources = vec![CostedResource::new("r").with_components(vec![CostComponent::new("c", "GB")
            .monthly(dec!(3))
            .product(ProductFilter::default())])];

        attach_prices(&mut resources, &flat);
        assert_eq!(resources[0].monthly_cost, Some(dec!(3)));
    }
}
