use super::{product, region};
use crate::cost::{saturating_mul, AttributeFilter, CostComponent, CostedResource, PriceFilter};
use crate::data::ResourceData;
use crate::registry::{CoreResource, RegistryItem, TagSupport};
use crate::tiers::named_tiers;
use crate::usage::UsageData;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const DEFAULT_MEMORY_MB: i64 = 128;
const DEFAULT_STORAGE_MB: i64 = 512;

const X86_TIERS: [Decimal; 2] = [dec!(6000000000), dec!(15000000000)];
const X86_TIER_NAMES: [&str; 3] = ["Duration (first 6B)", "Duration (next 9B)", "Duration (over 15B)"];
const ARM_TIERS: [Decimal; 2] = [dec!(7500000000), dec!(18750000000)];
const ARM_TIER_NAMES: [&str; 3] = ["Duration (first 7.5B)", "Duration (next 11.25B)", "Duration (over 18.75B)"];

pub fn registry_item() -> RegistryItem {
    RegistryItem::staged("aws_lambda_function", new).tags(TagSupport::tags())
}

fn new(data: &ResourceData) -> Box<dyn CoreResource> {
    let arm = data
        .get("architectures")
        .list()
        .first()
        .and_then(|a| a.as_str())
        .is_some_and(|a| a == "arm64");

    Box::new(LambdaFunction {
        name: data.address().to_string(),
        region: region(data),
        memory_size: data.get("memory_size").as_i64().unwrap_or(DEFAULT_MEMORY_MB),
        storage_size: data.get("ephemeral_storage.0.size").as_i64().unwrap_or(DEFAULT_STORAGE_MB),
        arm,
        ..Default::default()
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LambdaFunction {
    pub name: String,
    pub region: String,
    pub memory_size: i64,
    pub storage_size: i64,
    pub arm: bool,

    pub request_duration_ms: Option<i64>,
    pub monthly_requests: Option<i64>,
}

impl LambdaFunction {
    fn group(&self, x86: &str) -> String {
        if self.arm {
            format!("{x86}-ARM")
        } else {
            x86.to_string()
        }
    }

    fn serverless(&self, group: &str, usage_type: &str) -> crate::cost::ProductFilter {
        product(&self.region, "AWSLambda", "Serverless")
            .attribute(AttributeFilter::exact("group", self.group(group)))
            .attribute(AttributeFilter::regex("usagetype", format!("/{usage_type}/")))
    }

    /// Compute time of all requests, each rounded up to the next millisecond
    pub fn gb_seconds(&self, requests: Decimal) -> Decimal {
        let gb = Decimal::from(self.memory_size) / dec!(1024);
        let seconds = Decimal::from(self.request_duration_ms.unwrap_or(1)).ceil() / dec!(1000);
        saturating_mul(saturating_mul(requests, gb), seconds)
    }

    /// Only storage above the free 512 MB is billed
    pub fn storage_gb_seconds(&self, gb_seconds: Decimal) -> Decimal {
        let storage = Decimal::from(self.storage_size.saturating_sub(DEFAULT_STORAGE_MB)) / dec!(1024);
        saturating_mul(storage, gb_seconds)
    }

    fn duration(&self, name: &str, start_usage_amount: Decimal, quantity: Option<Decimal>) -> CostComponent {
        CostComponent::new(name, "GB-seconds")
            .monthly(quantity)
            .product(self.serverless("AWS-Lambda-Duration", "GB-Second"))
            .price_filter(PriceFilter::default().starting_at(start_usage_amount))
            .usage_based()
    }
}

impl CoreResource for LambdaFunction {
    fn core_type(&self) -> &'static str {
        "LambdaFunction"
    }

    fn usage_schema(&self) -> &'static [&'static str] {
        &["monthly_requests", "request_duration_ms"]
    }

    fn populate_usage(&mut self, usage: &UsageData) {
        self.request_duration_ms = usage.get_i64("request_duration_ms");
        self.monthly_requests = usage.get_i64("monthly_requests");
    }

    fn build_resource(self: Box<Self>) -> CostedResource {
        let (tiers, names) = if self.arm {
            (ARM_TIERS, ARM_TIER_NAMES)
        } else {
            (X86_TIERS, X86_TIER_NAMES)
        };

        let requests = self.monthly_requests.map(Decimal::from);
        let gb_seconds = requests.map(|requests| self.gb_seconds(requests));

        let mut components = vec![
            CostComponent::new("Requests", "1M requests")
                .unit_multiplier(dec!(1000000))
                .monthly(requests)
                .product(self.serverless("AWS-Lambda-Requests", "Request"))
                .usage_based(),
            CostComponent::new("Ephemeral storage", "GB-seconds")
                .monthly(gb_seconds.map(|gb_seconds| self.storage_gb_seconds(gb_seconds)))
                .product(self.serverless("AWS-Lambda-Storage-Duration", "GB-Second"))
                .usage_based(),
        ];

        match gb_seconds {
            Some(gb_seconds) => components.extend(
                named_tiers(gb_seconds, &tiers, &names)
                    .into_iter()
                    .map(|tier| self.duration(tier.name, tier.start_usage_amount, Some(tier.quantity))),
            ),
            None => components.push(self.duration(names[0], Decimal::ZERO, None)),
        }

        CostedResource::new(&self.name).with_components(components)
    }
}
