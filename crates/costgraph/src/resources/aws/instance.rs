use super::ebs_volume::EbsVolume;
use super::{product, region, referenced_tag_specifications};
use crate::cost::{saturating_mul, AttributeFilter, CostComponent, CostedResource, PriceFilter};
use crate::data::ResourceData;
use crate::registry::{CoreResource, ReferenceSpec, RegistryItem, TagSupport};
use crate::tags::{parse_tags, TagParsingConfig, Tags};
use crate::usage::UsageData;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const DETAILED_MONITORING_METRICS: i64 = 7;
const BURSTABLE_FAMILIES: &[&str] = &["t2", "t3", "t3a", "t4g"];

pub fn registry_item() -> RegistryItem {
    RegistryItem::staged("aws_instance", new)
        .references([
            ReferenceSpec::forward("launch_template.0.id"),
            ReferenceSpec::forward("launch_template.0.name"),
        ])
        .tags(TagSupport::tags().synthesize(instance_tags))
}

fn new(data: &ResourceData) -> Box<dyn CoreResource> {
    let region = region(data);
    let template = data
        .reference("launch_template.0.id")
        .or_else(|| data.reference("launch_template.0.name"));

    // attributes missing on the instance are taken from its launch template
    let instance_type = match (data.get("instance_type").as_str(), &template) {
        (Some(instance_type), _) => instance_type.to_string(),
        (None, Some(template)) => template.get("instance_type").str_or("").to_string(),
        (None, None) => String::new(),
    };

    let root_block_device = EbsVolume::block_device("root_block_device", &region, data.get("root_block_device.0"));
    let ebs_block_devices = data
        .get("ebs_block_device")
        .list()
        .into_iter()
        .enumerate()
        .map(|(i, device)| EbsVolume::block_device(format!("ebs_block_device[{i}]"), &region, device))
        .collect();

    let purchase_option = match data.get("instance_market_options.0.market_type").as_str() {
        Some(market) if market.eq_ignore_ascii_case("spot") => "spot",
        _ => "on_demand",
    };

    Box::new(Instance {
        name: data.address().to_string(),
        tenancy: data.get("tenancy").str_or("").to_string(),
        purchase_option: purchase_option.to_string(),
        instance_type,
        ebs_optimized: data.get("ebs_optimized").as_bool().unwrap_or_default(),
        enable_monitoring: data.get("monitoring").as_bool().unwrap_or_default(),
        cpu_credits: data.get("credit_specification.0.cpu_credits").str_or("").to_string(),
        root_block_device: Some(root_block_device),
        ebs_block_devices,
        region,
        ..Default::default()
    })
}

/// EC2 instance, also the per instance template of launch templates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instance {
    pub name: String,
    pub region: String,
    pub tenancy: String,
    pub purchase_option: String,
    pub instance_type: String,
    pub ebs_optimized: bool,
    pub enable_monitoring: bool,
    pub cpu_credits: String,
    pub root_block_device: Option<EbsVolume>,
    pub ebs_block_devices: Vec<EbsVolume>,

    pub operating_system: Option<String>,
    pub reserved_instance_type: Option<String>,
    pub reserved_instance_term: Option<String>,
    pub reserved_instance_payment_option: Option<String>,
    pub monthly_cpu_credit_hrs: Option<i64>,
    pub vcpu_count: Option<i64>,
}

impl Instance {
    /// Instance specific usage keys, shared with launch templates
    pub fn apply_usage(&mut self, usage: &UsageData) {
        self.operating_system = usage.get_string("operating_system").or(self.operating_system.take());
        self.reserved_instance_type = usage.get_string("reserved_instance_type");
        self.reserved_instance_term = usage.get_string("reserved_instance_term");
        self.reserved_instance_payment_option = usage.get_string("reserved_instance_payment_option");
        self.monthly_cpu_credit_hrs = usage.get_i64("monthly_cpu_credit_hrs");
        self.vcpu_count = usage.get_i64("vcpu_count");
    }

    fn normalized_tenancy(&self) -> Option<&'static str> {
        match self.tenancy.to_lowercase().as_str() {
            "host" => None,
            "dedicated" => Some("Dedicated"),
            _ => Some("Shared"),
        }
    }

    /// Cost tree of one instance, skipped for host tenancy
    pub fn build(&self) -> CostedResource {
        let Some(tenancy) = self.normalized_tenancy() else {
            tracing::warn!(resource = %self.name, "host tenancy is not supported");
            return CostedResource::skipped(&self.name, "Host tenancy is not supported");
        };

        let mut sub_resources = vec![];
        if let Some(root) = &self.root_block_device {
            sub_resources.push(root.build());
        }
        sub_resources.extend(self.ebs_block_devices.iter().map(EbsVolume::build));

        let mut components = vec![self.compute(tenancy)];

        if self.ebs_optimized {
            components.push(
                CostComponent::new("EBS-optimized usage", "hours")
                    .hourly(Decimal::ONE)
                    .product(
                        product(&self.region, "AmazonEC2", "Compute Instance")
                            .attribute(AttributeFilter::exact("instanceType", &self.instance_type))
                            .attribute(AttributeFilter::regex("usagetype", "/EBSOptimized/")),
                    )
                    .ignore_if_missing_price(),
            );
        }

        if self.enable_monitoring {
            components.push(
                CostComponent::new("EC2 detailed monitoring", "metrics")
                    .monthly(Decimal::from(DETAILED_MONITORING_METRICS))
                    .product(product(&self.region, "AmazonCloudWatch", "Metric"))
                    .price_filter(PriceFilter::default().starting_at(Decimal::ZERO))
                    .ignore_if_missing_price(),
            );
        }

        let cpu_credits = match self.cpu_credits.as_str() {
            "" if self.instance_type.starts_with("t3.") || self.instance_type.starts_with("t4g.") => "unlimited",
            other => other,
        };
        if cpu_credits == "unlimited" {
            if let Some(family) = burstable_family(&self.instance_type) {
                components.push(self.cpu_credits(family));
            }
        }

        CostedResource::new(&self.name)
            .with_components(components)
            .with_sub_resources(sub_resources)
    }

    fn operating_system(&self) -> (&'static str, &'static str) {
        match self.operating_system.as_deref().unwrap_or("linux") {
            "windows" => ("Windows", "Windows"),
            "rhel" => ("RHEL", "RHEL"),
            "suse" => ("SUSE", "SUSE"),
            "linux" => ("Linux/UNIX", "Linux"),
            other => {
                tracing::warn!(operating_system = other, "unrecognized operating system, using Linux/UNIX");
                ("Linux/UNIX", "Linux")
            }
        }
    }

    fn reserved_term(&self) -> Option<(&'static str, &'static str, &str)> {
        let class = self.reserved_instance_type.as_deref()?;
        if !["convertible", "standard"].contains(&class) {
            tracing::warn!(class, "invalid reserved_instance_type, ignoring reserved options");
            return None;
        }

        let term = match self.reserved_instance_term.as_deref() {
            Some("1_year") => "1yr",
            Some("3_year") => "3yr",
            other => {
                tracing::warn!(term = ?other, "invalid reserved_instance_term, ignoring reserved options");
                return None;
            }
        };

        let payment = match self.reserved_instance_payment_option.as_deref() {
            Some("no_upfront") => "No Upfront",
            Some("partial_upfront") => "Partial Upfront",
            Some("all_upfront") => "All Upfront",
            other => {
                tracing::warn!(payment = ?other, "invalid reserved_instance_payment_option, ignoring reserved options");
                return None;
            }
        };

        Some((term, payment, class))
    }

    /// "Instance usage" component for one running instance
    pub fn compute(&self, tenancy: &str) -> CostComponent {
        let (os_label, os_filter) = self.operating_system();

        let product = product(&self.region, "AmazonEC2", "Compute Instance")
            .attribute(AttributeFilter::exact("instanceType", &self.instance_type))
            .attribute(AttributeFilter::exact("tenancy", tenancy))
            .attribute(AttributeFilter::exact("operatingSystem", os_filter))
            .attribute(AttributeFilter::exact("preInstalledSw", "NA"))
            .attribute(AttributeFilter::exact("capacitystatus", "Used"));

        if let Some((term, payment, class)) = self.reserved_term() {
            return CostComponent::new(
                format!("Instance usage ({os_label}, reserved, {})", self.instance_type),
                "hours",
            )
            .hourly(Decimal::ONE)
            .product(product)
            .price_filter(PriceFilter {
                start_usage_amount: Some(Decimal::ZERO),
                term_offering_class: Some(class.to_string()),
                term_length: Some(term.to_string()),
                term_purchase_option: Some(payment.to_string()),
                ..Default::default()
            });
        }

        let purchase_option = if self.purchase_option.is_empty() {
            "on_demand"
        } else {
            self.purchase_option.as_str()
        };
        let label = if purchase_option == "spot" { "spot" } else { "on-demand" };

        CostComponent::new(format!("Instance usage ({os_label}, {label}, {})", self.instance_type), "hours")
            .hourly(Decimal::ONE)
            .product(product.attribute(AttributeFilter::exact("licenseModel", "No License required")))
            .price_filter(PriceFilter::purchase_option(purchase_option))
    }

    fn cpu_credits(&self, family: &str) -> CostComponent {
        let quantity = match (self.monthly_cpu_credit_hrs, self.vcpu_count) {
            (Some(hours), Some(vcpus)) => saturating_mul(Decimal::from(hours), Decimal::from(vcpus)),
            _ => Decimal::ZERO,
        };

        CostComponent::new("CPU credits", "vCPU-hours")
            .monthly(quantity)
            .product(
                product(&self.region, "AmazonEC2", "CPU Credits")
                    .attribute(AttributeFilter::exact("operatingSystem", "Linux"))
                    .attribute(AttributeFilter::regex("usagetype", format!("/CPUCredits:{family}$/"))),
            )
    }
}

impl CoreResource for Instance {
    fn core_type(&self) -> &'static str {
        "Instance"
    }

    fn populate_usage(&mut self, usage: &UsageData) {
        self.apply_usage(usage);
    }

    fn build_resource(self: Box<Self>) -> CostedResource {
        self.build()
    }
}

/// `t3` for `t3.micro`, when that is a burstable family
fn burstable_family(instance_type: &str) -> Option<&str> {
    let family = instance_type.split('.').next()?;
    BURSTABLE_FAMILIES.contains(&family).then_some(family)
}

/// Volume tags, default tag propagation and launch template tag specifications
fn instance_tags(data: &ResourceData, default_tags: Option<&Tags>, config: &TagParsingConfig, tags: &mut Tags) {
    let ebs_devices = data.get("ebs_block_device").list();

    if let Some(default_tags) = default_tags.filter(|_| config.propagate_default_tags_to_volumes) {
        for (key, value) in default_tags {
            if data.get("volume_tags").exists() {
                tags.insert(format!("volume_tags.{key}"), value.clone());
            } else {
                // a root device exists even when not declared
                tags.insert(format!("root_block_device.{key}"), value.clone());
                for i in 0..ebs_devices.len() {
                    tags.insert(format!("ebs_block_device[{i}].{key}"), value.clone());
                }
            }
        }
    }

    for (key, value) in parse_tags(data.get("root_block_device.0.tags")) {
        tags.insert(format!("root_block_device.{key}"), value);
    }

    for (i, device) in ebs_devices.into_iter().enumerate() {
        for (key, value) in parse_tags(device.get("tags")) {
            tags.insert(format!("ebs_block_device[{i}].{key}"), value);
        }
    }

    for (key, value) in parse_tags(data.get("volume_tags")) {
        tags.insert(format!("volume_tags.{key}"), value);
    }

    referenced_tag_specifications(data, |resource_type, specification| match resource_type {
        "instance" => tags.extend(specification),
        "volume" => tags.extend(specification.into_iter().map(|(k, v)| (format!("volume_tags.{k}"), v))),
        _ => {}
    });
}
