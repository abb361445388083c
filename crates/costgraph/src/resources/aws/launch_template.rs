use super::ebs_volume::EbsVolume;
use super::instance::Instance;
use super::region;
use crate::cost::CostedResource;
use crate::data::ResourceData;
use crate::registry::{attribute_identities, RegistryItem, TagSupport};
use crate::resource::RawResource;
use crate::tags::{parse_tags, TagParsingConfig, Tags};
use crate::usage::UsageData;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Launch templates cost nothing by themselves, the groups using them are priced
pub fn registry_item() -> RegistryItem {
    RegistryItem::free("aws_launch_template")
        .custom_identity(name_identity)
        .tags(TagSupport::tags().synthesize(own_tag_specifications))
}

/// Templates are also referenced by `launch_template { name = .. }`
fn name_identity(raw: &RawResource) -> Vec<String> {
    attribute_identities(raw, &["name"])
}

fn own_tag_specifications(data: &ResourceData, _: Option<&Tags>, _: &TagParsingConfig, tags: &mut Tags) {
    for specification in data.get("tag_specifications").list() {
        for (key, value) in parse_tags(specification.get("tags")) {
            tags.insert(format!("tag_specifications.{key}"), value);
        }
    }
}

/// A fleet of identical instances started from a launch template or configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchTemplate {
    pub name: String,
    pub instance: Instance,
    pub instance_count: i64,
    pub on_demand_base_count: i64,
    pub on_demand_percentage_above_base: i64,
}

impl LaunchTemplate {
    /// Fleet of `count` instances described by an `aws_launch_template`
    pub fn from_launch_template(template: &ResourceData, count: i64) -> Self {
        let region = region(template);

        let ebs_block_devices = template
            .query("block_device_mappings.#.ebs")
            .into_iter()
            .flat_map(|ebs| ebs.list())
            .enumerate()
            .map(|(i, ebs)| EbsVolume::block_device(format!("block_device_mapping[{i}]"), &region, ebs))
            .collect();

        let spot = template
            .get("instance_market_options.0.market_type")
            .as_str()
            .is_some_and(|market| market.eq_ignore_ascii_case("spot"));

        Self {
            name: template.address().to_string(),
            instance: Instance {
                name: template.address().to_string(),
                tenancy: template.get("placement.0.tenancy").str_or("").to_string(),
                instance_type: template.get("instance_type").str_or("").to_string(),
                ebs_optimized: template.get("ebs_optimized").as_bool().unwrap_or_default(),
                enable_monitoring: template.get("monitoring.0.enabled").as_bool().unwrap_or_default(),
                cpu_credits: template.get("credit_specification.0.cpu_credits").str_or("").to_string(),
                ebs_block_devices,
                region,
                ..Default::default()
            },
            instance_count: count,
            on_demand_base_count: 0,
            on_demand_percentage_above_base: if spot { 0 } else { 100 },
        }
    }

    /// Fleet of `count` instances described by an `aws_launch_configuration`
    pub fn from_launch_configuration(configuration: &ResourceData, count: i64) -> Self {
        let region = region(configuration);

        let root_block_device =
            EbsVolume::block_device("root_block_device", &region, configuration.get("root_block_device.0"));
        let ebs_block_devices = configuration
            .get("ebs_block_device")
            .list()
            .into_iter()
            .enumerate()
            .map(|(i, device)| EbsVolume::block_device(format!("ebs_block_device[{i}]"), &region, device))
            .collect();

        let spot = configuration.get("spot_price").as_str().is_some_and(|price| !price.is_empty());

        Self {
            name: configuration.address().to_string(),
            instance: Instance {
                name: configuration.address().to_string(),
                tenancy: configuration.get("placement_tenancy").str_or("").to_string(),
                instance_type: configuration.get("instance_type").str_or("").to_string(),
                ebs_optimized: configuration.get("ebs_optimized").as_bool().unwrap_or_default(),
                enable_monitoring: configuration.get("enable_monitoring").as_bool().unwrap_or_default(),
                cpu_credits: configuration.get("credit_specification.0.cpu_credits").str_or("").to_string(),
                root_block_device: Some(root_block_device),
                ebs_block_devices,
                region,
                ..Default::default()
            },
            instance_count: count,
            on_demand_base_count: 0,
            on_demand_percentage_above_base: if spot { 0 } else { 100 },
        }
    }

    /// Instance usage keys plus an `instances` override of the fleet size
    pub fn populate_usage(&mut self, usage: &UsageData) {
        self.instance.apply_usage(usage);
        if let Some(instances) = usage.get_i64("instances") {
            self.instance_count = instances;
        }
    }

    /// `(on demand, spot)` instance counts
    ///
    /// The base count is on demand, the percentage of the remainder (rounded up) too.
    pub fn purchase_split(&self) -> (i64, i64) {
        let total = self.instance_count.max(0);
        let base = self.on_demand_base_count.clamp(0, total);
        let remaining = Decimal::from(total - base);
        let above_base = (remaining * Decimal::from(self.on_demand_percentage_above_base.clamp(0, 100))
            / Decimal::ONE_HUNDRED)
            .ceil();

        let on_demand = (base + above_base.to_i64().unwrap_or_default()).min(total);
        (on_demand, total - on_demand)
    }

    /// One instance built and scaled by the fleet size
    ///
    /// Its compute components are replaced by one per purchase option, counted by the split.
    pub fn build(&self) -> CostedResource {
        let template = self.instance.build();
        if template.is_skipped {
            return CostedResource::skipped(&self.name, template.skip_message.unwrap_or_default());
        }

        let mut resource = CostedResource::new(&self.name)
            .with_components(
                template
                    .cost_components
                    .into_iter()
                    .filter(|c| !c.name.starts_with("Instance usage"))
                    .collect(),
            )
            .with_sub_resources(template.sub_resources);
        resource.scale(Decimal::from(self.instance_count.max(0)));

        let tenancy = match self.instance.tenancy.to_lowercase().as_str() {
            "dedicated" => "Dedicated",
            _ => "Shared",
        };

        let (on_demand, spot) = self.purchase_split();
        let mut compute = vec![];
        for (purchase_option, count) in [("on_demand", on_demand), ("spot", spot)] {
            if count > 0 {
                let instance = Instance {
                    purchase_option: purchase_option.to_string(),
                    ..self.instance.clone()
                };
                compute.push(instance.compute(tenancy).hourly(Decimal::from(count)));
            }
        }
        compute.append(&mut resource.cost_components);
        resource.cost_components = compute;

        resource
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn fleet(count: i64, base: i64, percentage: i64) -> LaunchTemplate {
        LaunchTemplate {
            name: "aws_launch_template.lt".into(),
            instance: Instance {
                name: "aws_launch_template.lt".into(),
                region: "us-east-1".into(),
                instance_type: "m5.large".into(),
                root_block_device: Some(EbsVolume {
                    name: "root_block_device".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            instance_count: count,
            on_demand_base_count: base,
            on_demand_percentage_above_base: percentage,
        }
    }

    #[test]
    fn purchase_split() {
        assert_eq!(fleet(3, 0, 100).purchase_split(), (3, 0));
        assert_eq!(fleet(3, 0, 0).purchase_split(), (0, 3));
        assert_eq!(fleet(5, 1, 50).purchase_split(), (3, 2));
        assert_eq!(fleet(2, 4, 0).purchase_split(), (2, 0));
    }

    #[test]
    fn scales_by_instance_count() {
        let resource = fleet(3, 0, 100).build();

        assert_eq!(resource.cost_components.len(), 1);
        assert_eq!(resource.cost_components[0].name, "Instance usage (Linux/UNIX, on-demand, m5.large)");
        assert_eq!(resource.cost_components[0].hourly_quantity, Some(dec!(3)));

        let root = resource.sub_resource("root_block_device").unwrap();
        assert_eq!(root.cost_components[0].monthly_quantity, Some(dec!(24)));
    }

    #[test]
    fn mixed_purchase_options() {
        let resource = fleet(4, 1, 0).build();

        let quantities: Vec<_> = resource
            .cost_components
            .iter()
            .map(|c| (c.name.as_str(), c.hourly_quantity))
            .collect();
        assert_eq!(
            quantities,
            vec![
                ("Instance usage (Linux/UNIX, on-demand, m5.large)", Some(dec!(1))),
                ("Instance usage (Linux/UNIX, spot, m5.large)", Some(dec!(3))),
            ]
        );
    }

    #[test]
    fn instances_usage_overrides_count() {
        let mut fleet = fleet(3, 0, 100);
        fleet.populate_usage(&UsageData::empty("x").with("instances", 7i64));

        assert_eq!(fleet.purchase_split(), (7, 0));
    }
}
