use super::launch_template::LaunchTemplate;
use super::referenced_tag_specifications;
use crate::cost::CostedResource;
use crate::data::ResourceData;
use crate::registry::{CoreResource, ReferenceSpec, RegistryItem, TagSupport};
use crate::tags::{TagParsingConfig, Tags};
use crate::usage::UsageData;
use crate::value::Value;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

const MIXED_TEMPLATE: &str =
    "mixed_instances_policy.0.launch_template.0.launch_template_specification.0.launch_template_id";

pub fn registry_item() -> RegistryItem {
    RegistryItem::staged("aws_autoscaling_group", new)
        .references([
            ReferenceSpec::forward("launch_configuration"),
            ReferenceSpec::forward("launch_template.0.id"),
            ReferenceSpec::forward("launch_template.0.name"),
            ReferenceSpec::forward(MIXED_TEMPLATE),
            ReferenceSpec::forward("launch_template"),
        ])
        .tags(TagSupport::tags().block("tag").synthesize(instance_tag_specifications))
}

fn new(data: &ResourceData) -> Box<dyn CoreResource> {
    let capacity = data.get("desired_capacity").as_i64().unwrap_or_default();

    let template = ["launch_template", "launch_template.0.id", "launch_template.0.name"]
        .into_iter()
        .find_map(|key| data.reference(key));

    let fleet = if let Some(configuration) = data.reference("launch_configuration") {
        Some(LaunchTemplate::from_launch_configuration(&configuration, capacity))
    } else if let Some(template) = template {
        Some(LaunchTemplate::from_launch_template(&template, capacity))
    } else if let Some(template) = data.reference(MIXED_TEMPLATE) {
        let policy = data.get("mixed_instances_policy.0");
        let (instance_type, count) = mixed_instance_type_and_count(policy, capacity);

        let mut fleet = LaunchTemplate::from_launch_template(&template, count);
        if let Some(instance_type) = instance_type {
            fleet.instance.instance_type = instance_type;
        }

        let distribution = policy.get("instances_distribution.0");
        fleet.on_demand_base_count = distribution.get("on_demand_base_capacity").as_i64().unwrap_or(0);
        fleet.on_demand_percentage_above_base =
            distribution.get("on_demand_percentage_above_base_capacity").as_i64().unwrap_or(100);
        Some(fleet)
    } else {
        tracing::debug!(address = data.address(), "autoscaling group without launch template or configuration");
        None
    };

    Box::new(AutoscalingGroup {
        name: data.address().to_string(),
        fleet,
    })
}

/// Override instance type and the capacity in instances of that type
fn mixed_instance_type_and_count(policy: &Value, capacity: i64) -> (Option<String>, i64) {
    let r#override = policy.get("launch_template.0.override.0");
    if r#override.is_null() {
        return (None, capacity);
    }

    let instance_type = r#override.get("instance_type").as_str().map(str::to_string);
    let weight = r#override.get("weighted_capacity").as_i64().unwrap_or(1);
    let count = match weight {
        0 => 0,
        weight => (Decimal::from(capacity) / Decimal::from(weight))
            .ceil()
            .to_i64()
            .unwrap_or_default(),
    };

    (instance_type, count)
}

/// Tag specifications of the referenced launch template apply to the group's instances
fn instance_tag_specifications(data: &ResourceData, _: Option<&Tags>, _: &TagParsingConfig, tags: &mut Tags) {
    referenced_tag_specifications(data, |resource_type, specification| {
        if resource_type == "instance" {
            tags.extend(specification);
        }
    });
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoscalingGroup {
    pub name: String,
    pub fleet: Option<LaunchTemplate>,
}

impl CoreResource for AutoscalingGroup {
    fn core_type(&self) -> &'static str {
        "AutoscalingGroup"
    }

    fn populate_usage(&mut self, usage: &UsageData) {
        if let Some(fleet) = &mut self.fleet {
            fleet.populate_usage(usage);
        }
    }

    fn build_resource(self: Box<Self>) -> CostedResource {
        let sub_resources = self.fleet.iter().map(LaunchTemplate::build).collect();
        CostedResource::new(&self.name).with_sub_resources(sub_resources)
    }
}
