//! AWS resource kinds
use crate::cost::ProductFilter;
use crate::data::ResourceData;
use crate::registry::RegistryItem;
use crate::tags::{parse_tags, Tags};

pub mod acmpca_certificate_authority;
pub mod autoscaling_group;
pub mod ebs_snapshot;
pub mod ebs_volume;
pub mod eip;
pub mod instance;
pub mod lambda_function;
pub mod launch_template;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Kinds without any cost
const FREE: &[&str] = &[
    "aws_eip_association",
    "aws_iam_access_key",
    "aws_iam_group",
    "aws_iam_group_policy",
    "aws_iam_instance_profile",
    "aws_iam_policy",
    "aws_iam_policy_attachment",
    "aws_iam_role",
    "aws_iam_role_policy",
    "aws_iam_role_policy_attachment",
    "aws_iam_user",
    "aws_iam_user_policy",
    "aws_internet_gateway",
    "aws_key_pair",
    "aws_launch_configuration",
    "aws_network_acl",
    "aws_network_interface",
    "aws_route",
    "aws_route_table",
    "aws_route_table_association",
    "aws_security_group",
    "aws_security_group_rule",
    "aws_subnet",
    "aws_volume_attachment",
    "aws_vpc",
];

pub fn items() -> Vec<RegistryItem> {
    let mut items = vec![
        acmpca_certificate_authority::registry_item(),
        autoscaling_group::registry_item(),
        ebs_snapshot::registry_item(),
        ebs_snapshot::copy_registry_item(),
        ebs_volume::registry_item(),
        eip::registry_item(),
        instance::registry_item(),
        lambda_function::registry_item(),
        launch_template::registry_item(),
    ];
    items.extend(FREE.iter().copied().map(RegistryItem::free));
    items
}

/// Region of the resource, its provider or [DEFAULT_REGION]
pub(crate) fn region(data: &ResourceData) -> String {
    data.region_or(DEFAULT_REGION).to_string()
}

pub(crate) fn product(region: &str, service: &str, product_family: &str) -> ProductFilter {
    ProductFilter::new("aws", service, product_family, region)
}

/// Tags of every `tag_specifications` block of the launch templates `data` references
///
/// `visit` receives the block's `resource_type` and its tags.
pub(crate) fn referenced_tag_specifications(data: &ResourceData, mut visit: impl FnMut(&str, Tags)) {
    let mut seen = vec![];
    for key in data.reference_keys() {
        if !key.contains("launch_template") {
            continue;
        }

        for template in data.references(key) {
            if template.kind() != "aws_launch_template" || seen.contains(&template.id()) {
                continue;
            }
            seen.push(template.id());

            for specification in template.get("tag_specifications").list() {
                let resource_type = specification.get("resource_type").str_or("");
                visit(resource_type, parse_tags(specification.get("tags")));
            }
        }
    }
}
