use super::{product, region};
use crate::cost::{AttributeFilter, CostComponent, CostedResource, PriceFilter};
use crate::data::ResourceData;
use crate::registry::{CoreResource, ReferenceSpec, RegistryItem, TagSupport};
use rust_decimal::Decimal;

const ASSOCIATIONS: &str = "aws_eip_association.allocation_id";

/// Elastic IPs are only billed while not attached to anything
pub fn registry_item() -> RegistryItem {
    RegistryItem::staged("aws_eip", new)
        .references([
            ReferenceSpec::forward("instance"),
            ReferenceSpec::forward("network_interface"),
            ReferenceSpec::reverse("aws_eip_association", "allocation_id"),
        ])
        .tags(TagSupport::tags())
}

fn new(data: &ResourceData) -> Box<dyn CoreResource> {
    let attached = ["instance", "network_interface", "association_id"]
        .iter()
        .any(|attribute| data.get(attribute).as_str().is_some_and(|v| !v.is_empty()))
        || !data.references(ASSOCIATIONS).is_empty();

    Box::new(Eip {
        name: data.address().to_string(),
        region: region(data),
        attached,
        customer_owned: data.get("customer_owned_ipv4_pool").as_str().is_some_and(|v| !v.is_empty()),
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Eip {
    pub name: String,
    pub region: String,
    pub attached: bool,
    pub customer_owned: bool,
}

impl CoreResource for Eip {
    fn core_type(&self) -> &'static str {
        "EIP"
    }

    fn build_resource(self: Box<Self>) -> CostedResource {
        if self.attached || self.customer_owned {
            return CostedResource::free(&self.name);
        }

        CostedResource::new(&self.name).with_components(vec![CostComponent::new("IP address (if unused)", "hours")
            .hourly(Decimal::ONE)
            .product(
                product(&self.region, "AmazonEC2", "IP Address")
                    .attribute(AttributeFilter::regex("usagetype", "/ElasticIP:IdleAddress/")),
            )
            .price_filter(PriceFilter::default().starting_at(Decimal::ONE))])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::{build, BuildOptions};
    use crate::graph::resolve;
    use crate::registry::Registry;
    use crate::resource::{Plan, RawResource};
    use crate::usage::UsageMap;
    use crate::value;
    use pretty_assertions::assert_eq;

    #[test]
    fn associated_addresses_are_free() {
        let plan = Plan::new(vec![
            RawResource::new("aws_eip.used", "aws_eip", value!({ "id": "eipalloc-1" })),
            RawResource::new("aws_eip.idle", "aws_eip", value!({ "id": "eipalloc-2" })),
            RawResource::new("aws_eip.direct", "aws_eip", value!({ "instance": "i-123" })),
            RawResource::new(
                "aws_eip_association.assoc",
                "aws_eip_association",
                value!({ "allocation_id": "aws_eip.used" }),
            ),
        ]);
        let registry = Registry::builder()
            .default_provider_identities()
            .register(registry_item())
            .register(RegistryItem::free("aws_eip_association"))
            .build();
        let graph = resolve(plan, &registry);

        let resources = build(&graph, &registry, &UsageMap::default(), &BuildOptions::default()).unwrap();
        let free: Vec<_> = resources
            .iter()
            .filter(|r| r.resource_type == "aws_eip")
            .map(|r| (r.name.as_str(), r.no_price))
            .collect();

        assert_eq!(
            free,
            vec![("aws_eip.direct", true), ("aws_eip.idle", false), ("aws_eip.used", true)]
        );
    }
}
