use super::{product, region};
use crate::cost::{AttributeFilter, CostComponent, CostedResource};
use crate::data::ResourceData;
use crate::registry::{CoreResource, ReferenceSpec, RegistryItem, TagSupport};
use rust_decimal::Decimal;

const DEFAULT_SIZE_GB: i64 = 10;

pub fn registry_item() -> RegistryItem {
    RegistryItem::staged("google_compute_disk", new)
        .references([ReferenceSpec::forward("image"), ReferenceSpec::forward("snapshot")])
        .tags(TagSupport::labels())
}

fn new(data: &ResourceData) -> Box<dyn CoreResource> {
    // disks created from an image or snapshot default to its size
    let size = data.get("size").as_decimal().or_else(|| {
        ["image", "snapshot"]
            .into_iter()
            .filter_map(|key| data.reference(key))
            .find_map(|source| source.get("disk_size_gb").as_decimal())
    });

    Box::new(ComputeDisk {
        name: data.address().to_string(),
        region: region(data),
        disk_type: data.get("type").str_or("pd-standard").to_string(),
        size_gb: size,
        iops: data.get("provisioned_iops").as_i64(),
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputeDisk {
    pub name: String,
    pub region: String,
    pub disk_type: String,
    pub size_gb: Option<Decimal>,
    pub iops: Option<i64>,
}

impl CoreResource for ComputeDisk {
    fn core_type(&self) -> &'static str {
        "ComputeDisk"
    }

    fn build_resource(self: Box<Self>) -> CostedResource {
        let (label, description) = match self.disk_type.as_str() {
            "pd-balanced" => ("Balanced provisioned storage (pd-balanced)", "/^Balanced PD Capacity/"),
            "pd-ssd" => ("SSD provisioned storage (pd-ssd)", "/^SSD backed PD Capacity/"),
            "pd-extreme" => ("Extreme provisioned storage (pd-extreme)", "/^Extreme PD Capacity/"),
            _ => ("Standard provisioned storage (pd-standard)", "/^Storage PD Capacity/"),
        };

        let mut components = vec![CostComponent::new(label, "GB")
            .monthly(self.size_gb.unwrap_or(Decimal::from(DEFAULT_SIZE_GB)))
            .product(
                product(&self.region, "Compute Engine", "Storage")
                    .attribute(AttributeFilter::regex("description", description)),
            )];

        if let (Some(iops), "pd-extreme") = (self.iops, self.disk_type.as_str()) {
            components.push(
                CostComponent::new("Provisioned IOPS", "IOPS")
                    .monthly(Decimal::from(iops))
                    .product(
                        product(&self.region, "Compute Engine", "Storage")
                            .attribute(AttributeFilter::regex("description", "/^Extreme PD IOPS/")),
                    ),
            );
        }

        CostedResource::new(&self.name).with_components(components)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::{build, BuildOptions};
    use crate::graph::resolve;
    use crate::registry::Registry;
    use crate::resource::{Plan, ProviderConfig, RawResource};
    use crate::usage::UsageMap;
    use crate::value;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn sized_from_image_with_merged_labels() {
        let plan = Plan::new(vec![
            RawResource::new(
                "google_compute_disk.data",
                "google_compute_disk",
                value!({
                    "type": "pd-ssd",
                    "zone": "europe-west4-b",
                    "image": "google_compute_image.base",
                    "labels": { "team": "data" }
                }),
            ),
            RawResource::new("google_compute_image.base", "google_compute_image", value!({ "disk_size_gb": 50 })),
        ])
        .with_provider(
            "google",
            ProviderConfig {
                region: Some("us-central1".into()),
                default_tags: Some(IndexMap::from([
                    ("env".to_string(), "prod".to_string()),
                    ("team".to_string(), "platform".to_string()),
                ])),
            },
        );
        let registry = Registry::builder().default_provider_identities().register(registry_item()).build();
        let graph = resolve(plan, &registry);

        let resources = build(&graph, &registry, &UsageMap::default(), &BuildOptions::default()).unwrap();
        let disk = resources.iter().find(|r| r.name == "google_compute_disk.data").unwrap();

        let storage = &disk.cost_components[0];
        assert_eq!(storage.name, "SSD provisioned storage (pd-ssd)");
        assert_eq!(storage.monthly_quantity, Some(dec!(50)));
        assert_eq!(
            storage.product_filter.as_ref().and_then(|p| p.region.as_deref()),
            Some("europe-west4")
        );

        let labels = disk.tags.as_ref().unwrap();
        assert_eq!(labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(labels.get("team").map(String::as_str), Some("data"));
    }
}
