use super::ebs_volume::DEFAULT_VOLUME_SIZE;
use super::{product, region};
use crate::cost::{AttributeFilter, CostComponent, CostedResource};
use crate::data::ResourceData;
use crate::registry::{CoreResource, ReferenceSpec, RegistryItem, TagSupport};
use crate::usage::UsageData;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const STORAGE: &str = "EBS snapshot storage";

pub fn registry_item() -> RegistryItem {
    RegistryItem::staged("aws_ebs_snapshot", new)
        .references([ReferenceSpec::forward("volume_id")])
        .tags(TagSupport::tags())
}

/// Copies are priced by the size of their source snapshot
pub fn copy_registry_item() -> RegistryItem {
    RegistryItem::staged("aws_ebs_snapshot_copy", new_copy)
        .references([ReferenceSpec::forward("source_snapshot_id")])
        .tags(TagSupport::tags())
}

fn new(data: &ResourceData) -> Box<dyn CoreResource> {
    let size = data.reference("volume_id").and_then(|volume| volume.get("size").as_decimal());

    Box::new(EbsSnapshot {
        name: data.address().to_string(),
        region: region(data),
        size_gb: size,
        ..Default::default()
    })
}

fn new_copy(data: &ResourceData) -> Box<dyn CoreResource> {
    // the built source knows its final size, including usage applied to it
    let built = data
        .built_references("source_snapshot_id")
        .into_iter()
        .find_map(|source| source.component(STORAGE).and_then(|c| c.monthly_quantity));

    let size = built.or_else(|| {
        data.reference("source_snapshot_id")
            .and_then(|snapshot| snapshot.reference("volume_id"))
            .and_then(|volume| volume.get("size").as_decimal())
    });

    Box::new(EbsSnapshot {
        name: data.address().to_string(),
        region: region(data),
        size_gb: size,
        ..Default::default()
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EbsSnapshot {
    pub name: String,
    pub region: String,
    pub size_gb: Option<Decimal>,

    pub monthly_list_block_requests: Option<i64>,
    pub monthly_get_block_requests: Option<i64>,
    pub monthly_put_block_requests: Option<i64>,
    pub fast_snapshot_restore_hours: Option<i64>,
}

impl EbsSnapshot {
    fn api_requests(&self, name: &str, unit: &str, usage_type: &str, quantity: Option<i64>) -> CostComponent {
        CostComponent::new(name, unit)
            .unit_multiplier(dec!(1000))
            .monthly(quantity.map(Decimal::from))
            .product(
                product(&self.region, "AmazonEC2", "EBS direct API Requests")
                    .attribute(AttributeFilter::regex("usagetype", format!("/{usage_type}$/"))),
            )
            .usage_based()
    }
}

impl CoreResource for EbsSnapshot {
    fn core_type(&self) -> &'static str {
        "EBSSnapshot"
    }

    fn usage_schema(&self) -> &'static [&'static str] {
        &[
            "fast_snapshot_restore_hours",
            "monthly_list_block_requests",
            "monthly_get_block_requests",
            "monthly_put_block_requests",
        ]
    }

    fn populate_usage(&mut self, usage: &UsageData) {
        self.monthly_list_block_requests = usage.get_i64("monthly_list_block_requests");
        self.monthly_get_block_requests = usage.get_i64("monthly_get_block_requests");
        self.monthly_put_block_requests = usage.get_i64("monthly_put_block_requests");
        self.fast_snapshot_restore_hours = usage.get_i64("fast_snapshot_restore_hours");
    }

    fn build_resource(self: Box<Self>) -> CostedResource {
        let size = self.size_gb.unwrap_or(Decimal::from(DEFAULT_VOLUME_SIZE));

        let components = vec![
            CostComponent::new(STORAGE, "GB").monthly(size).product(
                product(&self.region, "AmazonEC2", "Storage Snapshot")
                    .attribute(AttributeFilter::regex("usagetype", "/EBS:SnapshotUsage$/")),
            ),
            CostComponent::new("Fast snapshot restore", "DSU-hours")
                .monthly(self.fast_snapshot_restore_hours.map(Decimal::from))
                .product(
                    product(&self.region, "AmazonEC2", "Fast Snapshot Restore")
                        .attribute(AttributeFilter::regex("usagetype", "/EBS:FastSnapshotRestore$/")),
                )
                .usage_based(),
            self.api_requests(
                "ListChangedBlocks & ListSnapshotBlocks API requests",
                "1k requests",
                "EBS:directAPI.snapshot.List",
                self.monthly_list_block_requests,
            ),
            self.api_requests(
                "GetSnapshotBlock API requests",
                "1k SnapshotAPIUnits",
                "EBS:directAPI.snapshot.Get",
                self.monthly_get_block_requests,
            ),
            self.api_requests(
                "PutSnapshotBlock API requests",
                "1k SnapshotAPIUnits",
                "EBS:directAPI.snapshot.Put",
                self.monthly_put_block_requests,
            ),
        ];

        CostedResource::new(&self.name).with_components(components)
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

    fn storage(resources: &[CostedResource], name: &str) -> Option<Decimal> {
        resources
            .iter()
            .find(|r| r.name == name)
            .and_then(|r| r.component(STORAGE))
            .and_then(|c| c.monthly_quantity)
    }

    #[test]
    fn snapshot_and_copy_take_the_volume_size() {
        let plan = Plan::new(vec![
            RawResource::new("aws_ebs_volume.data", "aws_ebs_volume", value!({ "size": 40 })),
            RawResource::new(
                "aws_ebs_snapshot.backup",
                "aws_ebs_snapshot",
                value!({ "volume_id": "aws_ebs_volume.data" }),
            ),
            RawResource::new(
                "aws_ebs_snapshot_copy.dr",
                "aws_ebs_snapshot_copy",
                value!({ "source_snapshot_id": "aws_ebs_snapshot.backup" }),
            ),
            RawResource::new("aws_ebs_snapshot.orphan", "aws_ebs_snapshot", value!({})),
        ]);
        let registry = Registry::builder()
            .register(registry_item())
            .register(copy_registry_item())
            .register(super::super::ebs_volume::registry_item())
            .build();
        let graph = resolve(plan, &registry);

        let resources = build(&graph, &registry, &UsageMap::default(), &BuildOptions::default()).unwrap();

        assert_eq!(storage(&resources, "aws_ebs_snapshot.backup"), Some(dec!(40)));
        assert_eq!(storage(&resources, "aws_ebs_snapshot_copy.dr"), Some(dec!(40)));
        assert_eq!(storage(&resources, "aws_ebs_snapshot.orphan"), Some(dec!(8)));
    }

    #[test]
    fn build_records_missing_usage() {
        let plan = Plan::new(vec![RawResource::new("aws_ebs_snapshot.backup", "aws_ebs_snapshot", value!({}))]);
        let registry = Registry::builder().register(registry_item()).build();
        let usage: UsageMap = r#"
version: 0.1
resource_usage:
  aws_ebs_snapshot.backup:
    monthly_list_block_requests: 1000
    monthly_get_block_requests: 1000
    monthly_put_block_requests: 1000
"#
        .parse()
        .unwrap();

        let resources = build(&resolve(plan, &registry), &registry, &usage, &BuildOptions::default()).unwrap();

        assert_eq!(resources[0].missing_usage, Some(vec!["fast_snapshot_restore_hours".to_string()]));
    }
}
