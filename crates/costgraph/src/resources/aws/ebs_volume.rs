use super::{product, region};
use crate::cost::{AttributeFilter, CostComponent, CostedResource, PriceFilter};
use crate::data::ResourceData;
use crate::registry::{CoreResource, RegistryItem, TagSupport};
use crate::usage::UsageData;
use crate::value::Value;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub(crate) const DEFAULT_VOLUME_SIZE: i64 = 8;

pub fn registry_item() -> RegistryItem {
    RegistryItem::staged("aws_ebs_volume", new).tags(TagSupport::tags())
}

fn new(data: &ResourceData) -> Box<dyn CoreResource> {
    Box::new(EbsVolume {
        name: data.address().to_string(),
        region: region(data),
        volume_type: data.get("type").str_or("").to_string(),
        iops: data.get("iops").as_i64().unwrap_or_default(),
        throughput: data.get("throughput").as_i64().unwrap_or_default(),
        size: data.get("size").as_i64(),
        monthly_standard_io_requests: None,
    })
}

/// Block storage, standalone or attached to an instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EbsVolume {
    pub name: String,
    pub region: String,
    pub volume_type: String,
    pub iops: i64,
    pub throughput: i64,
    pub size: Option<i64>,
    pub monthly_standard_io_requests: Option<i64>,
}

impl EbsVolume {
    /// Volume described by a `root_block_device`/`ebs_block_device`/`ebs` block
    pub fn block_device(name: impl Into<String>, region: &str, device: &Value) -> Self {
        Self {
            name: name.into(),
            region: region.to_string(),
            volume_type: device.get("volume_type").str_or("").to_string(),
            iops: device.get("iops").as_i64().unwrap_or_default(),
            throughput: device.get("throughput").as_i64().unwrap_or_default(),
            size: device.get("volume_size").as_i64(),
            monthly_standard_io_requests: None,
        }
    }

    pub fn build(&self) -> CostedResource {
        let volume_type = match self.volume_type.to_lowercase() {
            t if t.is_empty() => "gp2".to_string(),
            t => t,
        };

        let mut components = vec![self.storage(&volume_type)];

        if volume_type == "gp3" && self.throughput > 125 {
            components.push(self.provisioned_throughput(&volume_type));
        }

        match volume_type.as_str() {
            "io1" => components.push(self.provisioned_iops(&volume_type, "EBS:VolumeP-IOPS.piops", self.iops)),
            "io2" => components.push(self.provisioned_iops(&volume_type, "EBS:VolumeP-IOPS.io2$", self.iops)),
            "gp3" if self.iops > 3000 => {
                components.push(self.provisioned_iops(&volume_type, "VolumeP-IOPS.gp3", self.iops - 3000))
            }
            "standard" => components.push(self.io_requests(&volume_type)),
            _ => {}
        }

        CostedResource::new(&self.name).with_components(components)
    }

    fn volume_filter(&self, volume_type: &str) -> AttributeFilter {
        AttributeFilter::regex("volumeApiName", format!("/{volume_type}/i"))
    }

    fn storage(&self, volume_type: &str) -> CostComponent {
        let name = match volume_type {
            "standard" => "Storage (magnetic)",
            "io1" => "Storage (provisioned IOPS SSD, io1)",
            "io2" => "Storage (provisioned IOPS SSD, io2)",
            "st1" => "Storage (throughput optimized HDD, st1)",
            "sc1" => "Storage (cold HDD, sc1)",
            "gp3" => "Storage (general purpose SSD, gp3)",
            "gp2" => "Storage (general purpose SSD, gp2)",
            _ => "Storage (unknown)",
        };

        CostComponent::new(name, "GB")
            .monthly(Decimal::from(self.size.unwrap_or(DEFAULT_VOLUME_SIZE)))
            .product(product(&self.region, "AmazonEC2", "Storage").attribute(self.volume_filter(volume_type)))
    }

    fn provisioned_iops(&self, volume_type: &str, usage_type: &str, iops: i64) -> CostComponent {
        CostComponent::new("Provisioned IOPS", "IOPS")
            .monthly(Decimal::from(iops))
            .product(
                product(&self.region, "AmazonEC2", "System Operation")
                    .attribute(self.volume_filter(volume_type))
                    .attribute(AttributeFilter::regex("usagetype", format!("/{usage_type}/i"))),
            )
    }

    fn io_requests(&self, volume_type: &str) -> CostComponent {
        CostComponent::new("I/O requests", "1M request")
            .unit_multiplier(dec!(1000000))
            .monthly(self.monthly_standard_io_requests.map(Decimal::from))
            .product(
                product(&self.region, "AmazonEC2", "System Operation")
                    .attribute(self.volume_filter(volume_type))
                    .attribute(AttributeFilter::regex("usagetype", "/EBS:VolumeIOUsage/i")),
            )
            .usage_based()
    }

    fn provisioned_throughput(&self, volume_type: &str) -> CostComponent {
        CostComponent::new("Provisioned throughput", "Mbps")
            .unit_multiplier(Decimal::ONE / dec!(1024))
            .monthly(Decimal::from(self.throughput - 125) / dec!(1024))
            .product(
                product(&self.region, "AmazonEC2", "Provisioned Throughput")
                    .attribute(self.volume_filter(volume_type))
                    .attribute(AttributeFilter::regex("usagetype", "/VolumeP-Throughput.gp3/")),
            )
            .price_filter(PriceFilter {
                unit: Some("GiBps-mo".to_string()),
                ..Default::default()
            })
    }
}

impl CoreResource for EbsVolume {
    fn core_type(&self) -> &'static str {
        "EBSVolume"
    }

    fn usage_schema(&self) -> &'static [&'static str] {
        if self.volume_type.eq_ignore_ascii_case("standard") {
            &["monthly_standard_io_requests"]
        } else {
            &[]
        }
    }

    fn populate_usage(&mut self, usage: &UsageData) {
        self.monthly_standard_io_requests = usage.get_i64("monthly_standard_io_requests");
    }

    fn build_resource(self: Box<Self>) -> CostedResource {
        self.build()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(resource: &CostedResource) -> Vec<&str> {
        resource.cost_components.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn defaults_to_gp2_and_eight_gb() {
        let volume = EbsVolume {
            name: "aws_ebs_volume.v".into(),
            region: "us-east-1".into(),
            ..Default::default()
        };
        let resource = volume.build();

        assert_eq!(names(&resource), vec!["Storage (general purpose SSD, gp2)"]);
        assert_eq!(resource.cost_components[0].monthly_quantity, Some(dec!(8)));
    }

    #[test]
    fn gp3_above_baseline() {
        let volume = EbsVolume {
            volume_type: "gp3".into(),
            iops: 4000,
            throughput: 253,
            size: Some(100),
            ..Default::default()
        };
        let resource = volume.build();

        assert_eq!(
            names(&resource),
            vec!["Storage (general purpose SSD, gp3)", "Provisioned throughput", "Provisioned IOPS"]
        );
        assert_eq!(resource.cost_components[1].monthly_quantity, Some(dec!(0.125)));
        assert_eq!(resource.cost_components[2].monthly_quantity, Some(dec!(1000)));
    }

    #[test]
    fn magnetic_io_requests_come_from_usage() {
        let mut volume = Box::new(EbsVolume {
            volume_type: "standard".into(),
            ..Default::default()
        });
        volume.populate_usage(&UsageData::empty("v").with("monthly_standard_io_requests", 5000000i64));
        let resource = volume.build_resource();

        let io = resource.component("I/O requests").unwrap();
        assert_eq!(io.monthly_quantity, Some(dec!(5000000)));
        assert!(io.usage_based);
    }
}
