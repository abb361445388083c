use super::{product, region};
use crate::cost::{AttributeFilter, CostComponent, CostedResource, PriceFilter};
use crate::data::ResourceData;
use crate::registry::{RegistryItem, TagSupport};
use crate::tiers::named_tiers;
use crate::usage::UsageData;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const TIERS: [Decimal; 2] = [dec!(1000), dec!(10000)];
const TIER_NAMES: [&str; 3] = ["Certificates (1 - 1000)", "Certificates (1001 - 10000)", "Certificates (> 10000)"];

pub fn registry_item() -> RegistryItem {
    RegistryItem::legacy("aws_acmpca_certificate_authority", build).tags(TagSupport::tags())
}

fn build(data: &ResourceData, usage: &UsageData) -> CostedResource {
    let region = region(data);
    let short_lived = data.get("usage_mode").as_str() == Some("SHORT_LIVED_CERTIFICATE");

    let authority_type = if short_lived { "ShortLivedCertificatePrivateCA" } else { "PaidPrivateCA" };
    let mut components = vec![CostComponent::new("Private certificate authority", "months")
        .monthly(Decimal::ONE)
        .product(certificate_management(&region, authority_type))];

    let requests = usage.get_decimal("monthly_certificate_requests");
    if short_lived {
        components.push(
            CostComponent::new("Certificates", "requests")
                .monthly(requests)
                .product(certificate_management(&region, "ShortLivedCertificatesIssued"))
                .usage_based(),
        );
    } else if let Some(requests) = requests {
        components.extend(named_tiers(requests, &TIERS, &TIER_NAMES).into_iter().map(|tier| {
            CostComponent::new(tier.name, "requests")
                .monthly(tier.quantity)
                .product(certificate_management(&region, "PrivateCertificatesIssued"))
                .price_filter(PriceFilter::default().starting_at(tier.start_usage_amount))
                .usage_based()
        }));
    }

    CostedResource::new(data.address()).with_components(components)
}

fn certificate_management(region: &str, usage_type: &str) -> crate::cost::ProductFilter {
    product(region, "AWSCertificateManager", "Certificate Management")
        .attribute(AttributeFilter::regex("usagetype", format!("/{usage_type}/")))
}
