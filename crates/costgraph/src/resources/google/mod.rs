//! Google Cloud resource kinds
use crate::cost::ProductFilter;
use crate::data::ResourceData;
use crate::registry::RegistryItem;

pub mod compute_disk;

pub const DEFAULT_REGION: &str = "us-central1";

const FREE: &[&str] = &[
    "google_compute_firewall",
    "google_compute_network",
    "google_compute_route",
    "google_compute_subnetwork",
    "google_project_iam_binding",
    "google_project_iam_member",
    "google_service_account",
];

pub fn items() -> Vec<RegistryItem> {
    let mut items = vec![compute_disk::registry_item()];
    items.extend(FREE.iter().copied().map(RegistryItem::free));
    items
}

/// Region of the resource, derived from its zone when only that is set
pub(crate) fn region(data: &ResourceData) -> String {
    if let Some(zone) = data.get("zone").as_str().filter(|z| !z.is_empty()) {
        return zone_region(zone).to_string();
    }
    data.region_or(DEFAULT_REGION).to_string()
}

/// `us-central1` for `us-central1-a`
pub(crate) fn zone_region(zone: &str) -> &str {
    match zone.rsplit_once('-') {
        Some((region, suffix)) if suffix.len() == 1 => region,
        _ => zone,
    }
}

pub(crate) fn product(region: &str, service: &str, product_family: &str) -> ProductFilter {
    ProductFilter::new("gcp", service, product_family, region)
}
