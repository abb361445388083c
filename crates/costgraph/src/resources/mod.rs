//! sample catalog of resource kinds
//!
//! Each kind module exposes a `registry_item()`. [registry] assembles the default [Registry]
//! used by the binary and the integration tests.
use crate::registry::Registry;

pub mod aws;
pub mod google;

/// Registry with every kind of this catalog and the known provider identities
pub fn registry() -> Registry {
    Registry::builder()
        .default_provider_identities()
        .register_all(aws::items())
        .register_all(google::items())
        .build()
}
