//! # costgraph - cost estimation for infrastructure-as-code
//!
//! ## Introduction for developers
//!
//! Read this to understand how a cost estimate is produced.
//!
//! ### Terms
//!
//! - a `resource` is one declared piece of infrastructure, identified by its `address`
//!   (`module.web.aws_instance.app[0]`) and of a `kind` (`aws_instance`)
//! - its `raw values` are the attributes as parsed, a [value::Value] tree
//! - a `reference` is an attribute value that designates another resource, either by address or
//!   by one of its identities (`id`, `arn`, `self_link`, ...)
//! - a `cost component` is one billable dimension (`Instance usage`, `Storage`) with an hourly or
//!   monthly quantity and, once priced, a unit price
//! - a `costed resource` is the output tree of one resource: components plus sub-resources
//!
//! ### Loading
//!
//! A [resource::Plan] is the input: every resource as a [resource::RawResource] plus provider
//! configuration (region, default tags). Plans come from JSON or from `.tf` files through
//! [hcl_source::HclSource], which rewrites traversals to declared resources into address literals:
//!
//! ```hcl
//! resource "aws_ebs_volume" "data" {
//!   size = 40
//! }
//!
//! resource "aws_ebs_snapshot" "backup" {
//!   volume_id = aws_ebs_volume.data.id   # loaded as "aws_ebs_volume.data"
//! }
//! ```
//!
//! ### Resolving
//!
//! [graph::resolve] puts the resources in an arena sorted by address and follows the attributes
//! the [registry::Registry] declares as references ([registry::ReferenceSpec]). Forward
//! references live on the referring resource, reverse references (`aws_eip_association` pointing
//! at an `aws_eip`) on the target. Anything that does not resolve is dropped quietly.
//!
//! ### Building
//!
//! [driver::build] constructs every resource in dependency order on a rayon pool. Kinds follow one
//! of three protocols ([registry::Protocol]):
//! - legacy: one call with attributes and usage
//! - staged: structural build, [registry::CoreResource::populate_usage], then
//!   [registry::CoreResource::build_resource]
//! - free
//!
//! Constructors read their resource through [data::ResourceData]. A constructor that needs the
//! built cost tree of a reference is run again in a second pass. Usage estimates come from
//! [usage::UsageMap], tags are merged by [tags::merge_tags].
//!
//! Quantities are scaled through whole trees with [cost::scale] (an autoscaling group of three
//! instances is three times the cost of one) and split into price tiers with [tiers].
//!
//! ### Pricing
//!
//! Components describe their product with filters. A [pricing::PriceLookup] returns the unit
//! price, [cost::CostedResource::calculate_costs] turns quantities into costs and rolls them up.
//! [estimate] runs all of the above and returns a [Breakdown].
//!
pub mod breakdown;
pub mod cost;
pub mod data;
pub mod driver;
pub mod graph;
pub mod hcl_source;
pub mod pricing;
pub mod registry;
pub mod resource;
pub mod resources;
pub mod tags;
pub mod tiers;
pub mod usage;
mod util;
pub mod value;
mod visit;

pub use breakdown::{estimate, Breakdown};

#[doc(hidden)]
pub use serde_json;
