//! tag merging
//!
//! Tags of a resource are merged from, lowest to highest precedence:
//! 1. provider default tags (`default_tags` / `default_labels`), for kinds inheriting them
//! 2. repeated tag blocks (`tag { key = .. value = .. propagate_at_launch = .. }`), skipping
//!    entries with `propagate_at_launch = false`
//! 3. inline `tags` / `labels`, either a map or a list of `{key, value}` objects
//! 4. `tags_all`, as computed by the provider in plan output
//! 5. kind specific synthesized tags ([crate::registry::TagSupport::synthesize])
use crate::data::ResourceData;
use crate::registry::TagSupport;
use crate::value::Value;
use indexmap::IndexMap;

pub type Tags = IndexMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagParsingConfig {
    /// provider default tags also apply to volumes created by instances
    pub propagate_default_tags_to_volumes: bool,
}

/// Merged tags of a resource
///
/// `None` when the kind has no tag support and the resource declares no tags, so reporting can
/// tell "no tags" from "tags not applicable".
#[tracing::instrument(level = "trace", skip_all, fields(address = data.address()))]
pub fn merge_tags(data: &ResourceData, support: Option<&TagSupport>, config: &TagParsingConfig) -> Option<Tags> {
    let Some(support) = support else {
        let inline = data.get("tags");
        let tags_all = data.get("tags_all");
        if inline.is_null() && tags_all.is_null() {
            return None;
        }

        let mut tags = parse_tags(inline);
        tags.extend(parse_tags(tags_all));
        return Some(tags);
    };

    let default_tags = data.provider_default_tags().filter(|_| support.default_tags);

    let mut tags = Tags::new();
    if let Some(default_tags) = default_tags {
        tags.extend(default_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    if let Some(block) = support.block {
        tags.extend(parse_tag_blocks(data.get(block)));
    }

    tags.extend(parse_tags(data.get(support.attribute)));
    tags.extend(parse_tags(data.get("tags_all")));

    if let Some(synthesize) = support.synthesize {
        synthesize(data, default_tags, config, &mut tags);
    }

    Some(tags)
}

/// Map style tags, or a list of `{key, value}` objects
///
/// Entries without key or value are skipped.
pub fn parse_tags(value: &Value) -> Tags {
    match value {
        Value::Object(_) => value.string_map(),
        Value::Array(entries) => entries
            .iter()
            .filter_map(|entry| {
                let key = entry.get("key").as_str()?;
                let value = entry.get("value").to_key_string()?;
                Some((key.to_string(), value))
            })
            .collect(),
        _ => Tags::new(),
    }
}

/// Repeated tag blocks, honoring an explicit `propagate_at_launch = false`
pub fn parse_tag_blocks(value: &Value) -> Tags {
    value
        .list()
        .into_iter()
        .filter(|entry| entry.get("propagate_at_launch").as_bool() != Some(false))
        .filter_map(|entry| {
            let key = entry.get("key").as_str().filter(|k| !k.is_empty())?;
            let value = entry.get("value").to_key_string().unwrap_or_default();
            Some((key.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::resolve;
    use crate::registry::Registry;
    use crate::resource::{Plan, ProviderConfig, RawResource};
    use crate::value;
    use pretty_assertions::assert_eq;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn merged(raw: RawResource, support: Option<TagSupport>) -> Option<Tags> {
        let plan = Plan::new(vec![raw]).with_provider(
            "aws",
            ProviderConfig {
                region: None,
                default_tags: Some(tags(&[("env", "prod"), ("team", "platform")])),
            },
        );
        let graph = resolve(plan, &Registry::default());
        let data = ResourceData::new(&graph, graph.ids().next().unwrap(), None);
        merge_tags(&data, support.as_ref(), &TagParsingConfig::default())
    }

    #[test]
    fn precedence() {
        let raw = RawResource::new(
            "aws_autoscaling_group.asg",
            "aws_autoscaling_group",
            value!({
                "tag": [
                    { "key": "env", "value": "staging", "propagate_at_launch": true },
                    { "key": "hidden", "value": "x", "propagate_at_launch": false },
                    { "key": "unflagged", "value": "y" }
                ],
                "tags": { "owner": "team-a" }
            }),
        );

        assert_eq!(
            merged(raw, Some(TagSupport::tags().block("tag"))),
            Some(tags(&[("env", "staging"), ("team", "platform"), ("unflagged", "y"), ("owner", "team-a")]))
        );
    }

    #[test]
    fn inline_overrides_default_and_tags_all_overrides_inline() {
        let raw = RawResource::new(
            "aws_instance.web",
            "aws_instance",
            value!({ "tags": { "env": "dev" }, "tags_all": { "env": "qa" } }),
        );

        let result = merged(raw, Some(TagSupport::tags())).unwrap();
        assert_eq!(result.get("env").map(String::as_str), Some("qa"));
        assert_eq!(result.get("team").map(String::as_str), Some("platform"));
    }

    #[test]
    fn default_tags_only_when_supported() {
        let raw = RawResource::new("aws_instance.web", "aws_instance", value!({ "tags": { "a": "b" } }));

        assert_eq!(
            merged(raw, Some(TagSupport::tags().without_default_tags())),
            Some(tags(&[("a", "b")]))
        );
    }

    #[test]
    fn no_support_and_no_tags_is_none() {
        let raw = RawResource::new("aws_thing.t", "aws_thing", value!({}));
        assert_eq!(merged(raw, None), None);

        let raw = RawResource::new("aws_thing.t", "aws_thing", value!({ "tags": {} }));
        assert_eq!(merged(raw, None), Some(Tags::new()));

        let raw = RawResource::new("aws_vpc.v", "aws_vpc", value!({}));
        assert_eq!(merged(raw, Some(TagSupport::tags())), Some(tags(&[("env", "prod"), ("team", "platform")])));
    }

    #[test]
    fn list_style_tags() {
        let value = value!([{ "key": "a", "value": "1" }, { "key": "b" }, { "value": "3" }]);
        assert_eq!(parse_tags(&value), tags(&[("a", "1")]));
    }

    fn synthesized(_: &ResourceData, default_tags: Option<&Tags>, _: &TagParsingConfig, tags: &mut Tags) {
        let count = default_tags.map(|d| d.len()).unwrap_or_default();
        tags.insert("synthesized".into(), count.to_string());
        tags.insert("env".into(), "synthesized".into());
    }

    #[test]
    fn synthesizers_run_last() {
        let raw = RawResource::new("aws_instance.web", "aws_instance", value!({ "tags": { "env": "dev" } }));

        let result = merged(raw, Some(TagSupport::tags().synthesize(synthesized))).unwrap();
        assert_eq!(result.get("env").map(String::as_str), Some("synthesized"));
        assert_eq!(result.get("synthesized").map(String::as_str), Some("2"));
    }
}
