//! Terraform configuration loader
//!
//! Turns `.tf` files into a [Plan]. This is a thin adapter over [hcl], not a Terraform
//! implementation:
//! - `resource "kind" "name" { .. }` blocks become [RawResource]s, a literal `count = N` expands
//!   to `kind.name[0]` .. `kind.name[N-1]`
//! - `provider` blocks give the region and default tags (`default_tags { tags = .. }` for aws,
//!   `default_labels` for google), keyed by `name` or `name.alias`
//! - `variable` defaults are available as `var.*`, `locals` as `local.*`
//! - traversals naming a declared resource are replaced by its address before evaluation
//!   (see [crate::util::AddressRewriter]), so `vpc_id = aws_vpc.main.id` is loaded as
//!   `vpc_id = "aws_vpc.main"` and found by the reference resolver
//! - expressions that cannot be evaluated (functions, data sources, unknown values) become null
//! - nested blocks become arrays of objects, keyed by the block identifier
use crate::resource::{Plan, ProviderConfig, RawResource};
use crate::util::{provider_key, AddressRewriter};
use crate::value::Value;
use crate::visit::VisitTraversalsMut;
use hcl::eval::{Context, Evaluate};
use hcl::{Block, Body, Expression};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Attributes of a resource block that configure Terraform itself
const META_ARGUMENTS: &[&str] = &["count", "for_each", "provider", "depends_on"];
const META_BLOCKS: &[&str] = &["lifecycle", "provisioner", "connection", "dynamic"];

/// Passes over `locals` so locals may refer to locals declared later
const LOCALS_PASSES: usize = 4;

#[derive(Default, Debug)]
pub struct HclSource {
    documents: Vec<(Option<PathBuf>, Body)>,
}

impl HclSource {
    pub fn insert(&mut self, document: Body, path: impl Into<Option<PathBuf>>) {
        self.documents.push((path.into(), document));
    }

    pub fn source_count(&self) -> usize {
        self.documents.len()
    }

    pub fn load_file(&mut self, file_path: &Path) -> Result<(), LoadError> {
        let file_path = file_path.canonicalize()?;
        tracing::info!(path=%file_path.display(), "loading file");

        let file_contents = std::fs::read_to_string(&file_path)?;
        let body = hcl_edit::parser::parse_body(&file_contents)?;

        self.insert(body.into(), Some(file_path));
        Ok(())
    }

    /// Load every `*.tf` file of a directory, in file name order
    pub fn load_directory(&mut self, dir_path: &Path) -> Result<(), LoadError> {
        let mut file_paths = vec![];
        for dir_entry in std::fs::read_dir(dir_path)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }

            if dir_entry.file_name().to_string_lossy().ends_with(".tf") {
                file_paths.push(dir_entry.path());
            }
        }

        if file_paths.is_empty() {
            return Err(LoadError::NoFilesFound);
        }

        file_paths.sort();
        for file_path in file_paths {
            self.load_file(&file_path)?;
        }
        Ok(())
    }

    fn blocks<'a>(&'a self, identifier: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.documents
            .iter()
            .flat_map(|(_, body)| body.blocks())
            .filter(move |block| block.identifier() == identifier)
    }

    /// Resources and provider configurations of all loaded documents
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn plan(&self) -> Plan {
        let declared: HashSet<(String, String)> = self
            .blocks("resource")
            .filter_map(|block| match block.labels() {
                [kind, name] => Some((kind.as_str().to_string(), name.as_str().to_string())),
                _ => None,
            })
            .collect();

        let context = self.context(&declared);
        let mut plan = Plan::default();

        for block in self.blocks("provider") {
            let (key, config) = provider(block, &context, &declared);
            plan.providers.insert(key, config);
        }

        for block in self.blocks("resource") {
            let [kind, name] = block.labels() else {
                tracing::debug!(labels = ?block.labels(), "resource block without kind and name");
                continue;
            };
            let (kind, name) = (kind.as_str(), name.as_str());

            let provider_name = block
                .body()
                .attributes()
                .find(|attribute| attribute.key() == "provider")
                .and_then(|attribute| provider_key(attribute.expr()))
                .unwrap_or_else(|| crate::resource::provider_prefix(kind).to_string());

            let count = block
                .body()
                .attributes()
                .find(|attribute| attribute.key() == "count")
                .map(|attribute| evaluate(attribute.expr().clone(), &context, &declared, None));

            let instances = match count.as_ref().map(Value::as_i64) {
                None => vec![(format!("{kind}.{name}"), None)],
                Some(Some(count)) => (0..usize::try_from(count).unwrap_or_default())
                    .map(|index| (format!("{kind}.{name}[{index}]"), Some(index)))
                    .collect(),
                Some(None) => {
                    tracing::debug!(
                        kind,
                        resource = name,
                        "count is not a literal number, loading a single instance"
                    );
                    vec![(format!("{kind}.{name}"), None)]
                }
            };

            for (address, index) in instances {
                let values = body_value(block.body(), &context, &declared, index);
                plan.resources.push(RawResource::new(address, kind, values).with_provider(&provider_name));
            }
        }

        plan
    }

    /// Evaluation context with `var` and `local`
    fn context(&self, declared: &HashSet<(String, String)>) -> Context<'static> {
        let mut variables = hcl::Map::new();
        for block in self.blocks("variable") {
            let [name] = block.labels() else {
                continue;
            };

            let default = block
                .body()
                .attributes()
                .find(|attribute| attribute.key() == "default")
                .map(|attribute| evaluate(attribute.expr().clone(), &Context::new(), declared, None))
                .unwrap_or_default();
            variables.insert(name.as_str().to_string(), hcl::Value::from(default));
        }

        let mut context = Context::new();
        context.declare_var(hcl::Identifier::unchecked("var"), hcl::Value::Object(variables));

        let locals: Vec<_> = self
            .blocks("locals")
            .flat_map(|block| block.body().attributes())
            .collect();
        let mut values = hcl::Map::new();
        for _ in 0..LOCALS_PASSES {
            for attribute in &locals {
                let value = evaluate(attribute.expr().clone(), &context, declared, None);
                values.insert(attribute.key().to_string(), hcl::Value::from(value));
            }
            context.declare_var(hcl::Identifier::unchecked("local"), hcl::Value::Object(values.clone()));
        }

        context
    }
}

fn provider(block: &Block, context: &Context, declared: &HashSet<(String, String)>) -> (String, ProviderConfig) {
    let name = block.labels().first().map(|label| label.as_str()).unwrap_or_default();
    let values = body_value(block.body(), context, declared, None);

    let key = match values.get("alias").as_str() {
        Some(alias) => format!("{name}.{alias}"),
        None => name.to_string(),
    };

    let default_tags = [values.get("default_tags.0.tags"), values.get("default_labels")]
        .into_iter()
        .find(|tags| tags.exists())
        .map(Value::string_map);

    let config = ProviderConfig {
        region: values.get("region").as_str().map(str::to_string),
        default_tags,
    };
    (key, config)
}

/// Attributes and nested blocks of a body as one object
fn body_value(body: &Body, context: &Context, declared: &HashSet<(String, String)>, index: Option<usize>) -> Value {
    let mut object: IndexMap<String, Value> = IndexMap::new();

    for attribute in body.attributes() {
        if META_ARGUMENTS.contains(&attribute.key()) {
            continue;
        }
        let value = evaluate(attribute.expr().clone(), context, declared, index);
        object.insert(attribute.key().to_string(), value);
    }

    for block in body.blocks() {
        if META_BLOCKS.contains(&block.identifier()) {
            continue;
        }
        let value = body_value(block.body(), context, declared, index);
        match object
            .entry(block.identifier().to_string())
            .or_insert_with(|| Value::Array(vec![]))
        {
            Value::Array(blocks) => blocks.push(value),
            other => tracing::debug!(key = block.identifier(), existing = ?other, "block shadowed by attribute"),
        }
    }

    Value::Object(object)
}

/// Rewrite resource traversals and evaluate, null when evaluation fails
fn evaluate(
    mut expression: Expression,
    context: &Context,
    declared: &HashSet<(String, String)>,
    index: Option<usize>,
) -> Value {
    expression.visit_traversals_mut(&mut AddressRewriter::new(declared, index));

    match expression.evaluate(context) {
        Ok(value) => value.into(),
        Err(errors) => {
            tracing::debug!(%errors, "expression could not be evaluated");
            Value::Null
        }
    }
}

impl std::str::FromStr for HclSource {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = hcl_edit::parser::parse_body(s)?;
        Ok(Body::from(body).into())
    }
}

impl From<Body> for HclSource {
    fn from(value: Body) -> Self {
        let mut source = HclSource::default();
        source.insert(value, None);
        source
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("No files found in directory")]
    NoFilesFound,
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse hcl file")]
    HclParseFailed(#[from] hcl_edit::parser::Error),
}
