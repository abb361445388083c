//! costgraph cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; costgraph ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Estimate the cost of every resource
    ///
    /// Reads terraform from stdin unless any other source is provided (via --input-*)
    Breakdown(BreakdownCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct BreakdownCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Usage estimates (YAML, `version: 0.1`)
    #[clap(long = "usage-file")]
    pub usage_file: Option<PathBuf>,

    /// Unit prices (YAML or JSON)
    ///
    /// Without a price file every component is reported as "price not found".
    #[clap(long = "price-file")]
    pub price_file: Option<PathBuf>,

    /// Worker threads, 0 uses one per CPU
    #[clap(long = "concurrency", default_value_t = 0)]
    pub concurrency: usize,

    /// Apply provider default tags to volumes created by instances
    #[clap(long = "propagate-default-tags-to-volumes")]
    pub propagate_default_tags_to_volumes: bool,
}

#[derive(Parser, Debug)]
pub struct InputArgs {
    /// Load .tf files from work directory
    #[clap(short = 'w', long = "input-workdir")]
    pub workdir: bool,

    /// Load a .tf file
    #[clap(short = 'f', long = "input-file")]
    pub files: Vec<PathBuf>,

    /// Load .tf files from given directory
    #[clap(short = 'd', long = "input-dir")]
    pub directories: Vec<PathBuf>,

    /// Load a JSON plan instead of terraform files
    #[clap(short = 'p', long = "input-plan", conflicts_with_all(["workdir", "files", "directories"]))]
    pub plan: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    /// Loaded resources and provider configuration
    Resources,
    /// Resolved references, by address
    Graph,
    /// Registered resource kinds
    Kinds,
}
