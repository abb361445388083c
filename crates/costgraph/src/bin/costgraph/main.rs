mod cli;

use costgraph::driver::BuildOptions;
use costgraph::hcl_source::HclSource;
use costgraph::pricing::{PriceLookup, PriceTable};
use costgraph::resource::Plan;
use costgraph::tags::TagParsingConfig;
use costgraph::usage::UsageMap;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("COSTGRAPH_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Breakdown(breakdown_cli) => breakdown(breakdown_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

pub fn breakdown(cli: cli::BreakdownCommand) -> anyhow::Result<()> {
    let plan = load(&cli.input)?;

    let usage = match &cli.usage_file {
        Some(path) => UsageMap::load_file(path)?,
        None => UsageMap::default(),
    };

    let prices = match &cli.price_file {
        Some(path) => PriceTable::load_file(path)?,
        None => PriceTable::default(),
    };

    let options = BuildOptions {
        concurrency: cli.concurrency,
        tags: TagParsingConfig {
            propagate_default_tags_to_volumes: cli.propagate_default_tags_to_volumes,
        },
        ..Default::default()
    };

    let registry = costgraph::resources::registry();
    let breakdown = costgraph::estimate(plan, &registry, &usage, &prices as &dyn PriceLookup, &options)?;

    output(&cli.output, &breakdown)?;
    Ok(())
}

fn load(input: &cli::InputArgs) -> anyhow::Result<Plan> {
    if let Some(plan_path) = &input.plan {
        tracing::info!(path=%plan_path.display(), "loading plan");
        let contents = std::fs::read_to_string(plan_path)?;
        return Ok(Plan::from_json(&contents)?);
    }

    if !input.workdir && input.files.is_empty() && input.directories.is_empty() {
        let stdin = std::io::read_to_string(std::io::stdin())?;
        let source: HclSource = stdin.parse()?;
        return Ok(source.plan());
    }

    let mut source = HclSource::default();

    if input.workdir {
        source.load_directory(&std::env::current_dir()?)?;
    }

    for file_path in &input.files {
        source.load_file(file_path)?;
    }

    for dir_path in &input.directories {
        source.load_directory(dir_path)?;
    }

    anyhow::ensure!(source.source_count() > 0, "No files loaded");

    Ok(source.plan())
}

fn output(output: &cli::OutputArgs, value: &impl serde::Serialize) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), value)?,
    };

    Ok(())
}

/// (costgraph-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    let registry = costgraph::resources::registry();

    match cli.command {
        Resources => println!("{:#?}", load(&cli.input)?),
        Graph => {
            let graph = costgraph::graph::resolve(load(&cli.input)?, &registry);
            serde_json::to_writer_pretty(std::io::stdout(), &graph.address_map())?;
        }
        Kinds => {
            for kind in registry.kinds() {
                println!("{kind}");
            }
        }
    }

    Ok(())
}
