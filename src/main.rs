//! gridrun CLI - parallel test execution orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use gridrun::artifact::FsArtifactSink;
use gridrun::config::{load_config, Config};
use gridrun::discovery::{Discovery, StaticDiscovery};
use gridrun::history::JsonHistoryStore;
use gridrun::orchestrator::Orchestrator;
use gridrun::ordering::SmartOrderer;
use gridrun::report::ConsoleReporter;
use gridrun::runner::process::ProcessRunner;
use gridrun::sharding::ShardPlanner;

#[derive(Parser)]
#[command(name = "gridrun")]
#[command(about = "Parallel test execution orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "gridrun.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the build
    Run {
        /// Override worker concurrency
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Override retries per test unit
        #[arg(long)]
        retries: Option<u32>,

        /// Print the final report as JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Show the shard plan without running anything
    Plan,

    /// Check the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            parallel,
            retries,
            json,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(parallel) = parallel {
                config.build.concurrency = parallel;
            }
            if let Some(retries) = retries {
                config.build.max_retries = retries;
            }
            run(config, cli.verbose, json).await
        }
        Commands::Plan => {
            let config = load_config(&cli.config)?;
            plan(config).await
        }
        Commands::Validate => {
            let config = load_config(&cli.config)?;
            println!(
                "configuration OK: concurrency={}, max_retries={}, autosplit={}",
                config.build.concurrency, config.build.max_retries, config.build.autosplit
            );
            Ok(())
        }
    }
}

async fn run(config: Config, verbose: bool, json: bool) -> Result<()> {
    let mut runner = ProcessRunner::from_config(&config.runner)?;
    if let Some(dir) = &config.runner.artifact_dir {
        runner = runner.with_artifact_sink(Arc::new(FsArtifactSink::new(dir)));
    }

    let orchestrator = Orchestrator::new(
        config.build.clone(),
        StaticDiscovery::from_config(&config.discovery),
        runner,
        JsonHistoryStore::open(&config.history.path),
        ConsoleReporter::new(verbose),
    );

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, draining");
            cancel.cancel();
        }
    });

    let report = orchestrator.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    std::process::exit(report.exit_code());
}

async fn plan(config: Config) -> Result<()> {
    config.validate()?;

    let ids = StaticDiscovery::from_config(&config.discovery).discover().await?;
    let catalog = gridrun::Catalog::load(ids)?;

    let history = JsonHistoryStore::open(&config.history.path);
    let mut histories = std::collections::HashMap::new();
    for unit in catalog.units() {
        if let Ok(Some(h)) = gridrun::HistoryStore::get(&history, &unit.id).await {
            histories.insert(unit.id.clone(), h);
        }
    }

    let units = if config.build.smart_ordering {
        SmartOrderer::order(catalog.units(), &histories)
    } else {
        catalog.units().to_vec()
    };

    let planner = ShardPlanner::new(config.build.concurrency, config.build.autosplit)
        .with_matrix(config.build.matrix_dims.clone());
    let shards = planner.plan(&units)?;

    println!(
        "{} test units -> {} shards (concurrency {})",
        catalog.len(),
        shards.len(),
        config.build.concurrency
    );
    for (idx, shard) in shards.iter().enumerate() {
        let target = shard.descriptor.as_deref().unwrap_or("any");
        println!("shard {idx} [{target}] ({} units):", shard.len());
        for unit in &shard.units {
            println!("  - {}", unit.qualified_id());
        }
    }

    Ok(())
}
