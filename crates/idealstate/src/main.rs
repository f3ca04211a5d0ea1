//! idealstate: compute the ideal placement of a bucket in a storage cluster.

use std::fmt::Display;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use idealstate_core::config::{Config, LogFormat, LoggingConfig};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod query;

use cli::{Cli, Commands, OutputFormat};
use query::Inputs;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Storage(args) => {
            let config = load_config(args.query.topology.config.as_deref())?;
            init_logging(&config.logging)?;
            let inputs = Inputs::prepare(&args.query, &config)?;
            emit(&query::storage(&inputs, args.replicas)?, args.query.format)
        }
        Commands::Distributor(args) => {
            let config = load_config(args.topology.config.as_deref())?;
            init_logging(&config.logging)?;
            let inputs = Inputs::prepare(&args, &config)?;
            emit(&query::distributor(&inputs)?, args.format)
        }
        Commands::Disk(args) => {
            let config = load_config(args.query.topology.config.as_deref())?;
            init_logging(&config.logging)?;
            let inputs = Inputs::prepare(&args.query, &config)?;
            emit(&query::disk(&inputs, args.node)?, args.query.format)
        }
        Commands::Groups(args) => {
            let config = load_config(args.topology.config.as_deref())?;
            init_logging(&config.logging)?;
            let distribution = query::load_distribution(&args.topology, &config)?;
            emit(&query::groups(&distribution), args.format)
        }
        Commands::Version => {
            println!("idealstate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    // Results go to stdout; keep logs out of the way.
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }

    Ok(())
}

fn emit<T: Serialize + Display>(report: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{report}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}
