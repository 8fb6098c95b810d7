mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use query_optimizer::{ChainKind, OptimizerConfig, Priority};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (environment overrides still apply)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the cache key and fragments of an expression
    Fingerprint {
        /// JSON expression file, or `-` for stdin
        input: PathBuf,
    },
    /// Pick a model for an expression
    Route {
        input: PathBuf,
        #[arg(long, default_value = "balanced")]
        priority: Priority,
        /// Required specialization (repeatable)
        #[arg(long = "require")]
        requirements: Vec<String>,
        #[arg(long)]
        max_cost_per_token: Option<f64>,
        #[arg(long, default_value_t = 0)]
        sub_tasks: usize,
    },
    /// Build an execution plan from a JSON array of tasks
    Plan {
        input: PathBuf,
        /// Also print a wall-clock schedule starting now
        #[arg(long, default_value_t = false)]
        schedule: bool,
    },
    /// Run the full pipeline on a JSON optimization request
    Optimize { input: PathBuf },
    /// Resolve a fallback chain against the gateway
    Probe {
        #[arg(long, value_enum, default_value_t = ChainArg::Fast)]
        chain: ChainArg,
    },
    /// Show the model catalog
    Catalog {
        /// Refresh from the live listing first
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChainArg {
    Reasoning,
    Fast,
}

impl From<ChainArg> for ChainKind {
    fn from(arg: ChainArg) -> Self {
        match arg {
            ChainArg::Reasoning => ChainKind::Reasoning,
            ChainArg::Fast => ChainKind::Fast,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<OptimizerConfig> {
    match path {
        Some(path) => OptimizerConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let config = OptimizerConfig::from_env();
            config.validate().context("invalid configuration from environment")?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(args.config.as_ref())?;
    tracing::debug!(
        gateway = %config.gateway.base_url,
        prober = config.prober.enabled,
        live_catalog = config.catalog.live_listing,
        "Configuration loaded"
    );

    match args.command {
        Command::Fingerprint { input } => commands::fingerprint(&config, &input),
        Command::Route {
            input,
            priority,
            requirements,
            max_cost_per_token,
            sub_tasks,
        } => {
            commands::route(
                &config,
                &input,
                priority,
                requirements,
                max_cost_per_token,
                sub_tasks,
            )
            .await
        }
        Command::Plan { input, schedule } => commands::plan(&config, &input, schedule),
        Command::Optimize { input } => commands::optimize(&config, &input).await,
        Command::Probe { chain } => commands::probe(&config, chain.into()).await,
        Command::Catalog { refresh } => commands::catalog(&config, refresh).await,
    }
}
