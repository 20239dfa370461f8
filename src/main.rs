//! Gleaner main entry point
//!
//! This is the command-line interface for the Gleaner expertise harvester.

use clap::{Parser, Subcommand};
use gleaner::checkpoint::FsCheckpointStore;
use gleaner::config::{load_config, Config};
use gleaner::credentials::CredentialPool;
use gleaner::filter::DefaultValidityFilter;
use gleaner::harvest::orchestrator::HarvestSettings;
use gleaner::harvest::runner::{run_targets, TargetReport};
use gleaner::harvest::HarvestTarget;
use gleaner::transport::{build_http_client, GithubTransport, Protocol};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Gleaner: a resilient GitHub expertise harvester
///
/// Gleaner collects pull-request review comments and candidate expert
/// profiles from GitHub, rotating through API tokens when rate limited,
/// falling back from GraphQL to REST when rotation is spent, and
/// checkpointing after every page so interrupted runs resume cleanly.
#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(version = "1.0.0")]
#[command(about = "A resilient GitHub expertise harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    /// Ignore existing checkpoints and re-harvest from the beginning
    #[arg(long, global = true)]
    fresh: bool,

    /// Skip the primary protocol and harvest over REST only
    #[arg(long, global = true)]
    fallback_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest PR review comments authored by the given users
    Comments {
        /// GitHub username (repeatable)
        #[arg(short, long, required = true)]
        user: Vec<String>,

        /// Stop after this many comments per user
        #[arg(short, long, default_value_t = 200)]
        limit: usize,
    },

    /// Harvest candidate expert profiles for the given search queries
    Experts {
        /// Search query, e.g. a language or topic (repeatable)
        #[arg(short, long, required = true)]
        query: Vec<String>,

        /// Stop after this many profiles per query
        #[arg(short, long, default_value_t = 30)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let targets = build_targets(&cli);
    harvest(config, &cli, targets).await?;
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("gleaner=info,warn"),
            1 => EnvFilter::new("gleaner=debug,info"),
            2 => EnvFilter::new("gleaner=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Turns the CLI invocation into harvest targets
fn build_targets(cli: &Cli) -> Vec<HarvestTarget> {
    let mut targets = match &cli.command {
        Command::Comments { user, limit } => user
            .iter()
            .map(|u| HarvestTarget::comments(u.as_str(), *limit))
            .collect::<Vec<_>>(),
        Command::Experts { query, limit } => query
            .iter()
            .map(|q| HarvestTarget::experts(q.as_str(), *limit))
            .collect(),
    };

    if cli.fresh {
        for target in &mut targets {
            target.resume = false;
        }
    }

    targets
}

/// Runs the harvest and writes one result file per target
async fn harvest(
    config: Config,
    cli: &Cli,
    targets: Vec<HarvestTarget>,
) -> gleaner::Result<()> {
    if cli.fresh {
        tracing::info!("Fresh harvest requested, previous checkpoints will be cleared");
    }

    let client = build_http_client(&config.engine.user_agent)?;
    let transport = Arc::new(GithubTransport::with_endpoints(
        client,
        config.endpoints.graphql_url.clone(),
        config.endpoints.rest_url.clone(),
        config.engine.page_size,
    ));
    let store = Arc::new(FsCheckpointStore::new(&config.output.checkpoint_dir)?);
    let pool = CredentialPool::new(config.credentials.tokens.clone());
    tracing::info!("Credential pool holds {} token(s)", pool.len());

    let settings = HarvestSettings {
        initial_protocol: if cli.fallback_only {
            Protocol::Rest
        } else {
            Protocol::GraphQl
        },
        // Forcing REST leaves nothing to fall back to
        fallback_enabled: config.engine.fallback_enabled && !cli.fallback_only,
        retry_backoff: config.engine.retry_backoff(),
    };

    let reports = run_targets(
        targets,
        transport,
        store,
        Arc::new(DefaultValidityFilter::default()),
        pool,
        settings,
        config.engine.max_concurrent_targets as usize,
    )
    .await;

    let data_dir = Path::new(&config.output.data_dir);
    std::fs::create_dir_all(data_dir)?;

    let mut incomplete = 0;
    for report in &reports {
        write_result(data_dir, report)?;
        if report.is_complete() {
            tracing::info!(
                "{}: {} items ({})",
                report.target.key(),
                report.result.items.len(),
                report.result.reason
            );
        } else {
            incomplete += 1;
            tracing::warn!(
                "{}: stopped early with {} items ({})",
                report.target.key(),
                report.result.items.len(),
                report.result.reason
            );
        }
    }

    if incomplete > 0 {
        tracing::warn!(
            "{}/{} targets did not finish; re-run to resume them",
            incomplete,
            reports.len()
        );
    } else {
        tracing::info!("All {} targets completed", reports.len());
    }

    Ok(())
}

/// Writes one target's harvest result as a JSON file under the data directory
fn write_result(data_dir: &Path, report: &TargetReport) -> gleaner::Result<()> {
    // "comments/octocat" becomes "comments_octocat.json"
    let name: String = report
        .target
        .key()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let path = data_dir.join(format!("{}.json", name));

    let json = serde_json::to_string_pretty(&report.result)?;
    std::fs::write(&path, json)?;
    tracing::debug!("Wrote {}", path.display());

    Ok(())
}
