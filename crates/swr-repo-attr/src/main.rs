//! swr-repo-attr - update the visibility of SWR repositories in bulk

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use swr_repo_attr::config::DEFAULT_CONFIG_PATH;
use swr_repo_attr::{load_config, RepoAttrUpdater, SwrClient};

#[derive(Parser)]
#[command(name = "swr-repo-attr", about = "SWR Repo Attribute Update", version)]
struct Cli {
    /// Config file (YAML, or TOML by extension)
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// List the matching repositories without changing them
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every update succeeded
fn run(cli: &Cli) -> swr_repo_attr::Result<bool> {
    let config = load_config(&cli.config)?;
    debug!(config = ?config, "Config");

    let client = SwrClient::new(&config)?;
    let summary = RepoAttrUpdater::new(client, &config).dry_run(cli.dry_run).run()?;

    if cli.dry_run {
        for repo in &summary.listed {
            println!("{}", repo);
        }
    } else {
        info!(
            updated = summary.updated.len(),
            failed = summary.failed.len(),
            "Done"
        );
    }
    Ok(!summary.has_failures())
}
