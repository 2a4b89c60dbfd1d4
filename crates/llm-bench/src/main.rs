//! llm-bench - run a benchmark matrix against an LLM serving endpoint

mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use libllmbench::{config::DEFAULT_CONFIG_PATH, load_config, BenchmarkRunner, StopFlag};

#[derive(Parser)]
#[command(name = "llm-bench")]
#[command(about = "Benchmark an LLM serving endpoint over a matrix of context lengths and concurrency levels")]
#[command(version)]
struct Cli {
    /// Configuration file (YAML, or TOML by extension)
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the test matrix and exit without running anything
    #[arg(long)]
    dry_run: bool,

    /// Also write the recorded rows as JSON
    #[arg(short = 'j', long)]
    json_report: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> libllmbench::Result<()> {
    let config = load_config(&cli.config)?;
    info!(config = %cli.config.display(), "Configuration loaded");

    if cli.dry_run {
        let cases = libllmbench::generate(&config.test_case)?;
        report::print_matrix(&cases);
        return Ok(());
    }

    let stop = StopFlag::new();
    install_interrupt_handler(stop.clone());

    let runner = BenchmarkRunner::new(config, stop)?.with_json_report(cli.json_report.clone());
    let summary = runner.run()?;
    report::print_summary(&summary);
    Ok(())
}

/// First Ctrl-C stops after the current step, a second one exits at once
fn install_interrupt_handler(stop: StopFlag) {
    let pressed = Arc::new(AtomicBool::new(false));
    let result = ctrlc::set_handler(move || {
        if pressed.swap(true, Ordering::SeqCst) {
            eprintln!("Interrupted again, exiting");
            std::process::exit(130);
        }
        eprintln!("Interrupt received, stopping after the current step (Ctrl-C again to force)");
        stop.trigger();
    });
    if let Err(e) = result {
        warn!("Failed to install interrupt handler: {}", e);
    }
}
