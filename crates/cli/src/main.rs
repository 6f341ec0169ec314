//! CLI entry point for the media conversion service
//!
//! Parses command line arguments, initialises logging and starts the
//! service with its HTTP server.

use clap::Parser;
use media_converter::{run_server, Config, ConversionService};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Media Converter - asynchronous video, audio and image conversion service
#[derive(Parser, Debug)]
#[command(name = "media-converter")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "converter.toml")]
    config: PathBuf,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    bind: Option<String>,

    /// Log filter (e.g. "debug" or "media_converter=trace"); overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Skip startup checks (engine, decoder). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let mut config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(config = %args.config.display(), "{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    let service = if args.skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
        ConversionService::new_without_checks(config)
    } else {
        ConversionService::new(config)
    };
    let service = match service {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("failed to initialize service: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        cores = service.concurrency_plan.total_cores,
        max_concurrent_jobs = service.concurrency_plan.max_concurrent_jobs,
        uploads = %service.config.paths.uploads_dir.display(),
        conversions = %service.config.paths.conversions_dir.display(),
        "service initialized"
    );

    let _sweeper = service.start_sweeper();
    if let Err(e) = run_server(service).await {
        error!("server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
