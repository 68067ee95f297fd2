//! Trailkeeper ingestion agent.
//!
//! Polls the input directory, runs the inference cascade over new
//! camera-trap media, archives the copies by category, and records
//! durable per-content processing state in SQLite.
//!
//! ## Usage
//!
//! ```bash
//! trailkeeper              # Run the polling loop in the foreground
//! trailkeeper --once       # Process one batch and exit
//! ```

use anyhow::Result;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

use trailkeeper::config::Config;
use trailkeeper::logging;
use trailkeeper::processor::BatchProcessor;

struct CliArgs {
    /// Process one batch and exit
    once: bool,
    /// Poll interval override (seconds)
    interval: Option<u64>,
    /// Config path override
    config_path: Option<PathBuf>,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            once: false,
            interval: None,
            config_path: None,
        }
    }
}

fn main() -> Result<()> {
    let args = parse_args();

    logging::init(None)?;

    info!("Trailkeeper agent starting...");

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!(
        input = %config.input_dir.display(),
        archive = %config.archive_dir.display(),
        db = %config.db_path.display(),
        "Config loaded"
    );

    let processor = BatchProcessor::from_config(&config)?;

    let poll_interval = args.interval.unwrap_or(config.batch.poll_interval_secs);
    let batch_size = config.batch.batch_size;

    if args.once {
        info!("Running in single-shot mode");
        let summary = processor.process_batch(batch_size)?;
        info!(
            processed = summary.processed,
            failed = summary.failed,
            "Single batch done"
        );
        return Ok(());
    }

    info!(interval = poll_interval, "Entering polling loop");

    loop {
        match processor.process_batch(batch_size) {
            Ok(_) => {
                thread::sleep(Duration::from_secs(poll_interval));
            }
            Err(e) => {
                // Batch-level failures never kill the agent; back off and
                // try again
                error!(error = %e, "Batch failed, backing off");
                thread::sleep(Duration::from_secs(config.batch.error_backoff_secs));
            }
        }
    }
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                cli.once = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    if let Ok(interval) = args[i + 1].parse() {
                        cli.interval = Some(interval);
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    cli.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn print_help() {
    println!(
        r#"trailkeeper - Camera-trap media ingestion agent

USAGE:
    trailkeeper [OPTIONS]

OPTIONS:
    --once, -1          Process one batch and exit
    --interval, -i N    Poll interval in seconds (default: from config)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    TRAILKEEPER_CONFIG  Path to config file (overrides default location)
    TRAILKEEPER_LOG     Log level (trace, debug, info, warn, error)

The agent scans the configured input directory for supported media,
runs the detection/description/classification cascade over each new
file, copies it into the category-partitioned archive, embeds tags via
exiftool, and records processing state in SQLite so nothing is ever
processed twice.
"#
    );
}
