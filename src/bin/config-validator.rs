//! # Taskforge Configuration Validator
//!
//! Loads a configuration file the same way the engine does (file, then
//! `TASKFORGE__` environment overrides), validates it and prints the result
//! with credentials masked.

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use taskforge_core::config::ConfigManager;
use taskforge_core::scheduling::SchedulingPattern;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate Taskforge configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (default: $TASKFORGE_CONFIG or config/taskforge.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, value_enum, default_value_t = OutputFormat::Summary)]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Summary,
    Json,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    match validate(&cli) {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("Configuration invalid: {e}");
            process::exit(1);
        }
    }
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let manager = match &cli.config {
        Some(path) => ConfigManager::load_from_path(path)?,
        None => ConfigManager::load()?,
    };

    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        }
        OutputFormat::Summary => print_summary(&manager)?,
    }
    Ok(())
}

fn print_summary(manager: &ConfigManager) -> Result<(), Box<dyn std::error::Error>> {
    let config = manager.config();

    println!("Taskforge configuration");
    println!("  environment: {}", manager.environment());
    println!("  source:      {}", manager.source().display());
    println!();
    println!(
        "  database:  {}",
        manager.debug_config()["database"]["url"].as_str().unwrap_or("<unset>")
    );
    println!(
        "  workers:   {} x batch {} every {}ms",
        config.worker.pool_size, config.worker.claim_batch_size, config.worker.poll_interval_ms
    );
    println!(
        "  retry:     max {} attempts, {}ms..{}ms x{}",
        config.retry.max_attempts,
        config.retry.base_delay_ms,
        config.retry.max_delay_ms,
        config.retry.multiplier
    );
    println!(
        "  reaper:    {} (lease {}s)",
        enabled(config.reaper.enabled),
        config.reaper.lease_timeout_seconds
    );
    println!(
        "  archive:   {} (retention {}h)",
        enabled(config.archive.enabled),
        config.archive.retention_hours
    );
    println!(
        "  recurring: {} ({} jobs)",
        enabled(config.recurring.enabled),
        config.recurring.jobs.len()
    );

    for job in &config.recurring.jobs {
        let pattern = SchedulingPattern::parse(&job.pattern)?;
        println!(
            "    - {} [{}] -> {} ({} sub-pattern(s))",
            job.name,
            pattern,
            job.task_type,
            pattern.sub_patterns().len()
        );
    }

    println!();
    println!("✅ Configuration is valid");
    Ok(())
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}
