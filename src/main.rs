//! image-moderator - Batch Image Moderation
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use image_moderator::classifier::GeminiClassifier;
use image_moderator::config::{load_env_file, CliArgs, RunConfig, ENV_FILE};
use image_moderator::executor::BatchExecutor;
use image_moderator::progress::{print_header, print_summary};
use image_moderator::sink::ResultSink;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Load .env first so clap's env fallbacks see it
    let env_loaded = load_env_file(Path::new(ENV_FILE)).context("Invalid environment file")?;

    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;
    if env_loaded {
        debug!(path = ENV_FILE, "Loaded environment file");
    }

    // Validate and create config
    let config = RunConfig::from_args(args).context("Invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(run_batch(config))
}

async fn run_batch(config: RunConfig) -> Result<()> {
    // Open the sink before any work is dispatched
    let sink = ResultSink::open(&config.output_path).context("Failed to open results file")?;
    let sink = Arc::new(sink);

    let classifier = GeminiClassifier::new(config.gemini.clone())
        .context("Failed to initialize classifier")?;
    let classifier = Arc::new(classifier);

    let progress_interval = config.show_progress.then_some(config.progress_interval);
    let executor =
        BatchExecutor::new(Arc::clone(&classifier), Arc::clone(&sink), config.concurrency)
            .with_timeout(config.classify_timeout)
            .with_progress_interval(progress_interval);

    if config.show_progress {
        print_header(
            &config.image_dir.display().to_string(),
            classifier.model(),
            executor.concurrency(),
            &config.output_path.display().to_string(),
        );
    }

    // Setup signal handler for graceful shutdown
    let shutdown_flag = executor.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing in-flight images...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let result = executor
        .discover_and_run(&config.image_dir, &config.discovery_options())
        .await
        .context("Batch failed")?;

    if config.show_progress {
        print_summary(
            &result.snapshot,
            sink.stats().write_failures(),
            result.duration,
            &config.output_path.display().to_string(),
            result.completed,
        );
    }

    if !result.completed {
        info!(
            not_dispatched = result.summary.total - result.dispatched,
            "Batch was interrupted before completion"
        );
    }

    if !result.failed.is_empty() {
        info!(errors = result.summary.errors, "Batch completed with errors");
    }

    info!(output = %config.output_path.display(), "Results written");
    println!("{}", result.summary);

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("image_moderator=debug,warn")
    } else {
        EnvFilter::new("image_moderator=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
