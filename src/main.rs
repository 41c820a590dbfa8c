//! CLI entry point for yomi.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use yomi_core::pipeline::DEFAULT_OUTPUT_DIR;
use yomi_core::registry::DEFAULT_FEED_URL;
use yomi_core::{
    DownloadRequest, NoopObserver, Pipeline, PipelineConfig, RetryPolicy, RunObserver,
    SiteRegistry,
};

mod app_config;
mod cli;
mod output;

use app_config::{FileConfig, VerbositySetting};
use cli::{Args, AvailableArgs, Command, DownloadArgs};

/// How the process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    /// Something was written, or nothing needed writing.
    Success,
    /// Nothing could be downloaded.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::FAILURE,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    match run(args).await {
        Ok(exit) => exit.into(),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ProcessExit> {
    let loaded = app_config::load_default_file_config()?;
    init_tracing(&args, loaded.config.verbosity);

    if loaded.loaded_from_file
        && let Some(path) = &loaded.path
    {
        debug!(path = %path.display(), "loaded config file");
    }
    debug!(?args, "CLI arguments parsed");

    match &args.command {
        Command::Download(download) => run_download(&args, download, &loaded.config).await,
        Command::Available(available) => run_available(&args, available, &loaded.config).await,
    }
}

/// Priority: `RUST_LOG` > `--quiet` > `-v` count > config verbosity > info.
fn init_tracing(args: &Args, config_verbosity: Option<VerbositySetting>) {
    let default_level = resolve_default_log_level(args.quiet, args.verbose, config_verbosity);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn resolve_default_log_level(
    quiet: bool,
    verbose: u8,
    config_verbosity: Option<VerbositySetting>,
) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => config_verbosity.map_or("info", VerbositySetting::filter),
        1 => "debug",
        _ => "trace",
    }
}

/// CLI flag > config file > built-in default.
fn build_pipeline_config(
    args: &Args,
    download: Option<&DownloadArgs>,
    file: &FileConfig,
) -> PipelineConfig {
    let mut config = PipelineConfig {
        output_dir: download
            .and_then(|d| d.output.clone())
            .or_else(|| file.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        feed_url: args
            .feed_url
            .clone()
            .or_else(|| file.feed_url.clone())
            .unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
        cache_dir: file
            .cache_dir
            .clone()
            .unwrap_or_else(app_config::resolve_default_cache_dir),
        metadata: file.metadata.unwrap_or(true),
        ..PipelineConfig::default()
    };

    if let Some(workers) = download
        .and_then(|d| d.workers.map(usize::from))
        .or(file.workers)
    {
        config.download.workers = workers;
    }
    if let Some(attempts) = download
        .and_then(|d| d.max_retries.map(u32::from))
        .or(file.max_retries)
    {
        config.download.retry_policy = RetryPolicy::with_max_attempts(attempts);
    }
    if let Some(secs) = file.connect_timeout_secs {
        config.transport.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.read_timeout_secs {
        config.transport.read_timeout = Duration::from_secs(secs);
    }
    config.transport.proxy = download
        .and_then(|d| d.proxy.clone())
        .or_else(|| file.proxy.clone());
    if download.is_some_and(|d| d.no_metadata) {
        config.metadata = false;
    }
    config
}

async fn run_download(
    args: &Args,
    download: &DownloadArgs,
    file: &FileConfig,
) -> Result<ProcessExit> {
    let config = build_pipeline_config(args, Some(download), file);
    let request = DownloadRequest {
        input: download.url.clone(),
        range: download.range.clone(),
        format: download.format.or(file.format).unwrap_or_default(),
    };
    info!(
        input = %request.input,
        format = %request.format,
        workers = config.download.workers,
        output = %config.output_dir.display(),
        "yomi starting"
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight pages");
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let progress = (!args.quiet && io::stderr().is_terminal())
        .then(|| Arc::new(output::ProgressObserver::new()));
    let observer: Arc<dyn RunObserver> = match &progress {
        Some(progress) => Arc::clone(progress) as Arc<dyn RunObserver>,
        None => Arc::new(NoopObserver),
    };

    let pipeline = Pipeline::new(config)
        .with_interrupt_flag(interrupted)
        .with_observer(observer);
    let result = pipeline.run(&request).await;
    if let Some(progress) = &progress {
        progress.finish();
    }
    let summary = result.context("download failed")?;

    output::print_summary(&summary);
    Ok(if summary.exit_status() {
        ProcessExit::Success
    } else {
        ProcessExit::Failure
    })
}

async fn run_available(
    args: &Args,
    available: &AvailableArgs,
    file: &FileConfig,
) -> Result<ProcessExit> {
    let pipeline = Pipeline::new(build_pipeline_config(args, None, file));
    let registry = pipeline
        .load_registry()
        .await
        .context("could not load site definitions")?;
    list_available(&registry, available);
    Ok(ProcessExit::Success)
}

fn list_available(registry: &SiteRegistry, available: &AvailableArgs) {
    if let Some(query) = &available.search {
        let results = registry.search(query);
        if results.is_empty() {
            println!("No series found for '{query}'.");
        } else {
            output::print_catalog(&format!("Search results for '{query}'"), &results);
        }
    } else if available.all {
        output::print_catalog("All series", &registry.entries());
    } else {
        output::print_catalog("Featured series", &output::featured_entries(registry.entries()));
    }
}
