//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use yomi_core::OutputFormat;

/// Archive manga chapters as folders, PDFs or CBZ files.
///
/// Series are resolved through a remote site-definition feed, so a URL on an
/// old mirror domain or a bare slug like `bleach` both work.
#[derive(Parser, Debug)]
#[command(name = "yomi")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Site-definition feed URL or local file (overrides config)
    #[arg(long, global = true, value_name = "URL")]
    pub feed_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download chapters of a series
    Download(DownloadArgs),

    /// List series the site feed knows about
    Available(AvailableArgs),
}

/// Arguments for `yomi download`.
#[derive(ClapArgs, Debug)]
pub struct DownloadArgs {
    /// Series URL or slug (`bleach`, `site:bleach`)
    #[arg(short, long, value_name = "URL_OR_SLUG")]
    pub url: String,

    /// Chapter range, e.g. `5` or `1-10`
    #[arg(short, long, value_name = "RANGE")]
    pub range: Option<String>,

    /// Concurrent page fetches (1-64)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub workers: Option<u8>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Output format: folder, pdf or cbz
    #[arg(short, long, value_parser = parse_format)]
    pub format: Option<OutputFormat>,

    /// Proxy URL for all traffic
    #[arg(short, long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Maximum attempts per request (0-10)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Skip the series metadata lookup
    #[arg(long)]
    pub no_metadata: bool,
}

/// Arguments for `yomi available`.
#[derive(ClapArgs, Debug)]
pub struct AvailableArgs {
    /// Free-text search over slugs and names
    #[arg(short, long, value_name = "QUERY", conflicts_with = "all")]
    pub search: Option<String>,

    /// Show every known series
    #[arg(short, long)]
    pub all: bool,
}

fn parse_format(value: &str) -> Result<OutputFormat, String> {
    value.parse()
}
