//! rss-dispatch: polls tracker RSS feeds and downloads or notifies on every
//! new match, once.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌───────────┐ RawItem ┌──────────┐  Entry   ┌─────────────┐ download ┌─────────────┐
//! │ source/   │ ──────► │ feed.rs  │ ───────► │ dispatch.rs │ ───────► │ download.rs │
//! │ (fetcher) │         │ (kinds)  │          │ (pipeline)  │  notify  ├─────────────┤
//! └───────────┘         └──────────┘          └─────────────┘ ───────► │ notify.rs   │
//!                            ▲                   │       │             └─────────────┘
//!                            │ FilterSet         │       │ admit?
//!                       ┌──────────┐     ┌──────────┐ ┌──────────┐
//!                       │ filter.rs│     │ cache.rs │ │ disk.rs  │
//!                       └──────────┘     └──────────┘ └──────────┘
//! ```
//!
//! * **`config`**: the YAML file; feed bodies stay raw until resolved.
//! * **`source/`**: the `FeedFetcher` trait and the RSS implementation.
//! * **`feed`**: feed kinds (URL building, date parsing, link rewriting).
//! * **`filter`**: compiled category + pattern rules.
//! * **`entry`**: the normalized item that flows through the pipeline.
//! * **`cache`**: persisted dedup list and failure holddown.
//! * **`disk`**: free-space admission for downloads.
//! * **`dispatch`**: runs feeds through match → dedup → dispatch.
//! * **`main`**: parses args, sets up logging and wires the transports.

mod cache;
mod config;
mod disk;
mod dispatch;
mod download;
mod entry;
mod error;
mod feed;
mod filter;
mod notify;
mod source;

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::style::Stylize;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use cache::DedupCache;
use config::{Config, FeedDecl};
use disk::DiskGate;
use dispatch::{Dispatcher, Mode};
use download::HttpDownloader;
use notify::{LogNotifier, Notifier, PushoverNotifier};
use source::{FeedFetcher, RssFetcher};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "rss-dispatch")]
#[command(about = "Download or notify on new RSS feed matches")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "RSS_DISPATCH_CONFIG", default_value = "rss-dispatch.yaml")]
    config: PathBuf,

    /// Cache file; overrides `CacheFile` from the configuration
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Log level
    #[arg(short = 'L', long, global = true, value_enum, default_value_t = LogLevel::Info)]
    loglevel: LogLevel,

    /// Include source file and line in log lines
    #[arg(long, global = true)]
    lines: bool,

    /// Log destination: a file path to append to, or `stderr`
    #[arg(long, global = true, default_value = "stderr")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every feed (or one) and dispatch new matches
    Run {
        /// Only this feed
        feed: Option<String>,
    },

    /// Mark current matches as seen without downloading or notifying
    Skip {
        /// Only this feed
        feed: Option<String>,

        /// Only these filters of the feed
        #[arg(requires = "feed")]
        filters: Vec<String>,
    },

    /// List feeds in processing order, or the current entries of one feed
    List {
        feed: Option<String>,
    },

    /// Show free space on the download volume
    Disk,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// `RUST_LOG` wins over `--loglevel` when set.
fn init_logging(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), cli.loglevel.as_str()))
    });

    let to_stderr = cli.log == "stderr";
    let writer = if to_stderr {
        BoxMakeWriter::new(io::stderr)
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cli.log)
            .with_context(|| format!("opening log file {}", cli.log))?;
        BoxMakeWriter::new(Mutex::new(file))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(to_stderr)
        .with_target(false)
        .with_file(cli.lines)
        .with_line_number(cli.lines)
        .try_init()
        .map_err(|e| anyhow!("initializing logging: {e}"))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let config = Config::load(&cli.config)?;
    let cache_path = cli.cache.clone().unwrap_or_else(|| config.cache_file.clone());

    match &cli.command {
        Commands::Run { feed } => run(&config, &cache_path, feed.as_deref(), Mode::Dispatch),
        Commands::Skip { feed, filters } => run(
            &config,
            &cache_path,
            feed.as_deref(),
            Mode::Skip { filters },
        ),
        Commands::List { feed: None } => {
            list_feeds(&config);
            Ok(())
        }
        Commands::List { feed: Some(name) } => list_entries(&config, &cache_path, name),
        Commands::Disk => show_disk(&config),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn run(config: &Config, cache_path: &Path, feed: Option<&str>, mode: Mode<'_>) -> Result<()> {
    let feeds = select_feeds(config, feed)?;
    let timeout = Duration::from_secs(config.http_timeout_secs);

    let fetcher = RssFetcher::new(timeout)?;
    let downloader = HttpDownloader::new(timeout)?;
    let notifier: Box<dyn Notifier> = match &config.pushover {
        Some(pushover) => Box::new(PushoverNotifier::new(pushover.clone(), timeout)?),
        None => {
            warn!("no Pushover section configured, notifications go to the log");
            Box::new(LogNotifier)
        }
    };

    let mut dispatcher = Dispatcher::new(&fetcher, notifier.as_ref(), &downloader);
    if let Some(dir) = &config.download_dir {
        dispatcher = dispatcher.with_download_dir(dir);
    }
    if let Some(gate) = disk_gate(config)? {
        dispatcher = dispatcher.with_disk_gate(gate);
    }

    let mut cache = DedupCache::open(cache_path);
    let report = dispatcher
        .run(&feeds, &mut cache, mode)
        .with_context(|| format!("saving cache {}", cache_path.display()))?;

    let dispatched: usize = report
        .feeds
        .iter()
        .map(|f| f.downloaded + f.notified + f.skipped)
        .sum();
    info!(feeds = feeds.len(), dispatched, "run complete");

    if !report.is_clean() {
        bail!(
            "{} of {} feeds failed: {}",
            report.feed_errors.len(),
            feeds.len(),
            report
                .feed_errors
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}

fn list_feeds(config: &Config) {
    for decl in config.ordered_feeds() {
        let order = decl
            .order
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".into());
        match decl.resolve() {
            Ok(feed) => {
                let filters: Vec<&str> = feed.filters.rules().iter().map(|r| r.name.as_str()).collect();
                println!(
                    "{:>3}  {} [{}]{}  filters: {}",
                    order,
                    feed.name.as_str().bold(),
                    feed.kind.type_name(),
                    if feed.may_download() { " auto-download" } else { "" },
                    filters.join(", ")
                );
            }
            Err(e) => println!("{:>3}  {}  {}", order, decl.name.as_str().bold(), e.to_string().red()),
        }
    }
}

fn list_entries(config: &Config, cache_path: &Path, name: &str) -> Result<()> {
    let decl = select_feeds(config, Some(name))?[0];
    let feed = decl.resolve()?;
    let url = feed.generate_url()?;
    let fetcher = RssFetcher::new(Duration::from_secs(config.http_timeout_secs))?;
    let items = fetcher.fetch(&url)?;
    let cache = DedupCache::open(cache_path);

    for raw in &items {
        let entry = feed.normalize(raw)?;
        let status = match feed.match_entry(&entry) {
            Some(_) if cache.contains(&entry.title) => "seen".to_string().dark_grey(),
            Some(rule) if !cache.check_new_error(&entry.title) => {
                let until = cache
                    .error_expiry(&entry.title)
                    .and_then(|ts| DateTime::from_timestamp(ts, 0))
                    .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                format!("match: {} (failing, alerts held until {until})", rule.name).red()
            }
            Some(rule) => format!("match: {}", rule.name).green(),
            None => "no match".to_string().yellow(),
        };
        println!("{status}\n{entry}\n");
    }
    println!(
        "{} entries from {}; {} recorded in {}",
        items.len(),
        url,
        cache.entries().len(),
        cache_path.display()
    );
    Ok(())
}

fn show_disk(config: &Config) -> Result<()> {
    let gate = disk_gate(config)?.context("neither DiskPath nor DownloadDir is configured")?;
    let status = gate.usage()?;
    let line = status.describe();
    let line = if status.is_comfortable(0) {
        line.green()
    } else {
        line.red()
    };
    println!("{}: {line}", gate.path().display());
    println!(
        "Total {:.2}GB, buffer {:.2}GB",
        status.total as f64 / disk::GB as f64,
        gate.buffer() as f64 / disk::GB as f64
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn select_feeds<'c>(config: &'c Config, name: Option<&str>) -> Result<Vec<&'c FeedDecl>> {
    match name {
        None => Ok(config.ordered_feeds()),
        Some(name) => config
            .feed(name)
            .map(|decl| vec![decl])
            .ok_or_else(|| anyhow!("Unknown feed: {name}")),
    }
}

/// An invalid `DiskBuffer` is fatal.
fn disk_gate(config: &Config) -> Result<Option<DiskGate>> {
    config
        .disk_path()
        .map(|path| DiskGate::with_buffer(path, &config.disk_buffer))
        .transpose()
        .context("invalid DiskBuffer")
}
