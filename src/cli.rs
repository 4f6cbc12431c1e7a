//! CLI parsing and orchestration. Parses args, loads config, runs a scrape or search, writes
//! JSON or text. Maps errors to exit codes.

use crate::config::{self, Config, ConfigError};
use crate::extract::FieldExtractor;
use crate::fetch::CancelSignal;
use crate::formats::{
    create_output, write_hits_text, write_json, write_text, FormatError, OutputFormat,
};
use crate::model::{BookRecord, SearchHit};
use crate::scraper::{resolve_target, ReqwestTransport, Scraper, ScraperError};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Format(#[from] FormatError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) | CliRunError::Config(_) => 1,
            CliRunError::Scraper(_) => 2,
            CliRunError::Format(_) => 3,
        }
    }

    /// True when the same command may succeed if run again later (throttling, network).
    pub fn is_transient(&self) -> bool {
        matches!(self, CliRunError::Scraper(e) if e.is_transient())
    }
}

#[derive(Parser, Debug)]
#[command(name = "bookscrape")]
#[command(about = "Scrape book metadata from Douban with throttle-aware retries")]
#[command(
    after_help = "Config file keys (user_agents, referer, accept_language, timeout_secs, max_attempts, backoff_base, backoff_unit_ms, max_backoff_secs, throttle_markers, output_dir) are read from ./bookscrape.toml or the user config dir. CLI flags override config. Set RUST_LOG to override log filtering."
)]
pub struct Args {
    /// Douban subject id (e.g. 1084336) or book URL.
    #[arg(required_unless_present_any = ["search", "input"])]
    pub target: Option<String>,

    /// Search for books instead of scraping one.
    #[arg(long, conflicts_with_all = ["target", "input"])]
    pub search: Option<String>,

    /// Result offset for --search.
    #[arg(long, default_value_t = 0, requires = "search")]
    pub start: u32,

    /// Extract from a saved HTML page instead of fetching.
    #[arg(long, conflicts_with = "target")]
    pub input: Option<PathBuf>,

    /// Output format: json or text.
    #[arg(long, default_value = "json", value_parser = parse_format)]
    pub format: OutputFormat,

    /// Output path. Default: stdout. Relative paths resolve against output_dir from config.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Attempts per fetch, including the first (overrides config; default 3).
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Request timeout in seconds (overrides config; default 10).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Use this single User-Agent instead of rotating browser identities.
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Give up on the whole operation after this many seconds, including backoff waits.
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Errors only.
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and full error chain.
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    match s.to_lowercase().as_str() {
        "json" => Ok(OutputFormat::Json),
        "text" | "txt" => Ok(OutputFormat::Text),
        _ => Err(format!("Invalid --format value: '{}'. Use json or text.", s)),
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over the flags.
pub fn init_tracing(args: &Args) {
    let default_level = if args.quiet {
        "bookscrape=error"
    } else if args.verbose {
        "bookscrape=debug"
    } else {
        "bookscrape=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// CLI flags layered over the config file.
fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(ua) = &args.user_agent {
        config.user_agents = Some(vec![ua.clone()]);
    }
    if args.max_attempts.is_some() {
        config.max_attempts = args.max_attempts;
    }
    if args.timeout.is_some() {
        config.timeout_secs = args.timeout;
    }
    config
}

fn resolve_output_path(output: &Path, output_dir: Option<&Path>) -> PathBuf {
    match output_dir {
        Some(dir) if output.is_relative() => dir.join(output),
        _ => output.to_path_buf(),
    }
}

/// Ensure output path parent exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

enum Output {
    Book(BookRecord),
    Hits(Vec<SearchHit>),
}

fn write_output<W: Write>(w: W, output: &Output, format: OutputFormat) -> Result<(), FormatError> {
    match (output, format) {
        (Output::Book(record), OutputFormat::Json) => write_json(w, record),
        (Output::Book(record), OutputFormat::Text) => write_text(w, record),
        (Output::Hits(hits), OutputFormat::Json) => write_json(w, hits),
        (Output::Hits(hits), OutputFormat::Text) => write_hits_text(w, hits),
    }
}

fn build_scraper(config: &Config, args: &Args) -> Result<Scraper, CliRunError> {
    let settings = config.engine_settings()?;
    let transport = ReqwestTransport::builder()
        .timeout_secs(settings.timeout.as_secs().max(1))
        .build()
        .map_err(|source| ScraperError::Client { source })?;
    let mut engine = settings.engine(transport);
    if let Some(secs) = args.deadline {
        engine = engine.with_cancel_signal(CancelSignal::never().with_timeout(Duration::from_secs(secs)));
    }
    Ok(Scraper::new(engine, FieldExtractor::douban()?))
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = apply_overrides(config::load_config()?.unwrap_or_default(), args);
    let scraper = build_scraper(&config, args)?;

    let output = if let Some(query) = &args.search {
        if query.trim().is_empty() {
            return Err(CliRunError::InvalidInput(
                "Search query is empty.".to_string(),
            ));
        }
        Output::Hits(scraper.search(query.trim(), args.start)?)
    } else if let Some(path) = &args.input {
        let html = std::fs::read_to_string(path).map_err(|e| {
            CliRunError::InvalidInput(format!("Cannot read input {}: {}", path.display(), e))
        })?;
        Output::Book(scraper.extract_html(&html))
    } else {
        let target = args.target.as_deref().unwrap_or_default();
        let resource = resolve_target(target).map_err(|e| match &e {
            ScraperError::InvalidUrl { input, reason } => CliRunError::InvalidInput(format!(
                "Expected a subject id or book URL. Example: https://book.douban.com/subject/1084336/ Invalid: {}: {}",
                input, reason
            )),
            ScraperError::UnrecognizedHost { host } => CliRunError::InvalidInput(format!(
                "Unsupported site: {}. Provide a douban.com book URL or a numeric subject id.",
                host
            )),
            _ => CliRunError::InvalidInput(e.to_string()),
        })?;
        Output::Book(scraper.scrape_book(&resource)?)
    };

    match &args.output {
        Some(path) => {
            let path = resolve_output_path(path, config.output_dir.as_deref());
            validate_output_path(&path)?;
            let file = create_output(&path)?;
            write_output(std::io::BufWriter::new(file), &output, args.format)?;
            if !args.quiet {
                eprintln!("Wrote {}", path.display());
            }
        }
        None => {
            let stdout = std::io::stdout();
            write_output(stdout.lock(), &output, args.format)?;
        }
    }
    Ok(())
}
