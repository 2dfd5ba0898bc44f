use clap::{Args, Parser, Subcommand};
use shua::{ConcatMode, Config, Downloader, Result, Summary, run_with_shutdown};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Top-level CLI for the shua bulk downloader.
#[derive(Debug, Parser)]
#[command(name = "shua", version)]
#[command(about = "shua: concurrent bulk downloader with ordered chunk merging", long_about = None)]
struct Cli {
    #[command(flatten)]
    options: Options,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download URLs listed in a local or remote text file.
    File {
        /// Path of the list, or an http(s) URL to fetch it from.
        source: String,
    },

    /// Download tasks from a JSON array of {"url", "headers"} objects.
    Json {
        /// Path to the JSON file.
        path: PathBuf,
    },

    /// Download URLs generated by an integer-range expression.
    Expr {
        /// Template such as `https://host/seg-{{%d(0,99)}}.ts`.
        expression: String,
    },

    /// Download the given URLs.
    Urls {
        /// URLs, in merge order.
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct Options {
    /// Maximum concurrent downloads.
    #[arg(short = 'n', long, global = true)]
    threads: Option<usize>,

    /// Failures tolerated per URL before it is dropped.
    #[arg(short, long, global = true)]
    retries: Option<u32>,

    /// Per-request timeout in milliseconds (0 disables it).
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    /// Extra request header as `Name: value` (repeatable).
    #[arg(short = 'H', long = "header", global = true)]
    headers: Vec<String>,

    /// Directory to write chunks to.
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Name chunks by their index instead of the URL file name.
    #[arg(short, long, global = true)]
    ascending: bool,

    /// Merge chunks into one ordered file while downloading.
    #[arg(short, long, global = true)]
    concat: bool,

    /// Merge destination (implies --concat).
    #[arg(long, global = true)]
    concat_output: Option<PathBuf>,

    /// Keep merging past dropped chunks instead of starting a new file (implies --concat).
    #[arg(long, global = true)]
    force_concat: bool,

    /// Keep chunk files after they are merged.
    #[arg(long, global = true)]
    keep_chunks: bool,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl Options {
    fn into_config(self) -> Config {
        let defaults = Config::default();
        let concat = self.concat || self.force_concat || self.concat_output.is_some();
        Config {
            threads: self.threads.unwrap_or(defaults.threads),
            retries: self.retries.unwrap_or(defaults.retries),
            timeout: self
                .timeout
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            headers: self.headers,
            output: self.output.unwrap_or(defaults.output),
            ascending: self.ascending,
            concat,
            concat_output: self.concat_output,
            concat_mode: if self.force_concat {
                ConcatMode::Contiguous
            } else {
                ConcatMode::Segmented
            },
            delete_chunks_after_concat: !self.keep_chunks,
            ..defaults
        }
    }
}

/// Structured logging to stderr; `RUST_LOG` overrides the level flag.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<Summary> {
    let downloader = Downloader::new(cli.options.into_config())?;

    let added = match cli.command {
        Command::File { source } => downloader.load_urls_from_file(&source).await?,
        Command::Json { path } => downloader.load_urls_from_json(&path).await?,
        Command::Expr { expression } => downloader.load_urls_from_expression(&expression)?,
        Command::Urls { urls } => downloader.add_urls(urls)?,
    };
    if added == 0 {
        tracing::warn!("Input produced no URLs");
    }

    run_with_shutdown(&downloader).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    // Initialize logging as early as possible.
    init_logging(cli.options.verbose);

    // Dropped URLs are reported in the summary and do not fail the process.
    if let Err(err) = run(cli).await {
        eprintln!("shua error: {err}");
        std::process::exit(1);
    }
}
