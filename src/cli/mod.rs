//! Command-line interface.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::ScrapeError;
use crate::export::{build_dealer_summary, export_records, OutputFormat};
use crate::models::ListingRecord;
use crate::pipeline::{Pipeline, RecordCollector, RecordSink};
use crate::scrape::{Fetcher, HttpTransport, ProxyPool, RateLimiter};

#[derive(Parser)]
#[command(name = "motorscout")]
#[command(about = "Scrape car listings into structured records")]
#[command(version)]
pub struct Cli {
    /// Settings JSON path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input JSON with startUrls and overrides
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Maximum number of records to scrape (overrides config)
    #[arg(short, long)]
    max_records: Option<usize>,

    /// Output file path (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format (overrides config)
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Increase verbosity (-vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Verbosity from raw args, for logging setup before clap runs.
pub fn verbosity() -> u8 {
    std::env::args()
        .map(|arg| match arg.as_str() {
            "-v" | "--verbose" => 1u8,
            "-vv" => 2,
            _ => 0,
        })
        .sum()
}

/// Sink that forwards records to the collector while advancing the
/// progress bar.
struct ProgressSink {
    collector: RecordCollector,
    progress: ProgressBar,
}

impl RecordSink for ProgressSink {
    fn emit(&self, record: ListingRecord) {
        self.collector.emit(record);
        self.progress.inc(1);
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref(), cli.input.as_deref())?;
    if let Some(max_records) = cli.max_records {
        settings.max_records = max_records;
    }
    if let Some(output) = &cli.output {
        settings.output_file = Some(output.display().to_string());
    }
    if let Some(format) = cli.format {
        settings.output_format = Some(format.to_string());
    }

    if settings.start_urls.is_empty() {
        anyhow::bail!("no start URLs configured; provide an input file with startUrls");
    }
    for url in &settings.start_urls {
        url::Url::parse(url).map_err(|source| ScrapeError::InvalidUrl {
            url: url.clone(),
            source,
        })?;
    }

    let format = match &settings.output_format {
        Some(raw) => raw.parse::<OutputFormat>()?,
        None => OutputFormat::Json,
    };
    let output_path = settings
        .output_file
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("output.{}", format.extension())));

    let transport = Arc::new(HttpTransport::new(settings.user_agent(), settings.timeout()));
    let proxy_pool = Arc::new(ProxyPool::new(
        settings.proxies.clone(),
        settings.proxy_pool_config(),
    ));
    if proxy_pool.is_direct().await {
        info!("no proxies configured, fetching directly");
    }
    let fetcher = Arc::new(Fetcher::new(
        transport,
        proxy_pool,
        Arc::new(RateLimiter::new(settings.rate_limit_config())),
        settings.retry_policy(),
        settings.pool_backoff(),
    ));

    println!(
        "{} Scraping up to {} records from {} start URL(s)",
        style("→").cyan(),
        settings.max_records,
        settings.start_urls.len()
    );

    let progress = ProgressBar::new(settings.max_records as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap()
            .progress_chars("█▓░"),
    );
    progress.set_message("Scraping listings...");

    let sink = Arc::new(ProgressSink {
        collector: RecordCollector::new(),
        progress: progress.clone(),
    });
    let pipeline = Pipeline::new(fetcher, settings.parallel_requests, settings.max_records);
    let stats = pipeline
        .run(
            &settings.start_urls,
            Arc::clone(&sink) as Arc<dyn RecordSink>,
        )
        .await?;
    progress.finish_and_clear();

    let records = sink.collector.take_records();
    export_records(&records, &output_path, format)?;

    let dealers = build_dealer_summary(&records);
    debug!(dealers = dealers.len(), "dealer summary built");

    for skip in &stats.skips {
        println!(
            "  {} skipped {} ({})",
            style("!").yellow(),
            skip.url,
            skip.reason
        );
    }
    if stats.duplicates > 0 {
        println!(
            "  {} {} duplicate listing(s) dropped",
            style("○").dim(),
            stats.duplicates
        );
    }
    println!(
        "{} Scraped {} listings into {} ({})",
        style("✓").green(),
        stats.records,
        output_path.display(),
        format
    );

    Ok(())
}
