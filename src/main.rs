//! # sitedigest CLI Application
//!
//! Crawls one or more sites and writes every page as a markdown document,
//! with content already seen elsewhere in the run left out.
//!
//! ## Key Components
//!
//! - CLI argument parsing with clap
//! - Target collection from `--site`, a sites file, and piped stdin
//! - Progress tracking over sites with indicatif
//! - Telemetry: console, optional log file, optional OTLP export
//!
//! ## Examples
//!
//! ```text
//! sitedigest -s https://example.com -d 2 --sitemap -o out
//! cat sites.txt | sitedigest -t 4 --store-path hashes.db
//! ```

mod telemetry;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use sitedigest::crawler::{CrawlerConfig, SpiderEngineFactory};
use sitedigest::dedup::{DEFAULT_EXTENSION, DedupMode};
use sitedigest::orchestrator::{CrawlOrchestrator, RunConfig, SiteEvent};
use sitedigest::store::StoreBackend;
use std::path::PathBuf;
use telemetry::{OtelGuard, TelemetryOptions};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Crawl websites into deduplicated markdown documents", long_about = None)]
struct Cli {
    /// Site to crawl
    #[arg(short = 's', long)]
    site: Option<String>,

    /// File with one site per line
    #[arg(short = 'S', long)]
    sites: Option<PathBuf>,

    /// Output directory (default: results_<pid>-<unix time>)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Number of sites crawled at once
    #[arg(short = 't', long, default_value = "1")]
    threads: usize,

    /// Maximum concurrent requests per site
    #[arg(short = 'c', long, default_value = "5")]
    concurrent: usize,

    /// Crawl depth (0 for unlimited)
    #[arg(short = 'd', long, default_value = "1")]
    depth: usize,

    /// Delay in milliseconds before each request
    #[arg(short = 'k', long, default_value = "0")]
    delay: u64,

    /// Request timeout in seconds
    #[arg(short = 'm', long, default_value = "10")]
    timeout: u64,

    /// User agent for requests
    #[arg(short = 'u', long)]
    user_agent: Option<String>,

    /// Proxy for every request (http://host:port)
    #[arg(short = 'p', long)]
    proxy: Option<String>,

    /// Maximum number of pages for the primary crawl (0 for unlimited)
    #[arg(long, default_value = "0")]
    max_pages: u32,

    /// Follow subdomains in the primary crawl
    #[arg(long)]
    subs: bool,

    /// Scan referenced JavaScript for endpoints
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    js: bool,

    /// Visit URLs listed in sitemaps
    #[arg(long)]
    sitemap: bool,

    /// Visit paths named in robots.txt
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    robots: bool,

    /// Visit URLs known to archives and threat-intel providers
    #[arg(short = 'a', long)]
    other_source: bool,

    /// Keep subdomain URLs from other sources
    #[arg(short = 'w', long)]
    include_subs: bool,

    /// Print URLs found by other sources
    #[arg(short = 'r', long)]
    include_other_source: bool,

    /// Keep fingerprints in memory instead of a database file
    #[arg(short = 'M', long, conflicts_with = "store_path")]
    in_memory: bool,

    /// Persistent fingerprint database, kept after the run
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Atomic check-and-insert per segment
    #[arg(long)]
    strict: bool,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Debug logging
    #[arg(long)]
    debug: bool,

    /// Only warnings and errors, no progress bar
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Export traces and metrics over OTLP
    #[arg(long)]
    otel: bool,
}

impl Cli {
    fn telemetry(&self) -> TelemetryOptions {
        let level = if self.verbose || self.debug {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        };

        TelemetryOptions {
            level,
            log_file: self.log_file.clone(),
            otel: self.otel,
        }
    }

    fn crawler_config(&self) -> CrawlerConfig {
        let mut builder = CrawlerConfig::builder()
            .max_depth(self.depth)
            .max_pages(self.max_pages)
            .concurrent(self.concurrent)
            .delay_ms(self.delay)
            .timeout_secs(self.timeout)
            .proxy(self.proxy.clone())
            .subdomains(self.subs)
            .link_finder(self.js)
            .sitemap(self.sitemap)
            .robots(self.robots)
            .other_source(self.other_source)
            .include_subs(self.include_subs)
            .include_other_source_result(self.include_other_source)
            .virustotal_api_key(std::env::var("VT_API_KEY").ok());

        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        builder.build()
    }

    fn run_config(&self) -> RunConfig {
        let store = if self.in_memory {
            StoreBackend::Memory
        } else if let Some(path) = &self.store_path {
            StoreBackend::Durable {
                path: path.clone(),
                remove_on_close: false,
            }
        } else {
            StoreBackend::scratch()
        };

        RunConfig {
            threads: self.threads.max(1),
            output_dir: self.output.clone(),
            extension: DEFAULT_EXTENSION.to_string(),
            store,
            dedup_mode: if self.strict {
                DedupMode::Strict
            } else {
                DedupMode::BestEffort
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    let _otel: OtelGuard = telemetry::init_tracing_subscriber(&cli.telemetry())?;

    let targets = sitedigest::targets::collect_targets(cli.site.as_deref(), cli.sites.as_deref()).await;
    if targets.is_empty() {
        return Err(anyhow!(
            "no targets given; use --site, --sites or pipe sites on stdin"
        ));
    }

    let orchestrator =
        CrawlOrchestrator::new(SpiderEngineFactory, cli.crawler_config(), cli.run_config()).await?;

    // Create a channel for progress updates
    let (progress_sender, mut progress_receiver) = mpsc::channel(100);

    let progress_bar = if cli.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(targets.len() as u64)
    };
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) {msg}")?
            .progress_chars("##-"),
    );
    progress_bar.set_message("Crawling sites...");

    // Start timer
    let start_time = std::time::Instant::now();

    // Spawn a task to process progress updates
    let progress_handle = tokio::spawn({
        let progress_bar = progress_bar.clone();
        async move {
            while let Some(event) = progress_receiver.recv().await {
                match event {
                    SiteEvent::Started(site) => {
                        progress_bar.set_message(format!("Crawling {}", site));
                    }
                    SiteEvent::Finished(report) => {
                        progress_bar.inc(1);
                        progress_bar.set_message(format!(
                            "Finished {} ({} documents)",
                            report.site, report.documents_written
                        ));
                    }
                    SiteEvent::Skipped { target, .. } => {
                        progress_bar.inc(1);
                        progress_bar.set_message(format!("Skipped {}", target));
                    }
                }
            }
            // Signal that we're done processing updates
            progress_bar.finish_with_message("Crawl completed");
        }
    });

    let report = orchestrator
        .with_progress(progress_sender)
        .run(targets)
        .await?;

    // Wait for progress task to complete (it will end when all senders are dropped)
    let _ = progress_handle.await;

    let elapsed = start_time.elapsed();

    if !cli.quiet {
        println!(
            "Crawled {} sites in {:.2?} ({} skipped, {} failed)",
            report.sites_crawled, elapsed, report.sites_skipped, report.sites_failed
        );
        println!(
            "Wrote {} documents to {} ({} fully duplicate, {} failed)",
            report.documents_written,
            report.output_dir.display(),
            report.duplicate_documents,
            report.failed_documents
        );
        println!(
            "Kept {} segments, dropped {} duplicates",
            report.segments_kept, report.segments_dropped
        );
    }

    Ok(())
}
