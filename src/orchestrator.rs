//! # Crawl Orchestrator
//!
//! Runs site sessions across a fixed pool of workers. One fingerprint store
//! and one deduplicator are created per run and shared by every session, so
//! content seen on one site is suppressed on all the others.
//!
//! Targets are fed through a bounded queue whose receiver the workers share.
//! A target that does not parse, or whose engine cannot be built, is logged
//! and skipped; it never stops the other workers.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::crawler::{CrawlerConfig, EngineFactory, SessionContext, SessionReport, SiteCrawlSession};
use crate::dedup::{ContentDeduplicator, DEFAULT_EXTENSION, DedupMode};
use crate::error::{Error, Result};
use crate::store::{HashStore, StoreBackend, open_store};

/// Run-wide settings
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Number of sites crawled at once
    pub threads: usize,

    /// Directory documents are written to; generated when unset
    pub output_dir: Option<PathBuf>,

    /// Extension appended to written documents
    pub extension: String,

    pub store: StoreBackend,

    pub dedup_mode: DedupMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            output_dir: None,
            extension: DEFAULT_EXTENSION.to_string(),
            store: StoreBackend::default(),
            dedup_mode: DedupMode::default(),
        }
    }
}

impl RunConfig {
    /// Output directory, or `results_<pid>-<unix time>` when none is set
    pub fn resolve_output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => {
                let dir = PathBuf::from(format!(
                    "results_{}-{}",
                    std::process::id(),
                    chrono::Utc::now().timestamp()
                ));
                warn!(
                    "No output directory given, writing results to {}",
                    dir.display()
                );
                dir
            }
        }
    }
}

/// Progress of a run, one event per site transition
#[derive(Debug, Clone)]
pub enum SiteEvent {
    Started(String),
    Finished(SessionReport),
    Skipped { target: String, reason: String },
}

/// Totals of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sites_crawled: usize,
    /// Targets that were not valid site URLs
    pub sites_skipped: usize,
    /// Sites whose session could not start
    pub sites_failed: usize,
    pub documents_written: usize,
    pub duplicate_documents: usize,
    pub failed_documents: usize,
    pub segments_kept: usize,
    pub segments_dropped: usize,
    pub output_dir: PathBuf,
}

impl RunReport {
    fn absorb(&mut self, other: RunReport) {
        self.sites_crawled += other.sites_crawled;
        self.sites_skipped += other.sites_skipped;
        self.sites_failed += other.sites_failed;
        self.documents_written += other.documents_written;
        self.duplicate_documents += other.duplicate_documents;
        self.failed_documents += other.failed_documents;
        self.segments_kept += other.segments_kept;
        self.segments_dropped += other.segments_dropped;
    }

    fn record_session(&mut self, session: &SessionReport) {
        self.sites_crawled += 1;
        self.documents_written += session.documents_written;
        self.duplicate_documents += session.duplicate_documents;
        self.failed_documents += session.failed_documents;
        self.segments_kept += session.segments_kept;
        self.segments_dropped += session.segments_dropped;
    }
}

/// Crawls a list of sites into one deduplicated output directory
pub struct CrawlOrchestrator<F> {
    factory: Arc<F>,
    ctx: SessionContext,
    store: Arc<dyn HashStore>,
    threads: usize,
    output_dir: PathBuf,
    progress: Option<mpsc::Sender<SiteEvent>>,
}

impl<F: EngineFactory + 'static> CrawlOrchestrator<F> {
    /// Create the output directory and open the store
    ///
    /// Both are fatal when they fail.
    pub async fn new(factory: F, crawler: CrawlerConfig, run: RunConfig) -> Result<Self> {
        let output_dir = run.resolve_output_dir();
        tokio::fs::create_dir_all(&output_dir).await.map_err(|e| {
            Error::Config(format!(
                "cannot create output directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;

        let store = open_store(&run.store).await?;
        let dedup = ContentDeduplicator::new(Arc::clone(&store), &output_dir)
            .with_extension(run.extension)
            .with_mode(run.dedup_mode);
        let ctx = SessionContext::new(crawler, Arc::new(dedup))?;

        Ok(Self {
            factory: Arc::new(factory),
            ctx,
            store,
            threads: run.threads.max(1),
            output_dir,
            progress: None,
        })
    }

    /// Send a `SiteEvent` for every site transition
    pub fn with_progress(mut self, progress: mpsc::Sender<SiteEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// Crawl every target, then close the store
    #[instrument(skip(self, targets), fields(targets = targets.len(), threads = self.threads))]
    pub async fn run(self, targets: Vec<String>) -> Result<RunReport> {
        info!(
            "Crawling {} targets with {} workers",
            targets.len(),
            self.threads
        );

        let (tx, rx) = mpsc::channel::<String>(self.threads);
        let feeder = tokio::spawn(async move {
            for target in targets {
                if tx.send(target).await.is_err() {
                    break;
                }
            }
        });

        let rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();
        for id in 0..self.threads {
            workers.spawn(worker(
                id,
                Arc::clone(&rx),
                Arc::clone(&self.factory),
                self.ctx.clone(),
                self.progress.clone(),
            ));
        }

        let mut report = RunReport {
            output_dir: self.output_dir.clone(),
            ..Default::default()
        };
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(tally) => report.absorb(tally),
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        if let Err(e) = feeder.await {
            error!("Target feeder failed: {}", e);
        }
        if let Err(e) = self.store.close().await {
            warn!("Failed to close hash store: {}", e);
        }

        info!(
            "Run finished: {} sites crawled, {} documents written",
            report.sites_crawled, report.documents_written
        );
        Ok(report)
    }
}

async fn worker<F: EngineFactory>(
    id: usize,
    targets: Arc<Mutex<mpsc::Receiver<String>>>,
    factory: Arc<F>,
    ctx: SessionContext,
    progress: Option<mpsc::Sender<SiteEvent>>,
) -> RunReport {
    let mut tally = RunReport::default();
    let emit = |event: SiteEvent| {
        let progress = progress.clone();
        async move {
            if let Some(progress) = progress {
                let _ = progress.send(event).await;
            }
        }
    };

    loop {
        let next = targets.lock().await.recv().await;
        let Some(target) = next else {
            break;
        };

        let site = match parse_target(&target) {
            Ok(site) => site,
            Err(reason) => {
                warn!("Skipping target {:?}: {}", target, reason);
                tally.sites_skipped += 1;
                emit(SiteEvent::Skipped { target, reason }).await;
                continue;
            }
        };

        let session = SiteCrawlSession::new(site, ctx.clone());
        info!(worker = id, "Crawling {}", session.site());
        emit(SiteEvent::Started(session.site().to_string())).await;

        match session.run(&*factory).await {
            Ok(session) => {
                tally.record_session(&session);
                emit(SiteEvent::Finished(session)).await;
            }
            Err(e) => {
                error!("Crawl of {} failed: {}", target, e);
                tally.sites_failed += 1;
                emit(SiteEvent::Skipped {
                    target,
                    reason: e.to_string(),
                })
                .await;
            }
        }
    }

    tally
}

/// Parse a target into a site root. Only http(s) URLs with a host qualify.
pub fn parse_target(target: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(target.trim()).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme {}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::mock_engine::MockEngineFactory;
    use tempfile::tempdir;

    fn run_config(output: PathBuf, threads: usize) -> RunConfig {
        RunConfig {
            threads,
            output_dir: Some(output),
            store: StoreBackend::Memory,
            ..Default::default()
        }
    }

    fn crawler_config() -> CrawlerConfig {
        CrawlerConfig::builder().robots(false).build()
    }

    #[test]
    fn test_parse_target() {
        assert!(parse_target("https://example.com").is_ok());
        assert!(parse_target("  http://example.com/docs  ").is_ok());
        assert!(parse_target("example.com").is_err());
        assert!(parse_target("ftp://example.com").is_err());
        assert!(parse_target("").is_err());
    }

    #[test]
    fn test_generated_output_dir() {
        let dir = RunConfig::default().resolve_output_dir();
        let name = dir.to_string_lossy().to_string();

        assert!(name.starts_with(&format!("results_{}-", std::process::id())));
    }

    #[tokio::test]
    async fn test_malformed_target_is_skipped() {
        let temp_dir = tempdir().unwrap();
        let factory = MockEngineFactory::new()
            .page("https://example.com/", "<p>Example</p>")
            .page("https://example.org/", "<p>Other</p>");

        let orchestrator = CrawlOrchestrator::new(
            factory.clone(),
            crawler_config(),
            run_config(temp_dir.path().to_path_buf(), 2),
        )
        .await
        .unwrap();
        let report = orchestrator
            .run(vec![
                "https://example.com/".to_string(),
                "not a url".to_string(),
                "https://example.org/".to_string(),
            ])
            .await
            .unwrap();

        let mut builds = factory.builds();
        builds.sort();
        assert_eq!(builds, vec!["https://example.com/", "https://example.org/"]);
        assert_eq!(report.sites_crawled, 2);
        assert_eq!(report.sites_skipped, 1);
        assert_eq!(report.documents_written, 2);
    }

    #[tokio::test]
    async fn test_duplicate_targets_are_crawled_twice() {
        let temp_dir = tempdir().unwrap();
        let factory = MockEngineFactory::new().page("https://example.com/", "<p>Example</p>");

        let orchestrator = CrawlOrchestrator::new(
            factory.clone(),
            crawler_config(),
            run_config(temp_dir.path().to_path_buf(), 1),
        )
        .await
        .unwrap();
        let report = orchestrator
            .run(vec![
                "https://example.com/".to_string(),
                "https://example.com/".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(factory.builds().len(), 2);
        assert_eq!(report.sites_crawled, 2);
        assert_eq!(report.documents_written, 1);
        assert_eq!(report.duplicate_documents, 1);
    }

    #[tokio::test]
    async fn test_scratch_store_is_removed_after_run() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("hashes-test.db");
        let factory = MockEngineFactory::new().page("https://example.com/", "<p>Example</p>");

        let run = RunConfig {
            store: StoreBackend::Durable {
                path: db_path.clone(),
                remove_on_close: true,
            },
            ..run_config(temp_dir.path().join("out"), 1)
        };
        let orchestrator = CrawlOrchestrator::new(factory, crawler_config(), run)
            .await
            .unwrap();
        assert!(db_path.exists());

        orchestrator
            .run(vec!["https://example.com/".to_string()])
            .await
            .unwrap();

        assert!(!db_path.exists());
        assert!(temp_dir.path().join("out").join("example.com_.md").exists());
    }

    #[tokio::test]
    async fn test_unopenable_store_is_fatal() {
        let temp_dir = tempdir().unwrap();
        let run = RunConfig {
            store: StoreBackend::Durable {
                path: temp_dir.path().join("missing").join("hashes.db"),
                remove_on_close: false,
            },
            ..run_config(temp_dir.path().to_path_buf(), 1)
        };

        let result = CrawlOrchestrator::new(MockEngineFactory::new(), crawler_config(), run).await;
        assert!(matches!(result, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_progress_events() {
        let temp_dir = tempdir().unwrap();
        let factory = MockEngineFactory::new().page("https://example.com/", "<p>Example</p>");
        let (progress, mut events) = mpsc::channel(16);

        let orchestrator = CrawlOrchestrator::new(
            factory,
            crawler_config(),
            run_config(temp_dir.path().to_path_buf(), 1),
        )
        .await
        .unwrap()
        .with_progress(progress);
        orchestrator
            .run(vec!["https://example.com/".to_string(), "bogus".to_string()])
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Some(event) = events.recv().await {
            received.push(event);
        }
        assert_eq!(received.len(), 3);
        assert!(matches!(&received[0], SiteEvent::Started(site) if site == "https://example.com/"));
        assert!(matches!(&received[1], SiteEvent::Finished(report) if report.documents_written == 1));
        assert!(matches!(&received[2], SiteEvent::Skipped { target, .. } if target == "bogus"));
    }
}
