//! Per-site crawl session
//!
//! A session binds an engine to one site, runs the primary crawl next to the
//! enabled discovery strategies, and pushes every fetched page through the
//! convert and dedup pipeline. It returns only once every strategy, every
//! enqueued request and every in-flight document has finished.

use futures::FutureExt;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::crawler::{
    CrawlEngine, CrawlError, CrawlerConfig, EngineFactory, FetchedPage, OtherSources,
    PageReceiver, robots, sitemap,
};
use crate::dedup::{self, ContentDeduplicator, DedupOutcome};

/// A unit of discovery running inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// The engine's own crawl from the site root
    Primary,
    Sitemap,
    Robots,
    OtherSources,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Primary => "primary",
            Strategy::Sitemap => "sitemap",
            Strategy::Robots => "robots",
            Strategy::OtherSources => "other-sources",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    /// Strategies spawned and not yet joined
    Running { active: usize },
    Draining,
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Starting => f.write_str("starting"),
            SessionState::Running { active } => write!(f, "running ({} strategies)", active),
            SessionState::Draining => f.write_str("draining"),
            SessionState::Done => f.write_str("done"),
        }
    }
}

/// Resources shared by every session of a run
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<CrawlerConfig>,
    pub dedup: Arc<ContentDeduplicator>,
    pub other_sources: Arc<OtherSources>,
}

impl SessionContext {
    /// Build a context with the default external-source endpoints
    pub fn new(config: CrawlerConfig, dedup: Arc<ContentDeduplicator>) -> Result<Self, CrawlError> {
        let other_sources = OtherSources::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            dedup,
            other_sources: Arc::new(other_sources),
        })
    }

    /// Replace the external-source client
    pub fn with_other_sources(mut self, other_sources: OtherSources) -> Self {
        self.other_sources = Arc::new(other_sources);
        self
    }
}

/// What one session did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Site root the session crawled
    pub site: String,
    /// Strategies in the order they completed
    pub strategies: Vec<Strategy>,
    /// Strategies that ended with an error or a panic
    pub failed_strategies: usize,
    /// Pages received through the response hook
    pub pages: usize,
    pub documents_written: usize,
    /// Documents whose every segment had been seen before
    pub duplicate_documents: usize,
    /// Documents that failed to convert or write
    pub failed_documents: usize,
    pub segments_kept: usize,
    pub segments_dropped: usize,
}

#[derive(Debug)]
enum PageOutcome {
    Written { kept: usize, dropped: usize },
    Duplicate { dropped: usize },
    Failed,
}

#[derive(Debug, Default)]
struct PipelineTally {
    pages: usize,
    written: usize,
    duplicates: usize,
    failed: usize,
    kept: usize,
    dropped: usize,
}

impl PipelineTally {
    fn record(&mut self, outcome: PageOutcome) {
        match outcome {
            PageOutcome::Written { kept, dropped } => {
                self.written += 1;
                self.kept += kept;
                self.dropped += dropped;
            }
            PageOutcome::Duplicate { dropped } => {
                self.duplicates += 1;
                self.dropped += dropped;
            }
            PageOutcome::Failed => self.failed += 1,
        }
    }
}

type StrategyResult = (Strategy, Result<usize, CrawlError>);

/// Crawl of a single site
pub struct SiteCrawlSession {
    site: Url,
    ctx: SessionContext,
}

impl SiteCrawlSession {
    pub fn new(site: Url, ctx: SessionContext) -> Self {
        Self { site, ctx }
    }

    /// Site root of this session
    pub fn site(&self) -> &Url {
        &self.site
    }

    /// Run the session to completion
    ///
    /// Fails only when no engine can be bound to the site. Strategy and
    /// document failures are logged and counted in the report.
    #[instrument(skip(self, factory), fields(site = %self.site))]
    pub async fn run<F: EngineFactory>(self, factory: &F) -> Result<SessionReport, CrawlError> {
        self.transition(SessionState::Starting);

        let (hook, pages) = mpsc::unbounded_channel();
        let engine = Arc::new(factory.build(&self.site, &self.ctx.config, hook)?);

        let (drained_tx, drained_rx) = oneshot::channel();
        let pipeline = tokio::spawn(run_pipeline(
            pages,
            drained_rx,
            Arc::clone(&self.ctx.dedup),
            self.ctx.config.concurrent,
        ));

        let mut strategies = JoinSet::new();
        self.spawn_strategies(&mut strategies, &engine);
        self.transition(SessionState::Running {
            active: strategies.len(),
        });

        let mut report = SessionReport {
            site: self.site.to_string(),
            ..Default::default()
        };
        while let Some(joined) = strategies.join_next().await {
            let (strategy, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Strategy task failed to join: {}", e);
                    report.failed_strategies += 1;
                    continue;
                }
            };
            match result {
                Ok(enqueued) => debug!("{} strategy finished, {} URLs enqueued", strategy, enqueued),
                Err(e) => {
                    warn!("{} strategy for {} failed: {}", strategy, self.site, e);
                    report.failed_strategies += 1;
                }
            }
            report.strategies.push(strategy);
        }

        self.transition(SessionState::Draining);
        engine.wait().await;
        engine.wait_link_finder().await;
        drop(engine);

        let _ = drained_tx.send(());
        let tally = pipeline
            .await
            .map_err(|e| CrawlError::Other(format!("Task join error: {}", e)))?;

        report.pages = tally.pages;
        report.documents_written = tally.written;
        report.duplicate_documents = tally.duplicates;
        report.failed_documents = tally.failed;
        report.segments_kept = tally.kept;
        report.segments_dropped = tally.dropped;

        self.transition(SessionState::Done);
        info!(
            "Finished {}: {} pages, {} documents written",
            self.site, report.pages, report.documents_written
        );
        Ok(report)
    }

    fn spawn_strategies<E: CrawlEngine + 'static>(
        &self,
        set: &mut JoinSet<StrategyResult>,
        engine: &Arc<E>,
    ) {
        let config = &self.ctx.config;
        debug!(
            "{} optional strategies enabled for {}",
            config.optional_strategies(),
            self.site
        );

        let primary = Arc::clone(engine);
        let link_finder = config.link_finder;
        spawn_strategy(set, Strategy::Primary, async move {
            primary.start(link_finder).await.map(|()| 0)
        });

        if config.sitemap {
            let engine = Arc::clone(engine);
            spawn_strategy(set, Strategy::Sitemap, async move {
                sitemap::discover(&*engine).await
            });
        }

        if config.robots {
            let engine = Arc::clone(engine);
            spawn_strategy(set, Strategy::Robots, async move {
                robots::discover(&*engine).await
            });
        }

        if config.other_source {
            let engine = Arc::clone(engine);
            let sources = Arc::clone(&self.ctx.other_sources);
            let config = Arc::clone(config);
            spawn_strategy(set, Strategy::OtherSources, async move {
                enumerate_other_sources(&*engine, &sources, &config).await
            });
        }
    }

    fn transition(&self, state: SessionState) {
        info!("Session for {} is {}", self.site, state);
    }
}

/// Spawn a strategy so that it reports back exactly once, even when it panics
fn spawn_strategy<Fut>(set: &mut JoinSet<StrategyResult>, strategy: Strategy, fut: Fut)
where
    Fut: Future<Output = Result<usize, CrawlError>> + Send + 'static,
{
    set.spawn(async move {
        let result = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(CrawlError::Other(format!("{} strategy panicked", strategy))),
        };
        (strategy, result)
    });
}

/// Visit every URL the external providers know for the site's host
async fn enumerate_other_sources(
    engine: &dyn CrawlEngine,
    sources: &OtherSources,
    config: &CrawlerConfig,
) -> Result<usize, CrawlError> {
    let host = engine
        .site()
        .host_str()
        .ok_or_else(|| CrawlError::InvalidTarget(engine.site().to_string()))?;

    let mut enqueued = 0;
    for url in sources.fetch(host, config.include_subs).await {
        let url = url.trim();
        if url.is_empty() {
            continue;
        }
        if config.include_other_source_result {
            println!("[other-sources] - {}", url);
        }
        match engine.visit(url).await {
            Ok(()) => enqueued += 1,
            Err(e) => debug!("Skipping external URL {}: {}", url, e),
        }
    }
    Ok(enqueued)
}

/// Convert and deduplicate pages until the hook is drained and closed
async fn run_pipeline(
    mut pages: PageReceiver,
    mut drained: oneshot::Receiver<()>,
    dedup: Arc<ContentDeduplicator>,
    concurrent: usize,
) -> PipelineTally {
    let permits = Arc::new(Semaphore::new(concurrent.max(1)));
    let mut documents = JoinSet::new();
    let mut tally = PipelineTally::default();
    let mut keys = HashSet::new();
    let mut closed = false;

    loop {
        tokio::select! {
            page = pages.recv() => {
                let Some(page) = page else { break };
                tally.pages += 1;
                let key = match dedup::document_key(&page.url) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!("Skipping page {}: {}", page.url, e);
                        tally.failed += 1;
                        continue;
                    }
                };
                // One document per key: a second response for the same page
                // would overwrite the first with only its novel segments.
                if !keys.insert(key.clone()) {
                    debug!("{} already processed in this session", key);
                    tally.duplicates += 1;
                    continue;
                }
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                let dedup = Arc::clone(&dedup);
                documents.spawn(async move {
                    let outcome = process_page(&dedup, &key, page).await;
                    drop(permit);
                    outcome
                });
            }
            _ = &mut drained, if !closed => {
                closed = true;
                pages.close();
            }
        }

        while let Some(done) = documents.try_join_next() {
            record(&mut tally, done);
        }
    }

    while let Some(done) = documents.join_next().await {
        record(&mut tally, done);
    }
    tally
}

fn record(tally: &mut PipelineTally, done: Result<PageOutcome, tokio::task::JoinError>) {
    match done {
        Ok(outcome) => tally.record(outcome),
        Err(e) => {
            error!("Document task failed: {}", e);
            tally.failed += 1;
        }
    }
}

async fn process_page(dedup: &ContentDeduplicator, key: &str, page: FetchedPage) -> PageOutcome {
    let markdown = match dedup::convert(&page.body) {
        Ok(markdown) => markdown,
        Err(e) => {
            warn!("Failed to convert {}: {}", page.url, e);
            return PageOutcome::Failed;
        }
    };

    match dedup.process(key, &markdown).await {
        Ok(DedupOutcome::Written { kept, dropped, .. }) => PageOutcome::Written { kept, dropped },
        Ok(DedupOutcome::Duplicate { dropped }) => PageOutcome::Duplicate { dropped },
        Err(e) => {
            error!("Failed to write {}: {}", key, e);
            PageOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::SourceEndpoints;
    use crate::crawler::mock_engine::MockEngineFactory;
    use crate::store::{HashStore, MemoryStore};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn context(config: CrawlerConfig, output: &Path) -> SessionContext {
        let store: Arc<dyn HashStore> = Arc::new(MemoryStore::new());
        let dedup = Arc::new(ContentDeduplicator::new(store, output));
        SessionContext::new(config, dedup).unwrap()
    }

    fn site() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[tokio::test]
    async fn test_session_waits_for_every_strategy() {
        let temp_dir = tempdir().unwrap();
        let factory = MockEngineFactory::new()
            .page("https://example.com/", "<p>Home</p>")
            .document(
                "https://example.com/sitemap.xml",
                r#"<urlset><url><loc>https://example.com/from-sitemap</loc></url></urlset>"#,
            )
            .document("https://example.com/robots.txt", "Disallow: /from-robots")
            .fetch_delay(Duration::from_millis(10));
        let config = CrawlerConfig::builder().sitemap(true).robots(true).build();

        let report = SiteCrawlSession::new(site(), context(config, temp_dir.path()))
            .run(&factory)
            .await
            .unwrap();

        assert_eq!(report.strategies.len(), 3);
        assert_eq!(report.strategies[0], Strategy::Primary);
        assert!(report.strategies.contains(&Strategy::Sitemap));
        assert!(report.strategies.contains(&Strategy::Robots));
        assert_eq!(report.failed_strategies, 0);

        let events = factory.events();
        let position = |event: &str| events.iter().position(|e| e == event).unwrap();
        let wait = position("wait https://example.com/");
        assert!(position("visit https://example.com/from-sitemap") < wait);
        assert!(position("visit https://example.com/from-robots") < wait);
        assert!(wait < position("wait_link_finder https://example.com/"));
        assert_eq!(report.documents_written, 1);
    }

    #[tokio::test]
    async fn test_shared_segments_are_written_once() {
        let temp_dir = tempdir().unwrap();
        let factory = MockEngineFactory::new()
            .page("https://example.com/one", "<p>Page one</p><p>Shared footer</p>")
            .page("https://example.com/two", "<p>Page two</p><p>Shared footer</p>");
        let config = CrawlerConfig::builder().robots(false).concurrent(1).build();

        let report = SiteCrawlSession::new(site(), context(config, temp_dir.path()))
            .run(&factory)
            .await
            .unwrap();

        let one = std::fs::read_to_string(temp_dir.path().join("example.com_one.md")).unwrap();
        let two = std::fs::read_to_string(temp_dir.path().join("example.com_two.md")).unwrap();
        assert!(one.contains("Page one"));
        assert!(one.contains("Shared footer"));
        assert!(two.contains("Page two"));
        assert!(!two.contains("Shared footer"));
        assert_eq!(report.pages, 2);
        assert_eq!(report.documents_written, 2);
        assert!(report.segments_dropped >= 1);
    }

    #[tokio::test]
    async fn test_failed_strategy_does_not_stop_session() {
        let temp_dir = tempdir().unwrap();
        let factory = MockEngineFactory::new().page("https://example.com/", "<p>Home</p>");
        let config = CrawlerConfig::builder().robots(true).build();

        let report = SiteCrawlSession::new(site(), context(config, temp_dir.path()))
            .run(&factory)
            .await
            .unwrap();

        assert_eq!(report.strategies.len(), 2);
        assert_eq!(report.failed_strategies, 1);
        assert_eq!(report.documents_written, 1);
        assert!(temp_dir.path().join("example.com_.md").exists());
    }

    #[tokio::test]
    async fn test_unconvertible_page_is_counted() {
        let temp_dir = tempdir().unwrap();
        let factory = MockEngineFactory::new()
            .page("https://example.com/", "<p>Home</p>")
            .page("https://example.com/blank", "<html><body></body></html>");
        let config = CrawlerConfig::builder().robots(false).build();

        let report = SiteCrawlSession::new(site(), context(config, temp_dir.path()))
            .run(&factory)
            .await
            .unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.documents_written, 1);
        assert_eq!(report.failed_documents, 1);
    }

    #[tokio::test]
    async fn test_refetched_page_keeps_first_document() {
        let temp_dir = tempdir().unwrap();
        let factory = MockEngineFactory::new()
            .served(
                "https://example.com/",
                "<p>Welcome</p><p>Long article body</p><p>token=1</p>",
            )
            .page(
                "https://example.com/",
                "<p>Welcome</p><p>Long article body</p><p>token=2</p>",
            )
            .document("https://example.com/robots.txt", "Allow: /")
            .start_delay(Duration::from_millis(50));
        let config = CrawlerConfig::builder().robots(true).build();

        let report = SiteCrawlSession::new(site(), context(config, temp_dir.path()))
            .run(&factory)
            .await
            .unwrap();

        let text = std::fs::read_to_string(temp_dir.path().join("example.com_.md")).unwrap();
        assert!(text.contains("Welcome"));
        assert!(text.contains("Long article body"));
        assert!(text.contains("token=1"));
        assert!(!text.contains("token=2"));
        assert_eq!(report.pages, 2);
        assert_eq!(report.documents_written, 1);
        assert_eq!(report.duplicate_documents, 1);
    }

    #[tokio::test]
    async fn test_other_sources_are_visited() {
        let mut server = mockito::Server::new_async().await;
        let _wayback = server
            .mock("GET", "/cdx/search/cdx")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("https://example.com/archived\n  \nhttps://other.org/elsewhere\n")
            .create_async()
            .await;
        let _collinfo = server
            .mock("GET", "/collinfo.json")
            .with_status(404)
            .create_async()
            .await;
        let _otx = server
            .mock("GET", "/api/v1/indicators/hostname/example.com/url_list")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let temp_dir = tempdir().unwrap();
        let factory = MockEngineFactory::new()
            .served("https://example.com/archived", "<p>Archived page</p>");
        let config = CrawlerConfig::builder()
            .robots(false)
            .other_source(true)
            .build();
        let sources =
            OtherSources::with_endpoints(&config, SourceEndpoints::all(&server.url())).unwrap();
        let ctx = context(config, temp_dir.path()).with_other_sources(sources);

        let report = SiteCrawlSession::new(site(), ctx).run(&factory).await.unwrap();

        assert_eq!(factory.visits(), vec!["https://example.com/archived"]);
        assert_eq!(report.failed_strategies, 0);
        assert!(temp_dir.path().join("example.com_archived.md").exists());
    }

    #[tokio::test]
    async fn test_engine_build_failure_is_reported() {
        struct Refusing;

        impl EngineFactory for Refusing {
            type Engine = crate::crawler::mock_engine::MockEngine;

            fn build(
                &self,
                site: &Url,
                _config: &CrawlerConfig,
                _hook: crate::crawler::PageSender,
            ) -> Result<Self::Engine, CrawlError> {
                Err(CrawlError::InvalidTarget(site.to_string()))
            }
        }

        let temp_dir = tempdir().unwrap();
        let ctx = context(CrawlerConfig::default(), temp_dir.path());

        assert!(SiteCrawlSession::new(site(), ctx).run(&Refusing).await.is_err());
    }
}
