//! Integration with spider library for web crawling

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use spider::website::Website;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, instrument, warn};
use url::Url;

use crate::crawler::link_finder;
use crate::crawler::{
    CrawlEngine, CrawlError, CrawlerConfig, EngineFactory, FetchedPage, PageSender,
};

/// Pages buffered between the spider crawl and the forwarder
const SUBSCRIPTION_CAPACITY: usize = 256;

/// Builds a `SpiderEngine` per site
#[derive(Debug, Clone, Default)]
pub struct SpiderEngineFactory;

impl EngineFactory for SpiderEngineFactory {
    type Engine = SpiderEngine;

    fn build(
        &self,
        site: &Url,
        config: &CrawlerConfig,
        hook: PageSender,
    ) -> Result<SpiderEngine, CrawlError> {
        SpiderEngine::new(site.clone(), config.clone(), hook)
    }
}

/// Crawl engine bound to one site
///
/// The primary crawl runs on a spider `Website`; `visit` and the link finder
/// fetch with a shared `reqwest` client. Both paths forward responses to the
/// same hook.
pub struct SpiderEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    site: Url,
    config: CrawlerConfig,
    client: reqwest::Client,
    hook: PageSender,
    link_finder: AtomicBool,
    visited: Mutex<HashSet<String>>,
    permits: Arc<Semaphore>,
    requests: Mutex<JoinSet<()>>,
    scripts: Mutex<JoinSet<()>>,
}

impl SpiderEngine {
    /// Bind an engine to `site`
    pub fn new(site: Url, config: CrawlerConfig, hook: PageSender) -> Result<Self, CrawlError> {
        if site.host_str().is_none() {
            return Err(CrawlError::InvalidTarget(site.to_string()));
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout());
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }
        let client = builder.build()?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                permits: Arc::new(Semaphore::new(config.concurrent.max(1))),
                site,
                config,
                client,
                hook,
                link_finder: AtomicBool::new(false),
                visited: Mutex::new(HashSet::new()),
                requests: Mutex::new(JoinSet::new()),
                scripts: Mutex::new(JoinSet::new()),
            }),
        })
    }

    fn website(&self) -> Website {
        let config = &self.inner.config;
        let mut website = Website::new(self.inner.site.as_str());
        website
            .configuration
            .with_respect_robots_txt(false)
            .with_user_agent(Some(&config.user_agent))
            .with_delay(config.delay_ms)
            .with_depth(config.max_depth)
            .with_subdomains(config.subdomains)
            .with_request_timeout(Some(config.timeout()));
        if config.max_pages > 0 {
            website.configuration.with_limit(config.max_pages);
        }
        if let Some(proxy) = &config.proxy {
            website.configuration.with_proxies(Some(vec![proxy.clone()]));
        }
        website
    }
}

impl EngineInner {
    /// Mark a URL as requested; false when it already was
    async fn claim(&self, url: &Url) -> bool {
        self.visited.lock().await.insert(url.to_string())
    }

    /// Forward a response to the hook and feed its scripts to the link finder
    async fn deliver(self: &Arc<Self>, url: Url, body: Vec<u8>) {
        if self.link_finder.load(Ordering::Relaxed) {
            let html = String::from_utf8_lossy(&body);
            for script in link_finder::script_sources(&html, &url) {
                if script.host_str() == self.site.host_str() && self.claim(&script).await {
                    let inner = Arc::clone(self);
                    self.scripts
                        .lock()
                        .await
                        .spawn(async move { inner.scan_script(script).await });
                }
            }
        }

        if self.hook.send(FetchedPage { url, body }).is_err() {
            debug!("Response hook closed, dropping page");
        }
    }

    async fn enqueue(self: &Arc<Self>, url: Url) {
        if !self.claim(&url).await {
            return;
        }
        let inner = Arc::clone(self);
        self.requests
            .lock()
            .await
            .spawn(inner.fetch_and_deliver(url));
    }

    // Boxed: deliver, scan_script and this fetch spawn each other.
    fn fetch_and_deliver(self: Arc<Self>, url: Url) -> BoxFuture<'static, ()> {
        async move {
            let _permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            if self.config.delay_ms > 0 {
                tokio::time::sleep(self.config.delay()).await;
            }

            let response = match self.client.get(url.clone()).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Request to {} failed: {}", url, e);
                    return;
                }
            };
            if !response.status().is_success() {
                debug!("{} answered {}", url, response.status());
                return;
            }
            match response.bytes().await {
                Ok(body) => self.deliver(url, body.to_vec()).await,
                Err(e) => warn!("Failed to read body of {}: {}", url, e),
            }
        }
        .boxed()
    }

    async fn scan_script(self: Arc<Self>, script: Url) {
        let text = {
            let _permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            match self.get_text(&script).await {
                Ok(text) => text,
                Err(e) => {
                    debug!("Link finder could not fetch {}: {}", script, e);
                    return;
                }
            }
        };

        let Some(host) = self.site.host_str() else {
            return;
        };
        let endpoints = link_finder::find_endpoints(&text);
        let found = link_finder::resolve_endpoints(&endpoints, &script, host);
        debug!("Link finder found {} endpoints in {}", found.len(), script);
        for url in found {
            self.enqueue(url).await;
        }
    }

    async fn get_text(&self, url: &Url) -> Result<String, CrawlError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Await every task in `tasks`, including ones spawned while draining.
/// Returns how many tasks were awaited.
async fn drain(tasks: &Mutex<JoinSet<()>>) -> usize {
    let mut drained = 0;
    loop {
        let mut batch = std::mem::take(&mut *tasks.lock().await);
        if batch.is_empty() {
            return drained;
        }
        while let Some(result) = batch.join_next().await {
            drained += 1;
            if let Err(e) = result {
                warn!("Engine task failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl CrawlEngine for SpiderEngine {
    fn site(&self) -> &Url {
        &self.inner.site
    }

    #[instrument(skip(self), fields(site = %self.inner.site))]
    async fn start(&self, link_finder: bool) -> Result<(), CrawlError> {
        info!("Starting crawl for {}", self.inner.site);
        self.inner.link_finder.store(link_finder, Ordering::Relaxed);

        let mut website = self.website();
        let mut rx = website
            .subscribe(SUBSCRIPTION_CAPACITY)
            .ok_or_else(|| CrawlError::Other("Failed to subscribe to website".to_string()))?;

        // The receive loop only copies pages out; claiming and link finding
        // happen in the forwarder.
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<(String, String)>();
        let receiver = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(page) => {
                        if raw_tx.send((page.get_url().to_string(), page.get_html())).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Crawl subscriber lagged, {} pages skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let inner = Arc::clone(&self.inner);
        let forwarder = tokio::spawn(async move {
            let mut received = 0usize;
            while let Some((raw_url, html)) = raw_rx.recv().await {
                let _page_span = info_span!("forward_page", url = %raw_url);
                let Ok(url) = Url::parse(&raw_url) else {
                    debug!("Skipping page with unparseable URL {}", raw_url);
                    continue;
                };
                if !inner.claim(&url).await {
                    debug!("{} was already fetched, not forwarding again", url);
                    continue;
                }
                received += 1;
                inner.deliver(url, html.into_bytes()).await;
            }
            received
        });

        website.crawl().await;
        website.unsubscribe();

        receiver
            .await
            .map_err(|e| CrawlError::Other(format!("Task join error: {}", e)))?;
        let received = forwarder
            .await
            .map_err(|e| CrawlError::Other(format!("Task join error: {}", e)))?;
        info!("Crawl finished with {} pages", received);
        Ok(())
    }

    async fn visit(&self, url: &str) -> Result<(), CrawlError> {
        let url = self.inner.site.join(url.trim())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CrawlError::InvalidTarget(url.to_string()));
        }
        self.inner.enqueue(url).await;
        Ok(())
    }

    async fn fetch_text(&self, url: &str) -> Result<String, CrawlError> {
        let url = self.inner.site.join(url)?;
        self.inner.get_text(&url).await
    }

    async fn wait(&self) {
        drain(&self.inner.requests).await;
    }

    async fn wait_link_finder(&self) {
        // Scripts enqueue visits and visited pages reference more scripts,
        // so alternate until both sets stay empty.
        loop {
            let scripts = drain(&self.inner.scripts).await;
            let requests = drain(&self.inner.requests).await;
            if scripts == 0 && requests == 0 {
                return;
            }
        }
    }
}
