//! # Mock Crawl Engine for Testing
//!
//! Provides a `MockEngineFactory` whose engines serve scripted pages and
//! discovery documents instead of touching the network. Every call is written
//! to a log shared by all engines of the factory, so tests can check what was
//! visited and in which order the session drove the engine.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::crawler::{CrawlEngine, CrawlError, CrawlerConfig, EngineFactory, FetchedPage, PageSender};

/// Factory for scripted engines
#[derive(Debug, Clone, Default)]
pub struct MockEngineFactory {
    crawl_pages: Vec<(String, String)>,
    served: HashMap<String, String>,
    documents: HashMap<String, String>,
    start_delay: Duration,
    fetch_delay: Duration,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page delivered by the primary crawl of the site on the same host
    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.crawl_pages.push((url.to_string(), html.to_string()));
        self
    }

    /// Page delivered when `visit` is called for it
    pub fn served(mut self, url: &str, html: &str) -> Self {
        self.served.insert(url.to_string(), html.to_string());
        self
    }

    /// Body returned by `fetch_text`
    pub fn document(mut self, url: &str, text: &str) -> Self {
        self.documents.insert(url.to_string(), text.to_string());
        self
    }

    /// Delay before the primary crawl delivers its pages
    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Delay before every `fetch_text` answers
    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Every recorded call, in order
    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// URLs passed to `visit`, resolved, in order
    pub fn visits(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| event.strip_prefix("visit ").map(str::to_string))
            .collect()
    }

    /// Sites an engine was built for
    pub fn builds(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| event.strip_prefix("build ").map(str::to_string))
            .collect()
    }

    fn record(&self, event: String) {
        self.log.lock().unwrap().push(event);
    }
}

impl EngineFactory for MockEngineFactory {
    type Engine = MockEngine;

    fn build(
        &self,
        site: &Url,
        _config: &CrawlerConfig,
        hook: PageSender,
    ) -> Result<MockEngine, CrawlError> {
        self.record(format!("build {}", site));
        Ok(MockEngine {
            site: site.clone(),
            hook,
            script: self.clone(),
        })
    }
}

/// Engine serving the pages scripted on its factory
pub struct MockEngine {
    site: Url,
    hook: PageSender,
    script: MockEngineFactory,
}

impl MockEngine {
    fn deliver(&self, url: &str, html: &str) {
        let page = FetchedPage {
            url: Url::parse(url).unwrap(),
            body: html.as_bytes().to_vec(),
        };
        let _ = self.hook.send(page);
    }
}

#[async_trait]
impl CrawlEngine for MockEngine {
    fn site(&self) -> &Url {
        &self.site
    }

    async fn start(&self, link_finder: bool) -> Result<(), CrawlError> {
        tokio::time::sleep(self.script.start_delay).await;
        self.script
            .record(format!("start {} link_finder={}", self.site, link_finder));

        for (url, html) in &self.script.crawl_pages {
            let same_host = Url::parse(url)
                .map(|url| url.host_str() == self.site.host_str())
                .unwrap_or(false);
            if same_host {
                self.deliver(url, html);
            }
        }
        Ok(())
    }

    async fn visit(&self, url: &str) -> Result<(), CrawlError> {
        let url = self.site.join(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CrawlError::InvalidTarget(url.to_string()));
        }
        self.script.record(format!("visit {}", url));

        if let Some(html) = self.script.served.get(url.as_str()) {
            self.deliver(url.as_str(), html);
        }
        Ok(())
    }

    async fn fetch_text(&self, url: &str) -> Result<String, CrawlError> {
        tokio::time::sleep(self.script.fetch_delay).await;
        self.script.record(format!("fetch {}", url));

        self.script
            .documents
            .get(url)
            .cloned()
            .ok_or_else(|| CrawlError::Status {
                url: url.to_string(),
                status: 404,
            })
    }

    async fn wait(&self) {
        self.script.record(format!("wait {}", self.site));
    }

    async fn wait_link_finder(&self) {
        self.script.record(format!("wait_link_finder {}", self.site));
    }
}
