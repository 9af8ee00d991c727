//! # Website Crawler Module
//!
//! This module drives the crawl of a single site. A `SiteCrawlSession` binds a
//! crawl engine to the site and runs the primary crawl next to the optional
//! discovery strategies (sitemap, robots.txt, external sources). Every page
//! the engine fetches is pushed through the response hook into the session's
//! page pipeline, which converts it to markdown and deduplicates it.
//!
//! ## Key Components
//!
//! - `CrawlEngine`: the fetch engine seam (start, visit, fetch, wait)
//! - `EngineFactory`: builds one engine per site, wired to the response hook
//! - `SpiderEngine`: production engine on top of `spider` and `reqwest`
//! - `SiteCrawlSession`: fan-out of discovery strategies joined before completion
//! - `OtherSources`: external URL providers (Wayback, Common Crawl, OTX, VirusTotal)
//!
//! ## Failure Handling
//!
//! A failing strategy ends on its own and is logged; siblings keep running.
//! A page that fails to convert or write is logged and skipped. Nothing here
//! retries; retries are the engine's business.

mod config;
mod error;
mod link_finder;
#[cfg(test)]
pub(crate) mod mock_engine;
mod other_sources;
mod robots;
mod session;
mod sitemap;
mod spider_integration;

pub use config::{CrawlerConfig, CrawlerConfigBuilder};
pub use error::CrawlError;
pub use other_sources::{OtherSources, SourceEndpoints};
pub use robots::{RobotsEntries, parse_robots};
pub use session::{SessionContext, SessionReport, SessionState, SiteCrawlSession, Strategy};
pub use sitemap::{SITEMAP_PATHS, SitemapDocument, parse_sitemap};
pub use spider_integration::{SpiderEngine, SpiderEngineFactory};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

/// A response received by the engine
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL the page was fetched from
    pub url: Url,

    /// Raw response body
    pub body: Vec<u8>,
}

/// Sending half of the response hook
pub type PageSender = mpsc::UnboundedSender<FetchedPage>;

/// Receiving half of the response hook
pub type PageReceiver = mpsc::UnboundedReceiver<FetchedPage>;

/// Fetch engine bound to one site
///
/// Every response the engine receives, whether from the primary crawl or
/// from `visit`, is forwarded to the hook the engine was built with.
#[async_trait]
pub trait CrawlEngine: Send + Sync {
    /// Site this engine was built for
    fn site(&self) -> &Url;

    /// Run the primary crawl of the site to completion
    async fn start(&self, link_finder: bool) -> Result<(), CrawlError>;

    /// Enqueue a fetch. Relative URLs resolve against the site.
    async fn visit(&self, url: &str) -> Result<(), CrawlError>;

    /// Fetch a discovery document (sitemap, robots.txt) without forwarding it
    async fn fetch_text(&self, url: &str) -> Result<String, CrawlError>;

    /// Block until every enqueued fetch has completed
    async fn wait(&self);

    /// Block until the link-finder sub-engine has completed
    async fn wait_link_finder(&self);
}

/// Builds a crawl engine for each site session
pub trait EngineFactory: Send + Sync {
    /// Engine type produced by this factory
    type Engine: CrawlEngine + 'static;

    /// Bind an engine to `site`, forwarding every response into `hook`
    fn build(
        &self,
        site: &Url,
        config: &CrawlerConfig,
        hook: PageSender,
    ) -> Result<Self::Engine, CrawlError>;
}
