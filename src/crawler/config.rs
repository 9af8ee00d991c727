//! # Crawler Configuration Module
//!
//! Per-site crawl settings: how deep the primary crawl goes, how many
//! requests run at once, and which discovery strategies run next to it.
//! Uses a builder pattern for flexible configuration.
//!
//! ## Key Components
//!
//! - `CrawlerConfig`: The configuration struct shared by every site session
//! - `CrawlerConfigBuilder`: Builder pattern implementation for easier configuration

use std::time::Duration;

/// Configuration for the crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Maximum depth of the primary crawl (0 for no limit)
    pub max_depth: usize,

    /// Maximum number of pages for the primary crawl (0 for no limit)
    pub max_pages: u32,

    /// Maximum number of concurrent requests per site
    pub concurrent: usize,

    /// Delay in milliseconds before each request
    pub delay_ms: u64,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// User agent to use for requests
    pub user_agent: String,

    /// Proxy for every request
    pub proxy: Option<String>,

    /// Whether the primary crawl follows subdomains
    pub subdomains: bool,

    /// Scan referenced scripts for endpoints
    pub link_finder: bool,

    /// Run sitemap discovery
    pub sitemap: bool,

    /// Run robots.txt discovery
    pub robots: bool,

    /// Run external-source enumeration
    pub other_source: bool,

    /// Keep subdomain URLs returned by external sources
    pub include_subs: bool,

    /// Echo URLs returned by external sources to stdout
    pub include_other_source_result: bool,

    /// VirusTotal API key; the provider is skipped without one
    pub virustotal_api_key: Option<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 1,
            max_pages: 0,
            concurrent: 5,
            delay_ms: 0,
            timeout_secs: 10,
            user_agent: format!("sitedigest/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
            subdomains: false,
            link_finder: true,
            sitemap: false,
            robots: true,
            other_source: false,
            include_subs: false,
            include_other_source_result: false,
            virustotal_api_key: None,
        }
    }
}

/// Builder for CrawlerConfig
#[derive(Debug, Default)]
pub struct CrawlerConfigBuilder {
    config: CrawlerConfig,
}

impl CrawlerConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CrawlerConfig::default(),
        }
    }

    /// Set the maximum depth to crawl
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    /// Set the maximum number of pages to crawl
    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    /// Set the number of concurrent requests per site
    pub fn concurrent(mut self, concurrent: usize) -> Self {
        self.config.concurrent = concurrent.max(1);
        self
    }

    /// Set the delay in milliseconds before each request
    pub fn delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.delay_ms = delay_ms;
        self
    }

    /// Set the request timeout in seconds
    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.config.timeout_secs = timeout_secs;
        self
    }

    /// Set the user agent to use for requests
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the proxy
    pub fn proxy(mut self, proxy: Option<String>) -> Self {
        self.config.proxy = proxy;
        self
    }

    /// Set whether the primary crawl follows subdomains
    pub fn subdomains(mut self, subdomains: bool) -> Self {
        self.config.subdomains = subdomains;
        self
    }

    /// Enable or disable the link finder
    pub fn link_finder(mut self, link_finder: bool) -> Self {
        self.config.link_finder = link_finder;
        self
    }

    /// Enable or disable sitemap discovery
    pub fn sitemap(mut self, sitemap: bool) -> Self {
        self.config.sitemap = sitemap;
        self
    }

    /// Enable or disable robots.txt discovery
    pub fn robots(mut self, robots: bool) -> Self {
        self.config.robots = robots;
        self
    }

    /// Enable or disable external-source enumeration
    pub fn other_source(mut self, other_source: bool) -> Self {
        self.config.other_source = other_source;
        self
    }

    /// Keep subdomain URLs from external sources
    pub fn include_subs(mut self, include_subs: bool) -> Self {
        self.config.include_subs = include_subs;
        self
    }

    /// Echo external-source URLs to stdout
    pub fn include_other_source_result(mut self, include: bool) -> Self {
        self.config.include_other_source_result = include;
        self
    }

    /// Set the VirusTotal API key
    pub fn virustotal_api_key(mut self, key: Option<String>) -> Self {
        self.config.virustotal_api_key = key;
        self
    }

    /// Build the configuration
    pub fn build(self) -> CrawlerConfig {
        self.config
    }
}

impl CrawlerConfig {
    /// Create a new builder
    pub fn builder() -> CrawlerConfigBuilder {
        CrawlerConfigBuilder::new()
    }

    /// Get the request timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the request delay as a Duration
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Number of optional discovery strategies enabled
    pub fn optional_strategies(&self) -> usize {
        [self.sitemap, self.robots, self.other_source]
            .iter()
            .filter(|enabled| **enabled)
            .count()
    }
}
