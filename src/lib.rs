//! # sitedigest - Deduplicated website crawling for Rust
//!
//! This crate crawls websites into markdown documents where content shared
//! between pages, such as navigation, headers and footers, is written only
//! once per run. Pages are split into segments on blank lines and every
//! segment is fingerprinted into a store shared by all site sessions.
//!
//! ## Features
//!
//! - Concurrent crawling of many sites with a fixed worker pool
//! - Discovery beyond the primary crawl:
//!   - Sitemaps, including nested sitemap indexes
//!   - robots.txt rules and sitemap references
//!   - Endpoints referenced from JavaScript (link finder)
//!   - Archives and threat-intel providers (Wayback, Common Crawl, OTX, VirusTotal)
//! - Fingerprint store in memory or in a local libsql file
//! - Async API with Tokio
//!
//! ## Example
//!
//! ```rust,no_run
//! use sitedigest::crawler::{CrawlerConfig, SpiderEngineFactory};
//! use sitedigest::orchestrator::{CrawlOrchestrator, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let crawler = CrawlerConfig::builder().max_depth(2).sitemap(true).build();
//!     let run = RunConfig {
//!         output_dir: Some("out".into()),
//!         ..Default::default()
//!     };
//!
//!     let orchestrator = CrawlOrchestrator::new(SpiderEngineFactory, crawler, run).await?;
//!     let report = orchestrator
//!         .run(vec!["https://example.com".to_string()])
//!         .await?;
//!
//!     println!("{} documents written", report.documents_written);
//!     Ok(())
//! }
//! ```

mod error;

pub mod crawler;
pub mod dedup;
pub mod orchestrator;
pub mod store;
pub mod targets;

pub use error::Error;

/// Re-export of types module for public use
pub mod prelude {
    pub use crate::error::Error;
    pub use crate::error::Result;
}
