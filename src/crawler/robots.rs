//! robots.txt discovery strategy

use tracing::{debug, info};

use crate::crawler::{CrawlEngine, CrawlError};

/// URLs worth visiting that a robots.txt file reveals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsEntries {
    /// Paths named by `Allow`/`Disallow` rules
    pub paths: Vec<String>,

    /// Locations named by `Sitemap` lines
    pub sitemaps: Vec<String>,
}

/// Extract rule paths and sitemap locations from a robots.txt body
///
/// Rules with wildcards or end anchors do not name a concrete path and are
/// skipped.
pub fn parse_robots(text: &str) -> RobotsEntries {
    let mut entries = RobotsEntries::default();

    for line in text.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key.trim().to_ascii_lowercase().as_str() {
            "allow" | "disallow" => {
                if value.contains('*') || value.contains('$') {
                    continue;
                }
                if !entries.paths.iter().any(|path| path == value) {
                    entries.paths.push(value.to_string());
                }
            }
            "sitemap" => entries.sitemaps.push(value.to_string()),
            _ => {}
        }
    }

    entries
}

/// Fetch the site's robots.txt and visit what it names
///
/// Returns the number of URLs handed to the engine.
pub async fn discover(engine: &dyn CrawlEngine) -> Result<usize, CrawlError> {
    let robots_url = engine.site().join("/robots.txt")?;
    let text = engine.fetch_text(robots_url.as_str()).await?;
    let entries = parse_robots(&text);

    let mut enqueued = 0;
    for target in entries.paths.iter().chain(entries.sitemaps.iter()) {
        match engine.visit(target).await {
            Ok(()) => enqueued += 1,
            Err(e) => debug!("Skipping robots entry {}: {}", target, e),
        }
    }

    info!("robots.txt discovery for {} enqueued {} URLs", engine.site(), enqueued);
    Ok(enqueued)
}
