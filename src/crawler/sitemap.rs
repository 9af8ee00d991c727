//! Sitemap discovery strategy

use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info};
use url::Url;

use crate::crawler::{CrawlEngine, CrawlError};

/// Well-known sitemap locations tried on every site
pub const SITEMAP_PATHS: [&str; 12] = [
    "/sitemap.xml",
    "/sitemap_news.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/sitemapindex.xml",
    "/sitemap-news.xml",
    "/post-sitemap.xml",
    "/page-sitemap.xml",
    "/portfolio-sitemap.xml",
    "/home_slider-sitemap.xml",
    "/category-sitemap.xml",
    "/author-sitemap.xml",
];

/// How many levels of nested sitemap indexes are followed
const MAX_NESTING: usize = 3;

#[derive(Debug, Deserialize)]
struct UrlSet {
    #[serde(rename = "url", default)]
    urls: Vec<Loc>,
}

#[derive(Debug, Deserialize)]
struct SitemapIndex {
    #[serde(rename = "sitemap", default)]
    sitemaps: Vec<Loc>,
}

#[derive(Debug, Deserialize)]
struct Loc {
    loc: String,
}

/// A parsed sitemap document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// `<urlset>`: page locations
    UrlSet(Vec<String>),

    /// `<sitemapindex>`: locations of further sitemaps
    Index(Vec<String>),
}

/// Parse a sitemap or sitemap index
pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument, CrawlError> {
    let locs = |entries: Vec<Loc>| {
        entries
            .into_iter()
            .map(|entry| entry.loc.trim().to_string())
            .filter(|loc| !loc.is_empty())
            .collect()
    };

    if xml.contains("<sitemapindex") {
        let index: SitemapIndex = quick_xml::de::from_str(xml)?;
        Ok(SitemapDocument::Index(locs(index.sitemaps)))
    } else {
        let set: UrlSet = quick_xml::de::from_str(xml)?;
        Ok(SitemapDocument::UrlSet(locs(set.urls)))
    }
}

/// Fetch the well-known sitemap paths and visit every listed page
///
/// Missing or malformed sitemaps are skipped. Returns the number of URLs
/// handed to the engine.
pub async fn discover(engine: &dyn CrawlEngine) -> Result<usize, CrawlError> {
    let site = engine.site().clone();
    let mut pending: Vec<(Url, usize)> = Vec::new();
    for path in SITEMAP_PATHS.iter().rev() {
        pending.push((site.join(path)?, 0));
    }

    let mut fetched = HashSet::new();
    let mut enqueued = 0;

    while let Some((sitemap, depth)) = pending.pop() {
        if !fetched.insert(sitemap.to_string()) {
            continue;
        }

        let xml = match engine.fetch_text(sitemap.as_str()).await {
            Ok(xml) => xml,
            Err(e) => {
                debug!("No sitemap at {}: {}", sitemap, e);
                continue;
            }
        };

        match parse_sitemap(&xml) {
            Ok(SitemapDocument::UrlSet(locs)) => {
                for loc in locs {
                    match engine.visit(&loc).await {
                        Ok(()) => enqueued += 1,
                        Err(e) => debug!("Skipping sitemap entry {}: {}", loc, e),
                    }
                }
            }
            Ok(SitemapDocument::Index(locs)) if depth < MAX_NESTING => {
                for loc in locs {
                    match sitemap.join(&loc) {
                        Ok(nested) => pending.push((nested, depth + 1)),
                        Err(e) => debug!("Skipping nested sitemap {}: {}", loc, e),
                    }
                }
            }
            Ok(SitemapDocument::Index(_)) => {
                debug!("Not following sitemap index {} past depth {}", sitemap, depth);
            }
            Err(e) => debug!("Failed to parse sitemap {}: {}", sitemap, e),
        }
    }

    info!("Sitemap discovery for {} enqueued {} URLs", site, enqueued);
    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::mock_engine::MockEngineFactory;
    use crate::crawler::{EngineFactory, CrawlerConfig};
    use tokio::sync::mpsc;

    const URLSET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/a</loc><lastmod>2024-01-01</lastmod></url>
  <url><loc> https://example.com/b </loc></url>
</urlset>"#;

    const INDEX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/nested.xml</loc></sitemap>
</sitemapindex>"#;

    #[test]
    fn test_parse_urlset() {
        assert_eq!(
            parse_sitemap(URLSET).unwrap(),
            SitemapDocument::UrlSet(vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string(),
            ])
        );
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(
            parse_sitemap(INDEX).unwrap(),
            SitemapDocument::Index(vec!["https://example.com/nested.xml".to_string()])
        );
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_sitemap("<urlset><url><loc>unterminated").is_err());
    }

    #[tokio::test]
    async fn test_discover_follows_index() {
        let factory = MockEngineFactory::new()
            .document("https://example.com/sitemap_index.xml", INDEX)
            .document("https://example.com/nested.xml", URLSET);
        let (hook, _pages) = mpsc::unbounded_channel();
        let site = Url::parse("https://example.com/").unwrap();
        let engine = factory
            .build(&site, &CrawlerConfig::default(), hook)
            .unwrap();

        let enqueued = discover(&engine).await.unwrap();

        assert_eq!(enqueued, 2);
        assert_eq!(
            factory.visits(),
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string(),
            ]
        );
    }
}
