//! External URL providers
//!
//! Archives and threat-intel services already know many URLs of a host.
//! `OtherSources` queries them side by side and merges the answers. A
//! provider that fails is logged and contributes nothing.

use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::crawler::{CrawlError, CrawlerConfig};

/// Pages requested from AlienVault OTX at most
const ALIENVAULT_MAX_PAGES: usize = 10;

/// Base URLs of the providers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEndpoints {
    pub wayback: String,
    pub commoncrawl: String,
    pub alienvault: String,
    pub virustotal: String,
}

impl Default for SourceEndpoints {
    fn default() -> Self {
        Self {
            wayback: "http://web.archive.org".to_string(),
            commoncrawl: "https://index.commoncrawl.org".to_string(),
            alienvault: "https://otx.alienvault.com".to_string(),
            virustotal: "https://www.virustotal.com".to_string(),
        }
    }
}

impl SourceEndpoints {
    /// Point every provider at the same base URL
    pub fn all(base: &str) -> Self {
        Self {
            wayback: base.to_string(),
            commoncrawl: base.to_string(),
            alienvault: base.to_string(),
            virustotal: base.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    #[serde(rename = "cdx-api")]
    cdx_api: String,
}

#[derive(Debug, Deserialize)]
struct CdxRecord {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OtxPage {
    #[serde(default)]
    has_next: bool,
    #[serde(default)]
    url_list: Vec<UrlEntry>,
}

#[derive(Debug, Deserialize)]
struct VirusTotalReport {
    #[serde(default)]
    detected_urls: Vec<UrlEntry>,
}

#[derive(Debug, Deserialize)]
struct UrlEntry {
    url: String,
}

/// Client for the external URL providers
#[derive(Debug, Clone)]
pub struct OtherSources {
    client: reqwest::Client,
    endpoints: SourceEndpoints,
    virustotal_api_key: Option<String>,
}

impl OtherSources {
    /// Create a client using the crawler's user agent and timeout
    pub fn new(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        Self::with_endpoints(config, SourceEndpoints::default())
    }

    /// Create a client against custom provider endpoints
    pub fn with_endpoints(
        config: &CrawlerConfig,
        endpoints: SourceEndpoints,
    ) -> Result<Self, CrawlError> {
        // Archive queries are slow; give them more room than page fetches.
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout().max(Duration::from_secs(30)))
            .build()?;

        Ok(Self {
            client,
            endpoints,
            virustotal_api_key: config.virustotal_api_key.clone(),
        })
    }

    /// Collect known URLs of `host` from every provider
    ///
    /// The result is deduplicated and keeps first-seen order. Unless
    /// `include_subs` is set, URLs on other hosts (subdomains included) are
    /// dropped; entries that do not parse are passed through for the caller
    /// to skip.
    pub async fn fetch(&self, host: &str, include_subs: bool) -> Vec<String> {
        let (wayback, commoncrawl, alienvault, virustotal) = tokio::join!(
            self.wayback(host, include_subs),
            self.commoncrawl(host, include_subs),
            self.alienvault(host),
            self.virustotal(host),
        );

        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for (provider, result) in [
            ("wayback", wayback),
            ("commoncrawl", commoncrawl),
            ("alienvault", alienvault),
            ("virustotal", virustotal),
        ] {
            match result {
                Ok(found) => {
                    debug!("{} returned {} URLs for {}", provider, found.len(), host);
                    for url in found {
                        if seen.insert(url.clone()) {
                            urls.push(url);
                        }
                    }
                }
                Err(e) => warn!("{} lookup for {} failed: {}", provider, host, e),
            }
        }

        if !include_subs {
            urls.retain(|url| match Url::parse(url.trim()) {
                Ok(parsed) => parsed.host_str() == Some(host),
                Err(_) => true,
            });
        }

        info!("External sources returned {} URLs for {}", urls.len(), host);
        urls
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, CrawlError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    async fn wayback(&self, host: &str, include_subs: bool) -> Result<Vec<String>, CrawlError> {
        let url = format!("{}/cdx/search/cdx", self.endpoints.wayback);
        let body = self
            .get(
                &url,
                &[
                    ("url", wildcard(host, include_subs)),
                    ("output", "txt".to_string()),
                    ("fl", "original".to_string()),
                    ("collapse", "urlkey".to_string()),
                ],
            )
            .await?;

        Ok(body.lines().map(str::to_string).collect())
    }

    async fn commoncrawl(&self, host: &str, include_subs: bool) -> Result<Vec<String>, CrawlError> {
        let url = format!("{}/collinfo.json", self.endpoints.commoncrawl);
        let collections: Vec<CollectionInfo> = serde_json::from_str(&self.get(&url, &[]).await?)?;
        let latest = collections
            .first()
            .ok_or_else(|| CrawlError::Other("no Common Crawl collections".to_string()))?;

        let body = self
            .get(
                &latest.cdx_api,
                &[
                    ("url", wildcard(host, include_subs)),
                    ("output", "json".to_string()),
                ],
            )
            .await?;

        Ok(body
            .lines()
            .filter_map(|line| serde_json::from_str::<CdxRecord>(line).ok())
            .map(|record| record.url)
            .collect())
    }

    async fn alienvault(&self, host: &str) -> Result<Vec<String>, CrawlError> {
        let url = format!(
            "{}/api/v1/indicators/hostname/{}/url_list",
            self.endpoints.alienvault, host
        );

        let mut urls = Vec::new();
        for page in 1..=ALIENVAULT_MAX_PAGES {
            let body = self
                .get(
                    &url,
                    &[("limit", "100".to_string()), ("page", page.to_string())],
                )
                .await?;
            let otx: OtxPage = serde_json::from_str(&body)?;
            urls.extend(otx.url_list.into_iter().map(|entry| entry.url));
            if !otx.has_next {
                break;
            }
        }
        Ok(urls)
    }

    async fn virustotal(&self, host: &str) -> Result<Vec<String>, CrawlError> {
        let Some(api_key) = &self.virustotal_api_key else {
            return Ok(Vec::new());
        };

        let url = format!("{}/vtapi/v2/domain/report", self.endpoints.virustotal);
        let body = self
            .get(
                &url,
                &[("apikey", api_key.clone()), ("domain", host.to_string())],
            )
            .await?;
        let report: VirusTotalReport = serde_json::from_str(&body)?;
        Ok(report.detected_urls.into_iter().map(|entry| entry.url).collect())
    }
}

fn wildcard(host: &str, include_subs: bool) -> String {
    if include_subs {
        format!("*.{}/*", host)
    } else {
        format!("{}/*", host)
    }
}
