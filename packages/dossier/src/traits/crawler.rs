//! Crawl service contract - page discovery for a source.

use async_trait::async_trait;

use crate::error::CollabResult;
use crate::types::url::NormalizedUrl;

/// What a crawl of a source URL produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlData {
    /// How many pages the service fetched while discovering
    pub pages_crawled: u32,
    /// Page URLs found under the source, already normalized
    pub discovered_urls: Vec<NormalizedUrl>,
}

impl CrawlData {
    pub fn new(pages_crawled: u32, discovered_urls: Vec<NormalizedUrl>) -> Self {
        Self {
            pages_crawled,
            discovered_urls,
        }
    }
}

/// The external crawling/fetch service.
///
/// Treated as a black box: given a source URL and a page budget it
/// returns the pages it found, or fails. Crawl politeness, robots.txt
/// handling and fetch mechanics are its concern, not the core's.
#[async_trait]
pub trait CrawlService: Send + Sync {
    /// Discover pages under `url`, visiting at most `max_pages`.
    async fn fetch_and_discover(
        &self,
        url: &NormalizedUrl,
        max_pages: u32,
    ) -> CollabResult<CrawlData>;
}
