//! Scrape service contract - content retrieval for a single page.

use async_trait::async_trait;

use crate::error::CollabResult;
use crate::types::url::NormalizedUrl;

/// Content and links fetched for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeData {
    /// Page content converted to markdown
    pub markdown: String,
    /// Links within the page's own site
    pub internal_links: Vec<NormalizedUrl>,
    /// Links to other sites
    pub external_links: Vec<NormalizedUrl>,
    /// Links to downloadable files
    pub file_links: Vec<NormalizedUrl>,
}

impl ScrapeData {
    pub fn new(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            ..Default::default()
        }
    }
}

/// The external page-fetching service.
#[async_trait]
pub trait ScrapeService: Send + Sync {
    /// Fetch one page and return its markdown content plus links.
    async fn fetch_content(&self, url: &NormalizedUrl) -> CollabResult<ScrapeData>;
}
