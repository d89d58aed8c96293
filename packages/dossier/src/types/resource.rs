//! Source and Page records held by the resource registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::url::NormalizedUrl;

/// A root URL being crawled and analyzed; owns discovered pages.
///
/// Created on the first crawl request or on first discovery as an
/// external link target. Deleted only by explicit operator action,
/// which cascades to its pages and jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: NormalizedUrl,
    pub created_at: DateTime<Utc>,
    /// Default prompt for EXTRACT jobs on this source's pages
    pub extract_prompt: Option<String>,
    /// Default prompt for the source's SUMMARIZE job
    pub summarize_prompt: Option<String>,
}

impl Source {
    pub fn new(url: NormalizedUrl) -> Self {
        Self {
            url,
            created_at: Utc::now(),
            extract_prompt: None,
            summarize_prompt: None,
        }
    }
}

/// A URL discovered under a source; the unit of scrape/extract.
///
/// Globally unique by URL, owned by the source that discovered it
/// first. Identity is immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub url: NormalizedUrl,
    /// The source that discovered this page
    pub source_url: NormalizedUrl,
    pub created_at: DateTime<Utc>,
}

impl Page {
    pub fn new(url: NormalizedUrl, source_url: NormalizedUrl) -> Self {
        Self {
            url,
            source_url,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_remembers_its_owner() {
        let source = NormalizedUrl::new("https://a.test").unwrap();
        let page = Page::new(NormalizedUrl::new("https://a.test/p1").unwrap(), source.clone());
        assert_eq!(page.source_url, source);
    }
}
