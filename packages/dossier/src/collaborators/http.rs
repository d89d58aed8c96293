//! HTTP-based reference collaborators.
//!
//! [`HttpScraper`] fetches a single page and converts it to markdown;
//! [`HttpCrawler`] discovers pages breadth-first under a source URL.
//! Both are basic implementations suitable for simple websites; for
//! JavaScript-heavy sites plug in a headless-browser service behind
//! the same traits.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CollabResult, CollaboratorError};
use crate::traits::crawler::{CrawlData, CrawlService};
use crate::traits::scraper::{ScrapeData, ScrapeService};
use crate::types::url::NormalizedUrl;

/// HTTP scraper that fetches a page and converts it to markdown.
pub struct HttpScraper {
    client: reqwest::Client,
    user_agent: String,
}

impl Default for HttpScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpScraper {
    /// Create a new HTTP scraper with default settings.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to create HTTP client"),
            user_agent: "DossierBot/1.0".to_string(),
        }
    }

    /// Set a custom user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set a custom HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Fetch a URL and return the raw HTML plus the final URL after
    /// redirects.
    async fn fetch_html(&self, url: &NormalizedUrl) -> CollabResult<(String, Url)> {
        debug!(url = %url, "HTTP fetch starting");
        let response = self
            .client
            .get(url.as_str())
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_client_error() {
            // Permanent: retrying a 4xx will not change the answer
            return Err(CollaboratorError::Permanent(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(CollaboratorError::Transient(format!("HTTP {status}")));
        }

        let final_url = response.url().clone();
        let html = response.text().await.map_err(map_reqwest_error)?;
        Ok((html, final_url))
    }
}

#[async_trait]
impl ScrapeService for HttpScraper {
    async fn fetch_content(&self, url: &NormalizedUrl) -> CollabResult<ScrapeData> {
        let (html, final_url) = self.fetch_html(url).await?;

        let markdown = html_to_markdown(&html);
        let links = extract_links(&final_url, &html);
        let (internal_links, external_links, file_links) = partition_links(&final_url, links);

        debug!(
            url = %url,
            content_length = markdown.len(),
            internal = internal_links.len(),
            external = external_links.len(),
            files = file_links.len(),
            "page scraped"
        );

        Ok(ScrapeData {
            markdown,
            internal_links,
            external_links,
            file_links,
        })
    }
}

/// HTTP crawler that discovers pages breadth-first under a source.
pub struct HttpCrawler {
    scraper: HttpScraper,
    /// Delay between fetches, politeness toward the crawled site
    rate_limit: Duration,
}

impl Default for HttpCrawler {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpCrawler {
    /// Create a new crawler with default settings.
    pub fn new() -> Self {
        Self {
            scraper: HttpScraper::new(),
            rate_limit: Duration::from_millis(100),
        }
    }

    /// Use a pre-configured scraper for fetching.
    pub fn with_scraper(mut self, scraper: HttpScraper) -> Self {
        self.scraper = scraper;
        self
    }

    /// Set the delay between fetches.
    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

#[async_trait]
impl CrawlService for HttpCrawler {
    async fn fetch_and_discover(
        &self,
        url: &NormalizedUrl,
        max_pages: u32,
    ) -> CollabResult<CrawlData> {
        info!(url = %url, max_pages, "HTTP crawl starting");

        let mut visited: HashSet<NormalizedUrl> = HashSet::new();
        let mut discovered: Vec<NormalizedUrl> = Vec::new();
        let mut queue: VecDeque<NormalizedUrl> = VecDeque::new();
        let mut pages_crawled = 0u32;

        queue.push_back(url.clone());

        while let Some(current) = queue.pop_front() {
            if pages_crawled >= max_pages {
                break;
            }
            if !visited.insert(current.clone()) {
                continue;
            }

            let result = self.scraper.fetch_html(&current).await;
            let (html, final_url) = match result {
                Ok(fetched) => fetched,
                Err(e) => {
                    // The root failing fails the crawl; later pages
                    // are skipped with a warning.
                    if pages_crawled == 0 && discovered.is_empty() {
                        return Err(e);
                    }
                    warn!(url = %current, error = %e, "failed to fetch page during crawl");
                    continue;
                }
            };
            pages_crawled += 1;

            let links = extract_links(&final_url, &html);
            let (internal, _external, _files) = partition_links(&final_url, links);
            for link in internal {
                if link != *url && !visited.contains(&link) && !discovered.contains(&link) {
                    discovered.push(link.clone());
                    queue.push_back(link);
                }
            }

            if !self.rate_limit.is_zero() {
                tokio::time::sleep(self.rate_limit).await;
            }
        }

        info!(
            url = %url,
            pages_crawled,
            discovered = discovered.len(),
            "HTTP crawl completed"
        );

        Ok(CrawlData {
            pages_crawled,
            discovered_urls: discovered,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        CollaboratorError::Transient(err.to_string())
    } else {
        CollaboratorError::Permanent(err.to_string())
    }
}

/// Extract href targets from HTML, resolved against the base URL.
fn extract_links(base_url: &Url, html: &str) -> Vec<String> {
    let href_pattern = regex::Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).unwrap();

    let mut links = Vec::new();
    for cap in href_pattern.captures_iter(html) {
        if let Some(href) = cap.get(1) {
            let href = href.as_str();

            // Skip anchors, javascript, mailto
            if href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
            {
                continue;
            }

            if let Ok(resolved) = base_url.join(href) {
                links.push(resolved.to_string());
            }
        }
    }
    links
}

/// Partition resolved links into internal pages, external pages and
/// file downloads, dropping anything that fails normalization.
fn partition_links(
    base_url: &Url,
    links: Vec<String>,
) -> (Vec<NormalizedUrl>, Vec<NormalizedUrl>, Vec<NormalizedUrl>) {
    let base_host = base_url.host_str().unwrap_or("");

    let mut internal = Vec::new();
    let mut external = Vec::new();
    let mut files = Vec::new();
    let mut seen = HashSet::new();

    for link in links {
        let Some(normalized) = NormalizedUrl::try_new(&link) else {
            continue;
        };
        if !seen.insert(normalized.clone()) {
            continue;
        }

        if normalized.is_file() {
            files.push(normalized);
        } else if normalized.host().as_deref() == Some(base_host) {
            internal.push(normalized);
        } else {
            external.push(normalized);
        }
    }
    (internal, external, files)
}

/// Convert HTML to markdown (simplified).
fn html_to_markdown(html: &str) -> String {
    let mut text = html.to_string();

    // Remove scripts and styles
    let script_pattern = regex::Regex::new(r"(?s)<script[^>]*>.*?</script>").unwrap();
    let style_pattern = regex::Regex::new(r"(?s)<style[^>]*>.*?</style>").unwrap();
    text = script_pattern.replace_all(&text, "").to_string();
    text = style_pattern.replace_all(&text, "").to_string();

    // Convert headers
    let h1_pattern = regex::Regex::new(r"<h1[^>]*>(.*?)</h1>").unwrap();
    let h2_pattern = regex::Regex::new(r"<h2[^>]*>(.*?)</h2>").unwrap();
    let h3_pattern = regex::Regex::new(r"<h3[^>]*>(.*?)</h3>").unwrap();
    text = h1_pattern.replace_all(&text, "# $1\n").to_string();
    text = h2_pattern.replace_all(&text, "## $1\n").to_string();
    text = h3_pattern.replace_all(&text, "### $1\n").to_string();

    // Convert paragraphs and line breaks
    let p_pattern = regex::Regex::new(r"<p[^>]*>(.*?)</p>").unwrap();
    let br_pattern = regex::Regex::new(r"<br\s*/?>").unwrap();
    text = p_pattern.replace_all(&text, "$1\n\n").to_string();
    text = br_pattern.replace_all(&text, "\n").to_string();

    // Convert links
    let link_pattern =
        regex::Regex::new(r#"<a[^>]*href=["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap();
    text = link_pattern.replace_all(&text, "[$2]($1)").to_string();

    // Convert lists
    let li_pattern = regex::Regex::new(r"<li[^>]*>(.*?)</li>").unwrap();
    text = li_pattern.replace_all(&text, "- $1\n").to_string();

    // Remove remaining tags
    let tag_pattern = regex::Regex::new(r"<[^>]+>").unwrap();
    text = tag_pattern.replace_all(&text, "").to_string();

    // Clean up whitespace
    let multi_newline = regex::Regex::new(r"\n{3,}").unwrap();
    text = multi_newline.replace_all(&text, "\n\n").to_string();

    // Decode HTML entities
    text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_links() {
        let base_url = Url::parse("https://example.com/page").unwrap();

        let html = r##"
            <a href="/about">About</a>
            <a href="https://example.com/contact">Contact</a>
            <a href="#section">Anchor</a>
            <a href="javascript:void(0)">JS</a>
        "##;

        let links = extract_links(&base_url, html);

        assert!(links.contains(&"https://example.com/about".to_string()));
        assert!(links.contains(&"https://example.com/contact".to_string()));
        assert!(!links.iter().any(|l| l.contains('#')));
        assert!(!links.iter().any(|l| l.contains("javascript")));
    }

    #[test]
    fn test_partition_links() {
        let base_url = Url::parse("https://example.com").unwrap();
        let links = vec![
            "https://example.com/about".to_string(),
            "https://other.com/page".to_string(),
            "https://example.com/report.pdf".to_string(),
            "http://insecure.com/page".to_string(),
        ];

        let (internal, external, files) = partition_links(&base_url, links);

        assert_eq!(internal.len(), 1);
        assert_eq!(external.len(), 1);
        assert_eq!(files.len(), 1);
        assert_eq!(internal[0].as_str(), "https://example.com/about");
    }

    #[test]
    fn test_html_to_markdown() {
        let html = r#"
            <h1>Title</h1>
            <p>Paragraph text.</p>
            <a href="https://example.com">Link</a>
        "#;

        let md = html_to_markdown(html);

        assert!(md.contains("# Title"));
        assert!(md.contains("Paragraph text."));
        assert!(md.contains("[Link](https://example.com)"));
    }
}
