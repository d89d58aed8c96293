//! Testing utilities including mock collaborator implementations.
//!
//! These are useful for testing applications that embed the pipeline
//! without making real network or model calls. All mocks return
//! deterministic, configurable responses and record their calls for
//! assertions. Failures can be scripted per URL, either permanently or
//! for the first N calls (to exercise the retry policy).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{CollabResult, CollaboratorError};
use crate::traits::analyzer::{Analyzer, PageAnalysis, SourceAnalysis};
use crate::traits::crawler::{CrawlData, CrawlService};
use crate::traits::scraper::{ScrapeData, ScrapeService};
use crate::types::outcome::{
    DataOrigin, DatasetPresence, FocusArea, RelevantLinks, Relevancy, SourceFormat, TokenUsage,
};
use crate::types::url::NormalizedUrl;

/// A scripted failure: fail `remaining` calls, then fall through to
/// the configured success response.
#[derive(Debug, Clone)]
struct FailureScript {
    remaining: u32,
    error: CollaboratorError,
}

impl FailureScript {
    fn always(error: CollaboratorError) -> Self {
        Self {
            remaining: u32::MAX,
            error,
        }
    }

    fn times(remaining: u32, error: CollaboratorError) -> Self {
        Self { remaining, error }
    }
}

/// Take the next scripted failure for a key, if any remain.
fn next_failure(
    failures: &RwLock<HashMap<String, FailureScript>>,
    key: &str,
) -> Option<CollaboratorError> {
    let mut failures = failures.write().unwrap();
    let script = failures.get_mut(key)?;
    if script.remaining == 0 {
        return None;
    }
    if script.remaining != u32::MAX {
        script.remaining -= 1;
    }
    Some(script.error.clone())
}

// ----------------------------------------------------------------------
// MockCrawlService
// ----------------------------------------------------------------------

/// Record of a call made to the mock crawl service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlCall {
    pub url: String,
    pub max_pages: u32,
}

/// A mock crawl service with scripted discovery results.
#[derive(Default)]
pub struct MockCrawlService {
    results: RwLock<HashMap<String, CrawlData>>,
    failures: RwLock<HashMap<String, FailureScript>>,
    calls: RwLock<Vec<CrawlCall>>,
}

impl MockCrawlService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the page URLs discovered for a source URL.
    pub fn with_discovered<I, T>(self, url: impl Into<String>, discovered: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let discovered_urls = NormalizedUrl::from_string_list(discovered);
        let data = CrawlData::new(discovered_urls.len() as u32, discovered_urls);
        self.results.write().unwrap().insert(url.into(), data);
        self
    }

    /// Script a full crawl result for a source URL.
    pub fn with_result(self, url: impl Into<String>, data: CrawlData) -> Self {
        self.results.write().unwrap().insert(url.into(), data);
        self
    }

    /// Make every crawl of a URL fail.
    pub fn with_failure(self, url: impl Into<String>, error: CollaboratorError) -> Self {
        self.failures
            .write()
            .unwrap()
            .insert(url.into(), FailureScript::always(error));
        self
    }

    /// Make the first `times` crawls of a URL fail, then succeed.
    pub fn with_failures(self, url: impl Into<String>, times: u32, error: CollaboratorError) -> Self {
        self.failures
            .write()
            .unwrap()
            .insert(url.into(), FailureScript::times(times, error));
        self
    }

    /// Calls made so far.
    pub fn calls(&self) -> Vec<CrawlCall> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl CrawlService for MockCrawlService {
    async fn fetch_and_discover(
        &self,
        url: &NormalizedUrl,
        max_pages: u32,
    ) -> CollabResult<CrawlData> {
        self.calls.write().unwrap().push(CrawlCall {
            url: url.to_string(),
            max_pages,
        });

        if let Some(error) = next_failure(&self.failures, url.as_str()) {
            return Err(error);
        }

        Ok(self
            .results
            .read()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .unwrap_or_default())
    }
}

// ----------------------------------------------------------------------
// MockScrapeService
// ----------------------------------------------------------------------

/// A mock scrape service with scripted page content.
#[derive(Default)]
pub struct MockScrapeService {
    results: RwLock<HashMap<String, ScrapeData>>,
    failures: RwLock<HashMap<String, FailureScript>>,
    calls: RwLock<Vec<String>>,
}

impl MockScrapeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the markdown returned for a page URL.
    pub fn with_markdown(self, url: impl Into<String>, markdown: impl Into<String>) -> Self {
        self.results
            .write()
            .unwrap()
            .insert(url.into(), ScrapeData::new(markdown));
        self
    }

    /// Script a full scrape result for a page URL.
    pub fn with_result(self, url: impl Into<String>, data: ScrapeData) -> Self {
        self.results.write().unwrap().insert(url.into(), data);
        self
    }

    /// Make every scrape of a URL fail.
    pub fn with_failure(self, url: impl Into<String>, error: CollaboratorError) -> Self {
        self.failures
            .write()
            .unwrap()
            .insert(url.into(), FailureScript::always(error));
        self
    }

    /// Make the first `times` scrapes of a URL fail, then succeed.
    pub fn with_failures(self, url: impl Into<String>, times: u32, error: CollaboratorError) -> Self {
        self.failures
            .write()
            .unwrap()
            .insert(url.into(), FailureScript::times(times, error));
        self
    }

    /// URLs scraped so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl ScrapeService for MockScrapeService {
    async fn fetch_content(&self, url: &NormalizedUrl) -> CollabResult<ScrapeData> {
        self.calls.write().unwrap().push(url.to_string());

        if let Some(error) = next_failure(&self.failures, url.as_str()) {
            return Err(error);
        }

        Ok(self
            .results
            .read()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| ScrapeData::new(format!("# {url}\n\nStub content for {url}."))))
    }
}

// ----------------------------------------------------------------------
// MockAnalyzer
// ----------------------------------------------------------------------

/// Record of a call made to the mock analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerCall {
    Extract {
        url: String,
        markdown: String,
        prompt: Option<String>,
    },
    Summarize {
        url: String,
        input: String,
        prompt: Option<String>,
    },
}

/// A mock content-understanding engine.
#[derive(Default)]
pub struct MockAnalyzer {
    page_analyses: RwLock<HashMap<String, PageAnalysis>>,
    source_analyses: RwLock<HashMap<String, SourceAnalysis>>,
    extract_failures: RwLock<HashMap<String, FailureScript>>,
    summarize_failures: RwLock<HashMap<String, FailureScript>>,
    calls: RwLock<Vec<AnalyzerCall>>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the extraction returned for a page URL.
    pub fn with_page_analysis(self, url: impl Into<String>, analysis: PageAnalysis) -> Self {
        self.page_analyses
            .write()
            .unwrap()
            .insert(url.into(), analysis);
        self
    }

    /// Script the per-page summary text for a URL, keeping the other
    /// default fields.
    pub fn with_page_summary(self, url: impl Into<String>, summary: impl Into<String>) -> Self {
        let url = url.into();
        let mut analysis = default_page_analysis(&url, None);
        analysis.summary = summary.into();
        self.with_page_analysis(url, analysis)
    }

    /// Script the source analysis returned for a source URL.
    pub fn with_source_analysis(self, url: impl Into<String>, analysis: SourceAnalysis) -> Self {
        self.source_analyses
            .write()
            .unwrap()
            .insert(url.into(), analysis);
        self
    }

    /// Make every extraction for a page URL fail.
    pub fn with_extract_failure(self, url: impl Into<String>, error: CollaboratorError) -> Self {
        self.extract_failures
            .write()
            .unwrap()
            .insert(url.into(), FailureScript::always(error));
        self
    }

    /// Make the first `times` extractions for a URL fail, then succeed.
    pub fn with_extract_failures(
        self,
        url: impl Into<String>,
        times: u32,
        error: CollaboratorError,
    ) -> Self {
        self.extract_failures
            .write()
            .unwrap()
            .insert(url.into(), FailureScript::times(times, error));
        self
    }

    /// Make every summarization for a source URL fail.
    pub fn with_summarize_failure(self, url: impl Into<String>, error: CollaboratorError) -> Self {
        self.summarize_failures
            .write()
            .unwrap()
            .insert(url.into(), FailureScript::always(error));
        self
    }

    /// Calls made so far.
    pub fn calls(&self) -> Vec<AnalyzerCall> {
        self.calls.read().unwrap().clone()
    }

    /// The inputs of all summarize calls, in order.
    pub fn summarize_inputs(&self) -> Vec<String> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                AnalyzerCall::Summarize { input, .. } => Some(input.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn extract_page(
        &self,
        url: &NormalizedUrl,
        markdown: &str,
        prompt: Option<&str>,
    ) -> CollabResult<PageAnalysis> {
        self.calls.write().unwrap().push(AnalyzerCall::Extract {
            url: url.to_string(),
            markdown: markdown.to_string(),
            prompt: prompt.map(str::to_string),
        });

        if let Some(error) = next_failure(&self.extract_failures, url.as_str()) {
            return Err(error);
        }

        Ok(self
            .page_analyses
            .read()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| default_page_analysis(url.as_str(), prompt)))
    }

    async fn summarize_source(
        &self,
        url: &NormalizedUrl,
        combined_summaries: &str,
        prompt: Option<&str>,
    ) -> CollabResult<SourceAnalysis> {
        self.calls.write().unwrap().push(AnalyzerCall::Summarize {
            url: url.to_string(),
            input: combined_summaries.to_string(),
            prompt: prompt.map(str::to_string),
        });

        if let Some(error) = next_failure(&self.summarize_failures, url.as_str()) {
            return Err(error);
        }

        Ok(self
            .source_analyses
            .read()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| default_source_analysis(url.as_str(), prompt)))
    }
}

fn default_page_analysis(url: &str, prompt: Option<&str>) -> PageAnalysis {
    PageAnalysis {
        summary: format!("Summary of {url}"),
        key_facts: "No relevant information found".to_string(),
        key_quotes: "No relevant information found".to_string(),
        key_figures: "No relevant information found".to_string(),
        trustworthiness: "Unverified".to_string(),
        relevancy: Relevancy::Medium,
        relevant_links: RelevantLinks::default(),
        usage: TokenUsage::new(120, 40),
        prompt: prompt.unwrap_or("default extraction prompt").to_string(),
        model: "mock-analyzer".to_string(),
    }
}

fn default_source_analysis(url: &str, prompt: Option<&str>) -> SourceAnalysis {
    SourceAnalysis {
        summary: format!("Overview of {url}"),
        key_facts: "No relevant information found".to_string(),
        key_quotes: "No relevant information found".to_string(),
        key_figures: "No relevant information found".to_string(),
        data_origin: DataOrigin::News,
        source_format: SourceFormat::Article,
        focus_area: FocusArea::Community,
        dataset_presence: DatasetPresence::Absent,
        usage: TokenUsage::new(300, 80),
        prompt: prompt.unwrap_or("default summarize prompt").to_string(),
        model: "mock-analyzer".to_string(),
    }
}
