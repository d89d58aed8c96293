//! Content-understanding contract - the LLM-backed analysis step.
//!
//! One trait, two operations: per-page extraction and whole-source
//! summarization. Implementations wrap a specific model provider and
//! own prompting and response parsing; the core only sees structured
//! fields plus token counts.

use async_trait::async_trait;

use crate::error::CollabResult;
use crate::types::outcome::{
    DataOrigin, DatasetPresence, FocusArea, RelevantLinks, Relevancy, SourceFormat, TokenUsage,
};
use crate::types::url::NormalizedUrl;

/// Structured analysis of one page's markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageAnalysis {
    pub summary: String,
    pub key_facts: String,
    pub key_quotes: String,
    pub key_figures: String,
    pub trustworthiness: String,
    pub relevancy: Relevancy,
    pub relevant_links: RelevantLinks,
    pub usage: TokenUsage,
    /// The prompt the analyzer used, without the page content
    pub prompt: String,
    pub model: String,
}

/// Structured analysis of a whole source's combined page summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAnalysis {
    pub summary: String,
    pub key_facts: String,
    pub key_quotes: String,
    pub key_figures: String,
    pub data_origin: DataOrigin,
    pub source_format: SourceFormat,
    pub focus_area: FocusArea,
    pub dataset_presence: DatasetPresence,
    pub usage: TokenUsage,
    pub prompt: String,
    pub model: String,
}

/// The external content-understanding engine.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze one page's markdown.
    ///
    /// `prompt` overrides the default extraction prompt when given.
    async fn extract_page(
        &self,
        url: &NormalizedUrl,
        markdown: &str,
        prompt: Option<&str>,
    ) -> CollabResult<PageAnalysis>;

    /// Analyze the concatenated, approved page summaries of a source.
    async fn summarize_source(
        &self,
        url: &NormalizedUrl,
        combined_summaries: &str,
        prompt: Option<&str>,
    ) -> CollabResult<SourceAnalysis>;
}
