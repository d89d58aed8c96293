//! Outcome types - the typed results of completed jobs.
//!
//! An [`Outcome`] is a tagged union with one variant per pipeline stage
//! plus a generic [`JobError`] variant for stage failures. Variants are
//! discriminated by tag, never by probing field presence. Outcomes are
//! immutable once recorded, with one controlled exception: the summary
//! text of an unreviewed EXTRACT/SUMMARIZE outcome may be edited in
//! place before approval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::url::NormalizedUrl;

/// Review state of a judgment-laden outcome.
///
/// Only EXTRACT and SUMMARIZE outcomes carry a review status; CRAWL and
/// SCRAPE results are mechanical and need no human approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReviewStatus {
    #[default]
    Unreviewed,
    Approved,
}

/// Token counts reported by the content-understanding engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Combined input and output count.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// How relevant a page is to the research focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relevancy {
    High,
    Medium,
    Low,
    NotRelevant,
}

/// Who produced the source material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataOrigin {
    Academic,
    Government,
    News,
    Blog,
    NonProfit,
}

/// The document form of the source material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    ResearchPaper,
    Article,
    DataRepository,
    HistoricalInfo,
    Policy,
    Law,
    Narrative,
    DataVisualization,
    Letter,
    GovernmentSource,
}

/// The subject domain the source focuses on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusArea {
    NonHumanAnimals,
    Humans,
    Environment,
    Community,
    Business,
}

/// Whether the source exposes an underlying dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetPresence {
    Present,
    Absent,
}

/// Links found in page content, partitioned by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevantLinks {
    /// Links within the same site
    pub internal: Vec<NormalizedUrl>,
    /// Links to other sites
    pub external: Vec<NormalizedUrl>,
    /// Links to downloadable files (PDFs etc.)
    pub files: Vec<NormalizedUrl>,
}

impl RelevantLinks {
    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty() && self.files.is_empty()
    }
}

/// Result of a CRAWL job: page discovery for a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlOutcome {
    /// Pages the crawl service actually fetched
    pub pages_crawled: u32,
    /// Distinct page URLs found, fetched or not
    pub total_pages_found: u32,
    /// The page limit the crawl ran under
    pub max_pages_limit: u32,
    /// Discovered page URLs, already normalized
    pub discovered_urls: Vec<NormalizedUrl>,
    pub created_at: DateTime<Utc>,
}

/// Result of a SCRAPE job: page content as markdown plus its links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub markdown: String,
    /// SHA-256 of the markdown, for change detection on re-scrapes
    pub content_hash: String,
    pub links: RelevantLinks,
    pub created_at: DateTime<Utc>,
}

impl ScrapeOutcome {
    /// Build a scrape outcome, hashing the content.
    pub fn new(markdown: impl Into<String>, links: RelevantLinks) -> Self {
        let markdown = markdown.into();
        let content_hash = Self::hash_content(&markdown);
        Self {
            markdown,
            content_hash,
            links,
            created_at: Utc::now(),
        }
    }

    /// Calculate SHA-256 hash of content.
    pub fn hash_content(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Check if content has changed by comparing hashes.
    pub fn content_changed(&self, new_content: &str) -> bool {
        Self::hash_content(new_content) != self.content_hash
    }
}

/// Result of an EXTRACT job: structured analysis of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOutcome {
    pub summary: String,
    pub key_facts: String,
    pub key_quotes: String,
    pub key_figures: String,
    pub trustworthiness: String,
    pub relevancy: Relevancy,
    pub relevant_links: RelevantLinks,
    pub usage: TokenUsage,
    /// The prompt actually sent, without the page content
    pub prompt: String,
    pub model: String,
    pub review: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

/// Result of a SUMMARIZE job: structured analysis of a whole source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizeOutcome {
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
    pub review: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

/// Whether a recorded failure was worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Transient error - a retry attempt may have followed
    Retryable,
    /// Permanent error - no retry was attempted
    NonRetryable,
}

/// A stage failure recorded as a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    pub kind: FailureKind,
    pub created_at: DateTime<Utc>,
}

impl JobError {
    pub fn new(message: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            message: message.into(),
            kind,
            created_at: Utc::now(),
        }
    }
}

/// The typed result of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Outcome {
    Crawl(CrawlOutcome),
    Scrape(ScrapeOutcome),
    Extract(ExtractOutcome),
    Summarize(SummarizeOutcome),
    Error(JobError),
}

impl Outcome {
    /// When the outcome was recorded.
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Outcome::Crawl(o) => o.created_at,
            Outcome::Scrape(o) => o.created_at,
            Outcome::Extract(o) => o.created_at,
            Outcome::Summarize(o) => o.created_at,
            Outcome::Error(o) => o.created_at,
        }
    }

    /// Whether this outcome records a stage failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    /// Review status, for the outcome kinds that carry one.
    pub fn review_status(&self) -> Option<ReviewStatus> {
        match self {
            Outcome::Extract(o) => Some(o.review),
            Outcome::Summarize(o) => Some(o.review),
            _ => None,
        }
    }

    /// The editable summary text, for the outcome kinds that carry one.
    pub fn summary_text(&self) -> Option<&str> {
        match self {
            Outcome::Extract(o) => Some(&o.summary),
            Outcome::Summarize(o) => Some(&o.summary),
            _ => None,
        }
    }

    /// Replace the summary text. Returns false for outcome kinds
    /// without one; the caller enforces the review-state rules.
    pub(crate) fn set_summary_text(&mut self, summary: &str) -> bool {
        match self {
            Outcome::Extract(o) => {
                o.summary = summary.to_string();
                true
            }
            Outcome::Summarize(o) => {
                o.summary = summary.to_string();
                true
            }
            _ => false,
        }
    }

    /// Flip the review status. Returns false for outcome kinds
    /// without one.
    pub(crate) fn set_review_status(&mut self, status: ReviewStatus) -> bool {
        match self {
            Outcome::Extract(o) => {
                o.review = status;
                true
            }
            Outcome::Summarize(o) => {
                o.review = status;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrape_outcome_hashes_content() {
        let outcome = ScrapeOutcome::new("# Heading", RelevantLinks::default());
        assert!(!outcome.content_hash.is_empty());
        assert!(!outcome.content_changed("# Heading"));
        assert!(outcome.content_changed("# Other"));
    }

    #[test]
    fn review_status_only_on_llm_outcomes() {
        let scrape = Outcome::Scrape(ScrapeOutcome::new("x", RelevantLinks::default()));
        assert_eq!(scrape.review_status(), None);

        let error = Outcome::Error(JobError::new("boom", FailureKind::Retryable));
        assert!(error.is_error());
        assert_eq!(error.review_status(), None);
        assert_eq!(error.summary_text(), None);
    }

    #[test]
    fn token_usage_totals() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn outcome_serializes_with_stage_tag() {
        let outcome = Outcome::Error(JobError::new("timeout", FailureKind::Retryable));
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains(r#""stage":"error""#));
    }
}
