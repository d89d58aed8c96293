//! Storage traits for the resource registry and the job ledger.
//!
//! The storage layer is split into focused traits:
//! - [`ResourceRegistry`]: sources, pages and their discovery links
//! - [`JobLedger`]: the append-only job/outcome record
//! - [`PipelineStore`]: composite trait combining both
//!
//! Every operation is a single atomic storage transaction; the
//! orchestrator and dispatcher never hold state across calls and rely
//! on these operations for all concurrency control. In particular
//! `create_job` enforces the at-most-one-in-flight invariant with a
//! conditional insert, and `edit_and_approve` is one atomic update.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::types::job::{Job, Stage, Subject};
use crate::types::outcome::{Outcome, ReviewStatus};
use crate::types::resource::{Page, Source};
use crate::types::url::NormalizedUrl;

/// Stores sources, pages and their discovery relationships.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    /// Fetch or create the source for a URL. Idempotent: concurrent
    /// calls for the same URL must not create duplicates.
    async fn get_or_create_source(&self, url: &NormalizedUrl) -> Result<Source>;

    /// Create a source, failing with `SourceAlreadyExists` if one is
    /// registered for the URL.
    async fn create_source(&self, url: &NormalizedUrl) -> Result<Source>;

    /// Get a source by URL.
    async fn get_source(&self, url: &NormalizedUrl) -> Result<Option<Source>>;

    /// All sources, ordered by URL.
    async fn list_sources(&self) -> Result<Vec<Source>>;

    /// Set the default prompts used for this source's EXTRACT and
    /// SUMMARIZE jobs. `None` values leave the stored prompt as is.
    async fn set_source_prompts(
        &self,
        url: &NormalizedUrl,
        extract_prompt: Option<String>,
        summarize_prompt: Option<String>,
    ) -> Result<Source>;

    /// Fetch or create a page under a source. If the page URL is
    /// already registered (under any source) the existing page is
    /// returned; pages are globally unique by URL.
    async fn get_or_create_page(
        &self,
        source_url: &NormalizedUrl,
        page_url: &NormalizedUrl,
    ) -> Result<Page>;

    /// Create a page, failing with `PageAlreadyExists` if the URL is
    /// already registered.
    async fn create_page(
        &self,
        source_url: &NormalizedUrl,
        page_url: &NormalizedUrl,
    ) -> Result<Page>;

    /// Get a page by URL.
    async fn get_page(&self, url: &NormalizedUrl) -> Result<Option<Page>>;

    /// All pages owned by a source, ordered by URL.
    async fn pages_for_source(&self, source_url: &NormalizedUrl) -> Result<Vec<Page>>;

    /// Delete a source, cascading to its pages and to all jobs whose
    /// subject is the source or one of its pages. Fails with
    /// `SourceNotFound` if the source does not exist.
    async fn delete_source(&self, url: &NormalizedUrl) -> Result<()>;

    /// Delete all state. Operator-only destructive operation.
    async fn reset(&self) -> Result<()>;
}

/// The append-only record of jobs and their outcomes.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Create an in-flight job for (subject, stage).
    ///
    /// Fails with `DuplicateInFlight` if a job for the pair exists
    /// without an outcome; fails with `SourceNotFound`/`PageNotFound`
    /// if the subject is not registered. The in-flight check and the
    /// insert happen in one atomic operation.
    async fn create_job(&self, subject: &Subject, stage: Stage) -> Result<Job>;

    /// Record the outcome of a job. Fails with `AlreadyCompleted` if
    /// the job already has one. Returns the completed job.
    async fn record_outcome(&self, job_id: Uuid, outcome: Outcome) -> Result<Job>;

    /// Get a job by id.
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// The most recently created job for (subject, stage), in flight
    /// or not. This job determines the subject's stage state.
    async fn latest_job(&self, subject: &Subject, stage: Stage) -> Result<Option<Job>>;

    /// The outcome of the most recently created job that has one.
    async fn latest_outcome(&self, subject: &Subject, stage: Stage) -> Result<Option<Outcome>>;

    /// Full job history for a subject, oldest first.
    async fn jobs_for_subject(&self, subject: &Subject) -> Result<Vec<Job>>;

    /// All EXTRACT/SUMMARIZE jobs with unreviewed outcomes, oldest
    /// outcome first, across all subjects.
    async fn list_unreviewed(&self) -> Result<Vec<Job>>;

    /// Replace the summary text of an unreviewed outcome.
    ///
    /// The one controlled exception to outcome immutability. Fails
    /// with `AlreadyReviewed` once approved and `EditNotAllowed` for
    /// outcomes that carry no summary.
    async fn edit_outcome_text(&self, job_id: Uuid, summary: &str) -> Result<Job>;

    /// Set the review status of an outcome. Approving an already
    /// approved job fails with `AlreadyReviewed`.
    async fn set_review_status(&self, job_id: Uuid, status: ReviewStatus) -> Result<Job>;

    /// Set the summary text and approve, as one atomic update.
    ///
    /// Fails with `JobNotFound`, `AlreadyReviewed` (without touching
    /// the stored text), or `EditNotAllowed` for non-reviewable
    /// outcomes.
    async fn edit_and_approve(&self, job_id: Uuid, summary: &str) -> Result<Job>;
}

/// Composite storage trait the pipeline runs against.
pub trait PipelineStore: ResourceRegistry + JobLedger {}

// Blanket implementation: anything implementing both is a PipelineStore
impl<T: ResourceRegistry + JobLedger> PipelineStore for T {}

/// Shared edit-validation for store implementations: a summary may be
/// edited only while its outcome exists and is unreviewed.
pub(crate) fn check_outcome_editable(job: &Job) -> Result<()> {
    let outcome = job
        .outcome
        .as_ref()
        .ok_or_else(|| PipelineError::EditNotAllowed {
            id: job.id,
            reason: "job has no outcome yet".to_string(),
        })?;

    match outcome.review_status() {
        Some(ReviewStatus::Unreviewed) => Ok(()),
        Some(ReviewStatus::Approved) => Err(PipelineError::AlreadyReviewed { id: job.id }),
        None => Err(PipelineError::EditNotAllowed {
            id: job.id,
            reason: format!("{} outcomes carry no reviewable summary", job.stage),
        }),
    }
}
