//! Pipeline orchestrator - the state machine between stages.
//!
//! Decides, from current ledger state alone, which jobs become
//! eligible and enqueues them:
//! - a crawl request starts CRAWL for a source
//! - CRAWL success fans out: one page + SCRAPE job per discovered URL
//! - SCRAPE success starts EXTRACT for the page and registers external
//!   links as new sources
//! - an approved EXTRACT re-evaluates the fan-in gate: once every page
//!   of the source has an approved EXTRACT, SUMMARIZE starts
//!
//! Transitions are idempotent if replayed: every "start" goes through
//! the ledger's atomic `create_job`, so a concurrent duplicate attempt
//! is rejected there, never double-enqueued. The fan-in gate is a pure
//! predicate over current ledger state, re-checked on every approval
//! rather than counting events, so late-discovered pages are never
//! missed.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::queue::{StageParams, WorkItem, WorkQueue};
use crate::traits::store::PipelineStore;
use crate::types::job::{Job, Stage, StageState, Subject};
use crate::types::outcome::{CrawlOutcome, Outcome, ScrapeOutcome};
use crate::types::url::NormalizedUrl;

/// Options for a crawl request.
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Page budget; falls back to the configured default
    pub max_pages: Option<u32>,
    /// Default prompt for EXTRACT jobs fanned out from this crawl
    pub extract_prompt: Option<String>,
    /// Default prompt for the source's SUMMARIZE job
    pub summarize_prompt: Option<String>,
}

impl CrawlOptions {
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn with_extract_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.extract_prompt = Some(prompt.into());
        self
    }

    pub fn with_summarize_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.summarize_prompt = Some(prompt.into());
        self
    }
}

/// The stage state machine, driven by ledger events.
pub struct Orchestrator<S> {
    store: Arc<S>,
    queue: Arc<dyn WorkQueue>,
    config: PipelineConfig,
}

impl<S: PipelineStore> Orchestrator<S> {
    pub fn new(store: Arc<S>, queue: Arc<dyn WorkQueue>, config: PipelineConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Handle an external crawl request: reuse or create the source,
    /// then start CRAWL. Fails with `DuplicateInFlight` while a crawl
    /// for the source is running (callers treat that as
    /// already-in-progress).
    pub async fn request_crawl(&self, url: &NormalizedUrl, options: CrawlOptions) -> Result<Job> {
        self.store.get_or_create_source(url).await?;
        if options.extract_prompt.is_some() || options.summarize_prompt.is_some() {
            self.store
                .set_source_prompts(url, options.extract_prompt, options.summarize_prompt)
                .await?;
        }

        let max_pages = options.max_pages.unwrap_or(self.config.default_max_pages);
        let job = self
            .start_stage(
                Subject::Source(url.clone()),
                Stage::Crawl,
                StageParams::Crawl { max_pages },
            )
            .await?;

        info!(source = %url, job_id = %job.id, max_pages, "crawl requested");
        Ok(job)
    }

    /// Create a ledger job for (subject, stage) and enqueue it.
    ///
    /// The ledger's conditional insert is the only concurrency
    /// control: a second in-flight attempt fails there with
    /// `DuplicateInFlight` before anything is enqueued.
    pub async fn start_stage(
        &self,
        subject: Subject,
        stage: Stage,
        params: StageParams,
    ) -> Result<Job> {
        let job = self.store.create_job(&subject, stage).await?;
        self.queue.enqueue(WorkItem {
            job_id: job.id,
            subject,
            stage,
            attempt: 1,
            params,
        })?;
        debug!(job_id = %job.id, stage = %stage, subject = %job.subject, "job enqueued");
        Ok(job)
    }

    /// Start a stage only if it has never been attempted for the
    /// subject. Used by fan-out so repeated crawls do not re-scrape
    /// pages that already ran. Returns `None` when skipped.
    async fn start_stage_if_not_started(
        &self,
        subject: Subject,
        stage: Stage,
        params: StageParams,
    ) -> Result<Option<Job>> {
        let latest = self.store.latest_job(&subject, stage).await?;
        if StageState::from_latest(latest.as_ref()) != StageState::NotStarted {
            return Ok(None);
        }

        match self.start_stage(subject, stage, params).await {
            Ok(job) => Ok(Some(job)),
            // Lost a race against a concurrent evaluation; the other
            // attempt is the one that counts.
            Err(PipelineError::DuplicateInFlight { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// React to a recorded outcome. Failures trigger nothing here -
    /// they are local to their (subject, stage) and retried by the
    /// dispatcher; approved EXTRACTs arrive via
    /// [`Orchestrator::evaluate_summarize_gate`] instead, since
    /// approval only happens through the review gate.
    pub async fn handle_outcome(&self, job: &Job) -> Result<()> {
        match &job.outcome {
            Some(Outcome::Crawl(outcome)) => self.fan_out_crawl(job, outcome).await,
            Some(Outcome::Scrape(outcome)) => self.after_scrape(job, outcome).await,
            _ => Ok(()),
        }
    }

    /// CRAWL succeeded: register each discovered URL as a page of the
    /// source and start SCRAPE for pages not yet attempted.
    async fn fan_out_crawl(&self, job: &Job, outcome: &CrawlOutcome) -> Result<()> {
        let source_url = job.subject.url();
        let mut started = 0usize;

        for page_url in &outcome.discovered_urls {
            self.store.get_or_create_page(source_url, page_url).await?;
            if self
                .start_stage_if_not_started(
                    Subject::Page(page_url.clone()),
                    Stage::Scrape,
                    StageParams::Scrape,
                )
                .await?
                .is_some()
            {
                started += 1;
            }
        }

        info!(
            source = %source_url,
            discovered = outcome.discovered_urls.len(),
            scrapes_started = started,
            "crawl fan-out complete"
        );
        Ok(())
    }

    /// SCRAPE succeeded: register external links as new sources and
    /// start EXTRACT for the page.
    async fn after_scrape(&self, job: &Job, outcome: &ScrapeOutcome) -> Result<()> {
        for link in &outcome.links.external {
            let _ = self.store.get_or_create_source(link).await?;
        }

        self.start_stage_if_not_started(
            job.subject.clone(),
            Stage::Extract,
            StageParams::Extract { prompt: None },
        )
        .await?;
        Ok(())
    }

    /// Re-evaluate the fan-in gate for a source and start SUMMARIZE
    /// when it holds. Called after every EXTRACT approval.
    pub async fn evaluate_summarize_gate(&self, source_url: &NormalizedUrl) -> Result<Option<Job>> {
        if !self.summarize_ready(source_url).await? {
            return Ok(None);
        }

        let job = self
            .start_stage_if_not_started(
                Subject::Source(source_url.clone()),
                Stage::Summarize,
                StageParams::Summarize { prompt: None },
            )
            .await?;

        if let Some(job) = &job {
            info!(source = %source_url, job_id = %job.id, "fan-in gate passed, summarize started");
        }
        Ok(job)
    }

    /// The fan-in predicate: every page of the source has a latest
    /// EXTRACT job whose outcome is approved, and there is at least
    /// one page. Pure over current ledger state.
    pub async fn summarize_ready(&self, source_url: &NormalizedUrl) -> Result<bool> {
        let pages = self.store.pages_for_source(source_url).await?;

        let mut states = Vec::with_capacity(pages.len());
        for page in &pages {
            let latest = self
                .store
                .latest_job(&Subject::Page(page.url.clone()), Stage::Extract)
                .await?;
            states.push(StageState::from_latest(latest.as_ref()));
        }
        Ok(all_pages_approved(&states))
    }

    /// Current state of a (subject, stage) pair.
    pub async fn stage_state(&self, subject: &Subject, stage: Stage) -> Result<StageState> {
        let latest = self.store.latest_job(subject, stage).await?;
        Ok(StageState::from_latest(latest.as_ref()))
    }
}

/// The gate condition over per-page EXTRACT states.
///
/// Empty page sets do not pass: summarizing a source with nothing
/// approved would feed the analyzer an empty input.
fn all_pages_approved(states: &[StageState]) -> bool {
    !states.is_empty() && states.iter().all(|s| *s == StageState::Approved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn gate_rejects_empty_page_set() {
        assert!(!all_pages_approved(&[]));
    }

    #[test]
    fn gate_passes_when_all_approved() {
        assert!(all_pages_approved(&[
            StageState::Approved,
            StageState::Approved
        ]));
    }

    #[test]
    fn gate_rejects_one_unreviewed_page() {
        assert!(!all_pages_approved(&[
            StageState::Approved,
            StageState::Unreviewed
        ]));
    }

    fn arb_state() -> impl Strategy<Value = StageState> {
        prop_oneof![
            Just(StageState::NotStarted),
            Just(StageState::InFlight),
            Just(StageState::Failed),
            Just(StageState::Succeeded),
            Just(StageState::Unreviewed),
            Just(StageState::Approved),
        ]
    }

    proptest! {
        /// Adding any non-approved page closes an open gate.
        #[test]
        fn gate_closes_on_any_non_approved_page(
            approved_count in 1usize..8,
            extra in arb_state(),
        ) {
            let mut states = vec![StageState::Approved; approved_count];
            prop_assert!(all_pages_approved(&states));

            states.push(extra);
            prop_assert_eq!(
                all_pages_approved(&states),
                extra == StageState::Approved
            );
        }

        /// The gate holds exactly when every page is approved.
        #[test]
        fn gate_is_conjunction_over_pages(states in prop::collection::vec(arb_state(), 0..12)) {
            let expected = !states.is_empty()
                && states.iter().all(|s| *s == StageState::Approved);
            prop_assert_eq!(all_pages_approved(&states), expected);
        }
    }
}
