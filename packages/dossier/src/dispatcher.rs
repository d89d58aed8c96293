//! Task dispatcher - a bounded worker pool over the work queue.
//!
//! Workers pull queued jobs, resolve the stage's input from current
//! ledger state, invoke the collaborator under a timeout, and record
//! the resulting outcome. The dispatcher owns the retry policy:
//! transient failures are re-attempted as new jobs with exponential
//! backoff up to a bounded count; permanent failures are recorded as
//! terminal Error outcomes immediately.
//!
//! ```text
//! worker loop
//!     │
//!     ├─► queue.dequeue()
//!     ├─► resolve input (ledger reads)
//!     ├─► collaborator call (timeout-guarded, only blocking I/O)
//!     ├─► record_outcome
//!     │       └─► Orchestrator.handle_outcome (fan-out / next stage)
//!     └─► on transient failure: new job + backoff re-enqueue
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{CollabResult, CollaboratorError, PipelineError};
use crate::orchestrator::Orchestrator;
use crate::queue::{StageParams, WorkItem, WorkQueue};
use crate::traits::analyzer::Analyzer;
use crate::traits::crawler::CrawlService;
use crate::traits::scraper::ScrapeService;
use crate::traits::store::PipelineStore;
use crate::types::job::{Stage, Subject};
use crate::types::outcome::{
    CrawlOutcome, ExtractOutcome, FailureKind, JobError, Outcome, RelevantLinks, ReviewStatus,
    ScrapeOutcome, SummarizeOutcome,
};
use crate::types::url::NormalizedUrl;

/// The external services a pipeline runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub crawler: Arc<dyn CrawlService>,
    pub scraper: Arc<dyn ScrapeService>,
    pub analyzer: Arc<dyn Analyzer>,
}

impl Collaborators {
    pub fn new(
        crawler: Arc<dyn CrawlService>,
        scraper: Arc<dyn ScrapeService>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            crawler,
            scraper,
            analyzer,
        }
    }
}

/// Executes queued jobs against the collaborators.
pub struct Dispatcher<S> {
    store: Arc<S>,
    queue: Arc<dyn WorkQueue>,
    collaborators: Collaborators,
    orchestrator: Arc<Orchestrator<S>>,
    config: PipelineConfig,
}

impl<S: PipelineStore + 'static> Dispatcher<S> {
    pub fn new(
        store: Arc<S>,
        queue: Arc<dyn WorkQueue>,
        collaborators: Collaborators,
        orchestrator: Arc<Orchestrator<S>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            collaborators,
            orchestrator,
            config,
        }
    }

    /// Spawn the configured number of workers. They run until the
    /// token is cancelled or the queue is closed and drained.
    pub fn spawn_workers(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker| {
                let dispatcher = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { dispatcher.worker_loop(worker, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize, shutdown: CancellationToken) {
        info!(worker, "pipeline worker starting");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                item = self.queue.dequeue() => match item {
                    Some(item) => self.execute(item).await,
                    None => break,
                }
            }
        }
        info!(worker, "pipeline worker stopped");
    }

    /// Process queued jobs inline until the queue is empty.
    ///
    /// Completions enqueue follow-up stages, which are picked up in
    /// the same pass, so one call runs the pipeline as far as it can
    /// go without human approval. With a zero backoff base retries run
    /// inline too; with a non-zero base they re-enqueue after their
    /// delay and need a later call.
    pub async fn drain(&self) {
        while let Some(item) = self.queue.try_dequeue() {
            self.execute(item).await;
        }
    }

    async fn execute(&self, item: WorkItem) {
        debug!(
            job_id = %item.job_id,
            stage = %item.stage,
            subject = %item.subject,
            attempt = item.attempt,
            "executing job"
        );

        match self.run_stage(&item).await {
            Ok(outcome) => self.finish(&item, outcome).await,
            Err(err) => {
                let kind = if err.is_transient() {
                    FailureKind::Retryable
                } else {
                    FailureKind::NonRetryable
                };
                warn!(
                    job_id = %item.job_id,
                    stage = %item.stage,
                    error = %err,
                    "job failed"
                );
                self.finish(&item, Outcome::Error(JobError::new(err.message(), kind)))
                    .await;

                if err.is_transient() && item.attempt < self.config.max_attempts {
                    self.schedule_retry(&item).await;
                }
            }
        }
    }

    /// Record the outcome and let the orchestrator react to it.
    async fn finish(&self, item: &WorkItem, outcome: Outcome) {
        match self.store.record_outcome(item.job_id, outcome).await {
            Ok(job) => {
                debug!(job_id = %item.job_id, stage = %item.stage, "outcome recorded");
                if let Err(e) = self.orchestrator.handle_outcome(&job).await {
                    error!(job_id = %item.job_id, error = %e, "stage transition failed");
                }
            }
            // The subject may have been deleted while the job ran;
            // nothing to do but log.
            Err(e) => warn!(job_id = %item.job_id, error = %e, "failed to record outcome"),
        }
    }

    /// Create the retry job and re-enqueue, after the backoff delay.
    async fn schedule_retry(&self, item: &WorkItem) {
        let next_attempt = item.attempt + 1;
        let delay = self.config.retry_delay(item.attempt);
        warn!(
            job_id = %item.job_id,
            stage = %item.stage,
            attempt = item.attempt,
            next_attempt,
            delay_ms = delay.as_millis() as u64,
            "transient failure, retrying"
        );

        if delay.is_zero() {
            retry_attempt(&*self.store, &*self.queue, item, next_attempt).await;
        } else {
            let store = Arc::clone(&self.store);
            let queue = Arc::clone(&self.queue);
            let item = item.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                retry_attempt(&*store, &*queue, &item, next_attempt).await;
            });
        }
    }

    /// Resolve the job's input from ledger state and invoke the
    /// stage's collaborator. Resolution failures are permanent: the
    /// input will not appear by retrying.
    async fn run_stage(&self, item: &WorkItem) -> CollabResult<Outcome> {
        let url = item.subject.url();
        match (item.stage, &item.params) {
            (Stage::Crawl, StageParams::Crawl { max_pages }) => {
                self.run_crawl(url, *max_pages).await
            }
            (Stage::Scrape, _) => self.run_scrape(url).await,
            (Stage::Extract, StageParams::Extract { prompt }) => {
                self.run_extract(url, prompt.as_deref()).await
            }
            (Stage::Summarize, StageParams::Summarize { prompt }) => {
                self.run_summarize(url, prompt.as_deref()).await
            }
            (stage, params) => Err(CollaboratorError::Permanent(format!(
                "{stage} job queued with mismatched parameters {params:?}"
            ))),
        }
    }

    async fn run_crawl(&self, url: &NormalizedUrl, max_pages: u32) -> CollabResult<Outcome> {
        let data = self
            .with_timeout(self.collaborators.crawler.fetch_and_discover(url, max_pages))
            .await?;

        Ok(Outcome::Crawl(CrawlOutcome {
            pages_crawled: data.pages_crawled,
            total_pages_found: data.discovered_urls.len() as u32,
            max_pages_limit: max_pages,
            discovered_urls: data.discovered_urls,
            created_at: Utc::now(),
        }))
    }

    async fn run_scrape(&self, url: &NormalizedUrl) -> CollabResult<Outcome> {
        let data = self
            .with_timeout(self.collaborators.scraper.fetch_content(url))
            .await?;

        Ok(Outcome::Scrape(ScrapeOutcome::new(
            data.markdown,
            RelevantLinks {
                internal: data.internal_links,
                external: data.external_links,
                files: data.file_links,
            },
        )))
    }

    async fn run_extract(
        &self,
        url: &NormalizedUrl,
        prompt: Option<&str>,
    ) -> CollabResult<Outcome> {
        let subject = Subject::Page(url.clone());
        let markdown = match self.latest_scrape_markdown(&subject).await? {
            Some(markdown) => markdown,
            None => {
                return Err(CollaboratorError::Permanent(format!(
                    "no scraped content available for {url}"
                )))
            }
        };

        let prompt = match prompt {
            Some(p) => Some(p.to_string()),
            None => self.source_default_prompt(url, Stage::Extract).await?,
        };

        let analysis = self
            .with_timeout(self.collaborators.analyzer.extract_page(
                url,
                &markdown,
                prompt.as_deref(),
            ))
            .await?;

        Ok(Outcome::Extract(ExtractOutcome {
            summary: analysis.summary,
            key_facts: analysis.key_facts,
            key_quotes: analysis.key_quotes,
            key_figures: analysis.key_figures,
            trustworthiness: analysis.trustworthiness,
            relevancy: analysis.relevancy,
            relevant_links: analysis.relevant_links,
            usage: analysis.usage,
            prompt: analysis.prompt,
            model: analysis.model,
            review: ReviewStatus::Unreviewed,
            created_at: Utc::now(),
        }))
    }

    async fn run_summarize(
        &self,
        url: &NormalizedUrl,
        prompt: Option<&str>,
    ) -> CollabResult<Outcome> {
        let input = self.summarize_input(url).await?;
        if input.is_empty() {
            return Err(CollaboratorError::Permanent(format!(
                "no approved page summaries for {url}"
            )));
        }

        let prompt = match prompt {
            Some(p) => Some(p.to_string()),
            None => self.source_default_prompt(url, Stage::Summarize).await?,
        };

        let analysis = self
            .with_timeout(self.collaborators.analyzer.summarize_source(
                url,
                &input,
                prompt.as_deref(),
            ))
            .await?;

        Ok(Outcome::Summarize(SummarizeOutcome {
            summary: analysis.summary,
            key_facts: analysis.key_facts,
            key_quotes: analysis.key_quotes,
            key_figures: analysis.key_figures,
            data_origin: analysis.data_origin,
            source_format: analysis.source_format,
            focus_area: analysis.focus_area,
            dataset_presence: analysis.dataset_presence,
            usage: analysis.usage,
            prompt: analysis.prompt,
            model: analysis.model,
            review: ReviewStatus::Unreviewed,
            created_at: Utc::now(),
        }))
    }

    /// Markdown from the page's most recent successful scrape.
    async fn latest_scrape_markdown(&self, subject: &Subject) -> CollabResult<Option<String>> {
        let outcome = self
            .store
            .latest_outcome(subject, Stage::Scrape)
            .await
            .map_err(internal)?;
        Ok(match outcome {
            Some(Outcome::Scrape(scrape)) => Some(scrape.markdown),
            _ => None,
        })
    }

    /// The approved per-page summaries of a source, concatenated in
    /// page-URL order. Recomputed from current ledger state at
    /// execution time, so pages approved between gate-pass and
    /// execution are included.
    async fn summarize_input(&self, source_url: &NormalizedUrl) -> CollabResult<String> {
        let pages = self
            .store
            .pages_for_source(source_url)
            .await
            .map_err(internal)?;

        let mut sections = Vec::new();
        for page in &pages {
            let outcome = self
                .store
                .latest_outcome(&Subject::Page(page.url.clone()), Stage::Extract)
                .await
                .map_err(internal)?;
            if let Some(Outcome::Extract(extract)) = outcome {
                if extract.review == ReviewStatus::Approved {
                    sections.push(format!("Markdown for {}:\n\n{}", page.url, extract.summary));
                }
            }
        }
        Ok(sections.join("\n\n"))
    }

    /// The source-level default prompt for a stage, if one was stored
    /// with the crawl request.
    async fn source_default_prompt(
        &self,
        url: &NormalizedUrl,
        stage: Stage,
    ) -> CollabResult<Option<String>> {
        let source_url = match stage {
            Stage::Extract => {
                let page = self.store.get_page(url).await.map_err(internal)?;
                match page {
                    Some(page) => page.source_url,
                    None => return Ok(None),
                }
            }
            _ => url.clone(),
        };

        let source = self.store.get_source(&source_url).await.map_err(internal)?;
        Ok(source.and_then(|s| match stage {
            Stage::Extract => s.extract_prompt,
            Stage::Summarize => s.summarize_prompt,
            _ => None,
        }))
    }

    /// Run a collaborator call under the configured timeout. Timeouts
    /// surface as transient failures.
    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = CollabResult<T>>,
    ) -> CollabResult<T> {
        match tokio::time::timeout(self.config.collaborator_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Transient(format!(
                "collaborator call timed out after {}s",
                self.config.collaborator_timeout.as_secs()
            ))),
        }
    }
}

/// Create the next-attempt job and enqueue it. A `DuplicateInFlight`
/// here means an explicit re-request got in first; the retry yields.
async fn retry_attempt<S: PipelineStore>(
    store: &S,
    queue: &dyn WorkQueue,
    item: &WorkItem,
    attempt: u32,
) {
    match store.create_job(&item.subject, item.stage).await {
        Ok(job) => {
            let requeued = queue.enqueue(WorkItem {
                job_id: job.id,
                subject: item.subject.clone(),
                stage: item.stage,
                attempt,
                params: item.params.clone(),
            });
            if let Err(e) = requeued {
                warn!(job_id = %job.id, error = %e, "failed to enqueue retry");
            }
        }
        Err(PipelineError::DuplicateInFlight { .. }) => {
            debug!(subject = %item.subject, stage = %item.stage, "retry superseded by another attempt");
        }
        Err(e) => {
            warn!(subject = %item.subject, stage = %item.stage, error = %e, "failed to create retry job");
        }
    }
}

fn internal(err: PipelineError) -> CollaboratorError {
    CollaboratorError::Permanent(format!("internal: {err}"))
}
