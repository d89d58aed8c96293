//! Pipeline facade - wires the components and exposes the core API.
//!
//! [`Pipeline`] owns the store, work queue, orchestrator, dispatcher
//! and review gate, and exposes the transport-agnostic operation set
//! an HTTP/API layer builds on: source management, crawl requests,
//! manual stage re-runs, review, history, and the operator-only reset.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dossier::{Collaborators, CrawlOptions, MemoryStore, Pipeline};
//!
//! let pipeline = Pipeline::new(MemoryStore::new(), collaborators);
//! pipeline.start();
//!
//! pipeline.request_crawl("https://example.com", CrawlOptions::default()).await?;
//! // ... later, review what came back
//! for job in pipeline.list_unreviewed().await? {
//!     pipeline.approve(job.id).await?;
//! }
//! ```

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::dispatcher::{Collaborators, Dispatcher};
use crate::error::{PipelineError, Result};
use crate::orchestrator::{CrawlOptions, Orchestrator};
use crate::queue::{MemoryQueue, StageParams, WorkQueue};
use crate::review::ReviewGate;
use crate::traits::store::PipelineStore;
use crate::types::job::{Job, Stage, StageState, Subject};
use crate::types::resource::{Page, Source};
use crate::types::url::NormalizedUrl;

/// The assembled pipeline core.
pub struct Pipeline<S> {
    store: Arc<S>,
    queue: Arc<dyn WorkQueue>,
    orchestrator: Arc<Orchestrator<S>>,
    dispatcher: Arc<Dispatcher<S>>,
    review: ReviewGate<S>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: PipelineStore + 'static> Pipeline<S> {
    /// Assemble a pipeline with default configuration.
    pub fn new(store: S, collaborators: Collaborators) -> Self {
        Self::with_config(store, collaborators, PipelineConfig::default())
    }

    /// Assemble a pipeline with explicit configuration.
    pub fn with_config(store: S, collaborators: Collaborators, config: PipelineConfig) -> Self {
        let store = Arc::new(store);
        let queue: Arc<dyn WorkQueue> = Arc::new(MemoryQueue::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            config.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            collaborators,
            Arc::clone(&orchestrator),
            config,
        ));
        let review = ReviewGate::new(Arc::clone(&store), Arc::clone(&orchestrator));

        Self {
            store,
            queue,
            orchestrator,
            dispatcher,
            review,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// The underlying store, for direct ledger/registry reads.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Spawn the dispatcher workers. Idempotent.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap();
        if !workers.is_empty() {
            return;
        }
        *workers = Arc::clone(&self.dispatcher).spawn_workers(self.shutdown.clone());
        info!(workers = workers.len(), "pipeline started");
    }

    /// Stop accepting work and wait for the workers to finish.
    pub async fn stop(&self) {
        self.queue.close();
        self.shutdown.cancel();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        futures::future::join_all(workers).await;
        info!("pipeline stopped");
    }

    /// Process queued jobs inline until the queue is empty, without
    /// background workers. Deterministic; intended for tests and
    /// one-shot batch runs.
    pub async fn drain(&self) {
        self.dispatcher.drain().await;
    }

    // ------------------------------------------------------------------
    // Sources and pages
    // ------------------------------------------------------------------

    /// Register a source explicitly. Fails with `SourceAlreadyExists`
    /// for URLs already registered; crawl requests reuse instead.
    pub async fn add_source(&self, url: &str) -> Result<Source> {
        let url = NormalizedUrl::new(url)?;
        self.store.create_source(&url).await
    }

    /// All registered sources.
    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        self.store.list_sources().await
    }

    /// Look up a source by URL.
    pub async fn get_source(&self, url: &str) -> Result<Source> {
        let url = NormalizedUrl::new(url)?;
        self.store
            .get_source(&url)
            .await?
            .ok_or(PipelineError::SourceNotFound {
                url: url.to_string(),
            })
    }

    /// The pages discovered under a source.
    pub async fn pages_for_source(&self, url: &str) -> Result<Vec<Page>> {
        let url = NormalizedUrl::new(url)?;
        if self.store.get_source(&url).await?.is_none() {
            return Err(PipelineError::SourceNotFound {
                url: url.to_string(),
            });
        }
        self.store.pages_for_source(&url).await
    }

    /// Look up a page by URL.
    pub async fn get_page(&self, url: &str) -> Result<Page> {
        let url = NormalizedUrl::new(url)?;
        self.store
            .get_page(&url)
            .await?
            .ok_or(PipelineError::PageNotFound {
                url: url.to_string(),
            })
    }

    /// Attach a page to a source manually.
    pub async fn add_page_to_source(&self, source_url: &str, page_url: &str) -> Result<Page> {
        let source_url = NormalizedUrl::new(source_url)?;
        let page_url = NormalizedUrl::new(page_url)?;
        self.store.create_page(&source_url, &page_url).await
    }

    /// Delete a source and everything under it. Operator action.
    pub async fn delete_source(&self, url: &str) -> Result<()> {
        let url = NormalizedUrl::new(url)?;
        self.store.delete_source(&url).await
    }

    /// Delete all state. Operator action.
    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await
    }

    // ------------------------------------------------------------------
    // Stage requests
    // ------------------------------------------------------------------

    /// Request a crawl of a URL. Reuses the existing source if one is
    /// registered; fails with `DuplicateInFlight` while a crawl for it
    /// is already running.
    pub async fn request_crawl(&self, url: &str, options: CrawlOptions) -> Result<Job> {
        let url = NormalizedUrl::new(url)?;
        self.orchestrator.request_crawl(&url, options).await
    }

    /// Manually (re-)run EXTRACT for a page.
    pub async fn request_extract(&self, page_url: &str, prompt: Option<String>) -> Result<Job> {
        let page = self.get_page(page_url).await?;
        self.orchestrator
            .start_stage(
                Subject::Page(page.url),
                Stage::Extract,
                StageParams::Extract { prompt },
            )
            .await
    }

    /// Manually (re-)run SUMMARIZE for a source, bypassing the fan-in
    /// gate. The job fails if no page summaries are approved yet.
    pub async fn request_summarize(&self, source_url: &str, prompt: Option<String>) -> Result<Job> {
        let source = self.get_source(source_url).await?;
        self.orchestrator
            .start_stage(
                Subject::Source(source.url),
                Stage::Summarize,
                StageParams::Summarize { prompt },
            )
            .await
    }

    // ------------------------------------------------------------------
    // Review
    // ------------------------------------------------------------------

    /// Outcomes awaiting review, oldest first.
    pub async fn list_unreviewed(&self) -> Result<Vec<Job>> {
        self.review.list_unreviewed().await
    }

    /// Approve an outcome with its summary unchanged.
    pub async fn approve(&self, job_id: Uuid) -> Result<Job> {
        self.review.approve(job_id).await
    }

    /// Edit an outcome's summary and approve it atomically.
    pub async fn edit_and_approve(&self, job_id: Uuid, summary: &str) -> Result<Job> {
        self.review.edit_and_approve(job_id, summary).await
    }

    /// Edit a pending outcome's summary without approving.
    pub async fn edit_summary(&self, job_id: Uuid, summary: &str) -> Result<Job> {
        self.review.edit_summary(job_id, summary).await
    }

    // ------------------------------------------------------------------
    // History and state
    // ------------------------------------------------------------------

    /// Full job history for a source: its own CRAWL/SUMMARIZE jobs
    /// plus every job of its pages, oldest first.
    pub async fn source_history(&self, url: &str) -> Result<Vec<Job>> {
        let source = self.get_source(url).await?;
        let mut jobs = self
            .store
            .jobs_for_subject(&Subject::Source(source.url.clone()))
            .await?;
        for page in self.store.pages_for_source(&source.url).await? {
            jobs.extend(
                self.store
                    .jobs_for_subject(&Subject::Page(page.url))
                    .await?,
            );
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// Full job history for a page, oldest first.
    pub async fn page_history(&self, url: &str) -> Result<Vec<Job>> {
        let page = self.get_page(url).await?;
        self.store.jobs_for_subject(&Subject::Page(page.url)).await
    }

    /// Current state of a stage for a source.
    pub async fn source_stage_state(&self, url: &str, stage: Stage) -> Result<StageState> {
        let url = NormalizedUrl::new(url)?;
        self.orchestrator
            .stage_state(&Subject::Source(url), stage)
            .await
    }

    /// Current state of a stage for a page.
    pub async fn page_stage_state(&self, url: &str, stage: Stage) -> Result<StageState> {
        let url = NormalizedUrl::new(url)?;
        self.orchestrator
            .stage_state(&Subject::Page(url), stage)
            .await
    }

    /// Whether the source's fan-in gate currently holds.
    pub async fn summarize_ready(&self, url: &str) -> Result<bool> {
        let url = NormalizedUrl::new(url)?;
        self.orchestrator.summarize_ready(&url).await
    }
}
