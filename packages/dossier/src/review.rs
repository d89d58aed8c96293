//! Review gate - human approval of EXTRACT and SUMMARIZE outcomes.
//!
//! An outcome is authoritative input for a downstream stage only once
//! a reviewer has approved it. Approval and the optional summary edit
//! happen in one atomic ledger update; an EXTRACT approval then
//! re-evaluates the owning source's fan-in gate.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::orchestrator::Orchestrator;
use crate::traits::store::PipelineStore;
use crate::types::job::{Job, Stage, Subject};

/// Exposes unreviewed outcomes and flips their review status.
pub struct ReviewGate<S> {
    store: Arc<S>,
    orchestrator: Arc<Orchestrator<S>>,
}

impl<S: PipelineStore> ReviewGate<S> {
    pub fn new(store: Arc<S>, orchestrator: Arc<Orchestrator<S>>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    /// All jobs with unreviewed outcomes, oldest outcome first.
    pub async fn list_unreviewed(&self) -> Result<Vec<Job>> {
        self.store.list_unreviewed().await
    }

    /// Approve a job's outcome with its summary unchanged.
    pub async fn approve(&self, job_id: Uuid) -> Result<Job> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(PipelineError::JobNotFound { id: job_id })?;
        let summary = job
            .outcome
            .as_ref()
            .and_then(|o| o.summary_text())
            .ok_or_else(|| PipelineError::EditNotAllowed {
                id: job_id,
                reason: "job has no reviewable outcome".to_string(),
            })?
            .to_string();

        self.edit_and_approve(job_id, &summary).await
    }

    /// Set the outcome's summary and approve it in one atomic update,
    /// then re-evaluate downstream eligibility.
    ///
    /// Fails with `NotFound` for unknown jobs and `AlreadyReviewed`
    /// for already approved ones (leaving the stored summary intact).
    pub async fn edit_and_approve(&self, job_id: Uuid, summary: &str) -> Result<Job> {
        let job = self.store.edit_and_approve(job_id, summary).await?;
        info!(job_id = %job.id, stage = %job.stage, subject = %job.subject, "outcome approved");

        if job.stage == Stage::Extract {
            self.reevaluate_source_gate(&job).await;
        }
        Ok(job)
    }

    /// Edit the summary of a pending outcome without approving it.
    pub async fn edit_summary(&self, job_id: Uuid, summary: &str) -> Result<Job> {
        self.store.edit_outcome_text(job_id, summary).await
    }

    /// An EXTRACT approval may have been the last one missing; check
    /// the owning source's fan-in gate. Gate errors are logged, not
    /// propagated - the approval itself already succeeded.
    async fn reevaluate_source_gate(&self, job: &Job) {
        let Subject::Page(page_url) = &job.subject else {
            return;
        };

        let page = match self.store.get_page(page_url).await {
            Ok(Some(page)) => page,
            Ok(None) => return,
            Err(e) => {
                warn!(page = %page_url, error = %e, "failed to load page after approval");
                return;
            }
        };

        if let Err(e) = self
            .orchestrator
            .evaluate_summarize_gate(&page.source_url)
            .await
        {
            warn!(source = %page.source_url, error = %e, "fan-in gate evaluation failed");
        }
    }
}
