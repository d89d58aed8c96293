//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::traits::store::{check_outcome_editable, JobLedger, ResourceRegistry};
use crate::types::job::{Job, Stage, Subject};
use crate::types::outcome::{Outcome, ReviewStatus};
use crate::types::resource::{Page, Source};
use crate::types::url::NormalizedUrl;

#[derive(Default)]
struct State {
    sources: HashMap<NormalizedUrl, Source>,
    pages: HashMap<NormalizedUrl, Page>,
    /// Append-only; insertion order breaks created_at ties
    jobs: Vec<Job>,
}

/// In-memory store for sources, pages and the job ledger.
///
/// Useful for testing and development. Not suitable for production as
/// data is lost on restart. A single lock over the whole state makes
/// every trait operation one atomic transaction.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of registered sources.
    pub fn source_count(&self) -> usize {
        self.state.read().unwrap().sources.len()
    }

    /// Get the number of registered pages.
    pub fn page_count(&self) -> usize {
        self.state.read().unwrap().pages.len()
    }

    /// Get the number of jobs in the ledger.
    pub fn job_count(&self) -> usize {
        self.state.read().unwrap().jobs.len()
    }
}

impl State {
    fn subject_exists(&self, subject: &Subject) -> Result<()> {
        match subject {
            Subject::Source(url) => {
                if self.sources.contains_key(url) {
                    Ok(())
                } else {
                    Err(PipelineError::SourceNotFound {
                        url: url.to_string(),
                    })
                }
            }
            Subject::Page(url) => {
                if self.pages.contains_key(url) {
                    Ok(())
                } else {
                    Err(PipelineError::PageNotFound {
                        url: url.to_string(),
                    })
                }
            }
        }
    }

    fn job_mut(&mut self, job_id: Uuid) -> Result<&mut Job> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(PipelineError::JobNotFound { id: job_id })
    }
}

#[async_trait]
impl ResourceRegistry for MemoryStore {
    async fn get_or_create_source(&self, url: &NormalizedUrl) -> Result<Source> {
        let mut state = self.state.write().unwrap();
        let source = state
            .sources
            .entry(url.clone())
            .or_insert_with(|| Source::new(url.clone()));
        Ok(source.clone())
    }

    async fn create_source(&self, url: &NormalizedUrl) -> Result<Source> {
        let mut state = self.state.write().unwrap();
        if state.sources.contains_key(url) {
            return Err(PipelineError::SourceAlreadyExists {
                url: url.to_string(),
            });
        }
        let source = Source::new(url.clone());
        state.sources.insert(url.clone(), source.clone());
        Ok(source)
    }

    async fn get_source(&self, url: &NormalizedUrl) -> Result<Option<Source>> {
        Ok(self.state.read().unwrap().sources.get(url).cloned())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let state = self.state.read().unwrap();
        let mut sources: Vec<_> = state.sources.values().cloned().collect();
        sources.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(sources)
    }

    async fn set_source_prompts(
        &self,
        url: &NormalizedUrl,
        extract_prompt: Option<String>,
        summarize_prompt: Option<String>,
    ) -> Result<Source> {
        let mut state = self.state.write().unwrap();
        let source = state
            .sources
            .get_mut(url)
            .ok_or_else(|| PipelineError::SourceNotFound {
                url: url.to_string(),
            })?;
        if extract_prompt.is_some() {
            source.extract_prompt = extract_prompt;
        }
        if summarize_prompt.is_some() {
            source.summarize_prompt = summarize_prompt;
        }
        Ok(source.clone())
    }

    async fn get_or_create_page(
        &self,
        source_url: &NormalizedUrl,
        page_url: &NormalizedUrl,
    ) -> Result<Page> {
        let mut state = self.state.write().unwrap();
        if let Some(existing) = state.pages.get(page_url) {
            return Ok(existing.clone());
        }
        if !state.sources.contains_key(source_url) {
            return Err(PipelineError::SourceNotFound {
                url: source_url.to_string(),
            });
        }
        let page = Page::new(page_url.clone(), source_url.clone());
        state.pages.insert(page_url.clone(), page.clone());
        Ok(page)
    }

    async fn create_page(
        &self,
        source_url: &NormalizedUrl,
        page_url: &NormalizedUrl,
    ) -> Result<Page> {
        let mut state = self.state.write().unwrap();
        if state.pages.contains_key(page_url) {
            return Err(PipelineError::PageAlreadyExists {
                url: page_url.to_string(),
            });
        }
        if !state.sources.contains_key(source_url) {
            return Err(PipelineError::SourceNotFound {
                url: source_url.to_string(),
            });
        }
        let page = Page::new(page_url.clone(), source_url.clone());
        state.pages.insert(page_url.clone(), page.clone());
        Ok(page)
    }

    async fn get_page(&self, url: &NormalizedUrl) -> Result<Option<Page>> {
        Ok(self.state.read().unwrap().pages.get(url).cloned())
    }

    async fn pages_for_source(&self, source_url: &NormalizedUrl) -> Result<Vec<Page>> {
        let state = self.state.read().unwrap();
        let mut pages: Vec<_> = state
            .pages
            .values()
            .filter(|p| &p.source_url == source_url)
            .cloned()
            .collect();
        pages.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(pages)
    }

    async fn delete_source(&self, url: &NormalizedUrl) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.sources.remove(url).is_none() {
            return Err(PipelineError::SourceNotFound {
                url: url.to_string(),
            });
        }

        let page_urls: Vec<_> = state
            .pages
            .values()
            .filter(|p| &p.source_url == url)
            .map(|p| p.url.clone())
            .collect();
        for page_url in &page_urls {
            state.pages.remove(page_url);
        }

        state.jobs.retain(|job| match &job.subject {
            Subject::Source(s) => s != url,
            Subject::Page(p) => !page_urls.contains(p),
        });
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        *state = State::default();
        Ok(())
    }
}

#[async_trait]
impl JobLedger for MemoryStore {
    async fn create_job(&self, subject: &Subject, stage: Stage) -> Result<Job> {
        let mut state = self.state.write().unwrap();
        state.subject_exists(subject)?;

        let in_flight = state
            .jobs
            .iter()
            .any(|j| &j.subject == subject && j.stage == stage && j.is_in_flight());
        if in_flight {
            return Err(PipelineError::DuplicateInFlight {
                subject: subject.clone(),
                stage,
            });
        }

        let job = Job::new(subject.clone(), stage);
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn record_outcome(&self, job_id: Uuid, outcome: Outcome) -> Result<Job> {
        let mut state = self.state.write().unwrap();
        let job = state.job_mut(job_id)?;
        if job.outcome.is_some() {
            return Err(PipelineError::AlreadyCompleted { id: job_id });
        }
        job.outcome = Some(outcome);
        Ok(job.clone())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let state = self.state.read().unwrap();
        Ok(state.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn latest_job(&self, subject: &Subject, stage: Stage) -> Result<Option<Job>> {
        let state = self.state.read().unwrap();
        Ok(state
            .jobs
            .iter()
            .rev()
            .find(|j| &j.subject == subject && j.stage == stage)
            .cloned())
    }

    async fn latest_outcome(&self, subject: &Subject, stage: Stage) -> Result<Option<Outcome>> {
        let state = self.state.read().unwrap();
        Ok(state
            .jobs
            .iter()
            .rev()
            .filter(|j| &j.subject == subject && j.stage == stage)
            .find_map(|j| j.outcome.clone()))
    }

    async fn jobs_for_subject(&self, subject: &Subject) -> Result<Vec<Job>> {
        let state = self.state.read().unwrap();
        Ok(state
            .jobs
            .iter()
            .filter(|j| &j.subject == subject)
            .cloned()
            .collect())
    }

    async fn list_unreviewed(&self) -> Result<Vec<Job>> {
        let state = self.state.read().unwrap();
        let mut jobs: Vec<_> = state
            .jobs
            .iter()
            .filter(|j| {
                j.outcome
                    .as_ref()
                    .and_then(Outcome::review_status)
                    .map(|s| s == ReviewStatus::Unreviewed)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.outcome.as_ref().map(Outcome::created_at));
        Ok(jobs)
    }

    async fn edit_outcome_text(&self, job_id: Uuid, summary: &str) -> Result<Job> {
        let mut state = self.state.write().unwrap();
        let job = state.job_mut(job_id)?;
        check_outcome_editable(job)?;
        if let Some(outcome) = job.outcome.as_mut() {
            outcome.set_summary_text(summary);
        }
        Ok(job.clone())
    }

    async fn set_review_status(&self, job_id: Uuid, status: ReviewStatus) -> Result<Job> {
        let mut state = self.state.write().unwrap();
        let job = state.job_mut(job_id)?;
        check_outcome_editable(job)?;
        if let Some(outcome) = job.outcome.as_mut() {
            outcome.set_review_status(status);
        }
        Ok(job.clone())
    }

    async fn edit_and_approve(&self, job_id: Uuid, summary: &str) -> Result<Job> {
        let mut state = self.state.write().unwrap();
        let job = state.job_mut(job_id)?;
        check_outcome_editable(job)?;
        if let Some(outcome) = job.outcome.as_mut() {
            outcome.set_summary_text(summary);
            outcome.set_review_status(ReviewStatus::Approved);
        }
        Ok(job.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::outcome::{FailureKind, JobError, RelevantLinks, ScrapeOutcome};

    fn url(s: &str) -> NormalizedUrl {
        NormalizedUrl::new(s).unwrap()
    }

    async fn store_with_page() -> (MemoryStore, Subject) {
        let store = MemoryStore::new();
        let source = url("https://a.test");
        let page = url("https://a.test/p1");
        store.get_or_create_source(&source).await.unwrap();
        store.get_or_create_page(&source, &page).await.unwrap();
        (store, Subject::Page(page))
    }

    #[tokio::test]
    async fn get_or_create_source_is_idempotent() {
        let store = MemoryStore::new();
        let first = store.get_or_create_source(&url("https://a.test")).await.unwrap();
        let second = store.get_or_create_source(&url("https://a.test")).await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(store.source_count(), 1);
    }

    #[tokio::test]
    async fn create_source_rejects_duplicates() {
        let store = MemoryStore::new();
        store.create_source(&url("https://a.test")).await.unwrap();
        let err = store.create_source(&url("https://a.test")).await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn pages_are_globally_unique_by_url() {
        let store = MemoryStore::new();
        let a = url("https://a.test");
        let b = url("https://b.test");
        let page = url("https://a.test/shared");
        store.get_or_create_source(&a).await.unwrap();
        store.get_or_create_source(&b).await.unwrap();

        store.get_or_create_page(&a, &page).await.unwrap();
        let second = store.get_or_create_page(&b, &page).await.unwrap();

        // The first discoverer keeps ownership
        assert_eq!(second.source_url, a);
        assert_eq!(store.page_count(), 1);
    }

    #[tokio::test]
    async fn create_job_rejects_second_in_flight() {
        let (store, subject) = store_with_page().await;
        store.create_job(&subject, Stage::Scrape).await.unwrap();
        let err = store.create_job(&subject, Stage::Scrape).await.unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateInFlight { .. }));
    }

    #[tokio::test]
    async fn create_job_allows_new_attempt_after_outcome() {
        let (store, subject) = store_with_page().await;
        let first = store.create_job(&subject, Stage::Scrape).await.unwrap();
        store
            .record_outcome(
                first.id,
                Outcome::Error(JobError::new("timeout", FailureKind::Retryable)),
            )
            .await
            .unwrap();

        let second = store.create_job(&subject, Stage::Scrape).await.unwrap();
        assert_ne!(first.id, second.id);

        let history = store.jobs_for_subject(&subject).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].outcome.as_ref().unwrap().is_error());
    }

    #[tokio::test]
    async fn record_outcome_rejects_second_finalization() {
        let (store, subject) = store_with_page().await;
        let job = store.create_job(&subject, Stage::Scrape).await.unwrap();
        let outcome = Outcome::Scrape(ScrapeOutcome::new("md", RelevantLinks::default()));
        store.record_outcome(job.id, outcome.clone()).await.unwrap();

        let err = store.record_outcome(job.id, outcome).await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyCompleted { .. }));
    }

    #[tokio::test]
    async fn latest_outcome_skips_in_flight_jobs() {
        let (store, subject) = store_with_page().await;
        let first = store.create_job(&subject, Stage::Scrape).await.unwrap();
        store
            .record_outcome(
                first.id,
                Outcome::Scrape(ScrapeOutcome::new("md", RelevantLinks::default())),
            )
            .await
            .unwrap();
        store.create_job(&subject, Stage::Scrape).await.unwrap();

        // Latest job is the in-flight one, latest outcome the recorded one
        let latest = store.latest_job(&subject, Stage::Scrape).await.unwrap().unwrap();
        assert!(latest.is_in_flight());
        let outcome = store.latest_outcome(&subject, Stage::Scrape).await.unwrap();
        assert!(matches!(outcome, Some(Outcome::Scrape(_))));
    }

    #[tokio::test]
    async fn delete_source_cascades_to_pages_and_jobs() {
        let store = MemoryStore::new();
        let source = url("https://a.test");
        let page = url("https://a.test/p1");
        store.get_or_create_source(&source).await.unwrap();
        store.get_or_create_page(&source, &page).await.unwrap();
        store
            .create_job(&Subject::Source(source.clone()), Stage::Crawl)
            .await
            .unwrap();
        store
            .create_job(&Subject::Page(page.clone()), Stage::Scrape)
            .await
            .unwrap();

        store.delete_source(&source).await.unwrap();

        assert_eq!(store.source_count(), 0);
        assert_eq!(store.page_count(), 0);
        assert_eq!(store.job_count(), 0);
    }

    #[tokio::test]
    async fn reset_wipes_everything() {
        let (store, subject) = store_with_page().await;
        store.create_job(&subject, Stage::Scrape).await.unwrap();

        store.reset().await.unwrap();

        assert_eq!(store.source_count(), 0);
        assert_eq!(store.page_count(), 0);
        assert_eq!(store.job_count(), 0);
    }

    #[tokio::test]
    async fn edit_outcome_text_requires_unreviewed_summary() {
        let (store, subject) = store_with_page().await;
        let job = store.create_job(&subject, Stage::Scrape).await.unwrap();
        store
            .record_outcome(
                job.id,
                Outcome::Scrape(ScrapeOutcome::new("md", RelevantLinks::default())),
            )
            .await
            .unwrap();

        // Scrape outcomes have no reviewable summary
        let err = store.edit_outcome_text(job.id, "new").await.unwrap_err();
        assert!(matches!(err, PipelineError::EditNotAllowed { .. }));
    }
}
