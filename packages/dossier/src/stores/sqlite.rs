//! SQLite storage implementation.
//!
//! A file-based storage backend using SQLite. Good for:
//! - Local development
//! - Single-server deployments
//! - Testing with persistent data
//!
//! Outcomes are stored as JSON in the jobs table; the tagged enum
//! round-trips through serde. Insertion order (rowid) breaks
//! created_at ties, matching the memory store's append order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::traits::store::{check_outcome_editable, JobLedger, ResourceRegistry};
use crate::types::job::{Job, Stage, Subject};
use crate::types::outcome::{Outcome, ReviewStatus};
use crate::types::resource::{Page, Source};
use crate::types::url::NormalizedUrl;

/// SQLite-backed pipeline store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://dossier.db?mode=rwc` - File, created if missing
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(PipelineError::storage)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Create the schema if it does not exist.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                url TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                extract_prompt TEXT,
                summarize_prompt TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                url TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pages_source_url ON pages(source_url);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                subject_kind TEXT NOT NULL,
                subject_url TEXT NOT NULL,
                stage TEXT NOT NULL,
                created_at TEXT NOT NULL,
                outcome TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_subject ON jobs(subject_kind, subject_url, stage);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(())
    }
}

fn subject_kind(subject: &Subject) -> &'static str {
    match subject {
        Subject::Source(_) => "source",
        Subject::Page(_) => "page",
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(PipelineError::storage)
}

fn parse_url(raw: &str) -> Result<NormalizedUrl> {
    NormalizedUrl::new(raw)
}

fn source_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Source> {
    Ok(Source {
        url: parse_url(row.get::<&str, _>("url"))?,
        created_at: parse_timestamp(row.get::<&str, _>("created_at"))?,
        extract_prompt: row.get::<Option<String>, _>("extract_prompt"),
        summarize_prompt: row.get::<Option<String>, _>("summarize_prompt"),
    })
}

fn page_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Page> {
    Ok(Page {
        url: parse_url(row.get::<&str, _>("url"))?,
        source_url: parse_url(row.get::<&str, _>("source_url"))?,
        created_at: parse_timestamp(row.get::<&str, _>("created_at"))?,
    })
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let url = parse_url(row.get::<&str, _>("subject_url"))?;
    let subject = match row.get::<&str, _>("subject_kind") {
        "source" => Subject::Source(url),
        _ => Subject::Page(url),
    };
    let stage = match row.get::<&str, _>("stage") {
        "crawl" => Stage::Crawl,
        "scrape" => Stage::Scrape,
        "extract" => Stage::Extract,
        _ => Stage::Summarize,
    };
    let outcome = row
        .get::<Option<String>, _>("outcome")
        .map(|raw| serde_json::from_str::<Outcome>(&raw))
        .transpose()
        .map_err(PipelineError::storage)?;

    Ok(Job {
        id: Uuid::parse_str(row.get::<&str, _>("id")).map_err(PipelineError::storage)?,
        subject,
        stage,
        created_at: parse_timestamp(row.get::<&str, _>("created_at"))?,
        outcome,
    })
}

fn outcome_json(outcome: &Outcome) -> Result<String> {
    serde_json::to_string(outcome).map_err(PipelineError::storage)
}

const JOB_COLUMNS: &str = "id, subject_kind, subject_url, stage, created_at, outcome";

#[async_trait]
impl ResourceRegistry for SqliteStore {
    async fn get_or_create_source(&self, url: &NormalizedUrl) -> Result<Source> {
        let source = Source::new(url.clone());
        // Conditional insert keeps concurrent calls from duplicating
        sqlx::query(
            r#"
            INSERT INTO sources (url, created_at) VALUES (?, ?)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(url.as_str())
        .bind(source.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        self.get_source(url).await?.ok_or_else(|| {
            PipelineError::SourceNotFound {
                url: url.to_string(),
            }
        })
    }

    async fn create_source(&self, url: &NormalizedUrl) -> Result<Source> {
        let source = Source::new(url.clone());
        let result = sqlx::query(
            r#"
            INSERT INTO sources (url, created_at) VALUES (?, ?)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(url.as_str())
        .bind(source.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::SourceAlreadyExists {
                url: url.to_string(),
            });
        }
        Ok(source)
    }

    async fn get_source(&self, url: &NormalizedUrl) -> Result<Option<Source>> {
        let row = sqlx::query(
            "SELECT url, created_at, extract_prompt, summarize_prompt FROM sources WHERE url = ?",
        )
        .bind(url.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        row.as_ref().map(source_from_row).transpose()
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT url, created_at, extract_prompt, summarize_prompt FROM sources ORDER BY url",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        rows.iter().map(source_from_row).collect()
    }

    async fn set_source_prompts(
        &self,
        url: &NormalizedUrl,
        extract_prompt: Option<String>,
        summarize_prompt: Option<String>,
    ) -> Result<Source> {
        let result = sqlx::query(
            r#"
            UPDATE sources
            SET extract_prompt = COALESCE(?, extract_prompt),
                summarize_prompt = COALESCE(?, summarize_prompt)
            WHERE url = ?
            "#,
        )
        .bind(extract_prompt)
        .bind(summarize_prompt)
        .bind(url.as_str())
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::SourceNotFound {
                url: url.to_string(),
            });
        }
        self.get_source(url).await?.ok_or_else(|| {
            PipelineError::SourceNotFound {
                url: url.to_string(),
            }
        })
    }

    async fn get_or_create_page(
        &self,
        source_url: &NormalizedUrl,
        page_url: &NormalizedUrl,
    ) -> Result<Page> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::storage)?;

        let existing = sqlx::query("SELECT url, source_url, created_at FROM pages WHERE url = ?")
            .bind(page_url.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(PipelineError::storage)?;
        if let Some(row) = existing {
            tx.commit().await.map_err(PipelineError::storage)?;
            return page_from_row(&row);
        }

        let source_exists = sqlx::query("SELECT 1 FROM sources WHERE url = ?")
            .bind(source_url.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(PipelineError::storage)?
            .is_some();
        if !source_exists {
            return Err(PipelineError::SourceNotFound {
                url: source_url.to_string(),
            });
        }

        let page = Page::new(page_url.clone(), source_url.clone());
        sqlx::query("INSERT INTO pages (url, source_url, created_at) VALUES (?, ?, ?)")
            .bind(page_url.as_str())
            .bind(source_url.as_str())
            .bind(page.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::storage)?;

        tx.commit().await.map_err(PipelineError::storage)?;
        Ok(page)
    }

    async fn create_page(
        &self,
        source_url: &NormalizedUrl,
        page_url: &NormalizedUrl,
    ) -> Result<Page> {
        if self.get_page(page_url).await?.is_some() {
            return Err(PipelineError::PageAlreadyExists {
                url: page_url.to_string(),
            });
        }
        self.get_or_create_page(source_url, page_url).await
    }

    async fn get_page(&self, url: &NormalizedUrl) -> Result<Option<Page>> {
        let row = sqlx::query("SELECT url, source_url, created_at FROM pages WHERE url = ?")
            .bind(url.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(PipelineError::storage)?;

        row.as_ref().map(page_from_row).transpose()
    }

    async fn pages_for_source(&self, source_url: &NormalizedUrl) -> Result<Vec<Page>> {
        let rows = sqlx::query(
            "SELECT url, source_url, created_at FROM pages WHERE source_url = ? ORDER BY url",
        )
        .bind(source_url.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        rows.iter().map(page_from_row).collect()
    }

    async fn delete_source(&self, url: &NormalizedUrl) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::storage)?;

        let exists = sqlx::query("SELECT 1 FROM sources WHERE url = ?")
            .bind(url.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(PipelineError::storage)?
            .is_some();
        if !exists {
            return Err(PipelineError::SourceNotFound {
                url: url.to_string(),
            });
        }

        // Jobs of the source's pages, then the source's own jobs,
        // then pages, then the source
        sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE (subject_kind = 'page'
                   AND subject_url IN (SELECT url FROM pages WHERE source_url = ?))
               OR (subject_kind = 'source' AND subject_url = ?)
            "#,
        )
        .bind(url.as_str())
        .bind(url.as_str())
        .execute(&mut *tx)
        .await
        .map_err(PipelineError::storage)?;

        sqlx::query("DELETE FROM pages WHERE source_url = ?")
            .bind(url.as_str())
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::storage)?;

        sqlx::query("DELETE FROM sources WHERE url = ?")
            .bind(url.as_str())
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::storage)?;

        tx.commit().await.map_err(PipelineError::storage)
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::storage)?;
        for table in ["jobs", "pages", "sources"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(PipelineError::storage)?;
        }
        tx.commit().await.map_err(PipelineError::storage)
    }
}

#[async_trait]
impl JobLedger for SqliteStore {
    async fn create_job(&self, subject: &Subject, stage: Stage) -> Result<Job> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::storage)?;

        let (table, not_found): (&str, fn(String) -> PipelineError) = match subject {
            Subject::Source(_) => ("sources", |url| PipelineError::SourceNotFound { url }),
            Subject::Page(_) => ("pages", |url| PipelineError::PageNotFound { url }),
        };
        let exists = sqlx::query(&format!("SELECT 1 FROM {table} WHERE url = ?"))
            .bind(subject.url().as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(PipelineError::storage)?
            .is_some();
        if !exists {
            return Err(not_found(subject.url().to_string()));
        }

        let in_flight = sqlx::query(
            r#"
            SELECT 1 FROM jobs
            WHERE subject_kind = ? AND subject_url = ? AND stage = ? AND outcome IS NULL
            LIMIT 1
            "#,
        )
        .bind(subject_kind(subject))
        .bind(subject.url().as_str())
        .bind(stage.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(PipelineError::storage)?
        .is_some();
        if in_flight {
            return Err(PipelineError::DuplicateInFlight {
                subject: subject.clone(),
                stage,
            });
        }

        let job = Job::new(subject.clone(), stage);
        sqlx::query(
            r#"
            INSERT INTO jobs (id, subject_kind, subject_url, stage, created_at, outcome)
            VALUES (?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(job.id.to_string())
        .bind(subject_kind(subject))
        .bind(subject.url().as_str())
        .bind(stage.as_str())
        .bind(job.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(PipelineError::storage)?;

        tx.commit().await.map_err(PipelineError::storage)?;
        Ok(job)
    }

    async fn record_outcome(&self, job_id: Uuid, outcome: Outcome) -> Result<Job> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::storage)?;

        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(job_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(PipelineError::storage)?
            .ok_or(PipelineError::JobNotFound { id: job_id })?;
        let mut job = job_from_row(&row)?;
        if job.outcome.is_some() {
            return Err(PipelineError::AlreadyCompleted { id: job_id });
        }

        sqlx::query("UPDATE jobs SET outcome = ? WHERE id = ?")
            .bind(outcome_json(&outcome)?)
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::storage)?;

        tx.commit().await.map_err(PipelineError::storage)?;
        job.outcome = Some(outcome);
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(PipelineError::storage)?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn latest_job(&self, subject: &Subject, stage: Stage) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE subject_kind = ? AND subject_url = ? AND stage = ?
            ORDER BY rowid DESC
            LIMIT 1
            "#
        ))
        .bind(subject_kind(subject))
        .bind(subject.url().as_str())
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn latest_outcome(&self, subject: &Subject, stage: Stage) -> Result<Option<Outcome>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE subject_kind = ? AND subject_url = ? AND stage = ? AND outcome IS NOT NULL
            ORDER BY rowid DESC
            LIMIT 1
            "#
        ))
        .bind(subject_kind(subject))
        .bind(subject.url().as_str())
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(row.as_ref().map(job_from_row).transpose()?.and_then(|j| j.outcome))
    }

    async fn jobs_for_subject(&self, subject: &Subject) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE subject_kind = ? AND subject_url = ?
            ORDER BY rowid
            "#
        ))
        .bind(subject_kind(subject))
        .bind(subject.url().as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        rows.iter().map(job_from_row).collect()
    }

    async fn list_unreviewed(&self) -> Result<Vec<Job>> {
        // Review status lives inside the outcome JSON; filter in Rust
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE stage IN ('extract', 'summarize') AND outcome IS NOT NULL
            ORDER BY rowid
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        let mut jobs: Vec<Job> = rows
            .iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|j| {
                j.outcome
                    .as_ref()
                    .and_then(Outcome::review_status)
                    .map(|s| s == ReviewStatus::Unreviewed)
                    .unwrap_or(false)
            })
            .collect();
        jobs.sort_by_key(|j| j.outcome.as_ref().map(Outcome::created_at));
        Ok(jobs)
    }

    async fn edit_outcome_text(&self, job_id: Uuid, summary: &str) -> Result<Job> {
        self.update_outcome(job_id, |outcome| {
            outcome.set_summary_text(summary);
        })
        .await
    }

    async fn set_review_status(&self, job_id: Uuid, status: ReviewStatus) -> Result<Job> {
        self.update_outcome(job_id, |outcome| {
            outcome.set_review_status(status);
        })
        .await
    }

    async fn edit_and_approve(&self, job_id: Uuid, summary: &str) -> Result<Job> {
        self.update_outcome(job_id, |outcome| {
            outcome.set_summary_text(summary);
            outcome.set_review_status(ReviewStatus::Approved);
        })
        .await
    }
}

impl SqliteStore {
    /// Apply a mutation to an editable outcome inside one
    /// transaction. All edit-path rules live in
    /// `check_outcome_editable`.
    async fn update_outcome(
        &self,
        job_id: Uuid,
        mutate: impl FnOnce(&mut Outcome) + Send,
    ) -> Result<Job> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::storage)?;

        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(job_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(PipelineError::storage)?
            .ok_or(PipelineError::JobNotFound { id: job_id })?;
        let mut job = job_from_row(&row)?;
        check_outcome_editable(&job)?;

        if let Some(outcome) = job.outcome.as_mut() {
            mutate(outcome);
            sqlx::query("UPDATE jobs SET outcome = ? WHERE id = ?")
                .bind(outcome_json(outcome)?)
                .bind(job_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(PipelineError::storage)?;
        }

        tx.commit().await.map_err(PipelineError::storage)?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::outcome::{ExtractOutcome, RelevantLinks, Relevancy, TokenUsage};
    use chrono::Utc;

    fn url(s: &str) -> NormalizedUrl {
        NormalizedUrl::new(s).unwrap()
    }

    fn extract_outcome() -> Outcome {
        Outcome::Extract(ExtractOutcome {
            summary: "summary".to_string(),
            key_facts: String::new(),
            key_quotes: String::new(),
            key_figures: String::new(),
            trustworthiness: "High".to_string(),
            relevancy: Relevancy::High,
            relevant_links: RelevantLinks::default(),
            usage: TokenUsage::new(10, 5),
            prompt: "p".to_string(),
            model: "m".to_string(),
            review: ReviewStatus::Unreviewed,
            created_at: Utc::now(),
        })
    }

    async fn store_with_page() -> (SqliteStore, Subject) {
        let store = SqliteStore::in_memory().await.unwrap();
        let source = url("https://a.test");
        let page = url("https://a.test/p1");
        store.get_or_create_source(&source).await.unwrap();
        store.get_or_create_page(&source, &page).await.unwrap();
        (store, Subject::Page(page))
    }

    #[tokio::test]
    async fn roundtrips_jobs_and_outcomes() {
        let (store, subject) = store_with_page().await;
        let job = store.create_job(&subject, Stage::Extract).await.unwrap();
        store.record_outcome(job.id, extract_outcome()).await.unwrap();

        let loaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.subject, subject);
        assert_eq!(loaded.stage, Stage::Extract);
        assert!(matches!(loaded.outcome, Some(Outcome::Extract(_))));
    }

    #[tokio::test]
    async fn rejects_duplicate_in_flight() {
        let (store, subject) = store_with_page().await;
        store.create_job(&subject, Stage::Scrape).await.unwrap();
        let err = store.create_job(&subject, Stage::Scrape).await.unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateInFlight { .. }));
    }

    #[tokio::test]
    async fn edit_and_approve_is_final() {
        let (store, subject) = store_with_page().await;
        let job = store.create_job(&subject, Stage::Extract).await.unwrap();
        store.record_outcome(job.id, extract_outcome()).await.unwrap();

        let approved = store.edit_and_approve(job.id, "reviewed").await.unwrap();
        assert_eq!(
            approved.outcome.as_ref().unwrap().summary_text(),
            Some("reviewed")
        );

        let err = store.edit_and_approve(job.id, "again").await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyReviewed { .. }));

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.outcome.unwrap().summary_text(), Some("reviewed"));
    }

    #[tokio::test]
    async fn delete_source_cascades() {
        let (store, subject) = store_with_page().await;
        let source = url("https://a.test");
        store
            .create_job(&Subject::Source(source.clone()), Stage::Crawl)
            .await
            .unwrap();
        store.create_job(&subject, Stage::Scrape).await.unwrap();

        store.delete_source(&source).await.unwrap();

        assert!(store.get_source(&source).await.unwrap().is_none());
        assert!(store.get_page(subject.url()).await.unwrap().is_none());
        assert!(store.jobs_for_subject(&subject).await.unwrap().is_empty());
    }
}
