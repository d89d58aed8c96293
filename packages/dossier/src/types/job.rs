//! Job model - one immutable attempt at one pipeline stage.
//!
//! A [`Job`] is an append-only record: it is created without an
//! outcome ("in flight") and receives exactly one [`Outcome`] when the
//! attempt completes. Corrections and retries are new jobs for the same
//! (subject, stage); the most recently created one determines the
//! subject's [`StageState`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::outcome::{Outcome, ReviewStatus};
use super::url::NormalizedUrl;

/// The four pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Crawl,
    Scrape,
    Extract,
    Summarize,
}

impl Stage {
    /// Stable identifier used in logs and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Crawl => "crawl",
            Stage::Scrape => "scrape",
            Stage::Extract => "extract",
            Stage::Summarize => "summarize",
        }
    }

    /// Whether outcomes of this stage pass through the review gate.
    pub fn is_reviewed(&self) -> bool {
        matches!(self, Stage::Extract | Stage::Summarize)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job operates on: a source or one of its pages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum Subject {
    Source(NormalizedUrl),
    Page(NormalizedUrl),
}

impl Subject {
    /// The URL identifying the subject.
    pub fn url(&self) -> &NormalizedUrl {
        match self {
            Subject::Source(url) | Subject::Page(url) => url,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Source(url) => write!(f, "source {url}"),
            Subject::Page(url) => write!(f, "page {url}"),
        }
    }
}

/// One attempt at one stage for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub subject: Subject,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    /// Absent while the attempt is running
    pub outcome: Option<Outcome>,
}

impl Job {
    /// Create a fresh in-flight job.
    pub fn new(subject: Subject, stage: Stage) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject,
            stage,
            created_at: Utc::now(),
            outcome: None,
        }
    }

    /// Whether the attempt is still running.
    pub fn is_in_flight(&self) -> bool {
        self.outcome.is_none()
    }

    /// The state this job puts its (subject, stage) in.
    pub fn state(&self) -> StageState {
        match &self.outcome {
            None => StageState::InFlight,
            Some(outcome) if outcome.is_error() => StageState::Failed,
            Some(outcome) => match outcome.review_status() {
                Some(ReviewStatus::Unreviewed) => StageState::Unreviewed,
                Some(ReviewStatus::Approved) => StageState::Approved,
                None => StageState::Succeeded,
            },
        }
    }
}

/// Derived state of a (subject, stage) pair.
///
/// `Succeeded` is terminal for CRAWL/SCRAPE; EXTRACT/SUMMARIZE
/// successes sub-state into `Unreviewed` then `Approved`, the latter
/// reachable only through the review gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageState {
    NotStarted,
    InFlight,
    Failed,
    Succeeded,
    Unreviewed,
    Approved,
}

impl StageState {
    /// Derive the state from the most recent job, if any.
    pub fn from_latest(latest: Option<&Job>) -> Self {
        latest.map(Job::state).unwrap_or(StageState::NotStarted)
    }

    /// Whether a new attempt may be started from this state.
    ///
    /// `Failed` does not block re-creation; only a running attempt
    /// does.
    pub fn allows_new_attempt(&self) -> bool {
        !matches!(self, StageState::InFlight)
    }
}
