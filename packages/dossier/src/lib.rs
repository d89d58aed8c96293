//! Crawl-to-Summary Job Pipeline
//!
//! A library for orchestrating a chain of dependent, asynchronously
//! executed pipeline stages - CRAWL, SCRAPE, EXTRACT, SUMMARIZE - over
//! a dynamically growing set of resources, with a human approval gate
//! before LLM-produced outcomes count as final.
//!
//! # Design
//!
//! - **Append-only ledger**: every stage attempt is an immutable
//!   [`Job`]; corrections and retries are new jobs, and the most
//!   recent one determines a subject's state. Full history is always
//!   retrievable.
//! - **Fan-out / fan-in**: one CRAWL outcome spawns per-page SCRAPE
//!   jobs; SUMMARIZE starts only once every page of a source has an
//!   approved EXTRACT, checked as a pure predicate over ledger state.
//! - **External collaborators**: crawling, scraping and the
//!   content-understanding engine sit behind traits; the core never
//!   performs I/O itself outside the dispatcher's collaborator calls.
//! - **Bounded retries**: transient collaborator failures re-attempt
//!   with exponential backoff; permanent ones record terminal Error
//!   outcomes immediately.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dossier::{
//!     Collaborators, CrawlOptions, HttpCrawler, HttpScraper, MemoryStore, Pipeline,
//! };
//!
//! let collaborators = Collaborators::new(
//!     Arc::new(HttpCrawler::new()),
//!     Arc::new(HttpScraper::new()),
//!     Arc::new(my_analyzer),
//! );
//! let pipeline = Pipeline::new(MemoryStore::new(), collaborators);
//! pipeline.start();
//!
//! pipeline.request_crawl("https://example.com", CrawlOptions::default()).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - collaborator contracts and storage traits
//! - [`types`] - jobs, outcomes, sources, pages, normalized URLs
//! - [`stores`] - storage implementations (MemoryStore, SqliteStore)
//! - [`orchestrator`] - the stage state machine
//! - [`dispatcher`] - the bounded worker pool and retry policy
//! - [`review`] - the human approval gate
//! - [`collaborators`] - reference HTTP implementations
//! - [`testing`] - mock collaborators for tests

pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod review;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{CollabResult, CollaboratorError, PipelineError, Result};
pub use traits::{
    analyzer::{Analyzer, PageAnalysis, SourceAnalysis},
    crawler::{CrawlData, CrawlService},
    scraper::{ScrapeData, ScrapeService},
    store::{JobLedger, PipelineStore, ResourceRegistry},
};
pub use types::{
    job::{Job, Stage, StageState, Subject},
    outcome::{
        CrawlOutcome, DataOrigin, DatasetPresence, ExtractOutcome, FailureKind, FocusArea,
        JobError, Outcome, RelevantLinks, Relevancy, ReviewStatus, ScrapeOutcome, SourceFormat,
        SummarizeOutcome, TokenUsage,
    },
    resource::{Page, Source},
    url::NormalizedUrl,
};

// Re-export the assembled pipeline and its moving parts
pub use config::PipelineConfig;
pub use dispatcher::{Collaborators, Dispatcher};
pub use orchestrator::{CrawlOptions, Orchestrator};
pub use pipeline::Pipeline;
pub use queue::{MemoryQueue, StageParams, WorkItem, WorkQueue};
pub use review::ReviewGate;

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

// Re-export reference collaborators
pub use collaborators::{HttpCrawler, HttpScraper};
