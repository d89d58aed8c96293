//! End-to-end tests for the pipeline core.
//!
//! These drive the full chain - crawl request, fan-out, scrape,
//! extract, review, fan-in, summarize - against mock collaborators
//! and the in-memory store, using inline draining for determinism.

use std::sync::Arc;
use std::time::Duration;

use dossier::testing::{AnalyzerCall, MockAnalyzer, MockCrawlService, MockScrapeService};
use dossier::{
    Collaborators, CollaboratorError, CrawlOptions, Job, JobLedger, MemoryStore, Outcome,
    Pipeline, PipelineConfig, PipelineError, ReviewStatus, ScrapeData, Stage, StageState,
};

const SOURCE: &str = "https://a.test";
const P1: &str = "https://a.test/p1";
const P2: &str = "https://a.test/p2";

struct Harness {
    pipeline: Pipeline<MemoryStore>,
    crawler: Arc<MockCrawlService>,
    scraper: Arc<MockScrapeService>,
    analyzer: Arc<MockAnalyzer>,
}

/// Zero backoff so retries run inline during draining.
fn test_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_workers(1)
        .with_backoff_base(Duration::ZERO)
}

fn harness_with(
    crawler: MockCrawlService,
    scraper: MockScrapeService,
    analyzer: MockAnalyzer,
    config: PipelineConfig,
) -> Harness {
    let crawler = Arc::new(crawler);
    let scraper = Arc::new(scraper);
    let analyzer = Arc::new(analyzer);
    let collaborators = Collaborators::new(crawler.clone(), scraper.clone(), analyzer.clone());
    Harness {
        pipeline: Pipeline::with_config(MemoryStore::new(), collaborators, config),
        crawler,
        scraper,
        analyzer,
    }
}

/// A harness whose crawl of SOURCE discovers P1 and P2.
fn two_page_harness() -> Harness {
    harness_with(
        MockCrawlService::new().with_discovered(SOURCE, [P1, P2]),
        MockScrapeService::new(),
        MockAnalyzer::new(),
        test_config(),
    )
}

async fn unreviewed_job_for(pipeline: &Pipeline<MemoryStore>, url: &str) -> Job {
    pipeline
        .list_unreviewed()
        .await
        .unwrap()
        .into_iter()
        .find(|j| j.subject.url().as_str() == url)
        .unwrap_or_else(|| panic!("no unreviewed job for {url}"))
}

// ----------------------------------------------------------------------
// Scenario A: crawl fans out into pages, summarize waits
// ----------------------------------------------------------------------

#[tokio::test]
async fn crawl_discovers_pages_and_fans_out() {
    let h = two_page_harness();
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default().with_max_pages(2))
        .await
        .unwrap();
    h.pipeline.drain().await;

    let pages = h.pipeline.pages_for_source(SOURCE).await.unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].url.as_str(), P1);
    assert_eq!(pages[1].url.as_str(), P2);

    // Both pages were scraped; no summarize job exists yet
    assert_eq!(h.scraper.calls().len(), 2);
    assert_eq!(
        h.pipeline.page_stage_state(P1, Stage::Scrape).await.unwrap(),
        StageState::Succeeded
    );
    assert_eq!(
        h.pipeline
            .source_stage_state(SOURCE, Stage::Summarize)
            .await
            .unwrap(),
        StageState::NotStarted
    );

    // The crawl outcome carries the discovery counters
    let history = h.pipeline.source_history(SOURCE).await.unwrap();
    let crawl = history.iter().find(|j| j.stage == Stage::Crawl).unwrap();
    match crawl.outcome.as_ref().unwrap() {
        Outcome::Crawl(outcome) => {
            assert_eq!(outcome.total_pages_found, 2);
            assert_eq!(outcome.max_pages_limit, 2);
        }
        other => panic!("unexpected crawl outcome: {other:?}"),
    }
}

// ----------------------------------------------------------------------
// Scenarios B + C: the fan-in gate
// ----------------------------------------------------------------------

#[tokio::test]
async fn summarize_waits_for_every_page_approval() {
    let h = two_page_harness();
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    // Scenario B: one of two pages approved - gate stays closed
    let p1_job = unreviewed_job_for(&h.pipeline, P1).await;
    h.pipeline.approve(p1_job.id).await.unwrap();

    assert!(!h.pipeline.summarize_ready(SOURCE).await.unwrap());
    assert_eq!(
        h.pipeline
            .source_stage_state(SOURCE, Stage::Summarize)
            .await
            .unwrap(),
        StageState::NotStarted
    );

    // Scenario C: last approval opens the gate
    let p2_job = unreviewed_job_for(&h.pipeline, P2).await;
    h.pipeline.approve(p2_job.id).await.unwrap();

    assert_eq!(
        h.pipeline
            .source_stage_state(SOURCE, Stage::Summarize)
            .await
            .unwrap(),
        StageState::InFlight
    );
    h.pipeline.drain().await;

    // The summarize input is the approved summaries in page-URL order
    let inputs = h.analyzer.summarize_inputs();
    assert_eq!(
        inputs,
        vec![format!(
            "Markdown for {P1}:\n\nSummary of {P1}\n\nMarkdown for {P2}:\n\nSummary of {P2}"
        )]
    );
    assert_eq!(
        h.pipeline
            .source_stage_state(SOURCE, Stage::Summarize)
            .await
            .unwrap(),
        StageState::Unreviewed
    );
}

#[tokio::test]
async fn unreviewed_outcomes_are_listed_oldest_first() {
    let h = two_page_harness();
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    let unreviewed = h.pipeline.list_unreviewed().await.unwrap();
    assert_eq!(unreviewed.len(), 2);
    assert_eq!(unreviewed[0].subject.url().as_str(), P1);
    assert_eq!(unreviewed[1].subject.url().as_str(), P2);
}

#[tokio::test]
async fn late_discovered_page_closes_the_gate_again() {
    let h = two_page_harness();
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    let p1_job = unreviewed_job_for(&h.pipeline, P1).await;
    h.pipeline.approve(p1_job.id).await.unwrap();

    // A page appears before the last approval; it has no approved
    // extract, so even approving p2 must not open the gate.
    h.pipeline
        .add_page_to_source(SOURCE, "https://a.test/p3")
        .await
        .unwrap();

    let p2_job = unreviewed_job_for(&h.pipeline, P2).await;
    h.pipeline.approve(p2_job.id).await.unwrap();

    assert!(!h.pipeline.summarize_ready(SOURCE).await.unwrap());
    assert_eq!(
        h.pipeline
            .source_stage_state(SOURCE, Stage::Summarize)
            .await
            .unwrap(),
        StageState::NotStarted
    );
}

// ----------------------------------------------------------------------
// Scenario D: crawl failure and re-request
// ----------------------------------------------------------------------

#[tokio::test]
async fn failed_crawl_records_error_and_allows_rerequest() {
    let h = harness_with(
        MockCrawlService::new().with_failure(
            SOURCE,
            CollaboratorError::Transient("connection timed out".into()),
        ),
        MockScrapeService::new(),
        MockAnalyzer::new(),
        test_config().with_max_attempts(1),
    );

    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    assert_eq!(
        h.pipeline
            .source_stage_state(SOURCE, Stage::Crawl)
            .await
            .unwrap(),
        StageState::Failed
    );
    assert!(h.pipeline.pages_for_source(SOURCE).await.unwrap().is_empty());

    // Re-requesting creates a new job; the failed one stays in history
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();

    let history = h.pipeline.source_history(SOURCE).await.unwrap();
    let crawls: Vec<_> = history.iter().filter(|j| j.stage == Stage::Crawl).collect();
    assert_eq!(crawls.len(), 2);
    assert!(matches!(crawls[0].outcome, Some(Outcome::Error(_))));
    assert!(crawls[1].is_in_flight());
}

// ----------------------------------------------------------------------
// Retry policy
// ----------------------------------------------------------------------

#[tokio::test]
async fn transient_failure_retries_as_a_new_job() {
    let h = harness_with(
        MockCrawlService::new()
            .with_discovered(SOURCE, [P1])
            .with_failures(SOURCE, 1, CollaboratorError::Transient("reset".into())),
        MockScrapeService::new(),
        MockAnalyzer::new(),
        test_config(),
    );

    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    // First attempt failed, second succeeded, and the error outcome
    // was never overwritten
    assert_eq!(h.crawler.calls().len(), 2);
    let history = h.pipeline.source_history(SOURCE).await.unwrap();
    let crawls: Vec<_> = history.iter().filter(|j| j.stage == Stage::Crawl).collect();
    assert_eq!(crawls.len(), 2);
    assert!(matches!(crawls[0].outcome, Some(Outcome::Error(_))));
    assert!(matches!(crawls[1].outcome, Some(Outcome::Crawl(_))));

    // The retry ran the rest of the pipeline
    assert_eq!(h.pipeline.pages_for_source(SOURCE).await.unwrap().len(), 1);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let h = harness_with(
        MockCrawlService::new()
            .with_failure(SOURCE, CollaboratorError::Permanent("HTTP 404".into())),
        MockScrapeService::new(),
        MockAnalyzer::new(),
        test_config(),
    );

    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    assert_eq!(h.crawler.calls().len(), 1);
    let history = h.pipeline.source_history(SOURCE).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn retries_stop_at_the_attempt_bound() {
    let h = harness_with(
        MockCrawlService::new()
            .with_failure(SOURCE, CollaboratorError::Transient("flaky".into())),
        MockScrapeService::new(),
        MockAnalyzer::new(),
        test_config().with_max_attempts(3),
    );

    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    assert_eq!(h.crawler.calls().len(), 3);
    assert_eq!(
        h.pipeline
            .source_stage_state(SOURCE, Stage::Crawl)
            .await
            .unwrap(),
        StageState::Failed
    );
}

// ----------------------------------------------------------------------
// At-most-one-in-flight
// ----------------------------------------------------------------------

#[tokio::test]
async fn concurrent_crawl_request_is_rejected_while_in_flight() {
    let h = two_page_harness();
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();

    let err = h
        .pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateInFlight { .. }));

    // Once the first crawl completes, a re-request is allowed again
    h.pipeline.drain().await;
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
}

// ----------------------------------------------------------------------
// Review gate
// ----------------------------------------------------------------------

#[tokio::test]
async fn double_approval_fails_without_altering_the_summary() {
    let h = two_page_harness();
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    let job = unreviewed_job_for(&h.pipeline, P1).await;
    h.pipeline
        .edit_and_approve(job.id, "reviewed summary")
        .await
        .unwrap();

    let err = h
        .pipeline
        .edit_and_approve(job.id, "sneaky rewrite")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyReviewed { .. }));

    let stored = h.pipeline.store().get_job(job.id).await.unwrap().unwrap();
    let outcome = stored.outcome.unwrap();
    assert_eq!(outcome.summary_text(), Some("reviewed summary"));
    assert_eq!(outcome.review_status(), Some(ReviewStatus::Approved));
}

#[tokio::test]
async fn pending_edit_survives_into_approval() {
    let h = two_page_harness();
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    let job = unreviewed_job_for(&h.pipeline, P1).await;

    // Editing a pending outcome mutates it in place, no new job
    h.pipeline.edit_summary(job.id, "draft wording").await.unwrap();
    let history = h.pipeline.page_history(P1).await.unwrap();
    assert_eq!(
        history.iter().filter(|j| j.stage == Stage::Extract).count(),
        1
    );

    let approved = h.pipeline.approve(job.id).await.unwrap();
    assert_eq!(
        approved.outcome.as_ref().unwrap().summary_text(),
        Some("draft wording")
    );

    // Editing after approval is rejected
    let err = h.pipeline.edit_summary(job.id, "too late").await.unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyReviewed { .. }));
}

#[tokio::test]
async fn approving_an_unknown_job_is_not_found() {
    let h = two_page_harness();
    let err = h.pipeline.approve(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, PipelineError::JobNotFound { .. }));
}

// ----------------------------------------------------------------------
// Failure isolation
// ----------------------------------------------------------------------

#[tokio::test]
async fn failed_sibling_page_blocks_only_the_gate() {
    let h = harness_with(
        MockCrawlService::new().with_discovered(SOURCE, [P1, P2]),
        MockScrapeService::new()
            .with_failure(P2, CollaboratorError::Permanent("HTTP 410".into())),
        MockAnalyzer::new(),
        test_config(),
    );

    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    // p1 ran its whole chain; p2 failed at scrape
    assert_eq!(
        h.pipeline.page_stage_state(P1, Stage::Extract).await.unwrap(),
        StageState::Unreviewed
    );
    assert_eq!(
        h.pipeline.page_stage_state(P2, Stage::Scrape).await.unwrap(),
        StageState::Failed
    );

    // The gate never opens while p2 lacks an approved extract
    let p1_job = unreviewed_job_for(&h.pipeline, P1).await;
    h.pipeline.approve(p1_job.id).await.unwrap();
    assert!(!h.pipeline.summarize_ready(SOURCE).await.unwrap());
}

// ----------------------------------------------------------------------
// Discovery side effects
// ----------------------------------------------------------------------

#[tokio::test]
async fn external_links_register_new_sources_without_crawling() {
    let h = harness_with(
        MockCrawlService::new().with_discovered(SOURCE, [P1]),
        MockScrapeService::new().with_result(P1, {
            let mut data = ScrapeData::new("# p1");
            data.external_links = vec!["https://elsewhere.test".parse().unwrap()];
            data
        }),
        MockAnalyzer::new(),
        test_config(),
    );

    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    let sources = h.pipeline.list_sources().await.unwrap();
    let urls: Vec<_> = sources.iter().map(|s| s.url.as_str()).collect();
    assert!(urls.contains(&"https://elsewhere.test"));

    // Discovered as a link target only - no crawl was started for it
    assert_eq!(
        h.pipeline
            .source_stage_state("https://elsewhere.test", Stage::Crawl)
            .await
            .unwrap(),
        StageState::NotStarted
    );
}

#[tokio::test]
async fn repeated_crawl_does_not_rescrape_existing_pages() {
    let h = two_page_harness();
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;
    assert_eq!(h.scraper.calls().len(), 2);

    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    // Second crawl rediscovers the same pages; their scrapes are not
    // re-run
    assert_eq!(h.scraper.calls().len(), 2);
}

// ----------------------------------------------------------------------
// Prompts
// ----------------------------------------------------------------------

#[tokio::test]
async fn crawl_prompts_reach_the_analyzer() {
    let h = harness_with(
        MockCrawlService::new().with_discovered(SOURCE, [P1]),
        MockScrapeService::new(),
        MockAnalyzer::new(),
        test_config(),
    );

    h.pipeline
        .request_crawl(
            SOURCE,
            CrawlOptions::default()
                .with_extract_prompt("focus on emissions data")
                .with_summarize_prompt("classify the source"),
        )
        .await
        .unwrap();
    h.pipeline.drain().await;

    let extract_prompt = h.analyzer.calls().into_iter().find_map(|c| match c {
        AnalyzerCall::Extract { prompt, .. } => Some(prompt),
        _ => None,
    });
    assert_eq!(extract_prompt, Some(Some("focus on emissions data".into())));

    let p1_job = unreviewed_job_for(&h.pipeline, P1).await;
    h.pipeline.approve(p1_job.id).await.unwrap();
    h.pipeline.drain().await;

    let summarize_prompt = h.analyzer.calls().into_iter().find_map(|c| match c {
        AnalyzerCall::Summarize { prompt, .. } => Some(prompt),
        _ => None,
    });
    assert_eq!(summarize_prompt, Some(Some("classify the source".into())));
}

#[tokio::test]
async fn manual_extract_rerun_uses_the_given_prompt() {
    let h = harness_with(
        MockCrawlService::new().with_discovered(SOURCE, [P1]),
        MockScrapeService::new(),
        MockAnalyzer::new(),
        test_config(),
    );
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    h.pipeline
        .request_extract(P1, Some("second opinion".into()))
        .await
        .unwrap();
    h.pipeline.drain().await;

    let history = h.pipeline.page_history(P1).await.unwrap();
    let extracts: Vec<_> = history.iter().filter(|j| j.stage == Stage::Extract).collect();
    assert_eq!(extracts.len(), 2);
    match extracts[1].outcome.as_ref().unwrap() {
        Outcome::Extract(outcome) => assert_eq!(outcome.prompt, "second opinion"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

// ----------------------------------------------------------------------
// Manual summarize and empty sources
// ----------------------------------------------------------------------

#[tokio::test]
async fn manual_summarize_without_approvals_fails_permanently() {
    let h = two_page_harness();
    h.pipeline.add_source(SOURCE).await.unwrap();
    assert!(!h.pipeline.summarize_ready(SOURCE).await.unwrap());

    h.pipeline.request_summarize(SOURCE, None).await.unwrap();
    h.pipeline.drain().await;

    assert_eq!(
        h.pipeline
            .source_stage_state(SOURCE, Stage::Summarize)
            .await
            .unwrap(),
        StageState::Failed
    );
}

// ----------------------------------------------------------------------
// Operator actions
// ----------------------------------------------------------------------

#[tokio::test]
async fn delete_source_cascades_and_reset_wipes() {
    let h = two_page_harness();
    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();
    h.pipeline.drain().await;

    h.pipeline.delete_source(SOURCE).await.unwrap();
    let err = h.pipeline.get_source(SOURCE).await.unwrap_err();
    assert!(matches!(err, PipelineError::SourceNotFound { .. }));

    h.pipeline.add_source(SOURCE).await.unwrap();
    h.pipeline.reset().await.unwrap();
    assert!(h.pipeline.list_sources().await.unwrap().is_empty());
}

// ----------------------------------------------------------------------
// Background workers
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn background_workers_run_the_pipeline() {
    let h = two_page_harness();
    h.pipeline.start();

    h.pipeline
        .request_crawl(SOURCE, CrawlOptions::default())
        .await
        .unwrap();

    // Wait for the fan-out to reach the review gate
    let mut done = false;
    for _ in 0..200 {
        if h.pipeline.list_unreviewed().await.unwrap().len() == 2 {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.pipeline.stop().await;

    assert!(done, "pipeline did not reach the review gate in time");
    assert_eq!(h.pipeline.pages_for_source(SOURCE).await.unwrap().len(), 2);
}
