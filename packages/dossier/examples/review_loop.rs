//! Review Loop - Reference Integration
//!
//! This example runs the full pipeline against mock collaborators and
//! plays the reviewer's role in code: crawl a source, wait for the
//! fan-out to produce extractions, approve them, and print the final
//! source summary once the fan-in gate fires.
//!
//! In a real deployment the approval half lives behind your API/UI;
//! everything else stays exactly as shown here, with the mocks swapped
//! for real collaborators (e.g. `HttpCrawler`/`HttpScraper` plus an
//! LLM-backed `Analyzer`).
//!
//! ```bash
//! cargo run --example review_loop
//! ```

use std::sync::Arc;
use std::time::Duration;

use dossier::testing::{MockAnalyzer, MockCrawlService, MockScrapeService};
use dossier::{Collaborators, CrawlOptions, MemoryStore, Outcome, Pipeline, Stage, StageState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let source = "https://example.test";

    // Mocks standing in for the crawl, scrape and LLM services
    let crawler = MockCrawlService::new()
        .with_discovered(source, ["https://example.test/about", "https://example.test/report"]);
    let scraper = MockScrapeService::new();
    let analyzer = MockAnalyzer::new();

    let collaborators = Collaborators::new(
        Arc::new(crawler),
        Arc::new(scraper),
        Arc::new(analyzer),
    );
    let pipeline = Arc::new(Pipeline::new(MemoryStore::new(), collaborators));
    pipeline.start();

    // Kick off the crawl; the dispatcher fans out from here
    pipeline
        .request_crawl(source, CrawlOptions::default().with_max_pages(5))
        .await?;

    // Approve extractions as they show up, until the source summary
    // has been produced and approved
    loop {
        for job in pipeline.list_unreviewed().await? {
            let summary = job
                .outcome
                .as_ref()
                .and_then(|o| o.summary_text())
                .unwrap_or_default();
            println!("approving {} for {} ({summary:?})", job.stage, job.subject);
            pipeline.approve(job.id).await?;
        }

        if pipeline.source_stage_state(source, Stage::Summarize).await?
            == StageState::Approved
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // The approved summarize outcome is the pipeline's final product
    let history = pipeline.source_history(source).await?;
    for job in &history {
        if let Some(Outcome::Summarize(outcome)) = &job.outcome {
            println!("\nsource summary: {}", outcome.summary);
            println!("classification: {:?} / {:?}", outcome.data_origin, outcome.source_format);
            println!("tokens: {}", outcome.usage.total());
        }
    }

    pipeline.stop().await;
    Ok(())
}
