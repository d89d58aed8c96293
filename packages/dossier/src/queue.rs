//! Work queue - the seam between the orchestrator and the dispatcher.
//!
//! The orchestrator enqueues [`WorkItem`]s after creating their ledger
//! jobs; dispatcher workers dequeue and execute them. The queue is an
//! explicit interface so the orchestrator never touches a broker; the
//! default [`MemoryQueue`] is channel-backed, but any durable
//! implementation can stand in.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::types::job::{Stage, Subject};

/// Per-stage parameters carried alongside a queued job.
///
/// These are request-scoped inputs (page budgets, prompt overrides),
/// not ledger state; `None` prompts fall back to the source's stored
/// defaults at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageParams {
    Crawl { max_pages: u32 },
    Scrape,
    Extract { prompt: Option<String> },
    Summarize { prompt: Option<String> },
}

/// One queued unit of work: an in-flight ledger job plus its
/// request-scoped parameters and attempt number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub job_id: Uuid,
    pub subject: Subject,
    pub stage: Stage,
    /// 1-based attempt counter for the retry policy
    pub attempt: u32,
    pub params: StageParams,
}

/// Queue of pending work items.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Add an item to the queue.
    fn enqueue(&self, item: WorkItem) -> Result<()>;

    /// Wait for the next item. Returns `None` once the queue is
    /// closed and drained.
    async fn dequeue(&self) -> Option<WorkItem>;

    /// Take the next item without waiting, if one is queued.
    fn try_dequeue(&self) -> Option<WorkItem>;

    /// Close the queue; pending items can still be dequeued.
    fn close(&self);

    /// Number of items currently queued.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Channel-backed in-memory work queue.
pub struct MemoryQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    pending: AtomicUsize,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            pending: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    fn enqueue(&self, item: WorkItem) -> Result<()> {
        let guard = self.sender.lock().unwrap();
        let sender = guard.as_ref().ok_or(PipelineError::QueueClosed)?;
        sender.send(item).map_err(|_| PipelineError::QueueClosed)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn dequeue(&self) -> Option<WorkItem> {
        let mut receiver = self.receiver.lock().await;
        let item = receiver.recv().await;
        if item.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    fn try_dequeue(&self) -> Option<WorkItem> {
        let mut receiver = self.receiver.try_lock().ok()?;
        let item = receiver.try_recv().ok();
        if item.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    fn close(&self) {
        self.sender.lock().unwrap().take();
    }

    fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::url::NormalizedUrl;

    fn item(stage: Stage) -> WorkItem {
        WorkItem {
            job_id: Uuid::new_v4(),
            subject: Subject::Source(NormalizedUrl::new("https://a.test").unwrap()),
            stage,
            attempt: 1,
            params: StageParams::Crawl { max_pages: 5 },
        }
    }

    #[tokio::test]
    async fn enqueue_dequeue_preserves_order() {
        let queue = MemoryQueue::new();
        queue.enqueue(item(Stage::Crawl)).unwrap();
        queue.enqueue(item(Stage::Scrape)).unwrap();
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.dequeue().await.unwrap().stage, Stage::Crawl);
        assert_eq!(queue.dequeue().await.unwrap().stage, Stage::Scrape);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn try_dequeue_on_empty_returns_none() {
        let queue = MemoryQueue::new();
        assert!(queue.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn closed_queue_rejects_enqueue_but_drains() {
        let queue = MemoryQueue::new();
        queue.enqueue(item(Stage::Crawl)).unwrap();
        queue.close();

        assert!(matches!(
            queue.enqueue(item(Stage::Scrape)),
            Err(PipelineError::QueueClosed)
        ));
        assert!(queue.dequeue().await.is_some());
        assert!(queue.dequeue().await.is_none());
    }
}
