//! Pipeline configuration.

use std::time::Duration;

/// Tunables for the dispatcher and orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of dispatcher workers
    pub workers: usize,
    /// Total attempts per (subject, stage) before a transient failure
    /// becomes terminal
    pub max_attempts: u32,
    /// Backoff before attempt N+1 is `backoff_base * 2^(N-1)`
    pub backoff_base: Duration,
    /// Upper bound on the computed backoff
    pub backoff_cap: Duration,
    /// Timeout for a single collaborator call
    pub collaborator_timeout: Duration,
    /// Page budget for crawl requests that don't specify one
    pub default_max_pages: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(3600),
            collaborator_timeout: Duration::from_secs(60),
            default_max_pages: 10,
        }
    }
}

impl PipelineConfig {
    /// Set the number of dispatcher workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the total attempt bound for transient failures.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff base. A zero base retries immediately, which
    /// keeps inline draining deterministic in tests.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set the collaborator call timeout.
    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    /// Set the default crawl page budget.
    pub fn with_default_max_pages(mut self, max_pages: u32) -> Self {
        self.default_max_pages = max_pages;
        self
    }

    /// Backoff before the attempt following `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}
