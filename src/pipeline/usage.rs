//! Per-run usage accounting.
//!
//! One accumulator is created per run and shared by reference with every
//! task of that run, so concurrent runs never see each other's counts.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct UsageAccumulator {
    inference_calls: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    backend_failures: AtomicU64,
    parse_failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    prompt_chars: AtomicU64,
    response_chars: AtomicU64,
}

/// Snapshot of a run's usage, reported in the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub inference_calls: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub backend_failures: u64,
    pub parse_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub prompt_chars: u64,
    pub response_chars: u64,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, prompt_chars: usize) {
        self.inference_calls.fetch_add(1, Ordering::Relaxed);
        self.prompt_chars.fetch_add(prompt_chars as u64, Ordering::Relaxed);
    }

    pub fn record_response(&self, response_chars: usize) {
        self.response_chars.fetch_add(response_chars as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_failure(&self) {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn summary(&self) -> UsageSummary {
        UsageSummary {
            inference_calls: self.inference_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            prompt_chars: self.prompt_chars.load(Ordering::Relaxed),
            response_chars: self.response_chars.load(Ordering::Relaxed),
        }
    }
}
