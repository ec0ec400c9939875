use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, TransportError};
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutorMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub attempts: u64,
    pub retries: u64,
    pub redirects: u64,
    pub rate_limit_waits: u64,
    pub cache_hits: u64,
    pub retries_exhausted: u64,
    pub transport_errors: u64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ExecutorMetrics {
    inner: Arc<ExecutorMetricsInner>,
}

#[derive(Debug, Default)]
struct ExecutorMetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    redirects: AtomicU64,
    rate_limit_waits: AtomicU64,
    cache_hits: AtomicU64,
    retries_exhausted: AtomicU64,
    transport_errors: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

impl ExecutorMetrics {
    pub(crate) fn record_request_started(&self) {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self) {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_status(&self, status: u16) {
        let mut counts = lock_unpoisoned(&self.inner.status_counts);
        *counts.entry(status).or_insert(0) += 1;
    }

    pub(crate) fn record_transport_error(&self, error: &TransportError) {
        self.inner.transport_errors.fetch_add(1, Ordering::Relaxed);
        self.add_error_count(format!("transport:{}", error.code()));
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redirect(&self) {
        self.inner.redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limit_wait(&self) {
        self.inner.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_succeeded(&self) {
        self.inner
            .requests_succeeded
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_failed(&self, error: &Error) {
        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        if matches!(error, Error::MaxRetriesReached { .. }) {
            self.inner
                .retries_exhausted
                .fetch_add(1, Ordering::Relaxed);
        }
        self.add_error_count(error.code().as_str().to_owned());
    }

    fn add_error_count(&self, key: String) {
        let mut counts = lock_unpoisoned(&self.inner.error_counts);
        *counts.entry(key).or_insert(0) += 1;
    }

    pub(crate) fn snapshot(&self) -> ExecutorMetricsSnapshot {
        ExecutorMetricsSnapshot {
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            attempts: self.inner.attempts.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            redirects: self.inner.redirects.load(Ordering::Relaxed),
            rate_limit_waits: self.inner.rate_limit_waits.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            retries_exhausted: self.inner.retries_exhausted.load(Ordering::Relaxed),
            transport_errors: self.inner.transport_errors.load(Ordering::Relaxed),
            status_counts: lock_unpoisoned(&self.inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&self.inner.error_counts).clone(),
        }
    }
}
