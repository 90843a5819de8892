//! Request outcome bookkeeping, so `health()` never has to hit the API

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use crate::types::SourceHealth;

#[derive(Debug, Default)]
pub struct RequestStats {
    successes: AtomicU64,
    failures: AtomicU64,
    total_latency_ms: AtomicU64,
    /// Millis since epoch, 0 = never
    last_success_ms: AtomicI64,
    last_failure_ms: AtomicI64,
}

impl RequestStats {
    pub fn record_success(&self, latency: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.last_success_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// At least one success, and nothing failed since
    pub fn is_healthy(&self) -> bool {
        let last_success = self.last_success_ms.load(Ordering::Relaxed);
        last_success > 0 && last_success >= self.last_failure_ms.load(Ordering::Relaxed)
    }

    /// 1.0 before the first request
    pub fn success_rate(&self) -> f64 {
        let ok = self.successes.load(Ordering::Relaxed);
        let total = ok + self.failures.load(Ordering::Relaxed);
        if total == 0 {
            1.0
        } else {
            ok as f64 / total as f64
        }
    }

    pub fn avg_latency_ms(&self) -> u64 {
        let ok = self.successes.load(Ordering::Relaxed);
        if ok == 0 {
            0
        } else {
            self.total_latency_ms.load(Ordering::Relaxed) / ok
        }
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        match self.last_success_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn report(&self, source: &str) -> SourceHealth {
        let is_healthy = self.is_healthy();
        SourceHealth {
            source: source.to_string(),
            is_healthy,
            last_success: self.last_success(),
            last_error: (!is_healthy && self.failures.load(Ordering::Relaxed) > 0)
                .then(|| "Recent failures detected".to_string()),
            success_rate_24h: self.success_rate(),
            avg_latency_ms: self.avg_latency_ms(),
        }
    }
}
