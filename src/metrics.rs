//! Metrics store
//!
//! Bounded ring buffers of recent response times, error events, and load
//! scores, plus the cumulative counters the stats snapshot and the sizing
//! engine read. Every buffer evicts its oldest entry at capacity, keeping
//! memory flat over pool uptime.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const RESPONSE_CAPACITY: usize = 1000;
const ERROR_CAPACITY: usize = 100;
const LOAD_CAPACITY: usize = 60;

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// Aggregated performance report over the retained response-time window
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceReport {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub avg_response_time_ms: f64,
    pub p50_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
    pub throughput_rps: f64,
    pub error_rate_percent: f64,
}

pub struct MetricsStore {
    inner: Mutex<MetricsInner>,
}

struct MetricsInner {
    response_times: VecDeque<(Instant, f64)>,
    errors: VecDeque<Instant>,
    load_scores: VecDeque<f64>,
    total_served: u64,
    error_count: u64,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsInner {
                response_times: VecDeque::with_capacity(RESPONSE_CAPACITY),
                errors: VecDeque::with_capacity(ERROR_CAPACITY),
                load_scores: VecDeque::with_capacity(LOAD_CAPACITY),
                total_served: 0,
                error_count: 0,
            }),
        }
    }

    /// Record a served request and the time the caller waited for it
    pub fn record_success(&self, wait_ms: f64) {
        let mut inner = self.inner.lock();
        inner.total_served += 1;
        if inner.response_times.len() == RESPONSE_CAPACITY {
            inner.response_times.pop_front();
        }
        inner.response_times.push_back((Instant::now(), wait_ms));
    }

    /// Record a failed acquisition
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.error_count += 1;
        if inner.errors.len() == ERROR_CAPACITY {
            inner.errors.pop_front();
        }
        inner.errors.push_back(Instant::now());
    }

    /// Record one load-score sample from the sizing engine
    pub fn record_load_score(&self, score: f64) {
        let mut inner = self.inner.lock();
        if inner.load_scores.len() == LOAD_CAPACITY {
            inner.load_scores.pop_front();
        }
        inner.load_scores.push_back(score);
    }

    pub fn total_served(&self) -> u64 {
        self.inner.lock().total_served
    }

    pub fn error_count(&self) -> u64 {
        self.inner.lock().error_count
    }

    /// Success rate in percent; 100 when nothing has been requested yet
    pub fn success_rate(&self) -> f64 {
        let inner = self.inner.lock();
        let total = inner.total_served + inner.error_count;
        if total == 0 {
            100.0
        } else {
            inner.total_served as f64 / total as f64 * 100.0
        }
    }

    /// Mean wait over the whole retained window; zero when empty
    pub fn average_wait_ms(&self) -> f64 {
        let inner = self.inner.lock();
        mean(inner.response_times.iter().map(|(_, ms)| *ms))
    }

    /// Mean wait over the most recent `n` samples; zero when empty
    pub fn recent_average_wait_ms(&self, n: usize) -> f64 {
        let inner = self.inner.lock();
        let len = inner.response_times.len();
        let skip = len.saturating_sub(n);
        mean(inner.response_times.iter().skip(skip).map(|(_, ms)| *ms))
    }

    /// p-th percentile (0..=1) of retained response times, linearly
    /// interpolated between adjacent samples; zero when empty
    pub fn percentile(&self, p: f64) -> f64 {
        let inner = self.inner.lock();
        let mut sorted: Vec<f64> = inner.response_times.iter().map(|(_, ms)| *ms).collect();
        drop(inner);
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        percentile_of(&sorted, p)
    }

    /// Requests served in the last 60 seconds, per second
    pub fn throughput_rps(&self) -> f64 {
        let inner = self.inner.lock();
        let cutoff = Instant::now() - THROUGHPUT_WINDOW;
        let recent = inner
            .response_times
            .iter()
            .filter(|(at, _)| *at > cutoff)
            .count();
        recent as f64 / THROUGHPUT_WINDOW.as_secs_f64()
    }

    pub fn report(&self) -> PerformanceReport {
        let inner = self.inner.lock();
        let total_served = inner.total_served;
        let error_count = inner.error_count;
        let mut sorted: Vec<f64> = inner.response_times.iter().map(|(_, ms)| *ms).collect();
        let cutoff = Instant::now() - THROUGHPUT_WINDOW;
        let recent = inner
            .response_times
            .iter()
            .filter(|(at, _)| *at > cutoff)
            .count();
        drop(inner);

        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let total = total_served + error_count;
        let error_rate = if total > 0 {
            error_count as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        PerformanceReport {
            total_requests: total,
            successful_requests: total_served,
            failed_requests: error_count,
            min_response_time_ms: sorted.first().copied().unwrap_or(0.0),
            max_response_time_ms: sorted.last().copied().unwrap_or(0.0),
            avg_response_time_ms: mean(sorted.iter().copied()),
            p50_response_time_ms: percentile_of(&sorted, 0.50),
            p95_response_time_ms: percentile_of(&sorted, 0.95),
            p99_response_time_ms: percentile_of(&sorted, 0.99),
            throughput_rps: recent as f64 / THROUGHPUT_WINDOW.as_secs_f64(),
            error_rate_percent: error_rate,
        }
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn percentile_of(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let k = (sorted.len() - 1) as f64 * p;
    let f = k.floor() as usize;
    let c = k - f as f64;

    if f + 1 >= sorted.len() {
        return sorted[sorted.len() - 1];
    }

    sorted[f] * (1.0 - c) + sorted[f + 1] * c
}
