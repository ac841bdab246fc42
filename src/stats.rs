//! Per-interval counters for the resolver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Where the answer to an A question came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Doh,
    Upstream,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Cache => "CACHED",
            Source::Doh => "DOH",
            Source::Upstream => "UPSTREAM",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Counters for one reporting interval.
#[derive(Default)]
pub struct Stats {
    by_source: [AtomicU64; 3],
    /// Questions that ended with no address at all.
    unanswered: AtomicU64,
    elapsed_us: AtomicU64,
    slowest_us: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one A question answered from `source`.
    pub fn record(&self, source: Source, answered: bool, elapsed: Duration) {
        self.by_source[source.index()].fetch_add(1, Ordering::Relaxed);
        if !answered {
            self.unanswered.fetch_add(1, Ordering::Relaxed);
        }

        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.elapsed_us.fetch_add(us, Ordering::Relaxed);
        self.slowest_us.fetch_max(us, Ordering::Relaxed);
    }

    /// Take the counters for the interval that just ended.
    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let [cached, doh, upstream] = self
            .by_source
            .each_ref()
            .map(|counter| counter.swap(0, Ordering::Relaxed));
        let requests = cached + doh + upstream;
        let elapsed_us = self.elapsed_us.swap(0, Ordering::Relaxed);

        StatsSnapshot {
            requests,
            cached,
            doh,
            upstream,
            unanswered: self.unanswered.swap(0, Ordering::Relaxed),
            avg_response: Duration::from_micros(elapsed_us.checked_div(requests).unwrap_or(0)),
            slowest_response: Duration::from_micros(self.slowest_us.swap(0, Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub cached: u64,
    pub doh: u64,
    pub upstream: u64,
    pub unanswered: u64,
    pub avg_response: Duration,
    pub slowest_response: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_counts_by_source() {
        let stats = Stats::new();
        stats.record(Source::Cache, true, Duration::from_millis(1));
        stats.record(Source::Doh, true, Duration::from_millis(3));
        stats.record(Source::Upstream, false, Duration::from_millis(2));

        let snapshot = stats.snapshot_and_reset();

        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.cached, 1);
        assert_eq!(snapshot.doh, 1);
        assert_eq!(snapshot.upstream, 1);
        assert_eq!(snapshot.unanswered, 1);
        assert_eq!(snapshot.avg_response, Duration::from_millis(2));
        assert_eq!(snapshot.slowest_response, Duration::from_millis(3));
    }

    #[test]
    fn snapshot_resets_counters() {
        let stats = Stats::new();
        stats.record(Source::Cache, true, Duration::from_millis(5));
        stats.snapshot_and_reset();

        let snapshot = stats.snapshot_and_reset();

        assert_eq!(snapshot.requests, 0);
        assert_eq!(snapshot.avg_response, Duration::ZERO);
        assert_eq!(snapshot.slowest_response, Duration::ZERO);
    }
}
