//! Latency bookkeeping for solve calls.
//!
//! Count, mean, min, max and fuel cover every call; percentiles come from a
//! window of the most recent calls so a long-lived worker stays bounded.

use std::collections::VecDeque;

use crate::module::CallMetrics;

/// Calls kept for percentile estimates.
pub const DEFAULT_WINDOW: usize = 1024;

/// Collected timings of solve calls made through one dispatcher.
#[derive(Debug, Clone)]
pub struct SolveStats {
    recent: VecDeque<u64>,
    window: usize,
    count: u64,
    total_us: u64,
    min_us: u64,
    max_us: u64,
    fuel_consumed: u64,
}

impl Default for SolveStats {
    fn default() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }
}

impl SolveStats {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty collector keeping the last `window` calls (at least
    /// one) for percentiles.
    pub fn with_window(window: usize) -> Self {
        let window = window.max(1);
        Self {
            recent: VecDeque::with_capacity(window),
            window,
            count: 0,
            total_us: 0,
            min_us: u64::MAX,
            max_us: 0,
            fuel_consumed: 0,
        }
    }

    /// Record one call.
    pub fn record(&mut self, metrics: CallMetrics) {
        let us = metrics.execution_time_us;
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(us);

        self.count += 1;
        self.total_us = self.total_us.saturating_add(us);
        self.min_us = self.min_us.min(us);
        self.max_us = self.max_us.max(us);
        self.fuel_consumed += metrics.fuel_consumed.unwrap_or(0);
    }

    /// Number of recorded calls.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Calls currently held for percentiles.
    pub fn window_len(&self) -> usize {
        self.recent.len()
    }

    /// Total fuel consumed across all calls (0 without fuel metering).
    pub fn fuel_consumed(&self) -> u64 {
        self.fuel_consumed
    }

    /// Mean execution time in microseconds.
    pub fn mean_us(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total_us as f64 / self.count as f64
    }

    /// Median execution time in microseconds, over the window.
    pub fn p50_us(&self) -> u64 {
        self.percentile(50)
    }

    /// p99 execution time in microseconds, over the window.
    pub fn p99_us(&self) -> u64 {
        self.percentile(99)
    }

    /// Execution time at percentile `p` of the window.
    pub fn percentile(&self, p: usize) -> u64 {
        if self.recent.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.recent.iter().copied().collect();
        sorted.sort_unstable();
        let idx = (p * sorted.len() / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Fastest call.
    pub fn min_us(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.min_us
        }
    }

    /// Slowest call.
    pub fn max_us(&self) -> u64 {
        self.max_us
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        format!(
            "n={} min={}us mean={:.1}us p50={}us p99={}us max={}us fuel={}",
            self.count(),
            self.min_us(),
            self.mean_us(),
            self.p50_us(),
            self.p99_us(),
            self.max_us(),
            self.fuel_consumed
        )
    }
}
