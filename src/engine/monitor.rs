//! Performance monitoring and adaptive pacing
//!
//! Advisory only: the monitor observes throughput and error rates, and the
//! balancer publishes a recommended inter-request delay that workers read
//! before each task. Nothing here mutates worker behavior directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use statrs::statistics::{Data, OrderStatistics};

use crate::models::WorkerStats;

/// Event timestamps retained per window
const MAX_SEARCH_SAMPLES: usize = 1000;
const MAX_MATCH_SAMPLES: usize = 500;
const MAX_ERROR_SAMPLES: usize = 100;

/// Snapshot of overall run statistics
#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    pub total_searches: u64,
    pub total_matches: u64,
    pub total_errors: u64,
    pub elapsed: Duration,
    pub avg_search_rate: f64,
    pub current_search_rate: f64,
    pub matches_per_minute: u64,
    pub errors_per_minute: u64,
}

/// Sliding-window performance tracker, shared across workers
pub struct PerformanceMonitor {
    window: Duration,
    started: Instant,

    search_times: Mutex<VecDeque<Instant>>,
    match_times: Mutex<VecDeque<Instant>>,
    error_times: Mutex<VecDeque<Instant>>,

    total_searches: AtomicU64,
    total_matches: AtomicU64,
    total_errors: AtomicU64,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl PerformanceMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            started: Instant::now(),
            search_times: Mutex::new(VecDeque::with_capacity(MAX_SEARCH_SAMPLES)),
            match_times: Mutex::new(VecDeque::with_capacity(MAX_MATCH_SAMPLES)),
            error_times: Mutex::new(VecDeque::with_capacity(MAX_ERROR_SAMPLES)),
            total_searches: AtomicU64::new(0),
            total_matches: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
        }
    }

    fn push_sample(times: &Mutex<VecDeque<Instant>>, max: usize) {
        let mut guard = times.lock().expect("monitor mutex poisoned");
        if guard.len() == max {
            guard.pop_front();
        }
        guard.push_back(Instant::now());
    }

    fn count_recent(times: &Mutex<VecDeque<Instant>>, window: Duration) -> u64 {
        let now = Instant::now();
        let guard = times.lock().expect("monitor mutex poisoned");
        guard
            .iter()
            .filter(|t| now.duration_since(**t) <= window)
            .count() as u64
    }

    /// Record a completed search
    pub fn record_search(&self) {
        Self::push_sample(&self.search_times, MAX_SEARCH_SAMPLES);
        self.total_searches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a match found
    pub fn record_match(&self) {
        Self::push_sample(&self.match_times, MAX_MATCH_SAMPLES);
        self.total_matches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error
    pub fn record_error(&self) {
        Self::push_sample(&self.error_times, MAX_ERROR_SAMPLES);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Current searches per second over the sliding window
    pub fn search_rate(&self) -> f64 {
        let recent = Self::count_recent(&self.search_times, self.window);
        if recent == 0 {
            return 0.0;
        }
        recent as f64 / self.window.as_secs_f64()
    }

    /// Matches in the last minute
    pub fn matches_per_minute(&self) -> u64 {
        Self::count_recent(&self.match_times, Duration::from_secs(60))
    }

    /// Errors in the last minute
    pub fn errors_per_minute(&self) -> u64 {
        Self::count_recent(&self.error_times, Duration::from_secs(60))
    }

    /// Snapshot of overall statistics
    pub fn snapshot(&self) -> MonitorSnapshot {
        let elapsed = self.started.elapsed();
        let total_searches = self.total_searches.load(Ordering::Relaxed);

        MonitorSnapshot {
            total_searches,
            total_matches: self.total_matches.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            elapsed,
            avg_search_rate: if elapsed.as_secs_f64() > 0.0 {
                total_searches as f64 / elapsed.as_secs_f64()
            } else {
                0.0
            },
            current_search_rate: self.search_rate(),
            matches_per_minute: self.matches_per_minute(),
            errors_per_minute: self.errors_per_minute(),
        }
    }

    /// Human-readable estimated time to completion
    pub fn eta(&self, total: u64, processed: u64) -> String {
        if processed >= total {
            return "Complete".to_string();
        }

        let rate = self.search_rate();
        if rate <= 0.0 {
            return "Unknown".to_string();
        }

        let remaining_secs = (total - processed) as f64 / rate;
        if remaining_secs < 60.0 {
            format!("{remaining_secs:.0} seconds")
        } else if remaining_secs < 3600.0 {
            format!("{:.1} minutes", remaining_secs / 60.0)
        } else if remaining_secs < 86_400.0 {
            format!("{:.1} hours", remaining_secs / 3600.0)
        } else {
            format!("{:.1} days", remaining_secs / 86_400.0)
        }
    }

    /// Log a status report with progress and ETA
    pub fn log_status(&self, total: u64, processed: u64) {
        let snap = self.snapshot();
        let progress = if total > 0 {
            processed as f64 / total as f64 * 100.0
        } else {
            100.0
        };

        tracing::info!(
            processed,
            total,
            progress_pct = format!("{progress:.2}"),
            searches = snap.total_searches,
            matches = snap.total_matches,
            errors = snap.total_errors,
            rate = format!("{:.2}/s", snap.current_search_rate),
            errors_per_min = snap.errors_per_minute,
            eta = self.eta(total, processed),
            "Progress report"
        );
    }
}

/// Identify workers whose search counts fall below a percentile of the pool
///
/// Meaningful only after workers have been joined (their stats are final).
pub fn identify_slow_workers(stats: &[WorkerStats], threshold_percentile: u64) -> Vec<usize> {
    if stats.len() < 2 {
        return Vec::new();
    }

    let counts: Vec<f64> = stats.iter().map(|s| s.searches as f64).collect();
    let mut data = Data::new(counts);
    let threshold = data.percentile(threshold_percentile as usize);

    stats
        .iter()
        .filter(|s| (s.searches as f64) < threshold)
        .map(|s| s.worker_id)
        .collect()
}

/// Adaptive delay recommendation based on observed error rates
///
/// Publishes the current recommendation through an atomic so workers can read
/// it without locking; adjustments happen at most once per interval.
pub struct AdaptiveLoadBalancer {
    current_delay_ms: AtomicU64,
    min_delay_ms: u64,
    max_delay_ms: u64,

    /// Errors per minute above which delay is increased
    error_threshold: u64,

    adjust_interval: Duration,
    last_adjustment: Mutex<Instant>,
}

impl AdaptiveLoadBalancer {
    pub fn new(initial_delay: Duration, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            current_delay_ms: AtomicU64::new(initial_delay.as_millis() as u64),
            min_delay_ms: min_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            error_threshold: 5,
            adjust_interval: Duration::from_secs(60),
            last_adjustment: Mutex::new(Instant::now()),
        }
    }

    /// Override the adjustment interval (tests)
    pub fn with_adjust_interval(mut self, interval: Duration) -> Self {
        self.adjust_interval = interval;
        self
    }

    /// The delay workers should apply before their next task
    pub fn recommended_delay(&self) -> Duration {
        Duration::from_millis(self.current_delay_ms.load(Ordering::Relaxed))
    }

    /// Re-evaluate the recommendation against current error rates
    ///
    /// Throttles by 50% when errors are high; relaxes by 20% only after a
    /// sustained clean window (two full intervals), so the delay does not
    /// oscillate.
    pub fn adjust(&self, monitor: &PerformanceMonitor) -> Duration {
        let mut last = self.last_adjustment.lock().expect("balancer mutex poisoned");
        let since_last = last.elapsed();

        if since_last < self.adjust_interval {
            return self.recommended_delay();
        }

        let errors = monitor.errors_per_minute();
        let current = self.current_delay_ms.load(Ordering::Relaxed);

        if errors > self.error_threshold {
            let new = ((current as f64 * 1.5) as u64).min(self.max_delay_ms);
            self.current_delay_ms.store(new, Ordering::Relaxed);
            *last = Instant::now();
            tracing::warn!(
                errors_per_min = errors,
                old_ms = current,
                new_ms = new,
                "High error rate, throttling"
            );
        } else if errors < 1 && since_last >= self.adjust_interval * 2 {
            let new = ((current as f64 * 0.8) as u64).max(self.min_delay_ms);
            if new != current {
                self.current_delay_ms.store(new, Ordering::Relaxed);
                *last = Instant::now();
                tracing::info!(old_ms = current, new_ms = new, "Error-free window, relaxing delay");
            }
        }

        self.recommended_delay()
    }

    /// Recommend a worker count given the current one
    pub fn recommended_workers(&self, current_workers: usize, monitor: &PerformanceMonitor) -> usize {
        let errors = monitor.errors_per_minute();

        if errors > self.error_threshold * 2 {
            return current_workers.saturating_sub(2).max(4);
        }
        if errors < 1 && monitor.search_rate() > 0.0 {
            return (current_workers + 2).min(32);
        }
        current_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_and_rates() {
        let monitor = PerformanceMonitor::default();
        for _ in 0..10 {
            monitor.record_search();
        }
        monitor.record_match();
        monitor.record_error();

        let snap = monitor.snapshot();
        assert_eq!(snap.total_searches, 10);
        assert_eq!(snap.total_matches, 1);
        assert_eq!(snap.total_errors, 1);
        assert!(snap.current_search_rate > 0.0);
        assert_eq!(snap.errors_per_minute, 1);
    }

    #[test]
    fn test_eta_states() {
        let monitor = PerformanceMonitor::default();
        assert_eq!(monitor.eta(100, 100), "Complete");
        assert_eq!(monitor.eta(100, 0), "Unknown");

        for _ in 0..60 {
            monitor.record_search();
        }
        let eta = monitor.eta(1000, 60);
        assert_ne!(eta, "Unknown");
        assert_ne!(eta, "Complete");
    }

    #[test]
    fn test_identify_slow_workers() {
        let mut stats: Vec<WorkerStats> = (1..=8)
            .map(|id| WorkerStats {
                worker_id: id,
                searches: 1000,
                ..Default::default()
            })
            .collect();
        stats[0].searches = 10;

        let slow = identify_slow_workers(&stats, 25);
        assert_eq!(slow, vec![1]);

        // Too few workers to compare
        assert!(identify_slow_workers(&stats[..1], 25).is_empty());
    }

    #[test]
    fn test_balancer_throttles_on_errors() {
        let balancer = AdaptiveLoadBalancer::new(
            Duration::from_millis(300),
            Duration::from_millis(100),
            Duration::from_millis(2000),
        )
        .with_adjust_interval(Duration::from_millis(0));

        let monitor = PerformanceMonitor::default();
        for _ in 0..10 {
            monitor.record_error();
        }

        let delay = balancer.adjust(&monitor);
        assert_eq!(delay, Duration::from_millis(450));
    }

    #[test]
    fn test_balancer_respects_interval() {
        let balancer = AdaptiveLoadBalancer::new(
            Duration::from_millis(300),
            Duration::from_millis(100),
            Duration::from_millis(2000),
        );

        let monitor = PerformanceMonitor::default();
        for _ in 0..10 {
            monitor.record_error();
        }

        // Interval has not elapsed: no change
        let delay = balancer.adjust(&monitor);
        assert_eq!(delay, Duration::from_millis(300));
    }

    #[test]
    fn test_balancer_worker_recommendation() {
        let balancer = AdaptiveLoadBalancer::new(
            Duration::from_millis(300),
            Duration::from_millis(100),
            Duration::from_millis(2000),
        );
        let monitor = PerformanceMonitor::default();

        for _ in 0..20 {
            monitor.record_error();
        }
        assert_eq!(balancer.recommended_workers(8, &monitor), 6);
        assert_eq!(balancer.recommended_workers(5, &monitor), 4);
    }
}
