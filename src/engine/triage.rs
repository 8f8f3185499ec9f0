//! Outcome triage and rate-limit escalation
//!
//! Classifies raw executor output into [`SearchOutcome`] variants using
//! content heuristics, and owns the process-wide escalating cooldown policy.
//! Rate limiting is a property of the shared remote service, not of a single
//! worker, so the escalation counter lives here and is shared by all workers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::executor::{RawOutcome, RawStatus};

/// Classified outcome of one search attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Response content ready for validation
    Success(String),

    /// Remote service is throttling; content kept for diagnostics
    RateLimited(String),

    /// Recoverable failure; the executor is believed alive
    TransientError,

    /// The executor is gone and must be re-acquired
    ExecutorCrashed,
}

/// Content markers that indicate a soft block rather than a result page,
/// matched case-insensitively
const BLOCK_MARKERS: &[&str] = &[
    "demasiadas solicitudes",
    "too many requests",
    "access denied",
    "captcha",
    "temporalmente bloqueado",
];

/// Detections before the long cooldown kicks in and the counter resets
const ESCALATION_THRESHOLD: u32 = 3;

/// Classifies outcomes and decides backoff policy
///
/// One instance per run, shared by all workers.
pub struct RateGovernor {
    /// Responses smaller than this are treated as rate-limit placeholders:
    /// the service's interstitials are far smaller than any real result or
    /// error page
    min_content_len: usize,

    /// Cooldown applied on each rate-limit detection
    short_cooldown: Duration,

    /// Cooldown forced after repeated detections
    long_cooldown: Duration,

    /// Rolling count of rate-limit detections across the run
    rate_limit_events: AtomicU32,
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl RateGovernor {
    pub fn new() -> Self {
        Self {
            min_content_len: 2048,
            short_cooldown: Duration::from_secs(30),
            long_cooldown: Duration::from_secs(120),
            rate_limit_events: AtomicU32::new(0),
        }
    }

    /// Override the small-response threshold (0 disables the heuristic)
    pub fn with_min_content_len(mut self, len: usize) -> Self {
        self.min_content_len = len;
        self
    }

    /// Override the cooldown durations
    pub fn with_cooldowns(mut self, short: Duration, long: Duration) -> Self {
        self.short_cooldown = short;
        self.long_cooldown = long;
        self
    }

    /// Classify a raw outcome into a [`SearchOutcome`]
    ///
    /// `executor_alive` is the result of the caller's liveness probe; it only
    /// matters for the `Error` status, where it separates a crashed executor
    /// from a merely failed request.
    pub fn classify(&self, raw: RawOutcome, executor_alive: bool) -> SearchOutcome {
        match raw.status {
            RawStatus::RateLimited => SearchOutcome::RateLimited(raw.content),
            RawStatus::Crashed => SearchOutcome::ExecutorCrashed,
            RawStatus::Error => {
                if executor_alive {
                    SearchOutcome::TransientError
                } else {
                    SearchOutcome::ExecutorCrashed
                }
            }
            RawStatus::Ok => {
                let lower = raw.content.to_lowercase();
                if BLOCK_MARKERS.iter().any(|m| lower.contains(m)) {
                    return SearchOutcome::RateLimited(raw.content);
                }
                if raw.content.len() < self.min_content_len {
                    return SearchOutcome::RateLimited(raw.content);
                }
                SearchOutcome::Success(raw.content)
            }
        }
    }

    /// Record a rate-limit detection and return the mandated cooldown
    ///
    /// Every Nth detection (N = 3) escalates to the long cooldown and resets
    /// the rolling counter.
    pub fn cooldown_for_rate_limit(&self) -> Duration {
        let events = self.rate_limit_events.fetch_add(1, Ordering::SeqCst) + 1;

        if events >= ESCALATION_THRESHOLD {
            self.rate_limit_events.store(0, Ordering::SeqCst);
            tracing::warn!(
                events,
                cooldown_secs = self.long_cooldown.as_secs(),
                "Repeated rate limiting, forcing long cooldown"
            );
            self.long_cooldown
        } else {
            tracing::info!(
                events,
                cooldown_secs = self.short_cooldown.as_secs(),
                "Rate limited, backing off"
            );
            self.short_cooldown
        }
    }

    /// Current rolling detection count (diagnostics only)
    pub fn rate_limit_events(&self) -> u32 {
        self.rate_limit_events.load(Ordering::SeqCst)
    }
}
