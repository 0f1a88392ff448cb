//! Circuit breaker shared by the per-symbol fetch workers.
//!
//! A 403 from the provider trips the breaker at once; a run of consecutive
//! provider-health failures trips it once the threshold is reached. While open,
//! workers skip their requests instead of hammering a provider that has
//! already refused us. The breaker never closes again within a fetch; the
//! provider resets it when a new fetch begins.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug)]
pub struct CircuitBreaker {
    open: AtomicBool,
    consecutive_failures: AtomicU32,
    threshold: u32,
}

impl CircuitBreaker {
    /// `threshold` consecutive failures open the breaker. Zero disables the
    /// failure count (explicit trips still apply).
    pub fn new(threshold: u32) -> Self {
        Self {
            open: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            threshold,
        }
    }

    pub fn is_allowed(&self) -> bool {
        !self.open.load(Ordering::Acquire)
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if self.threshold > 0 && failures >= self.threshold {
            self.trip();
        }
    }

    pub fn trip(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Close the breaker and clear the failure count.
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.open.store(false, Ordering::Release);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(25)
    }
}
