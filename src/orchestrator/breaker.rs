//! Per-tool circuit breakers.
//!
//! CLOSED → OPEN after a threshold of consecutive failures; OPEN →
//! HALF-OPEN once the reset window elapses (the next call is attempted);
//! success closes the breaker, failure re-opens it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Failure-count breaker for one tool.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    reset_after: Duration,
    failure_count: u32,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `threshold` consecutive failures
    /// and half-opens after `reset_after`.
    pub fn new(threshold: u32, reset_after: Duration) -> Self {
        Self {
            threshold,
            reset_after,
            failure_count: 0,
            open_until: None,
        }
    }

    /// A successful call closes the breaker.
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.open_until = None;
    }

    /// A failed call counts toward the threshold; crossing it opens the
    /// breaker for the reset window.
    pub fn record_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
        if self.failure_count >= self.threshold {
            self.open_until = Some(Instant::now() + self.reset_after);
        }
    }

    /// Whether a call may proceed. An expired window half-opens the
    /// breaker: the counter resets and the call is attempted.
    pub fn allow(&mut self) -> bool {
        match self.open_until {
            None => true,
            Some(until) if Instant::now() >= until => {
                self.failure_count = 0;
                self.open_until = None;
                true
            }
            Some(_) => false,
        }
    }
}

/// The orchestrator's map of breakers, one per tool name.
#[derive(Debug)]
pub struct BreakerBoard {
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    threshold: u32,
    reset_after: Duration,
}

impl BreakerBoard {
    /// Create a board that hands out breakers with the given parameters.
    pub fn new(threshold: u32, reset_after: Duration) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            threshold,
            reset_after,
        }
    }

    /// Whether the tool's breaker admits a call right now.
    pub fn allow(&self, tool_name: &str) -> bool {
        let mut breakers = self.lock();
        self.entry(&mut breakers, tool_name).allow()
    }

    /// Record a successful call for the tool.
    pub fn on_success(&self, tool_name: &str) {
        let mut breakers = self.lock();
        self.entry(&mut breakers, tool_name).record_success();
    }

    /// Record a failed call for the tool.
    pub fn on_failure(&self, tool_name: &str) {
        let mut breakers = self.lock();
        self.entry(&mut breakers, tool_name).record_failure();
    }

    fn entry<'a>(
        &self,
        breakers: &'a mut HashMap<String, CircuitBreaker>,
        tool_name: &str,
    ) -> &'a mut CircuitBreaker {
        breakers
            .entry(tool_name.to_owned())
            .or_insert_with(|| CircuitBreaker::new(self.threshold, self.reset_after))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
