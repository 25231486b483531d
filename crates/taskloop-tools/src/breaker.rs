//! Per-tool-name circuit breakers.
//!
//! Closed: calls pass, failures are counted while they stay inside the
//! window. Open: calls are rejected until the cooldown elapses. Half-open:
//! one trial call at a time is let through; enough successes close the circuit,
//! any failure reopens it.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskloop_core::BreakerConfig;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    streak_started: Option<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                streak_started: None,
                opened_at: None,
                half_open_successes: 0,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Ask to make a call. `Err` carries the time left before the next trial call.
    pub fn allow(&self) -> Result<(), Duration> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(self.remaining(&inner, now)),
            CircuitState::HalfOpen if inner.trial_in_flight => Err(Duration::ZERO),
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(())
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold.max(1) {
                    info!(tool = %self.name, "circuit closed");
                    self.close(&mut inner);
                }
            }
            _ => {
                inner.consecutive_failures = 0;
                inner.streak_started = None;
            }
        }
    }

    pub fn record_failure(&self) {
        if !self.config.enabled {
            return;
        }
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                warn!(tool = %self.name, "trial call failed, circuit reopened");
                self.open(&mut inner, now);
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                let expired = inner
                    .streak_started
                    .is_some_and(|start| now.duration_since(start) > self.config.window());
                if expired || inner.streak_started.is_none() {
                    inner.streak_started = Some(now);
                    inner.consecutive_failures = 0;
                }
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold.max(1) {
                    warn!(
                        tool = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                    self.open(&mut inner, now);
                }
            }
        }
    }

    /// Give back a half-open trial slot without recording an outcome.
    pub fn release_trial(&self) {
        self.lock().trial_in_flight = false;
    }

    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state == CircuitState::Open && self.remaining(inner, now).is_zero() {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_successes = 0;
            inner.trial_in_flight = false;
        }
    }

    fn remaining(&self, inner: &BreakerInner, now: Instant) -> Duration {
        inner
            .opened_at
            .map(|at| self.config.cooldown().saturating_sub(now.duration_since(at)))
            .unwrap_or(Duration::ZERO)
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.trial_in_flight = false;
        inner.half_open_successes = 0;
    }

    fn close(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.streak_started = None;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        inner.half_open_successes = 0;
    }
}

/// Breakers keyed by tool name, created on first use.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, tool_name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(tool_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(tool_name, self.config.clone())))
            .clone()
    }

    pub fn state(&self, tool_name: &str) -> CircuitState {
        self.breakers
            .get(tool_name)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }
}
