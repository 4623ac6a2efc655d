//! Circuit breaker per upstream provider
//!
//! States: Closed (normal) -> Open (failing) -> HalfOpen (probing).
//! While open, requests are refused until `reset_timeout` has elapsed
//! since the last failure; then exactly one probe is admitted. A probe
//! success closes the circuit, a probe failure reopens it.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// Duration to keep the circuit open before probing.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker for a single provider.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    /// Set while a half-open probe is in flight; only one is admitted.
    probe_in_flight: RwLock<bool>,
    last_failure_at: RwLock<Option<Instant>>,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            probe_in_flight: RwLock::new(false),
            last_failure_at: RwLock::new(None),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            trips: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            trips: self.trips.load(Ordering::Relaxed),
        }
    }

    /// Read-only view of whether a request would currently be admitted.
    /// Never transitions state; used to skip a provider before spending
    /// quota on it.
    pub fn is_callable(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => self
                .last_failure_at
                .read()
                .map(|t| t.elapsed() >= self.config.reset_timeout)
                .unwrap_or(true),
            CircuitState::HalfOpen => !*self.probe_in_flight.read(),
        }
    }

    /// Whether a request may proceed. Transitions Open -> HalfOpen once the
    /// reset timeout has elapsed, admitting exactly the probing call.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.write();

        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_at
                    .read()
                    .map(|t| t.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    info!(circuit = %self.name, "circuit transitioning from open to half-open");
                    *state = CircuitState::HalfOpen;
                    *self.probe_in_flight.write() = true;
                    return true;
                }
                debug!(circuit = %self.name, "circuit open, request refused");
                false
            }
            CircuitState::HalfOpen => {
                let mut probing = self.probe_in_flight.write();
                if *probing {
                    debug!(circuit = %self.name, "probe already in flight, request refused");
                    false
                } else {
                    *probing = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write();
        match *state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                info!(circuit = %self.name, "probe succeeded, circuit closed");
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::Relaxed);
                *self.probe_in_flight.write() = false;
            }
            CircuitState::Open => {
                // Stale success from a call that raced the trip; harmless.
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::Relaxed);
            }
        }
    }

    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_failure_at.write() = Some(Instant::now());

        let mut state = self.state.write();
        match *state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures,
                        reset_timeout_secs = self.config.reset_timeout.as_secs(),
                        "circuit tripped"
                    );
                    *state = CircuitState::Open;
                    self.trips.fetch_add(1, Ordering::Relaxed);
                }
            }
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, "probe failed, circuit reopened");
                *state = CircuitState::Open;
                self.trips.fetch_add(1, Ordering::Relaxed);
                *self.probe_in_flight.write() = false;
            }
            CircuitState::Open => {
                // Already open; the failure time above extends the wait.
            }
        }
    }

    /// Manual reset, used by the daily quota reset to clear latched opens.
    pub fn reset(&self) {
        let mut state = self.state.write();
        if *state != CircuitState::Closed {
            info!(circuit = %self.name, "circuit manually reset");
        }
        *state = CircuitState::Closed;
        self.failure_count.store(0, Ordering::Relaxed);
        *self.probe_in_flight.write() = false;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub trips: u64,
}
