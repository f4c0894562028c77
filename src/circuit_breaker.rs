// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Circuit breaker for failure isolation.
//!
//! [`CircuitBreaker`] is a three-state machine (Closed, Open, HalfOpen)
//! independent of the token-bucket limiter; call sites combine the two as
//! they see fit (typically `breaker.allow() && limiter.allow(key).await`).
//!
//! While Open, every recorded failure refreshes the state-change timestamp,
//! extending the cooldown. This keeps a persistently failing dependency shut
//! off until failures actually stop arriving.

use std::fmt;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use prometheus::{CounterVec, Opts};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics_constants::METRIC_BREAKER_TRANSITIONS_TOTAL;

static BREAKER_TRANSITIONS: LazyLock<CounterVec> = LazyLock::new(|| {
    crate::metrics_utils::counter_vec(
        Opts::new(
            METRIC_BREAKER_TRANSITIONS_TOTAL,
            "Total circuit breaker state transitions by resulting state",
        ),
        &["state"],
    )
});

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Passing all requests.
    Closed,
    /// Failing all requests until the reset timeout elapses.
    Open,
    /// Passing a bounded number of probe requests.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF-OPEN",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_state_change: Instant,
    half_open_count: u32,
}

impl BreakerState {
    fn transition_to(&mut self, state: CircuitState) {
        let from = self.state;
        self.state = state;
        self.last_state_change = Instant::now();
        debug!(from = %from, to = %state, "Circuit breaker state change");
        let label = state.to_string();
        BREAKER_TRANSITIONS
            .with_label_values(&[label.as_str()])
            .inc();
    }
}

/// Three-state circuit breaker.
///
/// Safe for concurrent use; `allow` takes a shared guard on the hot path and
/// only escalates to an exclusive guard on a state-transition edge.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max: u32,
    inner: RwLock<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `failure_threshold` consecutive
    /// failures and starts probing again `reset_timeout` after opening.
    #[must_use]
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            half_open_max: 1,
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_state_change: Instant::now(),
                half_open_count: 0,
            }),
        }
    }

    /// Set the number of probe requests admitted while half-open.
    #[must_use]
    pub fn with_half_open_max(mut self, max: u32) -> Self {
        self.half_open_max = max;
        self
    }

    /// Whether a request may proceed right now.
    pub fn allow(&self) -> bool {
        let now = Instant::now();
        let inner = self.inner.read();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if now.duration_since(inner.last_state_change) > self.reset_timeout {
                    drop(inner);
                    let mut inner = self.inner.write();

                    // Re-check under the exclusive guard: another caller may
                    // have raced us through this edge.
                    if inner.state == CircuitState::Open
                        && inner.last_state_change.elapsed() > self.reset_timeout
                    {
                        inner.transition_to(CircuitState::HalfOpen);
                        inner.half_open_count = 0;
                        return true;
                    }

                    inner.state == CircuitState::Closed
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_count < self.half_open_max {
                    drop(inner);
                    let mut inner = self.inner.write();
                    if inner.state == CircuitState::HalfOpen
                        && inner.half_open_count < self.half_open_max
                    {
                        inner.half_open_count += 1;
                        return true;
                    }
                    false
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn success(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.transition_to(CircuitState::Closed);
                inner.failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn failure(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    inner.transition_to(CircuitState::Open);
                    inner.half_open_count = 0;
                }
            }
            CircuitState::HalfOpen => inner.transition_to(CircuitState::Open),
            // Already open: push the cooldown out.
            CircuitState::Open => inner.last_state_change = Instant::now(),
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }
}
