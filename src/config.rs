// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Limiter configuration.
//!
//! [`LimiterConfig`] is a plain value struct with chainable setters.
//! Construction never fails: nonsensical values (zero limits, inverted
//! bounds, zero intervals, out-of-range thresholds) are silently repaired to
//! the defaults by [`LimiterConfig::normalized`], which the limiter applies
//! at construction time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::env_vars;

const DEFAULT_INITIAL_LIMIT: u64 = 100;
const DEFAULT_MIN_LIMIT: u64 = 10;
const DEFAULT_MAX_LIMIT: u64 = 1000;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_ADJUST_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_HIGH_LOAD_THRESHOLD: f64 = 0.75;
const DEFAULT_LOW_LOAD_THRESHOLD: f64 = 0.25;
const DEFAULT_HIGH_ERROR_THRESHOLD: f64 = 0.05;
const DEFAULT_LOW_ERROR_THRESHOLD: f64 = 0.01;
const DEFAULT_TARGET_RESPONSE_TIME: Duration = Duration::from_millis(200);

/// Configuration for [`crate::AdaptiveLimiter`].
///
/// Rates are expressed as a token budget per `interval`: a bucket starts at
/// `initial_limit` tokens and the control loop keeps its refill budget within
/// `[min_limit, max_limit]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Starting token capacity and budget per `interval`.
    pub initial_limit: u64,

    /// Absolute floor for the per-bucket refill budget.
    pub min_limit: u64,

    /// Absolute ceiling for the per-bucket refill budget.
    pub max_limit: u64,

    /// Period the rate is expressed against (tokens per `interval`).
    pub interval: Duration,

    /// Cadence of the adjustment control loop.
    pub adjust_interval: Duration,

    /// Cadence of host load sampling.
    pub metrics_interval: Duration,

    /// High CPU/memory load threshold (0.0-1.0).
    pub high_load_threshold: f64,

    /// Low CPU/memory load threshold (0.0-1.0).
    pub low_load_threshold: f64,

    /// High observed error-rate threshold (0.0-1.0).
    pub high_error_threshold: f64,

    /// Low observed error-rate threshold (0.0-1.0).
    pub low_error_threshold: f64,

    /// Desired average response time used as the control setpoint.
    pub target_response_time: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            initial_limit: DEFAULT_INITIAL_LIMIT,
            min_limit: DEFAULT_MIN_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
            interval: DEFAULT_INTERVAL,
            adjust_interval: DEFAULT_ADJUST_INTERVAL,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
            high_load_threshold: DEFAULT_HIGH_LOAD_THRESHOLD,
            low_load_threshold: DEFAULT_LOW_LOAD_THRESHOLD,
            high_error_threshold: DEFAULT_HIGH_ERROR_THRESHOLD,
            low_error_threshold: DEFAULT_LOW_ERROR_THRESHOLD,
            target_response_time: DEFAULT_TARGET_RESPONSE_TIME,
        }
    }
}

impl LimiterConfig {
    /// Create a configuration with the default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from `DASHLIMIT_*` environment variables,
    /// falling back to the defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            initial_limit: env_vars::env_u64_or_default(
                env_vars::DASHLIMIT_INITIAL_LIMIT,
                defaults.initial_limit,
            ),
            min_limit: env_vars::env_u64_or_default(
                env_vars::DASHLIMIT_MIN_LIMIT,
                defaults.min_limit,
            ),
            max_limit: env_vars::env_u64_or_default(
                env_vars::DASHLIMIT_MAX_LIMIT,
                defaults.max_limit,
            ),
            interval: Duration::from_millis(env_vars::env_u64_or_default(
                env_vars::DASHLIMIT_INTERVAL_MS,
                defaults.interval.as_millis() as u64,
            )),
            adjust_interval: Duration::from_millis(env_vars::env_u64_or_default(
                env_vars::DASHLIMIT_ADJUST_INTERVAL_MS,
                defaults.adjust_interval.as_millis() as u64,
            )),
            metrics_interval: Duration::from_millis(env_vars::env_u64_or_default(
                env_vars::DASHLIMIT_METRICS_INTERVAL_MS,
                defaults.metrics_interval.as_millis() as u64,
            )),
            high_load_threshold: env_vars::env_f64_or_default(
                env_vars::DASHLIMIT_HIGH_LOAD_THRESHOLD,
                defaults.high_load_threshold,
            ),
            low_load_threshold: env_vars::env_f64_or_default(
                env_vars::DASHLIMIT_LOW_LOAD_THRESHOLD,
                defaults.low_load_threshold,
            ),
            high_error_threshold: env_vars::env_f64_or_default(
                env_vars::DASHLIMIT_HIGH_ERROR_THRESHOLD,
                defaults.high_error_threshold,
            ),
            low_error_threshold: env_vars::env_f64_or_default(
                env_vars::DASHLIMIT_LOW_ERROR_THRESHOLD,
                defaults.low_error_threshold,
            ),
            target_response_time: Duration::from_millis(env_vars::env_u64_or_default(
                env_vars::DASHLIMIT_TARGET_RESPONSE_TIME_MS,
                defaults.target_response_time.as_millis() as u64,
            )),
        }
    }

    /// Set the starting token budget per interval.
    #[must_use]
    pub fn with_initial_limit(mut self, limit: u64) -> Self {
        self.initial_limit = limit;
        self
    }

    /// Set the floor for the per-bucket refill budget.
    #[must_use]
    pub fn with_min_limit(mut self, limit: u64) -> Self {
        self.min_limit = limit;
        self
    }

    /// Set the ceiling for the per-bucket refill budget.
    #[must_use]
    pub fn with_max_limit(mut self, limit: u64) -> Self {
        self.max_limit = limit;
        self
    }

    /// Set the period the rate is expressed against.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the cadence of the adjustment control loop.
    #[must_use]
    pub fn with_adjust_interval(mut self, interval: Duration) -> Self {
        self.adjust_interval = interval;
        self
    }

    /// Set the cadence of host load sampling.
    #[must_use]
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Set the low and high host load thresholds.
    #[must_use]
    pub fn with_load_thresholds(mut self, low: f64, high: f64) -> Self {
        self.low_load_threshold = low;
        self.high_load_threshold = high;
        self
    }

    /// Set the low and high error-rate thresholds.
    #[must_use]
    pub fn with_error_thresholds(mut self, low: f64, high: f64) -> Self {
        self.low_error_threshold = low;
        self.high_error_threshold = high;
        self
    }

    /// Set the target average response time.
    #[must_use]
    pub fn with_target_response_time(mut self, duration: Duration) -> Self {
        self.target_response_time = duration;
        self
    }

    /// Repair nonsensical values field by field, falling back to defaults.
    ///
    /// The limiter applies this at construction so the control loop can rely
    /// on positive limits, `min <= max`, non-zero intervals, and ordered
    /// thresholds inside [0, 1].
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.initial_limit == 0 {
            self.initial_limit = DEFAULT_INITIAL_LIMIT;
        }
        if self.min_limit == 0 {
            self.min_limit = DEFAULT_MIN_LIMIT;
        }
        if self.max_limit == 0 {
            self.max_limit = DEFAULT_MAX_LIMIT;
        }
        // The adjuster clamps rates to [min, max]; inverted bounds would be
        // unsatisfiable. initial_limit is deliberately not clamped into the
        // bounds: the floor and ceiling bind the control loop, not the
        // starting budget.
        if self.min_limit > self.max_limit {
            self.min_limit = DEFAULT_MIN_LIMIT.min(self.max_limit);
        }

        if self.interval.is_zero() {
            self.interval = DEFAULT_INTERVAL;
        }
        if self.adjust_interval.is_zero() {
            self.adjust_interval = DEFAULT_ADJUST_INTERVAL;
        }
        if self.metrics_interval.is_zero() {
            self.metrics_interval = DEFAULT_METRICS_INTERVAL;
        }

        if !threshold_pair_valid(self.low_load_threshold, self.high_load_threshold) {
            self.low_load_threshold = DEFAULT_LOW_LOAD_THRESHOLD;
            self.high_load_threshold = DEFAULT_HIGH_LOAD_THRESHOLD;
        }
        if !threshold_pair_valid(self.low_error_threshold, self.high_error_threshold) {
            self.low_error_threshold = DEFAULT_LOW_ERROR_THRESHOLD;
            self.high_error_threshold = DEFAULT_HIGH_ERROR_THRESHOLD;
        }

        if self.target_response_time.is_zero() {
            self.target_response_time = DEFAULT_TARGET_RESPONSE_TIME;
        }

        self
    }
}

fn threshold_pair_valid(low: f64, high: f64) -> bool {
    low.is_finite()
        && high.is_finite()
        && (0.0..=1.0).contains(&low)
        && (0.0..=1.0).contains(&high)
        && low < high
}
