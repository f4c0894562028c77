// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Centralized environment variable names and helpers for `dashlimit`.
//!
//! All variables are optional overrides on top of [`crate::LimiterConfig`]
//! defaults; unset or unparseable values fall back to the compiled-in
//! default for that field.

// =============================================================================
// Environment Variable Name Constants
// =============================================================================

/// Starting per-key token budget per interval.
pub const DASHLIMIT_INITIAL_LIMIT: &str = "DASHLIMIT_INITIAL_LIMIT";
/// Absolute floor for the per-key refill budget.
pub const DASHLIMIT_MIN_LIMIT: &str = "DASHLIMIT_MIN_LIMIT";
/// Absolute ceiling for the per-key refill budget.
pub const DASHLIMIT_MAX_LIMIT: &str = "DASHLIMIT_MAX_LIMIT";
/// Period the rate is expressed against, in milliseconds.
pub const DASHLIMIT_INTERVAL_MS: &str = "DASHLIMIT_INTERVAL_MS";
/// Cadence of the adjustment control loop, in milliseconds.
pub const DASHLIMIT_ADJUST_INTERVAL_MS: &str = "DASHLIMIT_ADJUST_INTERVAL_MS";
/// Cadence of host load sampling, in milliseconds.
pub const DASHLIMIT_METRICS_INTERVAL_MS: &str = "DASHLIMIT_METRICS_INTERVAL_MS";
/// High CPU/memory load threshold (0.0-1.0).
pub const DASHLIMIT_HIGH_LOAD_THRESHOLD: &str = "DASHLIMIT_HIGH_LOAD_THRESHOLD";
/// Low CPU/memory load threshold (0.0-1.0).
pub const DASHLIMIT_LOW_LOAD_THRESHOLD: &str = "DASHLIMIT_LOW_LOAD_THRESHOLD";
/// High observed error-rate threshold (0.0-1.0).
pub const DASHLIMIT_HIGH_ERROR_THRESHOLD: &str = "DASHLIMIT_HIGH_ERROR_THRESHOLD";
/// Low observed error-rate threshold (0.0-1.0).
pub const DASHLIMIT_LOW_ERROR_THRESHOLD: &str = "DASHLIMIT_LOW_ERROR_THRESHOLD";
/// Target average response time used as the control setpoint, in milliseconds.
pub const DASHLIMIT_TARGET_RESPONSE_TIME_MS: &str = "DASHLIMIT_TARGET_RESPONSE_TIME_MS";

// =============================================================================
// Typed helpers
// =============================================================================

/// Reads an environment variable as a string, returning `None` if unset.
#[must_use]
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Reads an environment variable as a `u64`, returning `default` if unset or invalid.
#[must_use]
pub fn env_u64_or_default(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Reads an environment variable as an `f64`, returning `default` if unset or invalid.
#[must_use]
pub fn env_f64_or_default(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}
