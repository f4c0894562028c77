// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Prometheus metric name constants for `dashlimit`.
//!
//! This module centralizes all metric names to ensure consistency across the
//! crate. Metrics follow Prometheus naming conventions:
//! - Counters end with `_total`
//! - Gauges have no special suffix

// ============================================================================
// Counter Metrics (_total suffix)
// ============================================================================

/// Total requests admitted by the limiter, labeled by key.
pub const METRIC_ADMITTED_TOTAL: &str = "dashlimit_admitted_total";

/// Total requests denied by the limiter, labeled by key.
pub const METRIC_DENIED_TOTAL: &str = "dashlimit_denied_total";

/// Total per-key rate adjustments applied by the control loop.
pub const METRIC_ADJUSTMENTS_TOTAL: &str = "dashlimit_adjustments_total";

/// Total circuit breaker state transitions, labeled by resulting state.
pub const METRIC_BREAKER_TRANSITIONS_TOTAL: &str = "dashlimit_breaker_transitions_total";

// ============================================================================
// Gauge Metrics (no _total suffix)
// ============================================================================

/// Last sampled host CPU load (0.0-1.0).
pub const METRIC_CPU_LOAD: &str = "dashlimit_cpu_load";

/// Last sampled host memory load (0.0-1.0).
pub const METRIC_MEMORY_LOAD: &str = "dashlimit_memory_load";

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify all counter names end with _total (Prometheus convention).
    #[test]
    fn test_counter_names_end_with_total() {
        let counters = [
            METRIC_ADMITTED_TOTAL,
            METRIC_DENIED_TOTAL,
            METRIC_ADJUSTMENTS_TOTAL,
            METRIC_BREAKER_TRANSITIONS_TOTAL,
        ];

        for name in &counters {
            assert!(
                name.ends_with("_total"),
                "Counter '{}' must end with '_total'",
                name
            );
        }
    }

    /// Verify gauge names do NOT end with _total.
    #[test]
    fn test_gauge_names_not_total() {
        let gauges = [METRIC_CPU_LOAD, METRIC_MEMORY_LOAD];

        for name in &gauges {
            assert!(
                !name.ends_with("_total"),
                "Gauge '{}' must NOT end with '_total'",
                name
            );
        }
    }

    /// Verify all metric names start with dashlimit_ prefix.
    #[test]
    fn test_all_metrics_have_prefix() {
        let all_metrics = [
            METRIC_ADMITTED_TOTAL,
            METRIC_DENIED_TOTAL,
            METRIC_ADJUSTMENTS_TOTAL,
            METRIC_BREAKER_TRANSITIONS_TOTAL,
            METRIC_CPU_LOAD,
            METRIC_MEMORY_LOAD,
        ];

        for name in &all_metrics {
            assert!(
                name.starts_with("dashlimit_"),
                "Metric '{}' must start with 'dashlimit_' prefix",
                name
            );
        }
    }
}
