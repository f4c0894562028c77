// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

// Allow expect() in this module: used for fallback metric creation where
// the fallback name is guaranteed to be valid (e.g., "{name}_invalid").
#![allow(clippy::expect_used)]

//! Safe Prometheus metric registration helpers.
//!
//! `dashlimit` is a library embedded in arbitrary binaries. When several
//! components register the same metric name, the default Prometheus registry
//! returns an error, and the upstream `register_*` macros panic on that
//! error. These helpers instead log and continue, returning an unregistered
//! metric as a fallback.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::{Counter, CounterVec, Gauge, Opts};
use std::sync::LazyLock;
use tracing::{debug, warn};

#[derive(Clone)]
struct CounterEntry {
    help: String,
    metric: Counter,
}

#[derive(Clone)]
struct GaugeEntry {
    help: String,
    metric: Gauge,
}

#[derive(Clone)]
struct CounterVecEntry {
    help: String,
    labels: Vec<String>,
    metric: CounterVec,
}

static COUNTERS: LazyLock<DashMap<String, CounterEntry>> = LazyLock::new(DashMap::new);
static GAUGES: LazyLock<DashMap<String, GaugeEntry>> = LazyLock::new(DashMap::new);
static COUNTER_VECS: LazyLock<DashMap<String, CounterVecEntry>> = LazyLock::new(DashMap::new);

fn register(name: &str, kind: &str, collector: Box<dyn prometheus::core::Collector>) {
    if let Err(e) = prometheus::default_registry().register(collector) {
        match e {
            prometheus::Error::AlreadyReg => {
                debug!(metric = name, "{kind} already registered; continuing");
            }
            other => {
                warn!(
                    metric = name,
                    error = %other,
                    "{kind} registration failed; continuing without global registration"
                );
            }
        }
    }
}

pub(crate) fn counter(name: &str, help: &str) -> Counter {
    match COUNTERS.entry(name.to_string()) {
        Entry::Occupied(entry) => {
            if entry.get().help != help {
                warn!(
                    metric = name,
                    existing_help = entry.get().help.as_str(),
                    requested_help = help,
                    "Counter help mismatch; reusing existing metric"
                );
            }
            entry.get().metric.clone()
        }
        Entry::Vacant(entry) => {
            let metric = Counter::new(name, help).unwrap_or_else(|e| {
                warn!(metric = name, error = %e, "Failed to create Counter");
                Counter::new(format!("{name}_invalid"), help)
                    .expect("fallback counter name should be valid")
            });

            register(name, "Counter", Box::new(metric.clone()));

            entry.insert(CounterEntry {
                help: help.to_string(),
                metric: metric.clone(),
            });
            metric
        }
    }
}

pub(crate) fn gauge(name: &str, help: &str) -> Gauge {
    match GAUGES.entry(name.to_string()) {
        Entry::Occupied(entry) => {
            if entry.get().help != help {
                warn!(
                    metric = name,
                    existing_help = entry.get().help.as_str(),
                    requested_help = help,
                    "Gauge help mismatch; reusing existing metric"
                );
            }
            entry.get().metric.clone()
        }
        Entry::Vacant(entry) => {
            let metric = Gauge::new(name, help).unwrap_or_else(|e| {
                warn!(metric = name, error = %e, "Failed to create Gauge");
                Gauge::new(format!("{name}_invalid"), help)
                    .expect("fallback gauge name should be valid")
            });

            register(name, "Gauge", Box::new(metric.clone()));

            entry.insert(GaugeEntry {
                help: help.to_string(),
                metric: metric.clone(),
            });
            metric
        }
    }
}

pub(crate) fn counter_vec(opts: Opts, labels: &[&str]) -> CounterVec {
    let name = opts.name.clone();
    match COUNTER_VECS.entry(name.clone()) {
        Entry::Occupied(entry) => {
            if entry.get().help != opts.help || entry.get().labels != labels {
                warn!(
                    metric = name.as_str(),
                    "CounterVec help/label mismatch; reusing existing metric"
                );
            }
            entry.get().metric.clone()
        }
        Entry::Vacant(entry) => {
            let metric = CounterVec::new(opts.clone(), labels).unwrap_or_else(|e| {
                warn!(metric = name.as_str(), error = %e, "Failed to create CounterVec");
                CounterVec::new(
                    Opts::new(format!("{name}_invalid"), opts.help.clone()),
                    labels,
                )
                .expect("fallback counter vec name should be valid")
            });

            register(&name, "CounterVec", Box::new(metric.clone()));

            entry.insert(CounterVecEntry {
                help: opts.help,
                labels: labels.iter().map(|l| (*l).to_string()).collect(),
                metric: metric.clone(),
            });
            metric
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_duplicate_registration_is_tolerated() {
        let a = counter("dashlimit_test_dup_total", "Test counter");
        let b = counter("dashlimit_test_dup_total", "Test counter");
        a.inc();
        b.inc();
        // Both handles point at the same underlying metric.
        assert!((a.get() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counter_help_mismatch_reuses_existing() {
        let a = counter("dashlimit_test_help_total", "Original help");
        let b = counter("dashlimit_test_help_total", "Different help");
        a.inc();
        assert!((b.get() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_gauge_set_and_reuse() {
        let g = gauge("dashlimit_test_gauge", "Test gauge");
        g.set(0.5);
        let g2 = gauge("dashlimit_test_gauge", "Test gauge");
        assert!((g2.get() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counter_vec_labels() {
        let v = counter_vec(
            Opts::new("dashlimit_test_vec_total", "Test counter vec"),
            &["key"],
        );
        v.with_label_values(&["a"]).inc();
        v.with_label_values(&["a"]).inc();
        v.with_label_values(&["b"]).inc();
        assert!((v.with_label_values(&["a"]).get() - 2.0).abs() < f64::EPSILON);
        assert!((v.with_label_values(&["b"]).get() - 1.0).abs() < f64::EPSILON);
    }
}
