// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Host load sampling for the adjustment control loop.
//!
//! [`SystemLoadMonitor`] runs a background sampler that refreshes a CPU and
//! memory load snapshot (both in [0, 1]) on a fixed cadence. On Linux the
//! sampler reads `/proc/loadavg` and `/proc/meminfo`; elsewhere it falls
//! back to a heuristic derived from the number of alive tokio tasks. Every
//! failure mode is soft: an unreadable or unparseable source retains the
//! previous snapshot, so readers may observe values up to one interval
//! stale but never an error.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use prometheus::Gauge;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::metrics_constants::{METRIC_CPU_LOAD, METRIC_MEMORY_LOAD};

static CPU_LOAD_GAUGE: LazyLock<Gauge> = LazyLock::new(|| {
    crate::metrics_utils::gauge(METRIC_CPU_LOAD, "Last sampled host CPU load (0.0-1.0)")
});
static MEMORY_LOAD_GAUGE: LazyLock<Gauge> = LazyLock::new(|| {
    crate::metrics_utils::gauge(
        METRIC_MEMORY_LOAD,
        "Last sampled host memory load (0.0-1.0)",
    )
});

/// Task count at which the fallback CPU heuristic saturates.
const FALLBACK_TASK_CEILING: f64 = 1000.0;

#[derive(Debug, Clone, Copy, Default)]
struct LoadSnapshot {
    cpu: f64,
    memory: f64,
}

/// Periodic sampler of host CPU and memory load.
///
/// Must be created from within a tokio runtime; the sampler task is spawned
/// at construction and runs until [`SystemLoadMonitor::stop`] is called or
/// the monitor is dropped.
pub struct SystemLoadMonitor {
    snapshot: Arc<RwLock<LoadSnapshot>>,
    shutdown: watch::Sender<bool>,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl SystemLoadMonitor {
    /// Create a monitor sampling every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        let snapshot = Arc::new(RwLock::new(LoadSnapshot::default()));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task_snapshot = Arc::clone(&snapshot);
        let sampler = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let previous = *task_snapshot.read().await;
                        let next = sample(previous);
                        *task_snapshot.write().await = next;
                        CPU_LOAD_GAUGE.set(next.cpu);
                        MEMORY_LOAD_GAUGE.set(next.memory);
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Load sampler shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            snapshot,
            shutdown,
            sampler: Mutex::new(Some(sampler)),
        }
    }

    /// Last sampled CPU load in [0, 1].
    pub async fn cpu_load(&self) -> f64 {
        self.snapshot.read().await.cpu
    }

    /// Last sampled memory load in [0, 1].
    pub async fn memory_load(&self) -> f64 {
        self.snapshot.read().await.memory
    }

    /// Stop the sampler task. Idempotent.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.sampler.lock().await.take() {
            let _ = handle.await;
        }
    }
}

/// Take one sample, retaining `previous` values for any source that fails.
fn sample(previous: LoadSnapshot) -> LoadSnapshot {
    let cpu = proc_cpu_load()
        .or_else(fallback_cpu_load)
        .unwrap_or(previous.cpu);
    let memory = proc_memory_load().unwrap_or(previous.memory);
    LoadSnapshot { cpu, memory }
}

/// One-minute load average normalized by CPU count, from `/proc/loadavg`.
fn proc_cpu_load() -> Option<f64> {
    let contents = std::fs::read_to_string("/proc/loadavg").ok()?;
    let load = parse_loadavg(&contents)?;
    let cpu_count = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    Some((load / cpu_count as f64).clamp(0.0, 1.0))
}

/// Fraction of memory in use, from `/proc/meminfo`.
fn proc_memory_load() -> Option<f64> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&contents)
}

/// Heuristic for platforms without `/proc`: alive tokio tasks against a
/// fixed ceiling.
fn fallback_cpu_load() -> Option<f64> {
    let handle = tokio::runtime::Handle::try_current().ok()?;
    let tasks = handle.metrics().num_alive_tasks() as f64;
    Some((tasks / FALLBACK_TASK_CEILING).clamp(0.0, 1.0))
}

fn parse_loadavg(contents: &str) -> Option<f64> {
    contents
        .split_whitespace()
        .next()
        .and_then(|field| field.parse::<f64>().ok())
        .filter(|load| load.is_finite() && *load >= 0.0)
}

fn parse_meminfo(contents: &str) -> Option<f64> {
    let mut total: u64 = 0;
    let mut free: u64 = 0;
    let mut available: u64 = 0;

    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_meminfo_kb(rest).unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = parse_meminfo_kb(rest).unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("MemFree:") {
            free = parse_meminfo_kb(rest).unwrap_or(0);
        }
    }

    if total == 0 {
        return None;
    }

    // MemAvailable is the kernel's better estimate; MemFree is the fallback
    // on older kernels that do not report it.
    let unused = available.max(free);
    let used = total.saturating_sub(unused);
    Some((used as f64 / total as f64).clamp(0.0, 1.0))
}

fn parse_meminfo_kb(rest: &str) -> Option<u64> {
    rest.split_whitespace()
        .next()
        .and_then(|v| v.parse::<u64>().ok())
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loadavg_first_field() {
        let load = parse_loadavg("1.52 1.20 0.98 2/1324 12345\n").unwrap();
        assert!((load - 1.52).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_loadavg_rejects_garbage() {
        assert!(parse_loadavg("").is_none());
        assert!(parse_loadavg("not-a-number 1.0 1.0").is_none());
    }

    #[test]
    fn test_parse_meminfo_prefers_available() {
        let contents = "MemTotal:       16000000 kB\n\
                        MemFree:         1000000 kB\n\
                        MemAvailable:    8000000 kB\n";
        let load = parse_meminfo(contents).unwrap();
        assert!((load - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_meminfo_falls_back_to_free() {
        let contents = "MemTotal:       10000000 kB\n\
                        MemFree:         2500000 kB\n";
        let load = parse_meminfo(contents).unwrap();
        assert!((load - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_parse_meminfo_missing_total() {
        assert!(parse_meminfo("MemFree: 100 kB\n").is_none());
    }

    #[test]
    fn test_sample_retains_previous_on_failure() {
        // Whatever the platform, a sample never loses a previously known
        // value: either a source succeeds or the previous value survives.
        let previous = LoadSnapshot {
            cpu: 0.33,
            memory: 0.44,
        };
        let next = sample(previous);
        assert!((0.0..=1.0).contains(&next.cpu) || (next.cpu - 0.33).abs() < f64::EPSILON);
        assert!((0.0..=1.0).contains(&next.memory) || (next.memory - 0.44).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_monitor_reports_values_in_range() {
        let monitor = SystemLoadMonitor::new(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let cpu = monitor.cpu_load().await;
        let memory = monitor.memory_load().await;
        assert!((0.0..=1.0).contains(&cpu), "cpu out of range: {cpu}");
        assert!(
            (0.0..=1.0).contains(&memory),
            "memory out of range: {memory}"
        );

        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let monitor = SystemLoadMonitor::new(Duration::from_millis(10));
        monitor.stop().await;
        monitor.stop().await;
    }
}
