// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Adaptive per-key rate limiting using token buckets.
//!
//! [`AdaptiveLimiter`] keys admission on an arbitrary string (tenant, route,
//! client identity). Each key gets its own token bucket with lazy refill; a
//! background control loop periodically re-tunes every bucket's refill rate
//! from the outcomes reported for that key (`record_outcome`) and from host
//! CPU/memory load, holding the rate between the configured floor and
//! ceiling and steering average latency toward the configured target.
//!
//! Lock order is map guard (shared) then bucket guard (exclusive), never
//! the reverse; bucket guards are synchronous and never held across an
//! await point.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prometheus::{Counter, CounterVec, Opts};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::LimiterConfig;
use crate::errors::{Error, Result};
use crate::metrics_constants::{
    METRIC_ADJUSTMENTS_TOTAL, METRIC_ADMITTED_TOTAL, METRIC_DENIED_TOTAL,
};
use crate::system_load::SystemLoadMonitor;

static ADMITTED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    crate::metrics_utils::counter_vec(
        Opts::new(
            METRIC_ADMITTED_TOTAL,
            "Total requests admitted by the limiter",
        ),
        &["key"],
    )
});
static DENIED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    crate::metrics_utils::counter_vec(
        Opts::new(METRIC_DENIED_TOTAL, "Total requests denied by the limiter"),
        &["key"],
    )
});
static ADJUSTMENTS_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    crate::metrics_utils::counter(
        METRIC_ADJUSTMENTS_TOTAL,
        "Total per-key rate adjustments applied by the control loop",
    )
});

/// Backoff between admission attempts in [`AdaptiveLimiter::wait`].
const WAIT_BACKOFF: Duration = Duration::from_millis(10);

/// Minimum admissions in a window before the control loop will adjust a key.
const MIN_WINDOW_SAMPLES: u64 = 10;

/// Maximum number of distinct key labels to emit in Prometheus.
/// New keys beyond this are aggregated under the "overflow" label.
const MAX_KEY_METRIC_LABELS: usize = 1000;

const MAX_SAFE_KEY_LABEL_LEN: usize = 64;

fn is_safe_key_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_SAFE_KEY_LABEL_LEN
        && value.bytes().all(|b| {
            matches!(
                b,
                b'a'..=b'z'
                    | b'A'..=b'Z'
                    | b'0'..=b'9'
                    | b'-'
                    | b'_'
                    | b'.'
            )
        })
}

fn key_label_value(key: &str) -> Cow<'_, str> {
    if is_safe_key_label(key) {
        return Cow::Borrowed(key);
    }

    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let digest_hex = hex::encode(digest);
    Cow::Owned(format!("key_{}", &digest_hex[..12]))
}

/// Per-key token bucket plus the outcome counters for the current
/// adjustment window.
#[derive(Debug)]
struct KeyBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,

    success_count: u64,
    failure_count: u64,
    response_time_ms_sum: u64,
    request_count: u64,
}

impl KeyBucket {
    fn new(initial_limit: u64, interval: Duration) -> Self {
        let capacity = initial_limit as f64;
        Self {
            tokens: capacity,
            max_tokens: capacity,
            refill_rate: capacity / interval.as_secs_f64(),
            last_refill: Instant::now(),
            success_count: 0,
            failure_count: 0,
            response_time_ms_sum: 0,
            request_count: 0,
        }
    }

    /// Credit tokens for the wall time elapsed since the last refill,
    /// clamped to capacity.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + self.refill_rate * elapsed).min(self.max_tokens);
    }

    fn try_admit(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.request_count += 1;
            true
        } else {
            false
        }
    }

    fn record_outcome(&mut self, success: bool, response_time: Duration) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.response_time_ms_sum += response_time.as_millis() as u64;
    }

    fn reset_window(&mut self) {
        self.success_count = 0;
        self.failure_count = 0;
        self.response_time_ms_sum = 0;
        self.request_count = 0;
    }
}

struct LimiterShared {
    config: LimiterConfig,
    buckets: RwLock<HashMap<String, Arc<Mutex<KeyBucket>>>>,
    load: SystemLoadMonitor,
    closed: AtomicBool,
    /// Keys already emitted as metric labels, to cap cardinality.
    metric_keys: RwLock<HashSet<String>>,
}

impl LimiterShared {
    /// Fetch the bucket for `key`, creating it on first use.
    ///
    /// Double-checked: shared-guard lookup first, then an exclusive-guard
    /// re-check before insertion, so concurrent callers bind exactly one
    /// bucket per key.
    async fn get_or_create(&self, key: &str) -> Arc<Mutex<KeyBucket>> {
        {
            let buckets = self.buckets.read().await;
            if let Some(bucket) = buckets.get(key) {
                return Arc::clone(bucket);
            }
        }

        let mut buckets = self.buckets.write().await;
        if let Some(bucket) = buckets.get(key) {
            return Arc::clone(bucket);
        }

        let bucket = Arc::new(Mutex::new(KeyBucket::new(
            self.config.initial_limit,
            self.config.interval,
        )));
        buckets.insert(key.to_string(), Arc::clone(&bucket));
        bucket
    }

    async fn metric_key_label<'a>(&'a self, key: &'a str) -> Cow<'a, str> {
        let label = key_label_value(key);
        let mut keys = self.metric_keys.write().await;
        if keys.contains(key) {
            return label;
        }

        if keys.len() < MAX_KEY_METRIC_LABELS {
            keys.insert(key.to_string());
            label
        } else {
            Cow::Borrowed("overflow")
        }
    }

    /// One adjustment tick: rescale every bucket with enough window data.
    async fn adjust_all(&self) {
        let cpu_load = self.load.cpu_load().await;
        let memory_load = self.load.memory_load().await;

        let interval_secs = self.config.interval.as_secs_f64();
        let min_rate = self.config.min_limit as f64 / interval_secs;
        let max_rate = self.config.max_limit as f64 / interval_secs;
        let target_ms = self.config.target_response_time.as_millis() as f64;

        let buckets = self.buckets.read().await;
        for (key, bucket) in buckets.iter() {
            let adjusted = {
                let mut bucket = bucket.lock();

                if bucket.request_count < MIN_WINDOW_SAMPLES {
                    continue;
                }

                let total = bucket.success_count + bucket.failure_count;
                let error_rate = if total > 0 {
                    bucket.failure_count as f64 / total as f64
                } else {
                    0.0
                };
                let avg_response_ms = if total > 0 {
                    bucket.response_time_ms_sum as f64 / total as f64
                } else {
                    0.0
                };

                let mut factor = 1.0;

                if cpu_load > self.config.high_load_threshold {
                    factor *= 0.8;
                } else if cpu_load < self.config.low_load_threshold {
                    factor *= 1.2;
                }

                if memory_load > self.config.high_load_threshold {
                    factor *= 0.9;
                }

                if error_rate > self.config.high_error_threshold {
                    factor *= 0.7;
                } else if error_rate < self.config.low_error_threshold {
                    factor *= 1.1;
                }

                if avg_response_ms > 0.0 && target_ms > 0.0 {
                    factor *= (target_ms / avg_response_ms).clamp(0.8, 1.2);
                }

                let new_rate = (bucket.refill_rate * factor).clamp(min_rate, max_rate);
                bucket.refill_rate = new_rate;
                bucket.max_tokens = new_rate * interval_secs;
                // Tokens are left in place; the next refill clamps them to
                // the new capacity.
                bucket.reset_window();

                (error_rate, avg_response_ms, factor, new_rate)
            };

            let (error_rate, avg_response_ms, factor, new_rate) = adjusted;
            debug!(
                key = %key,
                cpu_load,
                memory_load,
                error_rate,
                avg_response_ms,
                factor,
                refill_rate = new_rate,
                "Adjusted per-key rate limit"
            );
            ADJUSTMENTS_TOTAL.inc();
        }
    }
}

/// Adaptive per-key rate limiter.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Must be
/// created from within a tokio runtime: construction spawns the adjustment
/// control loop and the host load sampler, both of which run until
/// [`AdaptiveLimiter::close`] (or drop) terminates them.
///
/// # Example
///
/// ```rust,no_run
/// use dashlimit::{AdaptiveLimiter, LimiterConfig};
/// use std::time::{Duration, Instant};
///
/// # async fn handle(limiter: &AdaptiveLimiter) {
/// if limiter.allow("tenant-a").await {
///     let start = Instant::now();
///     // ... serve the request ...
///     limiter.record_outcome("tenant-a", true, start.elapsed()).await;
/// } else {
///     // reject with 429
/// }
/// # }
/// ```
pub struct AdaptiveLimiter {
    shared: Arc<LimiterShared>,
    shutdown: watch::Sender<bool>,
    adjuster: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AdaptiveLimiter {
    /// Create a limiter from `config` and start its background tasks.
    ///
    /// Nonsensical configuration values are repaired via
    /// [`LimiterConfig::normalized`] rather than rejected.
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        let config = config.normalized();
        let adjust_interval = config.adjust_interval;

        let shared = Arc::new(LimiterShared {
            load: SystemLoadMonitor::new(config.metrics_interval),
            config,
            buckets: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            metric_keys: RwLock::new(HashSet::new()),
        });

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task_shared = Arc::clone(&shared);
        let adjuster = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + adjust_interval;
            let mut ticker = tokio::time::interval_at(start, adjust_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => task_shared.adjust_all().await,
                    _ = shutdown_rx.changed() => {
                        debug!("Limit adjuster shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            shared,
            shutdown,
            adjuster: tokio::sync::Mutex::new(Some(adjuster)),
        }
    }

    /// Whether a request for `key` may proceed now, consuming one token if
    /// so. Returns `false` once the limiter is closed. Never blocks beyond
    /// brief guard waits.
    pub async fn allow(&self, key: &str) -> bool {
        if self.shared.closed.load(Ordering::SeqCst) {
            return false;
        }

        let bucket = self.shared.get_or_create(key).await;
        let admitted = {
            let mut bucket = bucket.lock();
            bucket.refill(Instant::now());
            bucket.try_admit()
        };

        let label = self.shared.metric_key_label(key).await;
        if admitted {
            ADMITTED_TOTAL.with_label_values(&[label.as_ref()]).inc();
        } else {
            DENIED_TOTAL.with_label_values(&[label.as_ref()]).inc();
        }

        admitted
    }

    /// Wait until a token for `key` is available, polling
    /// [`AdaptiveLimiter::allow`] with a short fixed backoff.
    ///
    /// Returns [`Error::LimiterClosed`] if the limiter is closed before a
    /// token is acquired. There is no fairness across waiters: a fresh
    /// `allow` caller may overtake a waiter. To bound the wait, wrap the
    /// future in [`tokio::time::timeout`] or race it in a `select!`;
    /// dropping it abandons the wait within one backoff sleep.
    pub async fn wait(&self, key: &str) -> Result<()> {
        loop {
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(Error::LimiterClosed);
            }
            if self.allow(key).await {
                return Ok(());
            }
            tokio::time::sleep(WAIT_BACKOFF).await;
        }
    }

    /// Report the outcome of a previously admitted request for `key`.
    ///
    /// Feeds the adjustment window counters; a no-op once the limiter is
    /// closed. `response_time` is accounted in whole milliseconds.
    pub async fn record_outcome(&self, key: &str, success: bool, response_time: Duration) {
        if self.shared.closed.load(Ordering::SeqCst) {
            return;
        }

        let bucket = self.shared.get_or_create(key).await;
        bucket.lock().record_outcome(success, response_time);
    }

    /// Currently available tokens for `key`, after crediting elapsed time.
    ///
    /// Monitoring accessor; creates the bucket if the key is new.
    pub async fn available_tokens(&self, key: &str) -> f64 {
        let bucket = self.shared.get_or_create(key).await;
        let mut bucket = bucket.lock();
        bucket.refill(Instant::now());
        bucket.tokens
    }

    /// Close the limiter: subsequent `allow` calls return `false`,
    /// `record_outcome` becomes a no-op, and the background tasks are
    /// stopped and awaited. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.shutdown.send(true);
        if let Some(handle) = self.adjuster.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Limit adjuster task failed during shutdown");
            }
        }
        self.shared.load.stop().await;
        Ok(())
    }
}

impl Default for AdaptiveLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}
