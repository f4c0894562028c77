// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Lightweight time-series forecasting over observed request rates.
//!
//! [`Forecaster`] keeps a bounded history of samples and offers two
//! predictors (moving average and exponential smoothing) plus a crude
//! seasonality score over a fixed set of candidate periods. It is intended
//! for capacity hints, not statistics: the embedding application feeds it
//! per-window request counts and asks for a next-window estimate.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

const DEFAULT_MAX_HISTORY: usize = 1000;
const DEFAULT_MA_WINDOW: usize = 10;
const DEFAULT_ALPHA: f64 = 0.3;

/// Minimum samples before pattern detection produces a score.
const PATTERN_MIN_SAMPLES: usize = 24;
/// Number of phase buckets each candidate period is divided into.
const PATTERN_BUCKET_COUNT: usize = 24;
/// Sample count at which the data-sufficiency factor saturates.
const PATTERN_FULL_CONFIDENCE_SAMPLES: f64 = 100.0;

/// Candidate seasonality periods, checked in order; ties keep the earliest.
const PATTERN_PERIODS: [Duration; 3] = [
    Duration::from_secs(60 * 60),
    Duration::from_secs(24 * 60 * 60),
    Duration::from_secs(7 * 24 * 60 * 60),
];

#[derive(Debug, Clone, Copy)]
struct SamplePoint {
    at: Instant,
    value: f64,
}

/// Bounded-history forecaster with moving-average and exponential-smoothing
/// predictors.
///
/// Safe for concurrent use: writers take an exclusive guard, readers a
/// shared one.
pub struct Forecaster {
    max_history: usize,
    ma_window: usize,
    alpha: f64,
    history: RwLock<VecDeque<SamplePoint>>,
}

impl Default for Forecaster {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            ma_window: DEFAULT_MA_WINDOW,
            alpha: DEFAULT_ALPHA,
            history: RwLock::new(VecDeque::new()),
        }
    }
}

impl Forecaster {
    /// Create a forecaster with the default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the history capacity. Values of zero are ignored.
    #[must_use]
    pub fn with_max_history(mut self, max: usize) -> Self {
        if max > 0 {
            self.max_history = max;
        }
        self
    }

    /// Set the moving-average window. Values of zero are ignored.
    #[must_use]
    pub fn with_ma_window(mut self, window: usize) -> Self {
        if window > 0 {
            self.ma_window = window;
        }
        self
    }

    /// Set the smoothing factor. Values outside [0, 1] are ignored.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        if (0.0..=1.0).contains(&alpha) {
            self.alpha = alpha;
        }
        self
    }

    /// Append a now-stamped sample, dropping the oldest beyond capacity.
    pub fn add_sample(&self, value: f64) {
        let mut history = self.history.write();
        history.push_back(SamplePoint {
            at: Instant::now(),
            value,
        });
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    /// Predict the next value by exponential smoothing over the last
    /// `ma_window` samples. With fewer than two samples, returns the single
    /// sample or zero.
    pub fn predict_next(&self) -> f64 {
        let history = self.history.read();
        if history.len() < 2 {
            return history.front().map_or(0.0, |p| p.value);
        }

        let start = history.len().saturating_sub(self.ma_window);
        let mut forecast = history[start].value;
        for point in history.iter().skip(start + 1) {
            forecast = self.alpha * point.value + (1.0 - self.alpha) * forecast;
        }
        forecast
    }

    /// Mean of the last `min(ma_window, n)` samples; zero when empty.
    pub fn predict_moving_average(&self) -> f64 {
        let history = self.history.read();
        if history.is_empty() {
            return 0.0;
        }

        let window = self.ma_window.min(history.len());
        let sum: f64 = history.iter().skip(history.len() - window).map(|p| p.value).sum();
        sum / window as f64
    }

    /// Score the history for seasonality against the candidate periods
    /// (1 hour, 24 hours, 7 days), returning the best period and its score.
    ///
    /// Returns `(Duration::ZERO, 0.0)` with fewer than 24 samples. The score
    /// is the fraction of variance explained by the phase bucketing, scaled
    /// by a data-sufficiency factor; it is not clamped below zero, so
    /// callers must treat any score `<= 0.0` as "no pattern".
    pub fn detect_pattern(&self) -> (Duration, f64) {
        let history = self.history.read();
        if history.len() < PATTERN_MIN_SAMPLES {
            return (Duration::ZERO, 0.0);
        }

        let now = Instant::now();
        let mut best_period = Duration::ZERO;
        let mut best_score = 0.0;

        for period in PATTERN_PERIODS {
            let score = evaluate_period(&history, now, period);
            if score > best_score {
                best_score = score;
                best_period = period;
            }
        }

        (best_period, best_score)
    }
}

/// Fraction of total variance explained by bucketing samples on their phase
/// within `period`, scaled by data sufficiency.
fn evaluate_period(history: &VecDeque<SamplePoint>, now: Instant, period: Duration) -> f64 {
    let period_nanos = period.as_nanos();
    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); PATTERN_BUCKET_COUNT];

    for point in history {
        let age = now.saturating_duration_since(point.at).as_nanos();
        let position = ((age % period_nanos) * PATTERN_BUCKET_COUNT as u128 / period_nanos)
            as usize;
        buckets[position.min(PATTERN_BUCKET_COUNT - 1)].push(point.value);
    }

    let values: Vec<f64> = history.iter().map(|p| p.value).collect();
    let total_variance = variance(&values);
    if total_variance == 0.0 {
        return 0.0;
    }

    let mut within_bucket_variance = 0.0;
    let mut total_weight = 0.0;
    for bucket in &buckets {
        if bucket.len() > 1 {
            within_bucket_variance += variance(bucket) * bucket.len() as f64;
            total_weight += bucket.len() as f64;
        }
    }

    if total_weight == 0.0 {
        return 0.0;
    }
    within_bucket_variance /= total_weight;

    let explained = 1.0 - within_bucket_variance / total_variance;
    let sufficiency = (values.len() as f64 / PATTERN_FULL_CONFIDENCE_SAMPLES).min(1.0);
    explained * sufficiency
}

/// Population variance; zero for fewer than two values.
fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64
}
