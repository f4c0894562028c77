// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `DashLimit`
//!
//! Adaptive, per-key rate limiting for services embedding this crate
//! in-process. Each key (tenant, route, client identity) gets a token bucket
//! whose refill rate is periodically re-tuned by a feedback control loop
//! from observed request outcomes and host CPU/memory load, within
//! configured floor/ceiling bounds and toward a target response time.
//!
//! The crate also ships a co-resident [`CircuitBreaker`] that call sites
//! may combine with admission, and a small [`Forecaster`] for request-rate
//! prediction and seasonality scoring.
//!
//! # Example
//!
//! ```rust,no_run
//! use dashlimit::{AdaptiveLimiter, LimiterConfig};
//! use std::time::{Duration, Instant};
//!
//! #[tokio::main]
//! async fn main() -> dashlimit::Result<()> {
//!     let limiter = AdaptiveLimiter::new(
//!         LimiterConfig::new()
//!             .with_initial_limit(100)
//!             .with_target_response_time(Duration::from_millis(200)),
//!     );
//!
//!     if limiter.allow("tenant-a").await {
//!         let start = Instant::now();
//!         // ... serve the request ...
//!         limiter.record_outcome("tenant-a", true, start.elapsed()).await;
//!     }
//!
//!     limiter.close().await?;
//!     Ok(())
//! }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod env_vars;
pub mod errors;
pub mod forecast;
pub mod limiter;
pub mod metrics_constants;
mod metrics_utils;
pub mod system_load;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::LimiterConfig;
pub use errors::{Error, Result};
pub use forecast::Forecaster;
pub use limiter::AdaptiveLimiter;
pub use system_load::SystemLoadMonitor;
