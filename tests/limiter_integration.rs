// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! End-to-end limiter behavior: bucket exhaustion and refill, waiting,
//! control-loop adjustment, shutdown semantics, per-key isolation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use dashlimit::{AdaptiveLimiter, LimiterConfig};

#[tokio::test]
async fn test_bucket_exhausts_then_refills() {
    let limiter = AdaptiveLimiter::new(
        LimiterConfig::new()
            .with_initial_limit(10)
            .with_min_limit(5)
            .with_max_limit(20)
            .with_interval(Duration::from_secs(1)),
    );

    let key = "test-key";

    for i in 0..10 {
        assert!(
            limiter.allow(key).await,
            "request {i} should be allowed but was denied"
        );
    }

    assert!(
        !limiter.allow(key).await,
        "request 11 should be denied but was allowed"
    );

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(
        limiter.allow(key).await,
        "request after refill should be allowed but was denied"
    );

    limiter.close().await.unwrap();
}

#[tokio::test]
async fn test_short_interval_refill() {
    let limiter = AdaptiveLimiter::new(
        LimiterConfig::new()
            .with_initial_limit(2)
            .with_interval(Duration::from_millis(50)),
    );

    let key = "test-key-wait";

    assert!(limiter.allow(key).await, "first request should be allowed");
    assert!(limiter.allow(key).await, "second request should be allowed");
    assert!(
        !limiter.allow(key).await,
        "should not allow requests after tokens are depleted"
    );

    tokio::time::sleep(Duration::from_millis(70)).await;

    assert!(
        limiter.allow(key).await,
        "should allow a request after the refill interval"
    );

    limiter.close().await.unwrap();
}

#[tokio::test]
async fn test_adjuster_reduces_limit_under_failures() {
    let limiter = AdaptiveLimiter::new(
        LimiterConfig::new()
            .with_initial_limit(10)
            .with_adjust_interval(Duration::from_millis(100)),
    );

    let key = "test-key-failures";

    // Report every admitted request as a slow failure, so both the error
    // rate factor and the response-time factor push the rate down.
    for _ in 0..20 {
        if limiter.allow(key).await {
            limiter
                .record_outcome(key, false, Duration::from_millis(500))
                .await;
        }
    }

    // Let at least one adjustment tick run.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut allowed = 0;
    for _ in 0..20 {
        if limiter.allow(key).await {
            allowed += 1;
        }
    }

    assert!(
        allowed < 10,
        "limit should have decreased below 10, but allowed {allowed} requests"
    );

    limiter.close().await.unwrap();
}

#[tokio::test]
async fn test_wait_blocks_until_token_available() {
    let limiter = Arc::new(AdaptiveLimiter::new(
        LimiterConfig::new()
            .with_initial_limit(1)
            .with_min_limit(1)
            .with_interval(Duration::from_millis(50)),
    ));

    assert!(limiter.allow("w").await);

    let waiter = {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move { limiter.wait("w").await })
    };

    // The waiter cannot finish before a refill interval has credited a token.
    waiter.await.unwrap().unwrap();

    limiter.close().await.unwrap();
}

#[tokio::test]
async fn test_wait_is_bounded_by_caller_timeout() {
    let limiter = AdaptiveLimiter::new(
        LimiterConfig::new()
            .with_initial_limit(1)
            .with_min_limit(1)
            .with_interval(Duration::from_secs(60)),
    );

    assert!(limiter.allow("t").await);

    // Refill is one token per minute; a 50ms budget must expire first.
    let result = tokio::time::timeout(Duration::from_millis(50), limiter.wait("t")).await;
    assert!(result.is_err(), "wait should have timed out");

    limiter.close().await.unwrap();
}

#[tokio::test]
async fn test_keys_are_isolated() {
    let limiter = AdaptiveLimiter::new(
        LimiterConfig::new()
            .with_initial_limit(5)
            .with_min_limit(1)
            .with_interval(Duration::from_secs(60)),
    );

    for _ in 0..5 {
        assert!(limiter.allow("tenant-a").await);
    }
    assert!(!limiter.allow("tenant-a").await);

    // Draining tenant-a leaves tenant-b's budget untouched.
    for _ in 0..5 {
        assert!(limiter.allow("tenant-b").await);
    }

    limiter.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let limiter = AdaptiveLimiter::new(LimiterConfig::default());

    limiter.close().await.unwrap();
    limiter.close().await.unwrap();
    limiter.close().await.unwrap();

    assert!(!limiter.allow("k").await);
}

#[tokio::test]
async fn test_concurrent_admissions_bounded_by_capacity() {
    let limiter = Arc::new(AdaptiveLimiter::new(
        LimiterConfig::new()
            .with_initial_limit(50)
            .with_min_limit(1)
            .with_interval(Duration::from_secs(60)),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            let mut admitted = 0u64;
            for _ in 0..25 {
                if limiter.allow("contended").await {
                    admitted += 1;
                }
            }
            admitted
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }

    // 200 attempts against a 50-token bucket with negligible refill.
    assert!(
        total <= 51,
        "admitted {total} requests from a 50-token budget"
    );
    assert!(total >= 50, "expected the full budget to be admitted, got {total}");

    limiter.close().await.unwrap();
}
