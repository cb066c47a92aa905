use std::time::{Duration, Instant};

use varberg::application::services::RateLimiter;

#[tokio::test]
async fn given_free_limiter_when_acquiring_then_permit_granted_immediately() {
    let limiter = RateLimiter::new("test", 10, 2);
    let start = Instant::now();
    let permit = limiter.acquire(Duration::from_secs(1)).await;
    assert!(permit.is_some());
    assert!(start.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn given_concurrency_exhausted_when_acquiring_then_times_out() {
    let limiter = RateLimiter::new("test", 100, 2);

    let _first = limiter.acquire(Duration::from_secs(1)).await.unwrap();
    let _second = limiter.acquire(Duration::from_secs(1)).await.unwrap();

    // Both slots held; the third caller must time out.
    let third = limiter.acquire(Duration::from_millis(100)).await;
    assert!(third.is_none());
}

#[tokio::test]
async fn given_permit_dropped_then_slot_is_returned() {
    let limiter = RateLimiter::new("test", 100, 1);

    let first = limiter.acquire(Duration::from_secs(1)).await.unwrap();
    drop(first);

    let second = limiter.acquire(Duration::from_secs(1)).await;
    assert!(second.is_some());
}

#[tokio::test]
async fn given_bucket_drained_then_rpm_cap_holds_in_window() {
    // 3 requests per minute, generous concurrency: the bucket is the limit.
    let limiter = RateLimiter::new("test", 3, 10);

    for _ in 0..3 {
        let permit = limiter.acquire(Duration::from_millis(200)).await;
        assert!(permit.is_some());
    }

    // Refill rate is 0.05 tokens/s; a short timeout cannot see a 4th token.
    let over_budget = limiter.acquire(Duration::from_millis(200)).await;
    assert!(over_budget.is_none());
}

#[tokio::test]
async fn given_fractional_refill_then_token_becomes_available_over_time() {
    // 60 rpm = one token per second.
    let limiter = RateLimiter::new("test", 60, 10);

    for _ in 0..60 {
        assert!(limiter.acquire(Duration::from_millis(500)).await.is_some());
    }

    let start = Instant::now();
    let refilled = limiter.acquire(Duration::from_secs(3)).await;
    assert!(refilled.is_some());
    // The 61st grant had to wait for accumulation, not arrive instantly.
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn tokens_are_consumed_and_never_returned() {
    let limiter = RateLimiter::new("test", 2, 10);

    let first = limiter.acquire(Duration::from_millis(100)).await.unwrap();
    drop(first);
    let second = limiter.acquire(Duration::from_millis(100)).await.unwrap();
    drop(second);

    // Dropping permits gave concurrency slots back, but not tokens.
    assert!(limiter.acquire(Duration::from_millis(100)).await.is_none());
    assert_eq!(limiter.available_slots(), 10);
}
