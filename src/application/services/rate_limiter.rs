//! Token-bucket + concurrency-gate rate limiting for vision backends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    max_tokens: f64,
    refill_per_sec: f64,
}

impl TokenBucket {
    fn new(max_rpm: u32) -> Self {
        Self {
            tokens: f64::from(max_rpm),
            last_refill: Instant::now(),
            max_tokens: f64::from(max_rpm),
            refill_per_sec: f64::from(max_rpm) / 60.0,
        }
    }

    /// Fractional refill accumulates; one token = one outbound request.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        self.last_refill = now;
    }

    fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Seconds until one whole token has accumulated.
    fn time_to_next_token(&self) -> Duration {
        if self.refill_per_sec <= f64::EPSILON {
            return Duration::from_secs(3600);
        }
        let deficit = (1.0 - self.tokens).max(0.0);
        Duration::from_secs_f64(deficit / self.refill_per_sec)
    }
}

/// Holds a concurrency slot for the duration of one backend call. The slot is
/// returned on drop; the rate token is consumed and never returned.
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
}

/// Per-backend request gate: a token bucket bounds requests per minute, a
/// semaphore bounds concurrent in-flight calls. Process-local by design; each
/// worker host maintains its own.
pub struct RateLimiter {
    name: &'static str,
    bucket: Mutex<TokenBucket>,
    semaphore: Arc<Semaphore>,
}

impl RateLimiter {
    pub fn new(name: &'static str, max_rpm: u32, max_concurrent: u32) -> Self {
        tracing::info!(
            limiter = name,
            max_rpm,
            max_concurrent,
            "Rate limiter initialized"
        );
        Self {
            name,
            bucket: Mutex::new(TokenBucket::new(max_rpm)),
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }

    /// Block until both a concurrency slot and a rate token are available, or
    /// the timeout elapses. The semaphore is taken first, mirroring the
    /// acquire order the backends expect.
    pub async fn acquire(&self, timeout: Duration) -> Option<RateLimitPermit> {
        let deadline = Instant::now() + timeout;

        let permit = match tokio::time::timeout_at(
            deadline,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(limiter = self.name, "Timed out waiting for concurrency slot");
                return None;
            }
        };

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                if bucket.try_take(now) {
                    return Some(RateLimitPermit { _permit: permit });
                }
                bucket.time_to_next_token()
            };

            let now = Instant::now();
            if now + wait > deadline {
                tracing::warn!(limiter = self.name, "Timed out waiting for rate token");
                return None;
            }
            tokio::time::sleep(wait).await;
        }
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}
