//! Byte Throughput Throttle
//!
//! Token bucket measured in bytes. A write may overdraw the bucket; later
//! writers wait until the debt has been refilled. Artifacts larger than the
//! burst size therefore still go through, they just slow everyone after them.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{Error, Result};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Bytes-per-second rate limiter
#[derive(Debug)]
pub struct BytesRateLimiter {
    bytes_per_second: u64,
    burst: u64,
    bucket: Mutex<Bucket>,
}

impl BytesRateLimiter {
    /// Limiter allowing one second worth of burst
    pub fn new(bytes_per_second: u64) -> Self {
        Self::with_burst(bytes_per_second, bytes_per_second)
    }

    pub fn with_burst(bytes_per_second: u64, burst: u64) -> Self {
        let bytes_per_second = bytes_per_second.max(1);
        let burst = burst.max(1);
        Self {
            bytes_per_second,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.duration_since(bucket.last_refill);
        let added = elapsed.as_secs_f64() * self.bytes_per_second as f64;
        if added > 0.0 {
            bucket.tokens = (bucket.tokens + added).min(self.burst as f64);
            bucket.last_refill = now;
        }
    }

    /// Take `bytes` without waiting, failing while the bucket is in debt
    pub fn try_acquire(&self, bytes: u64) -> Result<()> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());

        if bucket.tokens < 0.0 {
            return Err(Error::RateLimitExceeded(format!(
                "write of {} bytes exceeds {} bytes/s",
                bytes, self.bytes_per_second
            )));
        }
        bucket.tokens -= bytes as f64;
        Ok(())
    }

    /// Take `bytes`, waiting for earlier writers' debt to be refilled
    pub async fn acquire(&self, bytes: u64) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket, Instant::now());

                if bucket.tokens >= 0.0 {
                    bucket.tokens -= bytes as f64;
                    return;
                }
                Duration::from_secs_f64(-bucket.tokens / self.bytes_per_second as f64)
            };

            trace!(bytes, wait_ms = wait.as_millis() as u64, "Throttling write");
            tokio::time::sleep(wait).await;
        }
    }
}
