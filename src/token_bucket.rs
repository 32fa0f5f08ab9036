//! Token bucket algorithm for rate limiting.

use std::time::{Duration, Instant};

/// Waits shorter than this busy-spin instead of sleeping to reduce jitter.
const SPIN_THRESHOLD: Duration = Duration::from_millis(500);

/// A token bucket that blocks the caller until the requested tokens are
/// covered.
///
/// Over any window of `W` seconds the number of granted tokens is bounded by
/// `limit + rate * W`.
pub struct TokenBucket {
    tokens: i64,
    limit: i64,
    rate: f64,
    last_replenished: Instant,
}

impl TokenBucket {
    pub fn new(limit: i64, rate: f64) -> Self {
        Self {
            tokens: limit,
            limit,
            rate,
            last_replenished: Instant::now(),
        }
    }

    /// Take `tokens` from the bucket, waiting for the deficit if it
    /// overdraws.
    pub fn take(&mut self, tokens: i64) -> i64 {
        self.tokens -= tokens;

        if self.tokens < 0 {
            Self::wait(-self.tokens, self.rate);
            self.replenish();
        }

        tokens
    }

    /// Add the tokens accumulated since the last replenish, capped at the
    /// bucket limit.
    pub fn replenish(&mut self) {
        let now = Instant::now();
        self.tokens += self.accumulate(now - self.last_replenished);
        self.last_replenished = now;
    }

    fn accumulate(&self, elapsed: Duration) -> i64 {
        ((self.rate * elapsed.as_secs_f64()) as i64).min(self.limit)
    }

    fn wait(tokens: i64, rate: f64) {
        let wait = Duration::from_secs_f64(tokens as f64 / rate);
        if wait < SPIN_THRESHOLD {
            let until = Instant::now() + wait;
            while Instant::now() < until {
                std::hint::spin_loop();
            }
        } else {
            std::thread::sleep(wait);
        }
    }
}
