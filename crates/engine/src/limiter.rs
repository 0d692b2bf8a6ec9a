use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;

use theodore_common::config::RateLimitConfig;

/// Point-in-time view of the bucket, taken without mutation.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiterSnapshot {
    pub tokens: f64,
    pub capacity: u32,
    pub refill_per_sec: f64,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("rate limiter wait budget elapsed")]
    Timeout,
}

/// Token-bucket gate for outbound provider calls, shared across all pool
/// workers.
///
/// Refill is continuous (fractional tokens), acquisition is integral.
/// Waiters are served FIFO: they queue on a fair async turnstile, so a
/// starved caller is impossible under bounded producer rates. The bucket
/// state itself sits behind a std mutex that is never held across await
/// points.
pub struct RateLimiter {
    capacity: u32,
    refill_per_sec: f64,
    turnstile: AsyncMutex<()>,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter with a full bucket.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            capacity: config.capacity,
            refill_per_sec: config.refill_per_sec,
            turnstile: AsyncMutex::new(()),
            state: Mutex::new(BucketState {
                tokens: config.capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Block until `n` tokens are available and deduct them atomically.
    /// Fails with `Timeout` once `wait_budget` elapses. A zero budget
    /// returns immediately either way. Dropping the returned future (caller
    /// cancellation) releases the waiter's queue position.
    pub async fn acquire(&self, n: u32, wait_budget: Duration) -> Result<(), AcquireError> {
        let deadline = Instant::now() + wait_budget;

        // Join the FIFO queue; tokio's mutex hands the lock out in request
        // order, which is what makes dispensing fair.
        let _turn = match tokio::time::timeout_at(
            tokio::time::Instant::from_std(deadline),
            self.turnstile.lock(),
        )
        .await
        {
            Ok(guard) => guard,
            Err(_) => {
                metrics::counter!("rate_limiter.timeouts").increment(1);
                return Err(AcquireError::Timeout);
            }
        };

        loop {
            let wait = {
                let mut state = self.state.lock().expect("rate limiter lock poisoned");
                self.refill(&mut state);

                if state.tokens >= n as f64 {
                    state.tokens -= n as f64;
                    metrics::gauge!("rate_limiter.tokens").set(state.tokens);
                    return Ok(());
                }

                let needed = n as f64 - state.tokens;
                Duration::from_secs_f64(needed / self.refill_per_sec)
            };

            if Instant::now() + wait > deadline {
                metrics::counter!("rate_limiter.timeouts").increment(1);
                return Err(AcquireError::Timeout);
            }

            tokio::time::sleep(wait).await;
        }
    }

    /// Current tokens, capacity, and refill rate, without mutating state.
    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let state = self.state.lock().expect("rate limiter lock poisoned");
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        let tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity as f64);

        RateLimiterSnapshot {
            tokens,
            capacity: self.capacity,
            refill_per_sec: self.refill_per_sec,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity as f64);
        state.last_refill = Instant::now();
    }
}
