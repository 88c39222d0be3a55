//! Token-bucket limiter gating calls to the discovery endpoint. Direct
//! per-device calls are not limited; serial execution per device is the
//! natural bound there.

use tokio::time::{sleep, Duration, Instant};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: tokio::sync::Mutex<BucketState>,
}

impl RateLimiter {
    pub fn per_minute(requests: u32) -> Self {
        let capacity = f64::from(requests.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: tokio::sync::Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until the bucket refills if necessary.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens =
                    (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_within_capacity_is_immediate() {
        let limiter = RateLimiter::per_minute(10);
        let before = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_waits_for_refill() {
        let limiter = RateLimiter::per_minute(60);
        for _ in 0..60 {
            limiter.acquire().await;
        }
        let before = Instant::now();
        limiter.acquire().await;
        // One token refills per second at 60 rpm.
        assert!(before.elapsed() >= Duration::from_millis(900));
    }
}
