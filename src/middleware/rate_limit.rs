//! Per-merchant request rate limiting.
//!
//! A keyed GCRA bucket. State is process-local and approximate across
//! replicas; exactness lives in the nonce store, not here.

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct MerchantRateLimiter {
    limiter: Arc<RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>>,
    clock: DefaultClock,
}

impl MerchantRateLimiter {
    /// `per_minute` requests over a rolling 60 seconds, full burst allowed.
    pub fn new(per_minute: u32) -> Self {
        let per_minute = per_minute.max(1);
        let burst = NonZeroU32::new(per_minute).expect("non-zero burst");
        let period = Duration::from_secs(60) / per_minute;
        let quota = Quota::with_period(period)
            .expect("non-zero period")
            .allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            clock: DefaultClock::default(),
        }
    }

    /// Ok when the request may proceed; Err carries the Retry-After seconds.
    pub fn check(&self, merchant_id: &str) -> Result<(), u64> {
        match self.limiter.check_key(&merchant_id.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Err(wait.as_secs().max(1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_allowed_then_limited() {
        let limiter = MerchantRateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.check("m-1").is_ok());
        }
        let retry_after = limiter.check("m-1").unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn merchants_do_not_share_buckets() {
        let limiter = MerchantRateLimiter::new(2);
        assert!(limiter.check("m-1").is_ok());
        assert!(limiter.check("m-1").is_ok());
        assert!(limiter.check("m-1").is_err());
        assert!(limiter.check("m-2").is_ok());
    }
}
