use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;

/// Per-caller request limiter, keyed by the `User-ID` the caller presented.
/// Requests without an identity are rejected before reaching it.
pub struct CallerRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl CallerRateLimiter {
    pub fn new_per_second(max: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(max.max(1)).unwrap_or(NonZeroU32::MIN));
        let limiter = RateLimiter::keyed(quota);
        Self { limiter }
    }

    pub fn check(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }
}
