//! Upstream request pacing.
//!
//! NCBI allows 3 requests/sec without an API key and 10 with one.

use governor::{Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = GovLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Single-bucket limiter shared by every clone of the client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limiter: Option<Arc<DirectLimiter>>,
}

impl RateLimiter {
    /// Create with a per-second limit. Zero disables pacing.
    pub fn per_second(requests_per_sec: u32) -> Self {
        let limiter = NonZeroU32::new(requests_per_sec)
            .map(|n| Arc::new(GovLimiter::direct(Quota::per_second(n))));
        Self { limiter }
    }

    /// Wait until a request slot is available.
    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}
