//! Per-requester hourly request quota.

use common::{RequesterId, ResolveError};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct RequesterQuota {
    limiter: Option<Arc<DefaultKeyedRateLimiter<RequesterId>>>,
    per_hour: u32,
}

impl RequesterQuota {
    /// At most `n` requests per requester per hour. Zero disables the quota.
    pub fn per_hour(n: u32) -> Self {
        let limiter = NonZeroU32::new(n).map(|n| Arc::new(GovLimiter::keyed(Quota::per_hour(n))));
        Self { limiter, per_hour: n }
    }

    /// Consume one request for `requester`.
    pub fn check(&self, requester: &RequesterId) -> Result<(), ResolveError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        limiter.check_key(requester).map_err(|_| {
            info!("Requester {} hit the hourly limit of {}", requester, self.per_hour);
            ResolveError::RateLimited {
                requester: requester.to_string(),
                limit: self.per_hour,
            }
        })
    }

    /// Drop state for requesters whose buckets have fully refilled.
    pub fn prune(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
        }
    }
}
