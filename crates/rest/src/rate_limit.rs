//! Per-venue, per-second token-bucket rate limiting.
//!
//! Grounded on the teacher's `services/adapters/src/rate_limit.rs`: one
//! `governor` direct rate limiter per venue, configured at startup and consulted
//! before every outbound request.

use governor::{DefaultDirectRateLimiter, Quota};
use md_types::VenueId;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

#[derive(Clone)]
pub struct RateLimiter {
    limiters: HashMap<VenueId, Arc<DefaultDirectRateLimiter>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            limiters: HashMap::new(),
        }
    }

    /// Configure a per-path token bucket refilling `requests_per_second` tokens/sec.
    pub fn configure_venue(&mut self, venue: VenueId, requests_per_second: u32) {
        match NonZeroU32::try_from(requests_per_second) {
            Ok(rate) => {
                let quota = Quota::per_second(rate);
                self.limiters
                    .insert(venue, Arc::new(DefaultDirectRateLimiter::direct(quota)));
            }
            Err(_) => {
                tracing::warn!(%venue, requests_per_second, "invalid rate limit, venue left unthrottled");
            }
        }
    }

    /// Block until a request slot is available for `venue`. A venue with no configured
    /// limiter is never throttled.
    pub async fn acquire(&self, venue: VenueId) {
        if let Some(limiter) = self.limiters.get(&venue) {
            limiter.until_ready().await;
        }
    }

    pub fn check(&self, venue: VenueId) -> bool {
        self.limiters
            .get(&venue)
            .map(|limiter| limiter.check().is_ok())
            .unwrap_or(true)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        let mut limiter = Self::new();
        // Conservative defaults; venues differ in published weight-based limits, so
        // these are a floor, not an exact match to each venue's documented quota.
        limiter.configure_venue(VenueId::Binance, 20);
        limiter.configure_venue(VenueId::Bybit, 10);
        limiter.configure_venue(VenueId::Bitget, 10);
        limiter.configure_venue(VenueId::KuCoin, 15);
        limiter.configure_venue(VenueId::CoinEx, 10);
        limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_venue_is_never_throttled() {
        let limiter = RateLimiter::new();
        assert!(limiter.check(VenueId::Binance));
        limiter.acquire(VenueId::Binance).await;
    }

    #[test]
    fn zero_rate_leaves_venue_unthrottled_rather_than_panicking() {
        let mut limiter = RateLimiter::new();
        limiter.configure_venue(VenueId::Bybit, 0);
        assert!(limiter.check(VenueId::Bybit));
    }
}
