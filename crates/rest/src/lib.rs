//! REST helper: rate-limited, signed HTTP access to each venue's snapshot, ticker,
//! funding, and instrument endpoints (`spec.md` §4.6).
//!
//! Venue-specific JSON shapes are parsed by `md-adapters`, which calls into this crate
//! for the transport, rate limiting, and signing concerns shared by all five venues.

pub mod client;
pub mod rate_limit;
pub mod signing;

pub use client::{
    build_funding_rate, build_instrument, build_snapshot, build_ticker, ApiCredentials, RestClient,
};
pub use rate_limit::RateLimiter;
