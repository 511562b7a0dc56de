//! Normalization layer: venue-specific wire values in, canonical types out.
//!
//! No I/O, no venue-specific parsing of JSON shapes (that lives in `md-adapters`) — this
//! crate is the pure-function boundary named in `spec.md` §4.4, kept small and
//! thoroughly unit-tested since every adapter depends on it for correctness.

pub mod symbol;
pub mod units;

pub use symbol::{base_asset, canonicalize, split_quote, QUOTE_SUFFIXES};
pub use units::{funding_interval_hours, normalize_order_status, normalize_side, to_millis, TimeUnit};
