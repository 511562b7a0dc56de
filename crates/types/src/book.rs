//! Order-book data model.
//!
//! The book itself (sequence validation, delta application, resync) lives in `md-book`;
//! this module only defines the shapes it operates on, so the wire-parsing adapters in
//! `md-adapters` can build `OrderBookDelta`/`OrderBookSnapshot` values without depending
//! on the engine crate.

use crate::fixed::Fixed;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single price/quantity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Fixed,
    pub quantity: Fixed,
}

/// Full order-book snapshot at a venue sequence id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub last_update_id: u64,
    pub timestamp_ms: u64,
}

/// Incremental delta against a book's current `last_update_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookDelta {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    /// First update id covered by this delta, when the venue provides one.
    pub first_update_id: Option<u64>,
    pub final_update_id: u64,
    /// `final_update_id` of the delta immediately preceding this one, when the venue
    /// provides it (Binance, Bybit). When absent, continuity is checked via
    /// `first_update_id == local.last_update_id + 1` instead.
    pub previous_final_id: Option<u64>,
    pub timestamp_ms: u64,
    /// Some venues push unsolicited full snapshots disguised as a "delta" message
    /// (e.g. the first message after a Bybit `orderbook.*` subscription). When true
    /// the engine replaces the book wholesale instead of merging.
    pub is_snapshot: bool,
}

/// Bid side sorts descending by price; ascending keys reversed via `Reverse`.
pub type BidMap = BTreeMap<std::cmp::Reverse<Fixed>, Fixed>;
pub type AskMap = BTreeMap<Fixed, Fixed>;

/// Outward-facing read of a book's top levels, used to build `OrderBookEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookTopN {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}
