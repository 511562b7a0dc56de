//! Canonical records shared across venues: funding, tickers, trades, account state.
//!
//! Numeric fields retain venue precision (`Fixed`); timestamps are unified to UTC
//! milliseconds at the normalization boundary (`md-normalize`).

use crate::fixed::Fixed;
use crate::instrument::CanonicalSymbol;
use crate::venue::VenueId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub venue: VenueId,
    pub canonical: CanonicalSymbol,
    pub rate: Fixed,
    /// Funding interval normalized to whole hours (e.g. 8 for the common 3x/day cadence).
    pub interval_hours: u32,
    pub next_funding_time_ms: u64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub venue: VenueId,
    pub canonical: CanonicalSymbol,
    pub last_price: Fixed,
    pub best_bid: Fixed,
    pub best_ask: Fixed,
    pub volume_24h: Fixed,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub venue: VenueId,
    pub canonical: CanonicalSymbol,
    pub price: Fixed,
    pub quantity: Fixed,
    pub side: Side,
    pub trade_id: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    pub venue: VenueId,
    pub canonical: CanonicalSymbol,
    pub venue_order_id: String,
    pub client_order_id: Option<String>,
    pub side: Side,
    pub price: Fixed,
    pub quantity: Fixed,
    pub filled_quantity: Fixed,
    pub status: OrderStatus,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub venue: VenueId,
    pub canonical: CanonicalSymbol,
    pub side: Side,
    pub quantity: Fixed,
    pub entry_price: Fixed,
    pub unrealized_pnl: Fixed,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub venue: VenueId,
    pub asset: String,
    pub free: Fixed,
    pub locked: Fixed,
    pub timestamp_ms: u64,
}
