//! Outward event contract published by the hub (see `spec.md` §6).

use crate::book::PriceLevel;
use crate::instrument::CanonicalSymbol;
use crate::records::{FundingRate, Ticker, Trade};
use crate::venue::VenueId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookEvent {
    pub venue: VenueId,
    pub symbol: String,
    pub canonical: CanonicalSymbol,
    pub best_bid: Option<PriceLevel>,
    pub best_ask: Option<PriceLevel>,
    /// `(ask - bid) / bid * 10_000`, only present when both sides are non-empty.
    pub spread_bps: Option<f64>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub seq: u64,
    pub ts: u64,
    pub is_snapshot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Authenticated,
    Subscribed,
    Degraded,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStateEvent {
    pub venue: VenueId,
    pub state: ConnectionState,
    pub detail: Option<String>,
    pub ts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub venue: VenueId,
    pub message: String,
    /// Venue-native error code, when the venue provided one.
    pub venue_code: Option<String>,
    pub recoverable: bool,
    pub ts: u64,
}

/// Everything the hub fans out to downstream subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    OrderBook(OrderBookEvent),
    Trade(Trade),
    Ticker(Ticker),
    Funding(FundingRate),
    Connection(ConnectionStateEvent),
    Error(ErrorEvent),
}
