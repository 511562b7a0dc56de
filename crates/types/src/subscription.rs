//! Declared subscription intent.
//!
//! A `Subscription` is the adapter's source of truth for what it is currently
//! subscribed to; replaying subscriptions after a reconnect is a pure function of the
//! set the adapter currently holds (see `md-adapters::SubscriptionSet`).

use crate::venue::VenueId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    OrderBook,
    Trades,
    Ticker,
    Funding,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub venue: VenueId,
    pub channel: Channel,
    /// Venue-native symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Extra venue-specific parameters, e.g. order-book depth.
    pub depth: Option<u32>,
}

impl Subscription {
    pub fn new(venue: VenueId, channel: Channel, symbol: impl Into<String>) -> Self {
        Self {
            venue,
            channel,
            symbol: symbol.into(),
            depth: None,
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }
}
