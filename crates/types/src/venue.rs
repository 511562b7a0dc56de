//! # Venue Registry
//!
//! Every venue this framework speaks to, plus the small set of properties adapters and
//! the hub need to route and label data: a display name, the WebSocket host family, and
//! whether the venue exposes `previous_final_id` style sequencing on its order-book deltas
//! (used by the order-book engine to choose its continuity check, see `md-book`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A supported trading venue.
///
/// New venues are added here and nowhere else has to change for the rest of the
/// framework to route, log, and label their data consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VenueId {
    Binance,
    Bybit,
    Bitget,
    KuCoin,
    CoinEx,
}

impl VenueId {
    /// All venues this framework knows how to connect to.
    pub const ALL: [VenueId; 5] = [
        VenueId::Binance,
        VenueId::Bybit,
        VenueId::Bitget,
        VenueId::KuCoin,
        VenueId::CoinEx,
    ];

    /// Whether order-book deltas from this venue carry an explicit
    /// `previous_final_id` (vs. only a `first_update_id`/`final_update_id` pair).
    pub fn provides_previous_update_id(&self) -> bool {
        matches!(self, VenueId::Binance | VenueId::Bybit)
    }

    /// Lowercase identifier used in config files and CLI flags.
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Binance => "binance",
            VenueId::Bybit => "bybit",
            VenueId::Bitget => "bitget",
            VenueId::KuCoin => "kucoin",
            VenueId::CoinEx => "coinex",
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VenueId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(VenueId::Binance),
            "bybit" => Ok(VenueId::Bybit),
            "bitget" => Ok(VenueId::Bitget),
            "kucoin" => Ok(VenueId::KuCoin),
            "coinex" => Ok(VenueId::CoinEx),
            other => Err(format!("unknown venue: {other}")),
        }
    }
}
