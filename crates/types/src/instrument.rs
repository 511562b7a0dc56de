//! Instrument identity and metadata.

use crate::VenueId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Market this instrument trades in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    Perpetual,
    Delivery,
    Spot,
}

impl InstrumentKind {
    fn suffix(&self) -> &'static str {
        match self {
            InstrumentKind::Perpetual => "PERP",
            InstrumentKind::Delivery => "DELIV",
            InstrumentKind::Spot => "SPOT",
        }
    }
}

/// Venue-independent instrument key, e.g. `BTC-USDT-PERP`.
///
/// Immutable and cheap to copy/compare; the hub and downstream consumers join data
/// across venues on this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalSymbol(String);

impl CanonicalSymbol {
    pub fn new(base: &str, quote: &str, kind: InstrumentKind) -> Self {
        Self(format!("{base}-{quote}-{}", kind.suffix()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full instrument metadata as discovered from a venue.
///
/// Replace-whole lifecycle: instruments are never mutated in place, only replaced
/// wholesale on rediscovery (see `md-adapters::fetch_instruments`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub venue: VenueId,
    /// Venue-native symbol, e.g. `BTCUSDT`.
    pub venue_symbol: String,
    pub canonical: CanonicalSymbol,
    pub base_asset: String,
    pub quote_asset: String,
    pub kind: InstrumentKind,
    /// Minimum price increment.
    pub price_tick: rust_decimal::Decimal,
    /// Minimum quantity increment.
    pub quantity_step: rust_decimal::Decimal,
    pub min_notional: rust_decimal::Decimal,
    pub maker_fee: rust_decimal::Decimal,
    pub taker_fee: rust_decimal::Decimal,
    /// Contract size multiplier; 1 for linear/spot instruments.
    pub contract_multiplier: rust_decimal::Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_symbol_formats_perp() {
        let sym = CanonicalSymbol::new("BTC", "USDT", InstrumentKind::Perpetual);
        assert_eq!(sym.as_str(), "BTC-USDT-PERP");
    }
}
