//! Fixed-point price/quantity representation.
//!
//! The order book keys levels by an exact integer rather than `f64`: venues hand us
//! prices and quantities as decimal strings, and two "equal" prices from different
//! venues (or two deltas for the same venue) must compare bit-for-bit equal. Floats
//! would drift; a fixed-point integer scaled by a per-instrument `precision_factor`
//! does not. See `libs/types` in the source corpus for the same discipline applied to
//! the wire-level `OrderBookTLV`.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Number of implied decimal places carried by every `Fixed` value in this crate.
///
/// Eight decimals covers every venue's price and quantity precision we deal with
/// (Binance, Bybit, Bitget, KuCoin and CoinEx all quote at or below 8 decimals for
/// USDT-margined futures).
pub const PRECISION: u32 = 8;
const SCALE: i64 = 100_000_000; // 10^PRECISION

/// A price or quantity scaled to a fixed number of decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fixed(pub i64);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);

    pub fn from_decimal(value: Decimal) -> Option<Fixed> {
        (value * Decimal::from(SCALE)).to_i64().map(Fixed)
    }

    /// Parse a venue-supplied decimal string directly, never through `f64`.
    pub fn from_str_exact(s: &str) -> Result<Fixed, rust_decimal::Error> {
        let decimal: Decimal = s.parse()?;
        Self::from_decimal(decimal).ok_or(rust_decimal::Error::ExceedsMaximumPossibleValue)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, PRECISION)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

impl std::fmt::Display for Fixed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_decimal() {
        let f = Fixed::from_str_exact("45000.12345678").unwrap();
        assert_eq!(f.to_decimal().to_string(), "45000.12345678");
    }

    #[test]
    fn ordering_matches_numeric_ordering() {
        let a = Fixed::from_str_exact("100.5").unwrap();
        let b = Fixed::from_str_exact("100.50000001").unwrap();
        assert!(a < b);
    }
}
