//! Unit and enum normalization: funding intervals, timestamps, sides, order status.
//!
//! Grounded on `spec.md` §4.4: everything here is a pure function from a venue's raw
//! representation to the workspace's canonical one, with no I/O and no venue branching
//! beyond a `match`.

use md_types::{OrderStatus, Side, VenueId};

/// Convert a funding interval expressed in seconds to whole hours, rounding down.
/// Venues publish either an explicit interval or funding timestamps spaced apart;
/// callers compute the raw seconds before calling this.
pub fn funding_interval_hours(raw_seconds: i64) -> u32 {
    (raw_seconds.max(0) / 3600) as u32
}

/// Normalize a venue timestamp that may be seconds, milliseconds, or microseconds into
/// UTC milliseconds. Venues are consistent within themselves about which unit they use,
/// so this takes the raw value and an explicit unit rather than guessing from magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

pub fn to_millis(raw: i64, unit: TimeUnit) -> u64 {
    let millis = match unit {
        TimeUnit::Seconds => raw.saturating_mul(1_000),
        TimeUnit::Millis => raw,
        TimeUnit::Micros => raw / 1_000,
        TimeUnit::Nanos => raw / 1_000_000,
    };
    millis.max(0) as u64
}

/// Normalize a venue-specific side token to the canonical `Buy`/`Sell`.
pub fn normalize_side(venue: VenueId, raw: &str) -> Option<Side> {
    let lowered = raw.to_ascii_lowercase();
    match venue {
        VenueId::Bybit | VenueId::Bitget | VenueId::KuCoin | VenueId::CoinEx => {
            match lowered.as_str() {
                "buy" => Some(Side::Buy),
                "sell" => Some(Side::Sell),
                _ => None,
            }
        }
        VenueId::Binance => match lowered.as_str() {
            "buy" | "bid" | "b" => Some(Side::Buy),
            "sell" | "ask" | "a" | "s" => Some(Side::Sell),
            _ => None,
        },
    }
}

/// Normalize a venue order-status string into the closed set named in `spec.md` §4.4.
/// Unknown statuses are folded into `Rejected` rather than silently dropped, since an
/// order in an unrecognized state still needs to surface to the caller.
pub fn normalize_order_status(raw: &str) -> OrderStatus {
    match raw.to_ascii_lowercase().as_str() {
        "new" | "created" | "open" | "live" => OrderStatus::New,
        "partially_filled" | "partiallyfilled" | "partial_fill" | "part_filled" => {
            OrderStatus::PartiallyFilled
        }
        "filled" | "full_fill" | "fully_filled" => OrderStatus::Filled,
        "canceled" | "cancelled" | "cancel" => OrderStatus::Canceled,
        "expired" | "timeout" | "deactivated" => OrderStatus::Expired,
        _ => OrderStatus::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funding_interval_rounds_down_to_whole_hours() {
        assert_eq!(funding_interval_hours(8 * 3600), 8);
        assert_eq!(funding_interval_hours(8 * 3600 + 1799), 8);
    }

    #[test]
    fn timestamp_units_convert_to_millis() {
        assert_eq!(to_millis(1_700_000_000, TimeUnit::Seconds), 1_700_000_000_000);
        assert_eq!(to_millis(1_700_000_000_000, TimeUnit::Millis), 1_700_000_000_000);
        assert_eq!(to_millis(1_700_000_000_000_000, TimeUnit::Micros), 1_700_000_000_000);
    }

    #[test]
    fn sides_normalize_across_venues() {
        assert_eq!(normalize_side(VenueId::Binance, "BUY"), Some(Side::Buy));
        assert_eq!(normalize_side(VenueId::Bybit, "Sell"), Some(Side::Sell));
        assert_eq!(normalize_side(VenueId::KuCoin, "unknown"), None);
    }

    #[test]
    fn order_status_maps_into_closed_set() {
        assert_eq!(normalize_order_status("NEW"), OrderStatus::New);
        assert_eq!(normalize_order_status("PartiallyFilled"), OrderStatus::PartiallyFilled);
        assert_eq!(normalize_order_status("some_unmapped_state"), OrderStatus::Rejected);
    }
}
