//! Symbol canonicalization (`spec.md` §4.4, §8 scenario 6).
//!
//! Venue symbols are flat strings like `BTCUSDT`; we split off a known quote suffix to
//! recover the base asset and build a venue-independent [`CanonicalSymbol`]. Suffixes
//! are checked longest-first so `USDT`/`USDC` never get mistaken for a trailing `USD`.

use md_types::{CanonicalSymbol, InstrumentKind};

/// Recognized quote assets, longest-match-first.
pub const QUOTE_SUFFIXES: [&str; 5] = ["USDT", "USDC", "BUSD", "TUSD", "USD"];

/// Split a venue symbol into `(base, quote)`. An unrecognized quote suffix leaves the
/// symbol untouched: `base == symbol`, `quote == ""`.
pub fn split_quote(symbol: &str) -> (String, String) {
    for suffix in QUOTE_SUFFIXES {
        if symbol.len() > suffix.len() && symbol.ends_with(suffix) {
            let base = &symbol[..symbol.len() - suffix.len()];
            return (base.to_string(), suffix.to_string());
        }
    }
    (symbol.to_string(), String::new())
}

/// The base asset only, e.g. `BTCUSDT` -> `BTC`. Idempotent: unknown input (no
/// recognized suffix) passes through unchanged, so repeated application is a no-op.
pub fn base_asset(symbol: &str) -> String {
    split_quote(symbol).0
}

/// Build the full canonical key for a venue symbol and market kind.
pub fn canonicalize(symbol: &str, kind: InstrumentKind) -> CanonicalSymbol {
    let (base, quote) = split_quote(symbol);
    CanonicalSymbol::new(&base, &quote, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_table() {
        // spec.md §8 scenario 6
        assert_eq!(base_asset("BTCUSDT"), "BTC");
        assert_eq!(base_asset("ETHUSDC"), "ETH");
        assert_eq!(base_asset("SOLUSD"), "SOL");
        assert_eq!(base_asset("FOOBAR"), "FOOBAR");
    }

    #[test]
    fn prefers_longer_suffix_match() {
        let (base, quote) = split_quote("BTCUSDT");
        assert_eq!(base, "BTC");
        assert_eq!(quote, "USDT");
    }

    #[test]
    fn canonicalize_builds_full_key() {
        let sym = canonicalize("BTCUSDT", InstrumentKind::Perpetual);
        assert_eq!(sym.as_str(), "BTC-USDT-PERP");
    }

    proptest::proptest! {
        #[test]
        fn canonicalization_is_idempotent(symbol in "[A-Z]{2,10}") {
            let once = base_asset(&symbol);
            let twice = base_asset(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
