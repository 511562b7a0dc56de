//! Per-(venue, symbol) local order book.
//!
//! Mirrors `spec.md` §4.2: a REST snapshot bootstraps the book, a live delta stream
//! keeps it current, and any sequence gap forces a resync rather than a guess. The
//! representation is a `BTreeMap` per side (descending for bids via `Reverse`,
//! ascending for asks) so inserts/removes are O(log n) and top-of-book reads are O(1).

use md_types::book::{AskMap, BidMap};
use md_types::{OrderBookDelta, OrderBookSnapshot, PriceLevel, VenueId};
use std::cmp::Reverse;
use std::collections::VecDeque;

/// Result of applying one delta to a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedOutcome {
    /// The delta was merged and `last_update_id` advanced.
    Applied,
    /// A sequence gap was detected; the caller must fetch a fresh snapshot and call
    /// [`OrderBook::initialize_from_snapshot`] before any further `apply_update` will
    /// succeed.
    NeedResync,
    /// The delta was buffered (book not yet initialized) or silently superseded.
    Ignored,
}

/// Upper bound on deltas buffered before the first snapshot arrives. Oldest is
/// dropped when full, per `spec.md` §4.2 ("buffer incoming deltas up to a small
/// bound (drop oldest when full)").
const MAX_BUFFERED_DELTAS: usize = 256;

pub struct OrderBook {
    venue: VenueId,
    symbol: String,
    bids: BidMap,
    asks: AskMap,
    last_update_id: u64,
    previous_update_id: Option<u64>,
    timestamp_ms: u64,
    is_initialized: bool,
    /// Whether this venue's deltas carry `previous_final_id` (continuity check is
    /// `previous_final_id == local.last_update_id`) or only `first_update_id`
    /// (continuity check is `first_update_id == local.last_update_id + 1`).
    uses_previous_id: bool,
    pending: VecDeque<OrderBookDelta>,
}

impl OrderBook {
    pub fn new(venue: VenueId, symbol: impl Into<String>, uses_previous_id: bool) -> Self {
        Self {
            venue,
            symbol: symbol.into(),
            bids: BidMap::new(),
            asks: AskMap::new(),
            last_update_id: 0,
            previous_update_id: None,
            timestamp_ms: 0,
            is_initialized: false,
            uses_previous_id,
            pending: VecDeque::new(),
        }
    }

    pub fn venue(&self) -> VenueId {
        self.venue
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    /// Replace all levels from a fresh REST snapshot, then drain and replay any
    /// buffered deltas that extend past the snapshot's sequence id.
    pub fn initialize_from_snapshot(&mut self, snapshot: OrderBookSnapshot) {
        self.bids.clear();
        self.asks.clear();
        for level in &snapshot.bids {
            self.insert_bid(*level);
        }
        for level in &snapshot.asks {
            self.insert_ask(*level);
        }
        self.last_update_id = snapshot.last_update_id;
        self.previous_update_id = None;
        self.timestamp_ms = snapshot.timestamp_ms;
        self.is_initialized = true;

        // Discard buffered deltas entirely covered by the snapshot, then replay the
        // rest in order starting from the first one that overlaps
        // `snapshot.last_update_id + 1`.
        let buffered = std::mem::take(&mut self.pending);
        for delta in buffered {
            if delta.final_update_id <= self.last_update_id {
                continue;
            }
            let covers_gap = delta
                .first_update_id
                .map(|first| first <= self.last_update_id + 1)
                .unwrap_or(true);
            if covers_gap {
                let _ = self.apply_update(delta);
            }
        }
    }

    /// Apply one incremental delta. See [`AppliedOutcome`] for what each result means.
    pub fn apply_update(&mut self, delta: OrderBookDelta) -> AppliedOutcome {
        if !self.is_initialized {
            if self.pending.len() >= MAX_BUFFERED_DELTAS {
                self.pending.pop_front();
            }
            self.pending.push_back(delta);
            return AppliedOutcome::Ignored;
        }

        if delta.is_snapshot {
            self.bids.clear();
            self.asks.clear();
            for level in &delta.bids {
                self.insert_bid(*level);
            }
            for level in &delta.asks {
                self.insert_ask(*level);
            }
            self.last_update_id = delta.final_update_id;
            self.previous_update_id = delta.previous_final_id;
            self.timestamp_ms = delta.timestamp_ms;
            return AppliedOutcome::Applied;
        }

        let continuous = if self.uses_previous_id {
            delta.previous_final_id == Some(self.last_update_id)
        } else {
            delta.first_update_id == Some(self.last_update_id + 1)
        };

        if !continuous {
            tracing::warn!(
                venue = %self.venue,
                symbol = %self.symbol,
                local_seq = self.last_update_id,
                delta_first = ?delta.first_update_id,
                delta_prev = ?delta.previous_final_id,
                "order book sequence gap, resync required"
            );
            return AppliedOutcome::NeedResync;
        }

        for level in &delta.bids {
            self.insert_bid(*level);
        }
        for level in &delta.asks {
            self.insert_ask(*level);
        }
        self.last_update_id = delta.final_update_id;
        self.previous_update_id = delta.previous_final_id;
        self.timestamp_ms = delta.timestamp_ms;

        AppliedOutcome::Applied
    }

    /// Mark the book unusable ahead of a resync (connector stops emitting for this
    /// symbol until a fresh snapshot lands).
    pub fn invalidate(&mut self) {
        self.is_initialized = false;
    }

    fn insert_bid(&mut self, level: PriceLevel) {
        if level.quantity.is_zero() {
            self.bids.remove(&Reverse(level.price));
        } else {
            self.bids.insert(Reverse(level.price), level.quantity);
        }
    }

    fn insert_ask(&mut self, level: PriceLevel) {
        if level.quantity.is_zero() {
            self.asks.remove(&level.price);
        } else {
            self.asks.insert(level.price, level.quantity);
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.iter().next().map(|(Reverse(price), qty)| PriceLevel {
            price: *price,
            quantity: *qty,
        })
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(price, qty)| PriceLevel {
                price: *price,
                quantity: *qty,
            })
    }

    /// `(ask - bid) / bid * 10_000`, only when both sides are non-empty.
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        let bid_f = bid.price.to_decimal();
        let ask_f = ask.price.to_decimal();
        if bid_f.is_zero() {
            return None;
        }
        let spread = (ask_f - bid_f) / bid_f * rust_decimal::Decimal::from(10_000);
        spread.try_into().ok()
    }

    pub fn top_n(&self, n: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        let bids = self
            .bids
            .iter()
            .take(n)
            .map(|(Reverse(price), qty)| PriceLevel {
                price: *price,
                quantity: *qty,
            })
            .collect();
        let asks = self
            .asks
            .iter()
            .take(n)
            .map(|(price, qty)| PriceLevel {
                price: *price,
                quantity: *qty,
            })
            .collect();
        (bids, asks)
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use md_types::Fixed;

    fn level(price: &str, qty: &str) -> PriceLevel {
        PriceLevel {
            price: Fixed::from_str_exact(price).unwrap(),
            quantity: Fixed::from_str_exact(qty).unwrap(),
        }
    }

    fn snapshot(last_update_id: u64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            bids: vec![level("50000", "2")],
            asks: vec![level("50010", "1")],
            last_update_id,
            timestamp_ms: 1,
        }
    }

    fn delta(first: u64, final_id: u64) -> OrderBookDelta {
        OrderBookDelta {
            bids: vec![],
            asks: vec![],
            first_update_id: Some(first),
            final_update_id: final_id,
            previous_final_id: None,
            timestamp_ms: 1,
            is_snapshot: false,
        }
    }

    #[test]
    fn gap_resync_scenario() {
        // spec.md §8 scenario 1
        let mut book = OrderBook::new(VenueId::Binance, "BTCUSDT", false);
        book.initialize_from_snapshot(snapshot(100));

        assert_eq!(book.apply_update(delta(101, 105)), AppliedOutcome::Applied);
        assert_eq!(book.apply_update(delta(106, 110)), AppliedOutcome::Applied);
        assert_eq!(book.apply_update(delta(115, 120)), AppliedOutcome::NeedResync);

        book.initialize_from_snapshot(snapshot(118));
        assert_eq!(book.apply_update(delta(119, 125)), AppliedOutcome::Applied);
        assert_eq!(book.last_update_id(), 125);
    }

    #[test]
    fn zero_quantity_removes_level() {
        // spec.md §8 scenario 2
        let mut book = OrderBook::new(VenueId::Binance, "BTCUSDT", false);
        book.initialize_from_snapshot(snapshot(1));

        let mut d = delta(2, 2);
        d.bids = vec![level("50000", "0")];
        assert_eq!(book.apply_update(d), AppliedOutcome::Applied);

        let (bids, _) = book.top_n(1);
        assert!(bids.iter().all(|l| l.price.to_decimal().to_string() != "50000"));
    }

    #[test]
    fn best_bid_below_best_ask_after_mutations() {
        let mut book = OrderBook::new(VenueId::Binance, "BTCUSDT", false);
        book.initialize_from_snapshot(snapshot(1));
        let best_bid = book.best_bid().unwrap();
        let best_ask = book.best_ask().unwrap();
        assert!(best_bid.price < best_ask.price);
    }

    #[test]
    fn buffers_deltas_before_snapshot() {
        let mut book = OrderBook::new(VenueId::Binance, "BTCUSDT", false);
        assert_eq!(book.apply_update(delta(1, 5)), AppliedOutcome::Ignored);
        assert!(!book.is_initialized());
    }

    #[test]
    fn previous_id_continuity_check() {
        let mut book = OrderBook::new(VenueId::Bybit, "BTCUSDT", true);
        book.initialize_from_snapshot(snapshot(100));

        let mut d = delta(0, 105);
        d.first_update_id = None;
        d.previous_final_id = Some(100);
        assert_eq!(book.apply_update(d), AppliedOutcome::Applied);

        let mut bad = delta(0, 110);
        bad.first_update_id = None;
        bad.previous_final_id = Some(999);
        assert_eq!(book.apply_update(bad), AppliedOutcome::NeedResync);
    }
}
