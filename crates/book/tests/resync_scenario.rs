//! Scenario test: a sequence gap forces a resync, and the book stays unusable until a
//! fresh snapshot lands — the contract every adapter's `NeedResync` handler depends on
//! (`invalidate()` then `initialize_from_snapshot()`, never just dropping the message).

use md_book::{AppliedOutcome, OrderBook};
use md_types::{Fixed, OrderBookDelta, OrderBookSnapshot, PriceLevel, VenueId};

fn level(price: &str, quantity: &str) -> PriceLevel {
    PriceLevel {
        price: Fixed::from_str_exact(price).unwrap(),
        quantity: Fixed::from_str_exact(quantity).unwrap(),
    }
}

#[test]
fn gap_invalidates_and_reinit_from_fresh_snapshot_recovers() {
    let mut book = OrderBook::new(VenueId::Binance, "BTCUSDT", false);

    book.initialize_from_snapshot(OrderBookSnapshot {
        bids: vec![level("50000", "1")],
        asks: vec![level("50010", "1")],
        last_update_id: 100,
        timestamp_ms: 1,
    });
    assert!(book.is_initialized());

    // A delta whose `first_update_id` skips ahead of 101 is a gap.
    let gapped = OrderBookDelta {
        bids: vec![],
        asks: vec![],
        first_update_id: Some(105),
        final_update_id: 106,
        previous_final_id: None,
        timestamp_ms: 2,
        is_snapshot: false,
    };
    let outcome = book.apply_update(gapped);
    assert_eq!(outcome, AppliedOutcome::NeedResync);

    // The adapter's `NeedResync` handler must invalidate before refetching — a book
    // left "initialized" after a detected gap would keep serving stale top-of-book.
    book.invalidate();
    assert!(!book.is_initialized());

    // Deltas arriving while the refetch is in flight buffer instead of silently
    // applying against stale state.
    let during_refetch = OrderBookDelta {
        bids: vec![level("50001", "2")],
        asks: vec![],
        first_update_id: Some(107),
        final_update_id: 107,
        previous_final_id: None,
        timestamp_ms: 3,
        is_snapshot: false,
    };
    assert_eq!(book.apply_update(during_refetch), AppliedOutcome::Ignored);

    // Fresh REST snapshot lands and the book is live again, with the buffered delta
    // that extends past it replayed automatically.
    book.initialize_from_snapshot(OrderBookSnapshot {
        bids: vec![level("50000", "1")],
        asks: vec![level("50010", "1")],
        last_update_id: 106,
        timestamp_ms: 4,
    });
    assert!(book.is_initialized());
    assert_eq!(book.last_update_id(), 107, "buffered delta past the snapshot should replay");
}
