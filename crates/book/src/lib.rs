//! Local order-book engine.
//!
//! One [`OrderBook`] per (venue, symbol) pair. Connectors own the instances, feed them
//! REST snapshots and WebSocket deltas, and react to [`AppliedOutcome::NeedResync`] by
//! fetching a new snapshot — this crate never reaches out over the network itself.

mod order_book;
mod registry;

pub use order_book::{AppliedOutcome, OrderBook};
pub use registry::BookRegistry;
