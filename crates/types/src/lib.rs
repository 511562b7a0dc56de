//! Canonical data model shared by every crate in the market-data connector framework.
//!
//! Nothing in this crate performs I/O; it exists so `md-book`, `md-session`,
//! `md-adapters`, `md-normalize` and `md-hub` agree on one vocabulary for instruments,
//! order-book levels, canonical records, subscriptions, events, and errors.

pub mod book;
pub mod error;
pub mod events;
pub mod fixed;
pub mod instrument;
pub mod records;
pub mod subscription;
pub mod time;
pub mod venue;

pub use book::{AskMap, BidMap, BookTopN, OrderBookDelta, OrderBookSnapshot, PriceLevel};
pub use error::{MdError, Result};
pub use events::{ConnectionState, ConnectionStateEvent, ErrorEvent, MarketEvent, OrderBookEvent};
pub use fixed::Fixed;
pub use instrument::{CanonicalSymbol, Instrument, InstrumentKind};
pub use records::{Balance, FundingRate, OrderState, OrderStatus, Position, Side, Ticker, Trade};
pub use subscription::{Channel, Subscription};
pub use venue::VenueId;
