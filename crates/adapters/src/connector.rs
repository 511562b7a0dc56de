//! Uniform `Connector` contract every venue adapter exposes to the hub (`spec.md` §4.3),
//! plus the connector-level state machine and observability counters (`spec.md` §4.5,
//! §4.7). Grounded on the teacher's `InputAdapter` trait in `input/mod.rs`, narrowed to
//! this framework's five venues and market-data-first scope (the teacher's trait also
//! carries DEX-pool-cache concerns this spec has no use for).

use async_trait::async_trait;
use md_types::{FundingRate, Instrument, MarketEvent, MdError, OrderBookSnapshot, Ticker, VenueId};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

pub type Result<T> = std::result::Result<T, MdError>;

/// Outcome of applying one order-book frame to the shared registry: a market event
/// ready to publish, a resync request naming the symbol whose continuity check failed,
/// or nothing (heartbeat/duplicate/buffered-while-uninitialized).
pub enum ApplyOutcome {
    Event(MarketEvent),
    NeedResync(String),
    None,
}

/// Connector lifecycle (`spec.md` §4.7): `Idle -> Discovering -> Connected -> Subscribed
/// -> Degraded? -> Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Idle,
    Discovering,
    Connected,
    Subscribed,
    Degraded,
    Disconnected,
}

/// Real atomic counters, deliberately not the stub pattern found in the teacher's
/// `common.rs` (`FakeAtomic`, which logs and always returns 0) — this framework's hub
/// depends on these numbers being genuine (`spec.md` §4.5: "counters per venue").
pub struct ConnectorMetrics {
    pub messages_in: AtomicU64,
    pub deltas_applied: AtomicU64,
    pub resyncs: AtomicU64,
    pub reconnects: AtomicU64,
    pub errors: AtomicU64,
    state: RwLock<ConnectorState>,
}

impl ConnectorMetrics {
    pub fn new() -> Self {
        Self {
            messages_in: AtomicU64::new(0),
            deltas_applied: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            state: RwLock::new(ConnectorState::Idle),
        }
    }

    pub fn record_message(&self) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delta_applied(&self) {
        self.deltas_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn set_state(&self, state: ConnectorState) {
        *self.state.write().await = state;
    }

    pub async fn state(&self) -> ConnectorState {
        *self.state.read().await
    }

    pub fn snapshot(&self) -> ConnectorMetricsSnapshot {
        ConnectorMetricsSnapshot {
            messages_in: self.messages_in.load(Ordering::Relaxed),
            deltas_applied: self.deltas_applied.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConnectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorMetricsSnapshot {
    pub messages_in: u64,
    pub deltas_applied: u64,
    pub resyncs: u64,
    pub reconnects: u64,
    pub errors: u64,
}

/// The contract the hub drives every venue adapter through.
#[async_trait]
pub trait Connector: Send + Sync {
    fn venue(&self) -> VenueId;

    /// Open and subscribe to the adapter's current subscription set.
    async fn connect(&self) -> Result<()>;

    /// Replace the subscription set with `symbols`, then open (Phase 2 selective
    /// subscription pattern named in `spec.md` §4.3).
    async fn connect_for_symbols(&self, symbols: &[String]) -> Result<()>;

    async fn disconnect(&self);

    async fn subscribe(&self, symbols: &[String]) -> Result<()>;
    async fn unsubscribe(&self, symbols: &[String]) -> Result<()>;

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>>;
    async fn fetch_orderbook_snapshot(&self, symbol: &str, depth: u32) -> Result<OrderBookSnapshot>;
    async fn fetch_funding_rates(&self) -> Result<Vec<FundingRate>>;
    async fn fetch_price_tickers(&self) -> Result<Vec<Ticker>>;
    async fn fetch_book_tickers(&self) -> Result<Vec<Ticker>>;
    async fn fetch_asset_info(&self) -> Result<Vec<Instrument>>;

    fn metrics(&self) -> &ConnectorMetrics;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_genuinely_atomic() {
        let metrics = ConnectorMetrics::new();
        for _ in 0..100 {
            metrics.record_message();
        }
        assert_eq!(metrics.snapshot().messages_in, 100);
    }

    #[tokio::test]
    async fn state_transitions_are_observable() {
        let metrics = ConnectorMetrics::new();
        assert_eq!(metrics.state().await, ConnectorState::Idle);
        metrics.set_state(ConnectorState::Subscribed).await;
        assert_eq!(metrics.state().await, ConnectorState::Subscribed);
    }
}
