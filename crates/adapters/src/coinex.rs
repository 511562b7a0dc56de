//! CoinEx perpetual futures adapter.
//!
//! CoinEx's perpetual WS speaks a JSON-RPC-flavored `method/params/id` envelope
//! (`depth.subscribe`, `deals.subscribe`) rather than the `op`/`arg` shape the other
//! four venues use, and its `depth.update` push carries no update-id at all — like
//! Bitget, the adapter assigns its own per-symbol sequence so the same `OrderBook`
//! continuity check applies uniformly across venues.

use crate::connector::{ApplyOutcome, Connector, ConnectorMetrics, ConnectorState, Result};
use async_trait::async_trait;
use md_book::{AppliedOutcome, BookRegistry};
use md_normalize::canonicalize;
use md_rest::{ApiCredentials, RateLimiter, RestClient};
use md_session::{FrameRouter, Session, SessionConfig, SessionEvent};
use md_types::{
    Fixed, FundingRate, Instrument, InstrumentKind, MarketEvent, MdError, OrderBookDelta,
    OrderBookEvent, OrderBookSnapshot, PriceLevel, Side, Ticker, Trade, VenueId,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};

const WS_URL: &str = "wss://socket.coinex.com/";
const REST_BASE: &str = "https://api.coinex.com";

struct CoinExRouter;
impl FrameRouter for CoinExRouter {
    fn correlation_id(&self, frame: &serde_json::Value) -> Option<u64> {
        frame.get("id").and_then(|v| v.as_u64())
    }
    fn is_heartbeat(&self, _raw: &str) -> bool {
        false
    }
}

pub struct CoinExConnector {
    rest: RestClient,
    books: Arc<RwLock<BookRegistry>>,
    session: Arc<RwLock<Option<Arc<Session>>>>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    events: broadcast::Sender<MarketEvent>,
    metrics: Arc<ConnectorMetrics>,
}

impl CoinExConnector {
    pub fn new(rate_limiter: Arc<RateLimiter>, events: broadcast::Sender<MarketEvent>) -> Self {
        Self {
            rest: RestClient::new(VenueId::CoinEx, REST_BASE, rate_limiter),
            books: Arc::new(RwLock::new(BookRegistry::new())),
            session: Arc::new(RwLock::new(None)),
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            events,
            metrics: Arc::new(ConnectorMetrics::new()),
        }
    }

    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.rest = self.rest.with_credentials(credentials);
        self
    }

    async fn open_and_subscribe(&self) -> Result<()> {
        let config = SessionConfig {
            url: WS_URL.to_string(),
            ping_interval: Duration::from_secs(30),
            ping_payload: r#"{"method":"server.ping","params":[],"id":0}"#.to_string(),
            ..Default::default()
        };

        let (event_tx, event_rx) = mpsc::channel(1024);
        let session = Session::open(VenueId::CoinEx, config, Box::new(CoinExRouter), event_tx).await?;
        session.mark_live().await;
        *self.session.write().await = Some(session.clone());
        self.metrics.set_state(ConnectorState::Connected).await;

        let symbols: Vec<String> = self.subscriptions.read().await.iter().cloned().collect();
        for symbol in &symbols {
            session
                .call(
                    |id| serde_json::json!({"method": "depth.subscribe", "params": [symbol, 50, "0", true], "id": id}),
                    Duration::from_secs(5),
                )
                .await?;
            session
                .call(
                    |id| serde_json::json!({"method": "deals.subscribe", "params": [symbol], "id": id}),
                    Duration::from_secs(5),
                )
                .await?;
        }
        if !symbols.is_empty() {
            self.metrics.set_state(ConnectorState::Subscribed).await;
        }

        tokio::spawn(run_event_loop(
            event_rx,
            self.books.clone(),
            self.session.clone(),
            self.subscriptions.clone(),
            self.metrics.clone(),
            self.events.clone(),
        ));
        Ok(())
    }
}

/// Re-send `depth.subscribe`/`deals.subscribe` for every currently held symbol. CoinEx
/// resends a full-state `depth.update` (the `is_snapshot` branch) right after
/// `depth.subscribe` with `true` requested, so no separate REST rebootstrap is needed.
async fn resubscribe_all(session: &Session, symbols: &[String]) -> Result<()> {
    for symbol in symbols {
        session
            .call(
                |id| serde_json::json!({"method": "depth.subscribe", "params": [symbol, 50, "0", true], "id": id}),
                Duration::from_secs(5),
            )
            .await?;
        session
            .call(
                |id| serde_json::json!({"method": "deals.subscribe", "params": [symbol], "id": id}),
                Duration::from_secs(5),
            )
            .await?;
    }
    Ok(())
}

/// Recover one book after its continuity check reported `NeedResync`: the book was
/// already `invalidate()`-d by `apply_depth_update`, so it buffers deltas until a fresh
/// snapshot lands. CoinEx has no separate REST rebootstrap for this channel, so the
/// recovery re-issues `depth.subscribe` with the full-state flag, which makes the venue
/// push a fresh `depth.update` marked as a snapshot, same as the initial subscribe
/// (`spec.md` §4.2's resync paragraph).
async fn resync_via_resubscribe(session: Arc<RwLock<Option<Arc<Session>>>>, symbol: String) {
    let Some(session) = session.read().await.clone() else {
        return;
    };
    let result = session
        .call(
            move |id| serde_json::json!({"method": "depth.subscribe", "params": [symbol, 50, "0", true], "id": id}),
            Duration::from_secs(5),
        )
        .await;
    match result {
        Ok(_) => tracing::info!(venue = %VenueId::CoinEx, "resubscribed depth channel for resync"),
        Err(err) => tracing::error!(venue = %VenueId::CoinEx, %err, "resync resubscribe failed"),
    }
}

async fn run_event_loop(
    mut event_rx: mpsc::Receiver<SessionEvent>,
    books: Arc<RwLock<BookRegistry>>,
    session: Arc<RwLock<Option<Arc<Session>>>>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    metrics: Arc<ConnectorMetrics>,
    events: broadcast::Sender<MarketEvent>,
) {
    while let Some(event) = event_rx.recv().await {
        match event {
            SessionEvent::Message(value) => {
                metrics.record_message();
                handle_coinex_frame(&value, &session, &books, &metrics, &events).await;
            }
            SessionEvent::Error(err) => {
                metrics.record_error();
                tracing::warn!(venue = %VenueId::CoinEx, error = %err, "session error");
            }
            SessionEvent::Disconnected => metrics.set_state(ConnectorState::Degraded).await,
            SessionEvent::Reconnected => {
                metrics.record_reconnect();
                let symbols: Vec<String> = subscriptions.read().await.iter().cloned().collect();
                if let Some(session) = session.read().await.as_ref() {
                    match resubscribe_all(session, &symbols).await {
                        Ok(()) => {
                            metrics.set_state(ConnectorState::Subscribed).await;
                            tracing::info!(venue = %VenueId::CoinEx, "resubscribed after reconnect");
                        }
                        Err(err) => {
                            metrics.record_error();
                            tracing::error!(venue = %VenueId::CoinEx, %err, "resubscribe after reconnect failed");
                        }
                    }
                }
            }
            SessionEvent::ReconnectExhausted => metrics.set_state(ConnectorState::Disconnected).await,
        }
    }
}

async fn handle_coinex_frame(
    value: &serde_json::Value,
    session: &Arc<RwLock<Option<Arc<Session>>>>,
    books: &Arc<RwLock<BookRegistry>>,
    metrics: &ConnectorMetrics,
    events: &broadcast::Sender<MarketEvent>,
) {
    let method = value.get("method").and_then(|v| v.as_str()).unwrap_or_default();
    let Some(params) = value.get("params").and_then(|v| v.as_array()) else {
        return;
    };

    match method {
        "depth.update" => {
            // params: [is_full_snapshot, depth_data, market]
            let is_snapshot = params.first().and_then(|v| v.as_bool()).unwrap_or(false);
            let Some(depth) = params.get(1) else { return };
            let Some(symbol) = params.get(2).and_then(|v| v.as_str()) else {
                return;
            };
            let outcome = {
                let mut registry = books.write().await;
                apply_depth_update(&mut registry, metrics, symbol, is_snapshot, depth)
            };
            match outcome {
                ApplyOutcome::Event(event) => {
                    let _ = events.send(event);
                }
                ApplyOutcome::NeedResync(symbol) => {
                    tokio::spawn(resync_via_resubscribe(session.clone(), symbol));
                }
                ApplyOutcome::None => {}
            }
        }
        "deals.update" => {
            let Some(symbol) = params.first().and_then(|v| v.as_str()) else {
                return;
            };
            if let Some(deals) = params.get(1).and_then(|v| v.as_array()) {
                for deal in deals {
                    if let Some(trade) = parse_trade(symbol, deal) {
                        let _ = events.send(MarketEvent::Trade(trade));
                    }
                }
            }
        }
        _ => {}
    }
}

fn apply_depth_update(
    registry: &mut BookRegistry,
    metrics: &ConnectorMetrics,
    symbol: &str,
    is_snapshot: bool,
    depth: &serde_json::Value,
) -> ApplyOutcome {
    let seq = registry.get_or_insert(VenueId::CoinEx, symbol).last_update_id() + 1;
    let timestamp_ms = md_types::time::now_ms();
    let bids = parse_levels(depth.get("bids").unwrap_or(&serde_json::Value::Null));
    let asks = parse_levels(depth.get("asks").unwrap_or(&serde_json::Value::Null));

    let book = registry.get_or_insert(VenueId::CoinEx, symbol);

    // CoinEx marks the very first `depth.update` push (subscribed with `true` for
    // full-state) as a full snapshot, not an incremental one; that bootstraps the book
    // the same way a REST snapshot would, so it goes through `initialize_from_snapshot`
    // rather than `apply_update`.
    let outcome = if is_snapshot {
        book.initialize_from_snapshot(OrderBookSnapshot {
            bids,
            asks,
            last_update_id: seq,
            timestamp_ms,
        });
        AppliedOutcome::Applied
    } else {
        book.apply_update(OrderBookDelta {
            bids,
            asks,
            first_update_id: Some(seq),
            final_update_id: seq,
            previous_final_id: None,
            timestamp_ms,
            is_snapshot: false,
        })
    };

    match outcome {
        AppliedOutcome::Applied => {
            metrics.record_delta_applied();
            let (bids, asks) = book.top_n(20);
            ApplyOutcome::Event(MarketEvent::OrderBook(OrderBookEvent {
                venue: VenueId::CoinEx,
                symbol: symbol.to_string(),
                canonical: canonicalize(symbol, InstrumentKind::Perpetual),
                best_bid: book.best_bid(),
                best_ask: book.best_ask(),
                spread_bps: book.spread_bps(),
                bids,
                asks,
                seq: book.last_update_id(),
                ts: book.timestamp_ms(),
                is_snapshot,
            }))
        }
        AppliedOutcome::NeedResync => {
            book.invalidate();
            metrics.record_resync();
            ApplyOutcome::NeedResync(symbol.to_string())
        }
        AppliedOutcome::Ignored => ApplyOutcome::None,
    }
}

fn parse_levels(raw: &serde_json::Value) -> Vec<PriceLevel> {
    raw.as_array()
        .map(|levels| {
            levels
                .iter()
                .filter_map(|level| {
                    let pair = level.as_array()?;
                    let price = Fixed::from_str_exact(pair.first()?.as_str()?).ok()?;
                    let quantity = Fixed::from_str_exact(pair.get(1)?.as_str()?).ok()?;
                    Some(PriceLevel { price, quantity })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_trade(symbol: &str, deal: &serde_json::Value) -> Option<Trade> {
    let price = Fixed::from_str_exact(deal.get("price")?.as_str()?).ok()?;
    let quantity = Fixed::from_str_exact(deal.get("amount")?.as_str()?).ok()?;
    let side = match deal.get("type")?.as_str()? {
        "buy" => Side::Buy,
        _ => Side::Sell,
    };
    let trade_id = deal.get("id").map(|v| v.to_string()).unwrap_or_default();
    let timestamp_ms = deal
        .get("time")
        .and_then(|v| v.as_f64())
        .map(|t| (t * 1000.0) as u64)
        .unwrap_or(0);

    Some(Trade {
        venue: VenueId::CoinEx,
        canonical: canonicalize(symbol, InstrumentKind::Perpetual),
        price,
        quantity,
        side,
        trade_id,
        timestamp_ms,
    })
}

fn parse_funding_entry(entry: &serde_json::Value) -> Option<FundingRate> {
    let symbol = entry.get("market")?.as_str()?;
    let rate = Fixed::from_str_exact(entry.get("latest_funding_rate")?.as_str()?).ok()?;
    let next_funding = entry.get("next_funding_time").and_then(|v| v.as_u64()).unwrap_or(0);

    Some(FundingRate {
        venue: VenueId::CoinEx,
        canonical: canonicalize(symbol, InstrumentKind::Perpetual),
        rate,
        interval_hours: 8,
        next_funding_time_ms: next_funding,
        timestamp_ms: md_types::time::now_ms(),
    })
}

fn parse_ticker_entry(entry: &serde_json::Value) -> Option<Ticker> {
    let symbol = entry.get("market")?.as_str()?;
    let last = Fixed::from_str_exact(entry.get("last")?.as_str()?).ok()?;
    let bid = entry
        .get("buy")
        .and_then(|v| v.as_str())
        .and_then(|s| Fixed::from_str_exact(s).ok())
        .unwrap_or(last);
    let ask = entry
        .get("sell")
        .and_then(|v| v.as_str())
        .and_then(|s| Fixed::from_str_exact(s).ok())
        .unwrap_or(last);
    let volume = entry
        .get("volume")
        .and_then(|v| v.as_str())
        .and_then(|s| Fixed::from_str_exact(s).ok())
        .unwrap_or(Fixed::ZERO);

    Some(Ticker {
        venue: VenueId::CoinEx,
        canonical: canonicalize(symbol, InstrumentKind::Perpetual),
        last_price: last,
        best_bid: bid,
        best_ask: ask,
        volume_24h: volume,
        timestamp_ms: md_types::time::now_ms(),
    })
}

#[async_trait]
impl Connector for CoinExConnector {
    fn venue(&self) -> VenueId {
        VenueId::CoinEx
    }

    async fn connect(&self) -> Result<()> {
        self.open_and_subscribe().await
    }

    async fn connect_for_symbols(&self, symbols: &[String]) -> Result<()> {
        *self.subscriptions.write().await = symbols.iter().cloned().collect();
        self.open_and_subscribe().await
    }

    async fn disconnect(&self) {
        if let Some(session) = self.session.write().await.take() {
            session.close().await;
        }
        self.metrics.set_state(ConnectorState::Disconnected).await;
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        self.subscriptions.write().await.extend(symbols.iter().cloned());
        let session_guard = self.session.read().await;
        let Some(session) = session_guard.as_ref() else {
            return Err(MdError::Disconnected { venue: VenueId::CoinEx });
        };
        for symbol in symbols {
            session
                .call(
                    |id| serde_json::json!({"method": "depth.subscribe", "params": [symbol, 50, "0", true], "id": id}),
                    Duration::from_secs(5),
                )
                .await?;
        }
        self.metrics.set_state(ConnectorState::Subscribed).await;
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        for symbol in symbols {
            self.subscriptions.write().await.remove(symbol);
        }
        let mut books = self.books.write().await;
        for symbol in symbols {
            books.remove(VenueId::CoinEx, symbol);
        }
        Ok(())
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>> {
        let raw = self.rest.fetch_raw("/v2/futures/market", &[]).await?;
        let list = raw.get("data").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let mut instruments = Vec::with_capacity(list.len());
        for entry in &list {
            let Some(symbol) = entry.get("market").and_then(|v| v.as_str()) else {
                continue;
            };
            let tick = entry
                .get("tick_size")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(rust_decimal::Decimal::new(1, 2));
            instruments.push(md_rest::build_instrument(
                VenueId::CoinEx,
                symbol,
                InstrumentKind::Perpetual,
                tick,
                rust_decimal::Decimal::new(1, 3),
                rust_decimal::Decimal::from(5),
                rust_decimal::Decimal::new(3, 4),
                rust_decimal::Decimal::new(5, 4),
                rust_decimal::Decimal::from(1),
            ));
        }
        Ok(instruments)
    }

    async fn fetch_orderbook_snapshot(&self, symbol: &str, depth: u32) -> Result<OrderBookSnapshot> {
        let raw = self
            .rest
            .fetch_raw(
                "/v2/futures/depth",
                &[("market", symbol.to_string()), ("limit", depth.min(50).to_string()), ("interval", "0".to_string())],
            )
            .await?;
        let data = raw.get("data").ok_or_else(|| MdError::InvalidMessage {
            venue: VenueId::CoinEx,
            reason: "missing data in depth response".into(),
        })?;
        let depth_obj = data.get("depth").unwrap_or(data);
        let bids = parse_levels(depth_obj.get("bids").unwrap_or(&serde_json::Value::Null));
        let asks = parse_levels(depth_obj.get("asks").unwrap_or(&serde_json::Value::Null));
        Ok(md_rest::build_snapshot(bids, asks, 0))
    }

    async fn fetch_funding_rates(&self) -> Result<Vec<FundingRate>> {
        let raw = self.rest.fetch_raw("/v2/futures/funding-rate", &[]).await?;
        let list = raw.get("data").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        Ok(list.iter().filter_map(parse_funding_entry).collect())
    }

    async fn fetch_price_tickers(&self) -> Result<Vec<Ticker>> {
        let raw = self.rest.fetch_raw("/v2/futures/ticker", &[]).await?;
        let list = raw.get("data").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        Ok(list.iter().filter_map(parse_ticker_entry).collect())
    }

    async fn fetch_book_tickers(&self) -> Result<Vec<Ticker>> {
        self.fetch_price_tickers().await
    }

    async fn fetch_asset_info(&self) -> Result<Vec<Instrument>> {
        self.fetch_instruments().await
    }

    fn metrics(&self) -> &ConnectorMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_update_snapshot_then_delta() {
        let mut registry = BookRegistry::new();
        let metrics = ConnectorMetrics::new();
        let depth = serde_json::json!({"bids": [["50000", "1"]], "asks": [["50010", "1"]]});
        let snap = apply_depth_update(&mut registry, &metrics, "BTCUSDT", true, &depth);
        assert!(matches!(snap, ApplyOutcome::Event(_)));
        let delta = apply_depth_update(&mut registry, &metrics, "BTCUSDT", false, &depth);
        assert!(matches!(delta, ApplyOutcome::Event(_)));
        assert_eq!(metrics.snapshot().deltas_applied, 2);
    }

    #[test]
    fn deal_type_maps_to_side() {
        let deal = serde_json::json!({"price": "50000", "amount": "1", "type": "buy", "id": 1, "time": 1.0});
        let trade = parse_trade("BTCUSDT", &deal).unwrap();
        assert_eq!(trade.side, Side::Buy);
    }

    #[test]
    fn funding_entry_parses_market_and_rate() {
        let entry = serde_json::json!({
            "market": "BTCUSDT", "latest_funding_rate": "0.0001", "next_funding_time": 1000,
        });
        let funding = parse_funding_entry(&entry).unwrap();
        assert_eq!(funding.canonical.as_str(), "BTC-USDT-PERP");
    }

    #[test]
    fn ticker_entry_falls_back_to_last_price() {
        let entry = serde_json::json!({"market": "BTCUSDT", "last": "50000"});
        let ticker = parse_ticker_entry(&entry).unwrap();
        assert_eq!(ticker.best_bid, ticker.last_price);
    }
}
