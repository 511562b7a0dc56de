//! Binance USDT-margined futures adapter.
//!
//! Reference implementation for the `Connector` contract: combined-stream URL
//! subscription, `depthUpdate`/`trade`/`markPriceUpdate` envelope parsing, dynamic
//! `SUBSCRIBE`/`UNSUBSCRIBE` control frames, and the order-book feed into `md-book`.
//! Grounded on the teacher's collector shape (REST discovery + WS event loop feeding a
//! shared book) in `input/collectors/`, adapted to Binance's combined-stream addressing
//! and `U`/`u`/`pu` sequence fields.

use crate::connector::{ApplyOutcome, Connector, ConnectorMetrics, ConnectorState, Result};
use async_trait::async_trait;
use md_book::{AppliedOutcome, BookRegistry};
use md_normalize::{canonicalize, to_millis, TimeUnit};
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

const WS_BASE: &str = "wss://fstream.binance.com";
const REST_BASE: &str = "https://fapi.binance.com";

struct BinanceRouter;
impl FrameRouter for BinanceRouter {
    fn correlation_id(&self, frame: &serde_json::Value) -> Option<u64> {
        frame.get("id").and_then(|v| v.as_u64())
    }
    fn is_heartbeat(&self, _raw: &str) -> bool {
        // Binance futures WS relies on protocol-level ping/pong frames, already
        // handled below the `FrameRouter` layer in the session's read loop.
        false
    }
}

pub struct BinanceConnector {
    rest: RestClient,
    books: Arc<RwLock<BookRegistry>>,
    session: Arc<RwLock<Option<Arc<Session>>>>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    events: broadcast::Sender<MarketEvent>,
    metrics: Arc<ConnectorMetrics>,
}

impl BinanceConnector {
    pub fn new(rate_limiter: Arc<RateLimiter>, events: broadcast::Sender<MarketEvent>) -> Self {
        Self {
            rest: RestClient::new(VenueId::Binance, REST_BASE, rate_limiter),
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

    fn depth_stream(symbol: &str) -> String {
        format!("{}@depth@100ms", symbol.to_ascii_lowercase())
    }

    fn trade_stream(symbol: &str) -> String {
        format!("{}@trade", symbol.to_ascii_lowercase())
    }

    async fn bootstrap_book(&self, symbol: &str) -> Result<()> {
        let snapshot = self.fetch_orderbook_snapshot(symbol, 1000).await?;
        let mut books = self.books.write().await;
        books
            .get_or_insert(VenueId::Binance, symbol)
            .initialize_from_snapshot(snapshot);
        Ok(())
    }

    /// Generalized bootstrap over a detached `RestClient`, used both by the reconnect
    /// replay path and by a single symbol's resync-on-gap recovery.
    async fn refetch_snapshot(rest: &RestClient, symbol: &str) -> Result<OrderBookSnapshot> {
        let raw = rest
            .fetch_raw(
                "/fapi/v1/depth",
                &[("symbol", symbol.to_string()), ("limit", "1000".to_string())],
            )
            .await?;
        let bids = parse_levels(raw.get("bids").unwrap_or(&serde_json::Value::Null));
        let asks = parse_levels(raw.get("asks").unwrap_or(&serde_json::Value::Null));
        let last_update_id = raw.get("lastUpdateId").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(md_rest::build_snapshot(bids, asks, last_update_id))
    }

    async fn open_combined_stream(&self) -> Result<()> {
        let symbols: Vec<String> = self.subscriptions.read().await.iter().cloned().collect();
        let streams: Vec<String> = symbols
            .iter()
            .flat_map(|s| vec![Self::depth_stream(s), Self::trade_stream(s)])
            .collect();

        let url = if streams.is_empty() {
            format!("{WS_BASE}/stream")
        } else {
            format!("{WS_BASE}/stream?streams={}", streams.join("/"))
        };

        let config = SessionConfig {
            url,
            ping_interval: Duration::from_secs(180),
            ..Default::default()
        };

        let (event_tx, event_rx) = mpsc::channel(1024);
        let session = Session::open(VenueId::Binance, config, Box::new(BinanceRouter), event_tx).await?;
        session.mark_live().await;
        *self.session.write().await = Some(session);
        self.metrics.set_state(ConnectorState::Connected).await;

        for symbol in &symbols {
            self.bootstrap_book(symbol).await?;
        }
        if !symbols.is_empty() {
            self.metrics.set_state(ConnectorState::Subscribed).await;
        }

        tokio::spawn(run_event_loop(
            event_rx,
            self.rest.clone(),
            self.books.clone(),
            self.session.clone(),
            self.subscriptions.clone(),
            self.metrics.clone(),
            self.events.clone(),
        ));
        Ok(())
    }
}

/// Re-send the `SUBSCRIBE` control frame for every currently held symbol and fetch a
/// fresh REST snapshot for each book, since the reconnected socket carries no memory of
/// what was streaming before (`spec.md` §8 scenario 3).
async fn resubscribe_all(
    rest: &RestClient,
    session: &Session,
    books: &Arc<RwLock<BookRegistry>>,
    symbols: &[String],
) -> Result<()> {
    if symbols.is_empty() {
        return Ok(());
    }
    let streams: Vec<String> = symbols
        .iter()
        .flat_map(|s| vec![BinanceConnector::depth_stream(s), BinanceConnector::trade_stream(s)])
        .collect();
    session
        .call(
            move |id| serde_json::json!({"method": "SUBSCRIBE", "params": streams, "id": id}),
            Duration::from_secs(5),
        )
        .await?;
    for symbol in symbols {
        let snapshot = BinanceConnector::refetch_snapshot(rest, symbol).await?;
        books
            .write()
            .await
            .get_or_insert(VenueId::Binance, symbol)
            .initialize_from_snapshot(snapshot);
    }
    Ok(())
}

/// Recover one book after its continuity check reported `NeedResync`: the book was
/// already `invalidate()`-d by `apply_depth_update` so it buffers deltas instead of
/// emitting with a gap, and this refetches a fresh REST snapshot to reinitialize it
/// (`spec.md` §4.2's resync paragraph).
async fn resync_book(rest: RestClient, books: Arc<RwLock<BookRegistry>>, symbol: String) {
    match BinanceConnector::refetch_snapshot(&rest, &symbol).await {
        Ok(snapshot) => {
            books
                .write()
                .await
                .get_or_insert(VenueId::Binance, &symbol)
                .initialize_from_snapshot(snapshot);
            tracing::info!(venue = %VenueId::Binance, %symbol, "resynced order book from REST snapshot");
        }
        Err(err) => {
            tracing::error!(venue = %VenueId::Binance, %symbol, %err, "resync snapshot fetch failed");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_event_loop(
    mut event_rx: mpsc::Receiver<SessionEvent>,
    rest: RestClient,
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
                handle_binance_frame(&value, &rest, &books, &metrics, &events).await;
            }
            SessionEvent::Error(err) => {
                metrics.record_error();
                tracing::warn!(venue = %VenueId::Binance, error = %err, "session error");
            }
            SessionEvent::Disconnected => {
                metrics.set_state(ConnectorState::Degraded).await;
                tracing::warn!(venue = %VenueId::Binance, "disconnected");
            }
            SessionEvent::Reconnected => {
                metrics.record_reconnect();
                let symbols: Vec<String> = subscriptions.read().await.iter().cloned().collect();
                if let Some(session) = session.read().await.as_ref() {
                    match resubscribe_all(&rest, session, &books, &symbols).await {
                        Ok(()) => {
                            metrics.set_state(ConnectorState::Subscribed).await;
                            tracing::info!(venue = %VenueId::Binance, "resubscribed after reconnect");
                        }
                        Err(err) => {
                            metrics.record_error();
                            tracing::error!(venue = %VenueId::Binance, %err, "resubscribe after reconnect failed");
                        }
                    }
                }
            }
            SessionEvent::ReconnectExhausted => {
                metrics.set_state(ConnectorState::Disconnected).await;
                tracing::error!(venue = %VenueId::Binance, "reconnect attempts exhausted");
            }
        }
    }
}

/// Unwrap a combined-stream frame (`{"stream": "...", "data": {...}}`) and dispatch by
/// Binance's `e` event-type discriminator.
async fn handle_binance_frame(
    value: &serde_json::Value,
    rest: &RestClient,
    books: &Arc<RwLock<BookRegistry>>,
    metrics: &ConnectorMetrics,
    events: &broadcast::Sender<MarketEvent>,
) {
    let data = value.get("data").unwrap_or(value);
    let event_type = data.get("e").and_then(|v| v.as_str()).unwrap_or_default();

    match event_type {
        "depthUpdate" => {
            let outcome = {
                let mut registry = books.write().await;
                apply_depth_update(&mut registry, metrics, data)
            };
            match outcome {
                ApplyOutcome::Event(market_event) => {
                    let _ = events.send(market_event);
                }
                ApplyOutcome::NeedResync(symbol) => {
                    tokio::spawn(resync_book(rest.clone(), books.clone(), symbol));
                }
                ApplyOutcome::None => {}
            }
        }
        "trade" => {
            if let Some(trade) = parse_trade(data) {
                let _ = events.send(MarketEvent::Trade(trade));
            }
        }
        "markPriceUpdate" => {
            if let Some(funding) = parse_funding(data) {
                let _ = events.send(MarketEvent::Funding(funding));
            }
        }
        _ => {}
    }
}

fn parse_trade(data: &serde_json::Value) -> Option<Trade> {
    let symbol = data.get("s")?.as_str()?;
    let price = Fixed::from_str_exact(data.get("p")?.as_str()?).ok()?;
    let quantity = Fixed::from_str_exact(data.get("q")?.as_str()?).ok()?;
    let is_buyer_maker = data.get("m").and_then(|v| v.as_bool()).unwrap_or(false);
    let side = if is_buyer_maker { Side::Sell } else { Side::Buy };
    let trade_id = data.get("t").map(|v| v.to_string()).unwrap_or_default();
    let timestamp_ms = data.get("T").and_then(|v| v.as_i64()).unwrap_or(0);

    Some(Trade {
        venue: VenueId::Binance,
        canonical: canonicalize(symbol, InstrumentKind::Perpetual),
        price,
        quantity,
        side,
        trade_id,
        timestamp_ms: to_millis(timestamp_ms, TimeUnit::Millis),
    })
}

fn parse_funding(data: &serde_json::Value) -> Option<FundingRate> {
    let symbol = data.get("s")?.as_str()?;
    let rate = Fixed::from_str_exact(data.get("r")?.as_str()?).ok()?;
    let next_funding = data.get("T").and_then(|v| v.as_i64()).unwrap_or(0);
    let event_time = data.get("E").and_then(|v| v.as_i64()).unwrap_or(0);

    Some(FundingRate {
        venue: VenueId::Binance,
        canonical: canonicalize(symbol, InstrumentKind::Perpetual),
        rate,
        interval_hours: 8,
        next_funding_time_ms: to_millis(next_funding, TimeUnit::Millis),
        timestamp_ms: to_millis(event_time, TimeUnit::Millis),
    })
}

/// Apply one `depthUpdate` frame to the book and build the resulting `MarketEvent`.
/// Split out from frame dispatch so the sequence-gap/resync path is unit-testable
/// without a live session.
pub fn apply_depth_update(
    registry: &mut BookRegistry,
    metrics: &ConnectorMetrics,
    data: &serde_json::Value,
) -> ApplyOutcome {
    let Some(symbol) = data.get("s").and_then(|v| v.as_str()) else {
        return ApplyOutcome::None;
    };
    let Some(final_update_id) = data.get("u").and_then(|v| v.as_u64()) else {
        return ApplyOutcome::None;
    };
    let first_update_id = data.get("U").and_then(|v| v.as_u64());
    let previous_final_id = data.get("pu").and_then(|v| v.as_u64());
    let timestamp_ms = data.get("E").and_then(|v| v.as_u64()).unwrap_or(0);
    let (Some(b), Some(a)) = (data.get("b"), data.get("a")) else {
        return ApplyOutcome::None;
    };

    let delta = OrderBookDelta {
        bids: parse_levels(b),
        asks: parse_levels(a),
        first_update_id,
        final_update_id,
        previous_final_id,
        timestamp_ms,
        is_snapshot: false,
    };

    let book = registry.get_or_insert(VenueId::Binance, symbol);
    match book.apply_update(delta) {
        AppliedOutcome::Applied => {
            metrics.record_delta_applied();
            let (bids, asks) = book.top_n(20);
            ApplyOutcome::Event(MarketEvent::OrderBook(OrderBookEvent {
                venue: VenueId::Binance,
                symbol: symbol.to_string(),
                canonical: canonicalize(symbol, InstrumentKind::Perpetual),
                best_bid: book.best_bid(),
                best_ask: book.best_ask(),
                spread_bps: book.spread_bps(),
                bids,
                asks,
                seq: book.last_update_id(),
                ts: book.timestamp_ms(),
                is_snapshot: false,
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

fn parse_tickers(raw: &serde_json::Value) -> Vec<Ticker> {
    raw.as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let symbol = entry.get("symbol")?.as_str()?;
                    let last = entry
                        .get("price")
                        .or_else(|| entry.get("lastPrice"))
                        .and_then(|v| v.as_str())
                        .and_then(|s| Fixed::from_str_exact(s).ok())
                        .unwrap_or(Fixed::ZERO);
                    let bid = entry
                        .get("bidPrice")
                        .and_then(|v| v.as_str())
                        .and_then(|s| Fixed::from_str_exact(s).ok())
                        .unwrap_or(last);
                    let ask = entry
                        .get("askPrice")
                        .and_then(|v| v.as_str())
                        .and_then(|s| Fixed::from_str_exact(s).ok())
                        .unwrap_or(last);
                    Some(Ticker {
                        venue: VenueId::Binance,
                        canonical: canonicalize(symbol, InstrumentKind::Perpetual),
                        last_price: last,
                        best_bid: bid,
                        best_ask: ask,
                        volume_24h: Fixed::ZERO,
                        timestamp_ms: md_types::time::now_ms(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Connector for BinanceConnector {
    fn venue(&self) -> VenueId {
        VenueId::Binance
    }

    async fn connect(&self) -> Result<()> {
        self.open_combined_stream().await
    }

    async fn connect_for_symbols(&self, symbols: &[String]) -> Result<()> {
        *self.subscriptions.write().await = symbols.iter().cloned().collect();
        self.open_combined_stream().await
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
            return Err(MdError::Disconnected { venue: VenueId::Binance });
        };
        let streams: Vec<String> = symbols
            .iter()
            .flat_map(|s| vec![Self::depth_stream(s), Self::trade_stream(s)])
            .collect();
        session
            .call(
                move |id| serde_json::json!({"method": "SUBSCRIBE", "params": streams, "id": id}),
                Duration::from_secs(5),
            )
            .await?;
        drop(session_guard);
        for symbol in symbols {
            self.bootstrap_book(symbol).await?;
        }
        self.metrics.set_state(ConnectorState::Subscribed).await;
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        for symbol in symbols {
            self.subscriptions.write().await.remove(symbol);
        }
        let session_guard = self.session.read().await;
        let Some(session) = session_guard.as_ref() else {
            return Err(MdError::Disconnected { venue: VenueId::Binance });
        };
        let streams: Vec<String> = symbols
            .iter()
            .flat_map(|s| vec![Self::depth_stream(s), Self::trade_stream(s)])
            .collect();
        session
            .call(
                move |id| serde_json::json!({"method": "UNSUBSCRIBE", "params": streams, "id": id}),
                Duration::from_secs(5),
            )
            .await?;
        drop(session_guard);
        let mut books = self.books.write().await;
        for symbol in symbols {
            books.remove(VenueId::Binance, symbol);
        }
        Ok(())
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>> {
        let raw = self.rest.fetch_raw("/fapi/v1/exchangeInfo", &[]).await?;
        let symbols = raw.get("symbols").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let mut instruments = Vec::with_capacity(symbols.len());
        for entry in &symbols {
            let Some(symbol) = entry.get("symbol").and_then(|v| v.as_str()) else {
                continue;
            };
            let tick = entry
                .get("filters")
                .and_then(|f| f.as_array())
                .and_then(|filters| {
                    filters
                        .iter()
                        .find(|filter| filter.get("filterType").and_then(|v| v.as_str()) == Some("PRICE_FILTER"))
                })
                .and_then(|filter| filter.get("tickSize"))
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(rust_decimal::Decimal::new(1, 2));
            instruments.push(md_rest::build_instrument(
                VenueId::Binance,
                symbol,
                InstrumentKind::Perpetual,
                tick,
                rust_decimal::Decimal::new(1, 3),
                rust_decimal::Decimal::from(5),
                rust_decimal::Decimal::new(2, 4),
                rust_decimal::Decimal::new(4, 4),
                rust_decimal::Decimal::from(1),
            ));
        }
        Ok(instruments)
    }

    async fn fetch_orderbook_snapshot(&self, symbol: &str, depth: u32) -> Result<OrderBookSnapshot> {
        let raw = self
            .rest
            .fetch_raw(
                "/fapi/v1/depth",
                &[("symbol", symbol.to_string()), ("limit", depth.to_string())],
            )
            .await?;
        let bids = parse_levels(raw.get("bids").ok_or_else(|| MdError::InvalidMessage {
            venue: VenueId::Binance,
            reason: "missing bids in depth response".into(),
        })?);
        let asks = parse_levels(raw.get("asks").ok_or_else(|| MdError::InvalidMessage {
            venue: VenueId::Binance,
            reason: "missing asks in depth response".into(),
        })?);
        let last_update_id = raw.get("lastUpdateId").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(md_rest::build_snapshot(bids, asks, last_update_id))
    }

    async fn fetch_funding_rates(&self) -> Result<Vec<FundingRate>> {
        let raw = self.rest.fetch_raw("/fapi/v1/premiumIndex", &[]).await?;
        let entries = raw.as_array().cloned().unwrap_or_default();
        Ok(entries.iter().filter_map(parse_funding).collect())
    }

    async fn fetch_price_tickers(&self) -> Result<Vec<Ticker>> {
        let raw = self.rest.fetch_raw("/fapi/v1/ticker/price", &[]).await?;
        Ok(parse_tickers(&raw))
    }

    async fn fetch_book_tickers(&self) -> Result<Vec<Ticker>> {
        let raw = self.rest.fetch_raw("/fapi/v1/ticker/bookTicker", &[]).await?;
        Ok(parse_tickers(&raw))
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
    fn depth_update_applies_after_snapshot() {
        let mut registry = BookRegistry::new();
        let metrics = ConnectorMetrics::new();
        let book = registry.get_or_insert(VenueId::Binance, "BTCUSDT");
        book.initialize_from_snapshot(OrderBookSnapshot {
            bids: vec![],
            asks: vec![],
            last_update_id: 100,
            timestamp_ms: 0,
        });

        let frame = serde_json::json!({
            "s": "BTCUSDT",
            "U": 101,
            "u": 105,
            "pu": 100,
            "b": [["50000.0", "1.5"]],
            "a": [["50010.0", "2.0"]],
            "E": 1,
        });

        let event = apply_depth_update(&mut registry, &metrics, &frame);
        assert!(matches!(event, ApplyOutcome::Event(_)));
        assert_eq!(metrics.snapshot().deltas_applied, 1);
    }

    #[test]
    fn gap_triggers_resync_not_a_panic() {
        let mut registry = BookRegistry::new();
        let metrics = ConnectorMetrics::new();
        let book = registry.get_or_insert(VenueId::Binance, "BTCUSDT");
        book.initialize_from_snapshot(OrderBookSnapshot {
            bids: vec![],
            asks: vec![],
            last_update_id: 100,
            timestamp_ms: 0,
        });

        let frame = serde_json::json!({
            "s": "BTCUSDT",
            "U": 200,
            "u": 205,
            "pu": 199,
            "b": [],
            "a": [],
            "E": 1,
        });

        let event = apply_depth_update(&mut registry, &metrics, &frame);
        assert!(matches!(event, ApplyOutcome::NeedResync(ref s) if s == "BTCUSDT"));
        assert_eq!(metrics.snapshot().resyncs, 1);
        assert!(!registry.get_or_insert(VenueId::Binance, "BTCUSDT").is_initialized());
    }

    #[test]
    fn trade_event_maps_buyer_maker_to_sell_side() {
        let frame = serde_json::json!({
            "e": "trade", "s": "BTCUSDT", "p": "50000.0", "q": "1.0", "m": true, "t": 1, "T": 1,
        });
        let trade = parse_trade(&frame).unwrap();
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.canonical.as_str(), "BTC-USDT-PERP");
    }
}
