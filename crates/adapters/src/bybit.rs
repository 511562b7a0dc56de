//! Bybit USDT-margined perpetual adapter.
//!
//! Single public WS endpoint per category (`linear`), `op: subscribe/unsubscribe`
//! control frames, and a `topic/type/data` envelope where `data.u` is the local update
//! id and the message-level `cts` carries the previous cross-sequence id when present.
//! Grounded on the `BybitWsOrderbookDepthMsg`/`BybitWsOrderbookDepth` shapes read from
//! the reference adapter pack, adapted to this framework's `Connector`/`OrderBook`
//! contracts.

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

const WS_URL: &str = "wss://stream.bybit.com/v5/public/linear";
const REST_BASE: &str = "https://api.bybit.com";

struct BybitRouter;
impl FrameRouter for BybitRouter {
    fn correlation_id(&self, frame: &serde_json::Value) -> Option<u64> {
        frame.get("req_id").and_then(|v| v.as_str()).and_then(|s| s.parse().ok())
    }
    fn is_heartbeat(&self, raw: &str) -> bool {
        raw.contains("\"op\":\"pong\"")
    }
}

pub struct BybitConnector {
    rest: RestClient,
    books: Arc<RwLock<BookRegistry>>,
    session: Arc<RwLock<Option<Arc<Session>>>>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    events: broadcast::Sender<MarketEvent>,
    metrics: Arc<ConnectorMetrics>,
}

impl BybitConnector {
    pub fn new(rate_limiter: Arc<RateLimiter>, events: broadcast::Sender<MarketEvent>) -> Self {
        Self {
            rest: RestClient::new(VenueId::Bybit, REST_BASE, rate_limiter),
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

    fn topics_for(symbol: &str) -> Vec<String> {
        vec![
            format!("orderbook.50.{symbol}"),
            format!("publicTrade.{symbol}"),
            format!("tickers.{symbol}"),
        ]
    }

    async fn open_and_subscribe(&self) -> Result<()> {
        let config = SessionConfig {
            url: WS_URL.to_string(),
            ping_interval: Duration::from_secs(20),
            ping_payload: r#"{"op":"ping"}"#.to_string(),
            ..Default::default()
        };

        let (event_tx, event_rx) = mpsc::channel(1024);
        let session = Session::open(VenueId::Bybit, config, Box::new(BybitRouter), event_tx).await?;
        session.mark_live().await;
        *self.session.write().await = Some(session.clone());
        self.metrics.set_state(ConnectorState::Connected).await;

        let symbols: Vec<String> = self.subscriptions.read().await.iter().cloned().collect();
        if !symbols.is_empty() {
            let args: Vec<String> = symbols.iter().flat_map(|s| Self::topics_for(s)).collect();
            session
                .call(
                    move |id| serde_json::json!({"op": "subscribe", "args": args, "req_id": id.to_string()}),
                    Duration::from_secs(5),
                )
                .await?;
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

/// Re-send the `subscribe` control frame for every currently held symbol. Bybit's book
/// snapshots arrive as a WS push (`type: "snapshot"`), not a REST call, so no book
/// rebootstrap is needed here: the reconnected stream will push a fresh snapshot for
/// each topic on its own.
async fn resubscribe_all(session: &Session, symbols: &[String]) -> Result<()> {
    if symbols.is_empty() {
        return Ok(());
    }
    let args: Vec<String> = symbols.iter().flat_map(|s| BybitConnector::topics_for(s)).collect();
    session
        .call(
            move |id| serde_json::json!({"op": "subscribe", "args": args, "req_id": id.to_string()}),
            Duration::from_secs(5),
        )
        .await?;
    Ok(())
}

/// Recover one book after its continuity check reported `NeedResync`: the book was
/// already `invalidate()`-d by `apply_orderbook_message`, so it buffers deltas until a
/// fresh snapshot lands. Bybit has no REST rebootstrap path for this topic, so the
/// recovery re-sends `subscribe` for just the orderbook topic, which makes the venue
/// push a new `type: "snapshot"` frame the same way the initial subscribe did
/// (`spec.md` §4.2's resync paragraph).
async fn resync_via_resubscribe(session: Arc<RwLock<Option<Arc<Session>>>>, symbol: String) {
    let Some(session) = session.read().await.clone() else {
        return;
    };
    let topic = format!("orderbook.50.{symbol}");
    let result = session
        .call(
            move |id| serde_json::json!({"op": "subscribe", "args": [topic], "req_id": id.to_string()}),
            Duration::from_secs(5),
        )
        .await;
    match result {
        Ok(_) => tracing::info!(venue = %VenueId::Bybit, %symbol, "resubscribed orderbook topic for resync"),
        Err(err) => tracing::error!(venue = %VenueId::Bybit, %symbol, %err, "resync resubscribe failed"),
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
                handle_bybit_frame(&value, &session, &books, &metrics, &events).await;
            }
            SessionEvent::Error(err) => {
                metrics.record_error();
                tracing::warn!(venue = %VenueId::Bybit, error = %err, "session error");
            }
            SessionEvent::Disconnected => {
                metrics.set_state(ConnectorState::Degraded).await;
            }
            SessionEvent::Reconnected => {
                metrics.record_reconnect();
                let symbols: Vec<String> = subscriptions.read().await.iter().cloned().collect();
                if let Some(session) = session.read().await.as_ref() {
                    match resubscribe_all(session, &symbols).await {
                        Ok(()) => {
                            metrics.set_state(ConnectorState::Subscribed).await;
                            tracing::info!(venue = %VenueId::Bybit, "resubscribed after reconnect");
                        }
                        Err(err) => {
                            metrics.record_error();
                            tracing::error!(venue = %VenueId::Bybit, %err, "resubscribe after reconnect failed");
                        }
                    }
                }
            }
            SessionEvent::ReconnectExhausted => {
                metrics.set_state(ConnectorState::Disconnected).await;
            }
        }
    }
}

async fn handle_bybit_frame(
    value: &serde_json::Value,
    session: &Arc<RwLock<Option<Arc<Session>>>>,
    books: &Arc<RwLock<BookRegistry>>,
    metrics: &ConnectorMetrics,
    events: &broadcast::Sender<MarketEvent>,
) {
    let Some(topic) = value.get("topic").and_then(|v| v.as_str()) else {
        return;
    };

    if let Some(symbol) = topic.strip_prefix("orderbook.50.").or_else(|| topic.strip_prefix("orderbook.1.")) {
        let outcome = {
            let mut registry = books.write().await;
            apply_orderbook_message(&mut registry, metrics, symbol, value)
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
    } else if let Some(symbol) = topic.strip_prefix("publicTrade.") {
        if let Some(data) = value.get("data").and_then(|v| v.as_array()) {
            for entry in data {
                if let Some(trade) = parse_trade(symbol, entry) {
                    let _ = events.send(MarketEvent::Trade(trade));
                }
            }
        }
    } else if let Some(symbol) = topic.strip_prefix("tickers.") {
        if let Some(data) = value.get("data") {
            if let Some(ticker) = parse_ticker(symbol, data) {
                let _ = events.send(MarketEvent::Ticker(ticker));
            }
            if let Some(funding) = parse_funding(symbol, data) {
                let _ = events.send(MarketEvent::Funding(funding));
            }
        }
    }
}

fn apply_orderbook_message(
    registry: &mut BookRegistry,
    metrics: &ConnectorMetrics,
    symbol: &str,
    value: &serde_json::Value,
) -> ApplyOutcome {
    let msg_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("delta");
    let Some(data) = value.get("data") else {
        return ApplyOutcome::None;
    };
    let Some(final_update_id) = data.get("u").and_then(|v| v.as_u64()) else {
        return ApplyOutcome::None;
    };
    let previous_final_id = value.get("cts").and_then(|v| v.as_u64());
    let timestamp_ms = value.get("ts").and_then(|v| v.as_u64()).unwrap_or(0);
    let (Some(b), Some(a)) = (data.get("b"), data.get("a")) else {
        return ApplyOutcome::None;
    };
    let bids = parse_levels(b);
    let asks = parse_levels(a);

    let book = registry.get_or_insert(VenueId::Bybit, symbol);

    // Bybit's own `type: "snapshot"` push is the book's bootstrap: there is no REST
    // depth endpoint call before subscribing, so the first frame on this topic always
    // carries `is_initialized == false` and must go through `initialize_from_snapshot`
    // rather than `apply_update` (whose snapshot branch only fires on an already-live
    // book, e.g. an unsolicited mid-stream resnapshot).
    let outcome = if msg_type == "snapshot" {
        book.initialize_from_snapshot(OrderBookSnapshot {
            bids,
            asks,
            last_update_id: final_update_id,
            timestamp_ms,
        });
        AppliedOutcome::Applied
    } else {
        let delta = OrderBookDelta {
            bids,
            asks,
            first_update_id: None,
            final_update_id,
            previous_final_id,
            timestamp_ms,
            is_snapshot: false,
        };
        book.apply_update(delta)
    };

    match outcome {
        AppliedOutcome::Applied => {
            metrics.record_delta_applied();
            let (bids, asks) = book.top_n(20);
            ApplyOutcome::Event(MarketEvent::OrderBook(OrderBookEvent {
                venue: VenueId::Bybit,
                symbol: symbol.to_string(),
                canonical: canonicalize(symbol, InstrumentKind::Perpetual),
                best_bid: book.best_bid(),
                best_ask: book.best_ask(),
                spread_bps: book.spread_bps(),
                bids,
                asks,
                seq: book.last_update_id(),
                ts: book.timestamp_ms(),
                is_snapshot: msg_type == "snapshot",
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

fn parse_trade(symbol: &str, entry: &serde_json::Value) -> Option<Trade> {
    let price = Fixed::from_str_exact(entry.get("p")?.as_str()?).ok()?;
    let quantity = Fixed::from_str_exact(entry.get("v")?.as_str()?).ok()?;
    let side = match entry.get("S")?.as_str()? {
        "Buy" => Side::Buy,
        _ => Side::Sell,
    };
    let timestamp_ms = entry.get("T").and_then(|v| v.as_u64()).unwrap_or(0);
    let trade_id = entry.get("i").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    Some(Trade {
        venue: VenueId::Bybit,
        canonical: canonicalize(symbol, InstrumentKind::Perpetual),
        price,
        quantity,
        side,
        trade_id,
        timestamp_ms,
    })
}

fn parse_ticker(symbol: &str, data: &serde_json::Value) -> Option<Ticker> {
    let last = data.get("lastPrice")?.as_str().and_then(|s| Fixed::from_str_exact(s).ok())?;
    let bid = data
        .get("bid1Price")
        .and_then(|v| v.as_str())
        .and_then(|s| Fixed::from_str_exact(s).ok())
        .unwrap_or(last);
    let ask = data
        .get("ask1Price")
        .and_then(|v| v.as_str())
        .and_then(|s| Fixed::from_str_exact(s).ok())
        .unwrap_or(last);
    let volume = data
        .get("volume24h")
        .and_then(|v| v.as_str())
        .and_then(|s| Fixed::from_str_exact(s).ok())
        .unwrap_or(Fixed::ZERO);

    Some(Ticker {
        venue: VenueId::Bybit,
        canonical: canonicalize(symbol, InstrumentKind::Perpetual),
        last_price: last,
        best_bid: bid,
        best_ask: ask,
        volume_24h: volume,
        timestamp_ms: md_types::time::now_ms(),
    })
}

fn parse_funding(symbol: &str, data: &serde_json::Value) -> Option<FundingRate> {
    let rate = data.get("fundingRate")?.as_str().and_then(|s| Fixed::from_str_exact(s).ok())?;
    let next_funding = data
        .get("nextFundingTime")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);

    Some(FundingRate {
        venue: VenueId::Bybit,
        canonical: canonicalize(symbol, InstrumentKind::Perpetual),
        rate,
        interval_hours: 8,
        next_funding_time_ms: next_funding.max(0) as u64,
        timestamp_ms: md_types::time::now_ms(),
    })
}

#[async_trait]
impl Connector for BybitConnector {
    fn venue(&self) -> VenueId {
        VenueId::Bybit
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
            return Err(MdError::Disconnected { venue: VenueId::Bybit });
        };
        let args: Vec<String> = symbols.iter().flat_map(|s| Self::topics_for(s)).collect();
        session
            .call(
                move |id| serde_json::json!({"op": "subscribe", "args": args, "req_id": id.to_string()}),
                Duration::from_secs(5),
            )
            .await?;
        self.metrics.set_state(ConnectorState::Subscribed).await;
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        for symbol in symbols {
            self.subscriptions.write().await.remove(symbol);
        }
        let session_guard = self.session.read().await;
        let Some(session) = session_guard.as_ref() else {
            return Err(MdError::Disconnected { venue: VenueId::Bybit });
        };
        let args: Vec<String> = symbols.iter().flat_map(|s| Self::topics_for(s)).collect();
        session
            .call(
                move |id| serde_json::json!({"op": "unsubscribe", "args": args, "req_id": id.to_string()}),
                Duration::from_secs(5),
            )
            .await?;
        drop(session_guard);
        let mut books = self.books.write().await;
        for symbol in symbols {
            books.remove(VenueId::Bybit, symbol);
        }
        Ok(())
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>> {
        let raw = self
            .rest
            .fetch_raw("/v5/market/instruments-info", &[("category", "linear".to_string())])
            .await?;
        let list = raw
            .get("result")
            .and_then(|r| r.get("list"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let mut instruments = Vec::with_capacity(list.len());
        for entry in &list {
            let Some(symbol) = entry.get("symbol").and_then(|v| v.as_str()) else {
                continue;
            };
            let tick = entry
                .get("priceFilter")
                .and_then(|f| f.get("tickSize"))
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(rust_decimal::Decimal::new(1, 2));
            instruments.push(md_rest::build_instrument(
                VenueId::Bybit,
                symbol,
                InstrumentKind::Perpetual,
                tick,
                rust_decimal::Decimal::new(1, 3),
                rust_decimal::Decimal::from(5),
                rust_decimal::Decimal::new(1, 4),
                rust_decimal::Decimal::new(6, 4),
                rust_decimal::Decimal::from(1),
            ));
        }
        Ok(instruments)
    }

    async fn fetch_orderbook_snapshot(&self, symbol: &str, depth: u32) -> Result<OrderBookSnapshot> {
        let raw = self
            .rest
            .fetch_raw(
                "/v5/market/orderbook",
                &[
                    ("category", "linear".to_string()),
                    ("symbol", symbol.to_string()),
                    ("limit", depth.min(200).to_string()),
                ],
            )
            .await?;
        let result = raw.get("result").ok_or_else(|| MdError::InvalidMessage {
            venue: VenueId::Bybit,
            reason: "missing result in orderbook response".into(),
        })?;
        let bids = parse_levels(result.get("b").unwrap_or(&serde_json::Value::Null));
        let asks = parse_levels(result.get("a").unwrap_or(&serde_json::Value::Null));
        let last_update_id = result.get("u").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(md_rest::build_snapshot(bids, asks, last_update_id))
    }

    async fn fetch_funding_rates(&self) -> Result<Vec<FundingRate>> {
        let raw = self
            .rest
            .fetch_raw("/v5/market/tickers", &[("category", "linear".to_string())])
            .await?;
        let list = raw
            .get("result")
            .and_then(|r| r.get("list"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(list
            .iter()
            .filter_map(|entry| {
                let symbol = entry.get("symbol")?.as_str()?;
                parse_funding(symbol, entry)
            })
            .collect())
    }

    async fn fetch_price_tickers(&self) -> Result<Vec<Ticker>> {
        let raw = self
            .rest
            .fetch_raw("/v5/market/tickers", &[("category", "linear".to_string())])
            .await?;
        let list = raw
            .get("result")
            .and_then(|r| r.get("list"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(list
            .iter()
            .filter_map(|entry| {
                let symbol = entry.get("symbol")?.as_str()?;
                parse_ticker(symbol, entry)
            })
            .collect())
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
    fn snapshot_then_delta_continuity_via_cts() {
        let mut registry = BookRegistry::new();
        let metrics = ConnectorMetrics::new();

        let snapshot_frame = serde_json::json!({
            "topic": "orderbook.50.BTCUSDT",
            "type": "snapshot",
            "ts": 1,
            "data": {"s": "BTCUSDT", "b": [["50000", "1"]], "a": [["50010", "1"]], "u": 1, "seq": 100},
        });
        let event = apply_orderbook_message(&mut registry, &metrics, "BTCUSDT", &snapshot_frame);
        assert!(matches!(event, ApplyOutcome::Event(_)));

        let delta_frame = serde_json::json!({
            "topic": "orderbook.50.BTCUSDT",
            "type": "delta",
            "ts": 2,
            "cts": 1,
            "data": {"s": "BTCUSDT", "b": [["50000", "2"]], "a": [], "u": 2, "seq": 101},
        });
        let event = apply_orderbook_message(&mut registry, &metrics, "BTCUSDT", &delta_frame);
        assert!(matches!(event, ApplyOutcome::Event(_)));
        assert_eq!(metrics.snapshot().deltas_applied, 2);
    }

    #[test]
    fn cross_sequence_gap_invalidates_book_for_resync() {
        let mut registry = BookRegistry::new();
        let metrics = ConnectorMetrics::new();
        registry.get_or_insert(VenueId::Bybit, "BTCUSDT").initialize_from_snapshot(OrderBookSnapshot {
            bids: vec![],
            asks: vec![],
            last_update_id: 10,
            timestamp_ms: 0,
        });
        let gapped = serde_json::json!({
            "topic": "orderbook.50.BTCUSDT",
            "type": "delta",
            "ts": 2,
            "cts": 999,
            "data": {"s": "BTCUSDT", "b": [], "a": [], "u": 11, "seq": 101},
        });
        let event = apply_orderbook_message(&mut registry, &metrics, "BTCUSDT", &gapped);
        assert!(matches!(event, ApplyOutcome::NeedResync(ref s) if s == "BTCUSDT"));
        assert_eq!(metrics.snapshot().resyncs, 1);
        assert!(!registry.get_or_insert(VenueId::Bybit, "BTCUSDT").is_initialized());
    }

    #[test]
    fn trade_side_parses_from_capital_s_field() {
        let entry = serde_json::json!({"p": "50000", "v": "1", "S": "Sell", "T": 1, "i": "t1"});
        let trade = parse_trade("BTCUSDT", &entry).unwrap();
        assert_eq!(trade.side, Side::Sell);
    }
}
