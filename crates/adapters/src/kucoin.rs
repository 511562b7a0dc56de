//! KuCoin futures adapter.
//!
//! KuCoin issues a short-lived connection token and instance-server URL via REST
//! (`POST /api/v1/bullet-public`) before a WS connection is possible at all; the
//! adapter fetches the bullet, builds the WS URL from it, and subscribes by topic
//! string. Grounded on the token-bullet connect flow (`ConnectConfig`, welcome-message
//! `pingInterval`) read from the reference KuCoin WS client in the pack.

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
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};

const REST_BASE: &str = "https://api-futures.kucoin.com";

struct KuCoinRouter;
impl FrameRouter for KuCoinRouter {
    fn correlation_id(&self, frame: &serde_json::Value) -> Option<u64> {
        frame.get("id").and_then(|v| v.as_str()).and_then(|s| s.parse().ok())
    }
    fn is_heartbeat(&self, raw: &str) -> bool {
        raw.contains("\"type\":\"pong\"")
    }
}

pub struct KuCoinConnector {
    rest: RestClient,
    books: Arc<RwLock<BookRegistry>>,
    session: Arc<RwLock<Option<Arc<Session>>>>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    events: broadcast::Sender<MarketEvent>,
    metrics: Arc<ConnectorMetrics>,
}

impl KuCoinConnector {
    pub fn new(rate_limiter: Arc<RateLimiter>, events: broadcast::Sender<MarketEvent>) -> Self {
        Self {
            rest: RestClient::new(VenueId::KuCoin, REST_BASE, rate_limiter),
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

    fn topic_for(symbol: &str) -> String {
        format!("/contractMarket/level2:{symbol}")
    }

    /// KuCoin's level2 push carries only a one-level delta with a running `sequence`,
    /// never a full snapshot, so the book must be bootstrapped from the REST endpoint
    /// before (or right after) subscribing, exactly like Binance's depth stream.
    async fn bootstrap_book(&self, symbol: &str) -> Result<()> {
        let snapshot = self.fetch_orderbook_snapshot(symbol, 0).await?;
        let mut books = self.books.write().await;
        books.get_or_insert(VenueId::KuCoin, symbol).initialize_from_snapshot(snapshot);
        Ok(())
    }

    /// Generalized REST level2 fetch over a detached client, shared by the reconnect
    /// replay path and single-symbol resync-on-gap recovery.
    async fn refetch_snapshot(rest: &RestClient, symbol: &str) -> Result<OrderBookSnapshot> {
        let raw = rest
            .fetch_raw("/api/v1/level2/snapshot", &[("symbol", symbol.to_string())])
            .await?;
        let data = raw.get("data").ok_or_else(|| MdError::InvalidMessage {
            venue: VenueId::KuCoin,
            reason: "missing data in level2 snapshot response".into(),
        })?;
        let bids = parse_levels(data.get("bids").unwrap_or(&serde_json::Value::Null));
        let asks = parse_levels(data.get("asks").unwrap_or(&serde_json::Value::Null));
        let last_update_id = data.get("sequence").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(md_rest::build_snapshot(bids, asks, last_update_id))
    }

    /// Request a connection bullet: `{token, instanceServers: [{endpoint, pingInterval, ...}]}`.
    async fn fetch_bullet(&self) -> Result<(String, Duration)> {
        let raw = self.rest.fetch_raw("/api/v1/bullet-public", &[]).await?;
        let data = raw.get("data").ok_or_else(|| MdError::InvalidMessage {
            venue: VenueId::KuCoin,
            reason: "missing data in bullet response".into(),
        })?;
        let token = data.get("token").and_then(|v| v.as_str()).ok_or_else(|| MdError::InvalidMessage {
            venue: VenueId::KuCoin,
            reason: "missing token in bullet response".into(),
        })?;
        let server = data
            .get("instanceServers")
            .and_then(|v| v.as_array())
            .and_then(|servers| servers.first())
            .ok_or_else(|| MdError::InvalidMessage {
                venue: VenueId::KuCoin,
                reason: "missing instanceServers in bullet response".into(),
            })?;
        let endpoint = server.get("endpoint").and_then(|v| v.as_str()).unwrap_or_default();
        let ping_interval_ms = server.get("pingInterval").and_then(|v| v.as_u64()).unwrap_or(18_000);

        Ok((
            format!("{endpoint}?token={token}"),
            Duration::from_millis(ping_interval_ms),
        ))
    }

    async fn open_and_subscribe(&self) -> Result<()> {
        let (url, ping_interval) = self.fetch_bullet().await?;
        let config = SessionConfig {
            url,
            ping_interval,
            ping_payload: r#"{"type":"ping"}"#.to_string(),
            ..Default::default()
        };

        let (event_tx, event_rx) = mpsc::channel(1024);
        let session = Session::open(VenueId::KuCoin, config, Box::new(KuCoinRouter), event_tx).await?;
        session.mark_live().await;
        *self.session.write().await = Some(session.clone());
        self.metrics.set_state(ConnectorState::Connected).await;

        let symbols: Vec<String> = self.subscriptions.read().await.iter().cloned().collect();
        for symbol in &symbols {
            session
                .call(
                    |id| {
                        serde_json::json!({
                            "id": id.to_string(),
                            "type": "subscribe",
                            "topic": Self::topic_for(symbol),
                            "privateChannel": false,
                            "response": true,
                        })
                    },
                    Duration::from_secs(5),
                )
                .await?;
        }
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

/// Re-subscribe every currently held topic and re-fetch a REST snapshot for each book,
/// since a reconnected KuCoin socket carries no memory of prior subscriptions.
async fn resubscribe_all(
    rest: &RestClient,
    session: &Session,
    books: &Arc<RwLock<BookRegistry>>,
    symbols: &[String],
) -> Result<()> {
    for symbol in symbols {
        session
            .call(
                |id| {
                    serde_json::json!({
                        "id": id.to_string(),
                        "type": "subscribe",
                        "topic": KuCoinConnector::topic_for(symbol),
                        "privateChannel": false,
                        "response": true,
                    })
                },
                Duration::from_secs(5),
            )
            .await?;
    }
    for symbol in symbols {
        let snapshot = KuCoinConnector::refetch_snapshot(rest, symbol).await?;
        books
            .write()
            .await
            .get_or_insert(VenueId::KuCoin, symbol)
            .initialize_from_snapshot(snapshot);
    }
    Ok(())
}

/// Recover one book after its continuity check reported `NeedResync`: the book was
/// already `invalidate()`-d by `apply_level2_change`, so it buffers deltas until this
/// refetches a fresh REST snapshot to reinitialize it (`spec.md` §4.2's resync
/// paragraph).
async fn resync_book(rest: RestClient, books: Arc<RwLock<BookRegistry>>, symbol: String) {
    match KuCoinConnector::refetch_snapshot(&rest, &symbol).await {
        Ok(snapshot) => {
            books
                .write()
                .await
                .get_or_insert(VenueId::KuCoin, &symbol)
                .initialize_from_snapshot(snapshot);
            tracing::info!(venue = %VenueId::KuCoin, %symbol, "resynced order book from REST snapshot");
        }
        Err(err) => {
            tracing::error!(venue = %VenueId::KuCoin, %symbol, %err, "resync snapshot fetch failed");
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
                handle_kucoin_frame(&value, &rest, &books, &metrics, &events).await;
            }
            SessionEvent::Error(err) => {
                metrics.record_error();
                tracing::warn!(venue = %VenueId::KuCoin, error = %err, "session error");
            }
            SessionEvent::Disconnected => metrics.set_state(ConnectorState::Degraded).await,
            SessionEvent::Reconnected => {
                metrics.record_reconnect();
                let symbols: Vec<String> = subscriptions.read().await.iter().cloned().collect();
                if let Some(session) = session.read().await.as_ref() {
                    match resubscribe_all(&rest, session, &books, &symbols).await {
                        Ok(()) => {
                            metrics.set_state(ConnectorState::Subscribed).await;
                            tracing::info!(venue = %VenueId::KuCoin, "resubscribed after reconnect");
                        }
                        Err(err) => {
                            metrics.record_error();
                            tracing::error!(venue = %VenueId::KuCoin, %err, "resubscribe after reconnect failed");
                        }
                    }
                }
            }
            SessionEvent::ReconnectExhausted => metrics.set_state(ConnectorState::Disconnected).await,
        }
    }
}

async fn handle_kucoin_frame(
    value: &serde_json::Value,
    rest: &RestClient,
    books: &Arc<RwLock<BookRegistry>>,
    metrics: &ConnectorMetrics,
    events: &broadcast::Sender<MarketEvent>,
) {
    if value.get("type").and_then(|v| v.as_str()) != Some("message") {
        return;
    }
    let Some(topic) = value.get("topic").and_then(|v| v.as_str()) else {
        return;
    };
    let Some(data) = value.get("data") else {
        return;
    };

    if let Some(symbol) = topic.strip_prefix("/contractMarket/level2:") {
        let outcome = {
            let mut registry = books.write().await;
            apply_level2_change(&mut registry, metrics, symbol, data)
        };
        match outcome {
            ApplyOutcome::Event(event) => {
                let _ = events.send(event);
            }
            ApplyOutcome::NeedResync(symbol) => {
                tokio::spawn(resync_book(rest.clone(), books.clone(), symbol));
            }
            ApplyOutcome::None => {}
        }
    } else if let Some(symbol) = topic.strip_prefix("/contractMarket/execution:") {
        if let Some(trade) = parse_trade(symbol, data) {
            let _ = events.send(MarketEvent::Trade(trade));
        }
    }
}

/// Parse the single-level `"price,side,size"` change string KuCoin pushes per message
/// and apply it as a one-level delta.
fn apply_level2_change(
    registry: &mut BookRegistry,
    metrics: &ConnectorMetrics,
    symbol: &str,
    data: &serde_json::Value,
) -> ApplyOutcome {
    let Some((sequence, change)) = data.get("sequence").and_then(|v| v.as_u64()).zip(data.get("change").and_then(|v| v.as_str())) else {
        return ApplyOutcome::None;
    };
    let parts: Vec<&str> = change.split(',').collect();
    if parts.len() != 3 {
        return ApplyOutcome::None;
    }
    let (Some(price), Some(quantity)) = (Fixed::from_str_exact(parts[0]).ok(), Fixed::from_str_exact(parts[2]).ok()) else {
        return ApplyOutcome::None;
    };
    let level = PriceLevel { price, quantity };
    let timestamp_ms = data.get("timestamp").and_then(|v| v.as_u64()).unwrap_or(0);

    let (bids, asks) = match parts[1] {
        "buy" => (vec![level], vec![]),
        _ => (vec![], vec![level]),
    };

    let delta = OrderBookDelta {
        bids,
        asks,
        first_update_id: Some(sequence),
        final_update_id: sequence,
        previous_final_id: None,
        timestamp_ms,
        is_snapshot: false,
    };

    let book = registry.get_or_insert(VenueId::KuCoin, symbol);
    match book.apply_update(delta) {
        AppliedOutcome::Applied => {
            metrics.record_delta_applied();
            let (bids, asks) = book.top_n(20);
            ApplyOutcome::Event(MarketEvent::OrderBook(OrderBookEvent {
                venue: VenueId::KuCoin,
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

fn parse_trade(symbol: &str, data: &serde_json::Value) -> Option<Trade> {
    let price = Fixed::from_str_exact(data.get("price")?.as_str()?).ok()?;
    let quantity = data.get("size").and_then(|v| v.as_i64()).unwrap_or(0);
    let side = match data.get("side")?.as_str()? {
        "buy" => Side::Buy,
        _ => Side::Sell,
    };
    let trade_id = data.get("tradeId").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let timestamp_ms = data.get("ts").and_then(|v| v.as_u64()).unwrap_or(0) / 1_000_000;

    Some(Trade {
        venue: VenueId::KuCoin,
        canonical: canonicalize(symbol, InstrumentKind::Perpetual),
        price,
        quantity: Fixed::from_decimal(rust_decimal::Decimal::from(quantity)).unwrap_or(Fixed::ZERO),
        side,
        trade_id,
        timestamp_ms,
    })
}

/// KuCoin's REST level2 snapshot gives `[price, size]` as JSON numbers rather than
/// strings, unlike every other venue's WS/REST payloads in this framework.
fn parse_levels(raw: &serde_json::Value) -> Vec<PriceLevel> {
    raw.as_array()
        .map(|levels| {
            levels
                .iter()
                .filter_map(|level| {
                    let pair = level.as_array()?;
                    let price_f = pair.first()?.as_f64()?;
                    let qty_f = pair.get(1)?.as_f64()?;
                    let price = Fixed::from_decimal(rust_decimal::Decimal::from_f64(price_f)?)?;
                    let quantity = Fixed::from_decimal(rust_decimal::Decimal::from_f64(qty_f)?)?;
                    Some(PriceLevel { price, quantity })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Connector for KuCoinConnector {
    fn venue(&self) -> VenueId {
        VenueId::KuCoin
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
            return Err(MdError::Disconnected { venue: VenueId::KuCoin });
        };
        for symbol in symbols {
            session
                .call(
                    |id| {
                        serde_json::json!({
                            "id": id.to_string(),
                            "type": "subscribe",
                            "topic": Self::topic_for(symbol),
                            "privateChannel": false,
                            "response": true,
                        })
                    },
                    Duration::from_secs(5),
                )
                .await?;
        }
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
            return Err(MdError::Disconnected { venue: VenueId::KuCoin });
        };
        for symbol in symbols {
            session
                .call(
                    |id| {
                        serde_json::json!({
                            "id": id.to_string(),
                            "type": "unsubscribe",
                            "topic": Self::topic_for(symbol),
                            "privateChannel": false,
                            "response": true,
                        })
                    },
                    Duration::from_secs(5),
                )
                .await?;
        }
        drop(session_guard);
        let mut books = self.books.write().await;
        for symbol in symbols {
            books.remove(VenueId::KuCoin, symbol);
        }
        Ok(())
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>> {
        let raw = self.rest.fetch_raw("/api/v1/contracts/active", &[]).await?;
        let list = raw.get("data").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let mut instruments = Vec::with_capacity(list.len());
        for entry in &list {
            let Some(symbol) = entry.get("symbol").and_then(|v| v.as_str()) else {
                continue;
            };
            let tick = entry
                .get("tickSize")
                .and_then(|v| v.as_f64())
                .and_then(|f| rust_decimal::Decimal::try_from(f).ok())
                .unwrap_or(rust_decimal::Decimal::new(1, 2));
            instruments.push(md_rest::build_instrument(
                VenueId::KuCoin,
                symbol,
                InstrumentKind::Perpetual,
                tick,
                rust_decimal::Decimal::new(1, 0),
                rust_decimal::Decimal::from(5),
                rust_decimal::Decimal::new(2, 4),
                rust_decimal::Decimal::new(6, 4),
                rust_decimal::Decimal::from(1),
            ));
        }
        Ok(instruments)
    }

    async fn fetch_orderbook_snapshot(&self, symbol: &str, _depth: u32) -> Result<OrderBookSnapshot> {
        let raw = self
            .rest
            .fetch_raw("/api/v1/level2/snapshot", &[("symbol", symbol.to_string())])
            .await?;
        let data = raw.get("data").ok_or_else(|| MdError::InvalidMessage {
            venue: VenueId::KuCoin,
            reason: "missing data in level2 snapshot response".into(),
        })?;
        let bids = parse_levels(data.get("bids").unwrap_or(&serde_json::Value::Null));
        let asks = parse_levels(data.get("asks").unwrap_or(&serde_json::Value::Null));
        let last_update_id = data.get("sequence").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(md_rest::build_snapshot(bids, asks, last_update_id))
    }

    async fn fetch_funding_rates(&self) -> Result<Vec<FundingRate>> {
        let instruments = self.rest.fetch_raw("/api/v1/contracts/active", &[]).await?;
        let list = instruments.get("data").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let mut rates = Vec::with_capacity(list.len());
        for entry in &list {
            let Some(symbol) = entry.get("symbol").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(rate) = entry.get("fundingFeeRate").and_then(|v| v.as_f64()) else {
                continue;
            };
            let Some(rate) = Fixed::from_decimal(rust_decimal::Decimal::from_f64(rate).unwrap_or_default()) else {
                continue;
            };
            let next_funding = entry.get("nextFundingRateTime").and_then(|v| v.as_u64()).unwrap_or(0);
            rates.push(FundingRate {
                venue: VenueId::KuCoin,
                canonical: canonicalize(symbol, InstrumentKind::Perpetual),
                rate,
                interval_hours: 8,
                next_funding_time_ms: md_types::time::now_ms() + next_funding,
                timestamp_ms: md_types::time::now_ms(),
            });
        }
        Ok(rates)
    }

    async fn fetch_price_tickers(&self) -> Result<Vec<Ticker>> {
        let instruments = self.rest.fetch_raw("/api/v1/contracts/active", &[]).await?;
        let list = instruments.get("data").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let mut tickers = Vec::with_capacity(list.len());
        for entry in &list {
            let Some(symbol) = entry.get("symbol").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(last) = entry
                .get("lastTradePrice")
                .and_then(|v| v.as_f64())
                .and_then(|f| Fixed::from_decimal(rust_decimal::Decimal::from_f64(f)?))
            else {
                continue;
            };
            tickers.push(Ticker {
                venue: VenueId::KuCoin,
                canonical: canonicalize(symbol, InstrumentKind::Perpetual),
                last_price: last,
                best_bid: last,
                best_ask: last,
                volume_24h: Fixed::ZERO,
                timestamp_ms: md_types::time::now_ms(),
            });
        }
        Ok(tickers)
    }

    async fn fetch_book_tickers(&self) -> Result<Vec<Ticker>> {
        let subs: Vec<String> = self.subscriptions.read().await.iter().cloned().collect();
        let mut tickers = Vec::with_capacity(subs.len());
        for symbol in &subs {
            let raw = self
                .rest
                .fetch_raw("/api/v1/ticker", &[("symbol", symbol.clone())])
                .await?;
            let Some(data) = raw.get("data") else { continue };
            let Some(bid) = data
                .get("bestBidPrice")
                .and_then(|v| v.as_str())
                .and_then(|s| Fixed::from_str_exact(s).ok())
            else {
                continue;
            };
            let ask = data
                .get("bestAskPrice")
                .and_then(|v| v.as_str())
                .and_then(|s| Fixed::from_str_exact(s).ok())
                .unwrap_or(bid);
            tickers.push(Ticker {
                venue: VenueId::KuCoin,
                canonical: canonicalize(symbol, InstrumentKind::Perpetual),
                last_price: bid,
                best_bid: bid,
                best_ask: ask,
                volume_24h: Fixed::ZERO,
                timestamp_ms: md_types::time::now_ms(),
            });
        }
        Ok(tickers)
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
    fn level2_change_parses_buy_side() {
        let mut registry = BookRegistry::new();
        let metrics = ConnectorMetrics::new();
        registry.get_or_insert(VenueId::KuCoin, "XBTUSDTM").initialize_from_snapshot(OrderBookSnapshot {
            bids: vec![],
            asks: vec![],
            last_update_id: 0,
            timestamp_ms: 0,
        });
        let data = serde_json::json!({
            "sequence": 1, "change": "50000.0,buy,10", "timestamp": 1,
        });
        let event = apply_level2_change(&mut registry, &metrics, "XBTUSDTM", &data);
        assert!(matches!(event, ApplyOutcome::Event(_)));
    }

    #[test]
    fn out_of_order_sequence_forces_resync() {
        let mut registry = BookRegistry::new();
        let metrics = ConnectorMetrics::new();
        registry.get_or_insert(VenueId::KuCoin, "XBTUSDTM").initialize_from_snapshot(OrderBookSnapshot {
            bids: vec![],
            asks: vec![],
            last_update_id: 0,
            timestamp_ms: 0,
        });
        let first = serde_json::json!({"sequence": 1, "change": "50000.0,buy,10", "timestamp": 1});
        apply_level2_change(&mut registry, &metrics, "XBTUSDTM", &first);
        let skipped = serde_json::json!({"sequence": 5, "change": "50000.0,buy,11", "timestamp": 2});
        let event = apply_level2_change(&mut registry, &metrics, "XBTUSDTM", &skipped);
        assert!(matches!(event, ApplyOutcome::NeedResync(ref s) if s == "XBTUSDTM"));
        assert_eq!(metrics.snapshot().resyncs, 1);
        assert!(!registry.get_or_insert(VenueId::KuCoin, "XBTUSDTM").is_initialized());
    }
}
