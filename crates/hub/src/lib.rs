//! Connector supervisor and fan-out hub (`spec.md` §4.5).
//!
//! Owns a name-keyed map of connectors, starts and restarts them, and republishes every
//! `MarketEvent` they produce on a single outbound `broadcast` channel. Grounded on the
//! teacher's `output/relay_output.rs` (stats counters, exponential-backoff retry, a
//! health-monitor task) with the transport swapped: the teacher relays Protocol V2 bytes
//! to an out-of-process Unix socket; this hub's consumers are in-process, so it
//! republishes `MarketEvent` values directly on a `tokio::sync::broadcast::Sender`
//! instead of writing framed bytes to a socket. Lagging subscribers get
//! `RecvError::Lagged` from `broadcast`, which is this channel's native "drop oldest"
//! backpressure (`spec.md` §5).

use md_adapters::{build_connector, Connector, ConnectorMetricsSnapshot};
use md_rest::{ApiCredentials, RateLimiter};
use md_types::{MarketEvent, MdError, VenueId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

/// Per-venue startup configuration (`spec.md` §6 "Configuration").
#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub venue: VenueId,
    pub symbols: Vec<String>,
    pub credentials: Option<ApiCredentials>,
    /// Market data is this framework's only implemented capability; the flag is kept
    /// so a config file written against the full option set (trading, user data)
    /// degrades to "venue not started" instead of a parse error.
    pub enable_market_data: bool,
    pub enable_trading: bool,
    pub enable_user_data: bool,
    pub reconnect_delay: Duration,
    pub max_reconnect: u32,
}

impl VenueConfig {
    pub fn market_data(venue: VenueId, symbols: Vec<String>) -> Self {
        Self {
            venue,
            symbols,
            credentials: None,
            enable_market_data: true,
            enable_trading: false,
            enable_user_data: false,
            reconnect_delay: Duration::from_millis(100),
            max_reconnect: 10,
        }
    }
}

const MAX_START_ATTEMPTS: u32 = 10;
const BASE_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 30_000;

/// Starts and supervises one connector per venue, broadcasting every normalized event
/// on a single outbound channel.
pub struct MarketDataHub {
    connectors: RwLock<HashMap<VenueId, Arc<dyn Connector>>>,
    rate_limiter: Arc<RateLimiter>,
    events: broadcast::Sender<MarketEvent>,
    starts: Arc<RwLock<u64>>,
}

impl MarketDataHub {
    /// `capacity` bounds the broadcast channel's internal buffer; a receiver that falls
    /// more than `capacity` events behind the fastest publisher next sees
    /// `RecvError::Lagged` rather than replaying the backlog.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            connectors: RwLock::new(HashMap::new()),
            rate_limiter: Arc::new(RateLimiter::default()),
            events,
            starts: Arc::new(RwLock::new(0)),
        }
    }

    /// Subscribe to the hub's outward event stream. Each call returns an independent
    /// receiver; all receivers see every event published after they subscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    /// Start one connector per `VenueConfig` with `enable_market_data` set, connecting
    /// each to its configured symbol set. A venue that fails after
    /// [`MAX_START_ATTEMPTS`] retries is skipped, not fatal to the others.
    pub async fn start(&self, configs: Vec<VenueConfig>) -> Result<(), MdError> {
        for config in configs {
            if !config.enable_market_data {
                info!(venue = %config.venue, "market data disabled, skipping");
                continue;
            }
            self.start_one(config).await?;
        }
        Ok(())
    }

    async fn start_one(&self, config: VenueConfig) -> Result<(), MdError> {
        let venue = config.venue;
        let connector: Arc<dyn Connector> = Arc::from(build_connector(
            venue,
            self.rate_limiter.clone(),
            self.events.clone(),
            config.credentials.clone(),
        ));

        let mut attempt = 0u32;
        loop {
            match connector.connect_for_symbols(&config.symbols).await {
                Ok(()) => {
                    info!(%venue, symbols = config.symbols.len(), "connector started");
                    *self.starts.write().await += 1;
                    self.connectors.write().await.insert(venue, connector);
                    return Ok(());
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= MAX_START_ATTEMPTS {
                        error!(%venue, %err, attempt, "giving up starting connector");
                        return Err(MdError::ReconnectExhausted {
                            venue,
                            attempts: attempt,
                        });
                    }
                    let delay_ms = (BASE_DELAY_MS * 2u64.pow(attempt - 1)).min(MAX_DELAY_MS);
                    warn!(%venue, %err, attempt, delay_ms, "connector start failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    /// Disconnect and drop every running connector.
    pub async fn stop(&self) {
        let mut connectors = self.connectors.write().await;
        for (venue, connector) in connectors.drain() {
            connector.disconnect().await;
            info!(%venue, "connector stopped");
        }
    }

    /// Add `symbol` to `venue`'s subscription set. The venue must already be started.
    pub async fn subscribe_symbol(&self, venue: VenueId, symbol: &str) -> Result<(), MdError> {
        let connectors = self.connectors.read().await;
        let connector = connectors
            .get(&venue)
            .ok_or_else(|| MdError::Configuration(format!("{venue} not started")))?;
        connector.subscribe(std::slice::from_ref(&symbol.to_string())).await
    }

    /// Resolve `canonical` against every running venue's instrument list and subscribe
    /// to whichever venue-native symbols match, returning the venues that matched.
    pub async fn subscribe_canonical(&self, canonical: &str) -> Result<Vec<VenueId>, MdError> {
        let connectors = self.connectors.read().await;
        let mut matched = Vec::new();
        for (venue, connector) in connectors.iter() {
            let instruments = connector.fetch_instruments().await?;
            if let Some(instrument) = instruments
                .iter()
                .find(|instrument| instrument.canonical.as_str() == canonical)
            {
                connector
                    .subscribe(std::slice::from_ref(&instrument.venue_symbol))
                    .await?;
                matched.push(*venue);
            }
        }
        Ok(matched)
    }

    /// Per-venue observability counters and connection-state gauge (`spec.md` §4.5).
    pub async fn metrics(&self, venue: VenueId) -> Option<ConnectorMetricsSnapshot> {
        let connectors = self.connectors.read().await;
        connectors.get(&venue).map(|c| c.metrics().snapshot())
    }

    pub async fn all_metrics(&self) -> HashMap<VenueId, ConnectorMetricsSnapshot> {
        let connectors = self.connectors.read().await;
        let mut out = HashMap::new();
        for (venue, connector) in connectors.iter() {
            out.insert(*venue, connector.metrics().snapshot());
        }
        out
    }

    pub async fn running_venues(&self) -> Vec<VenueId> {
        self.connectors.read().await.keys().copied().collect()
    }

    /// Total successful connector starts across this hub's lifetime, including
    /// restarts after a failed one.
    pub async fn start_count(&self) -> u64 {
        *self.starts.read().await
    }
}

impl Default for MarketDataHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_before_any_publish_sees_nothing_buffered() {
        let hub = MarketDataHub::new(16);
        let mut rx = hub.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn metrics_for_unstarted_venue_is_none() {
        let hub = MarketDataHub::new(16);
        assert!(hub.metrics(VenueId::Binance).await.is_none());
        assert!(hub.running_venues().await.is_empty());
    }

    #[tokio::test]
    async fn subscribe_symbol_on_unstarted_venue_errors() {
        let hub = MarketDataHub::new(16);
        let err = hub
            .subscribe_symbol(VenueId::Binance, "BTCUSDT")
            .await
            .unwrap_err();
        assert!(matches!(err, MdError::Configuration(_)));
    }

    #[tokio::test]
    async fn two_subscribers_both_see_a_published_event() {
        let hub = MarketDataHub::new(16);
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();
        let event = MarketEvent::Connection(md_types::ConnectionStateEvent {
            venue: VenueId::Binance,
            state: md_types::ConnectionState::Connected,
            detail: None,
            ts: 0,
        });
        hub.events.send(event).unwrap();
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
