//! Per-venue connectors (`spec.md` §4.3): one module per venue, each binding
//! `md-session`'s runtime, `md-book`'s order-book engine, and `md-rest`'s signed HTTP
//! client into the uniform [`Connector`] contract the hub drives.

mod bitget;
mod bybit;
mod binance;
mod connector;
mod coinex;
mod kucoin;

pub use bitget::BitgetConnector;
pub use bybit::BybitConnector;
pub use binance::BinanceConnector;
pub use coinex::CoinExConnector;
pub use connector::{ApplyOutcome, Connector, ConnectorMetrics, ConnectorMetricsSnapshot, ConnectorState, Result};
pub use kucoin::KuCoinConnector;

use md_rest::ApiCredentials;
use md_types::VenueId;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Construct the connector for one venue, wired to a shared broadcast sender (owned by
/// `md-hub`) and rate limiter, optionally carrying API credentials for private REST
/// calls (order books, tickers, and funding are all public; credentials are accepted
/// here so trading/user-data venues added later don't need a second factory).
pub fn build_connector(
    venue: VenueId,
    rate_limiter: Arc<md_rest::RateLimiter>,
    events: broadcast::Sender<md_types::MarketEvent>,
    credentials: Option<ApiCredentials>,
) -> Box<dyn Connector> {
    match venue {
        VenueId::Binance => {
            let mut c = BinanceConnector::new(rate_limiter, events);
            if let Some(creds) = credentials {
                c = c.with_credentials(creds);
            }
            Box::new(c)
        }
        VenueId::Bybit => {
            let mut c = BybitConnector::new(rate_limiter, events);
            if let Some(creds) = credentials {
                c = c.with_credentials(creds);
            }
            Box::new(c)
        }
        VenueId::Bitget => {
            let mut c = BitgetConnector::new(rate_limiter, events);
            if let Some(creds) = credentials {
                c = c.with_credentials(creds);
            }
            Box::new(c)
        }
        VenueId::KuCoin => {
            let mut c = KuCoinConnector::new(rate_limiter, events);
            if let Some(creds) = credentials {
                c = c.with_credentials(creds);
            }
            Box::new(c)
        }
        VenueId::CoinEx => {
            let mut c = CoinExConnector::new(rate_limiter, events);
            if let Some(creds) = credentials {
                c = c.with_credentials(creds);
            }
            Box::new(c)
        }
    }
}
