//! Market-data hub entry point: loads venue configuration, starts one connector per
//! venue, and logs the normalized event stream until interrupted.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::HubConfig;
use md_hub::{MarketDataHub, VenueConfig};
use md_types::MarketEvent;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-venue futures market-data aggregation hub")]
struct Args {
    /// Comma-separated venue list, overriding `MD_HUB_VENUES`.
    #[arg(long)]
    venues: Option<String>,

    /// Comma-separated venue-native symbol list, overriding `MD_HUB_SYMBOLS`.
    #[arg(long)]
    symbols: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_data_hub=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if let Some(venues) = &args.venues {
        std::env::set_var("MD_HUB_VENUES", venues);
    }
    if let Some(symbols) = &args.symbols {
        std::env::set_var("MD_HUB_SYMBOLS", symbols);
    }

    let config = HubConfig::from_env();
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid hub configuration")?;

    info!(
        venues = ?config.venues,
        symbols = ?config.symbols,
        "starting market-data hub"
    );

    let hub = MarketDataHub::new(config.broadcast_capacity);
    let venue_configs: Vec<VenueConfig> = config
        .venues
        .iter()
        .map(|&venue| VenueConfig {
            venue,
            symbols: config.symbols.clone(),
            credentials: HubConfig::credentials_for(venue),
            enable_market_data: true,
            enable_trading: false,
            enable_user_data: false,
            reconnect_delay: config.reconnect_delay,
            max_reconnect: config.max_reconnect,
        })
        .collect();

    hub.start(venue_configs)
        .await
        .context("failed to start one or more venue connectors")?;

    let mut events = hub.subscribe();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    info!("market-data hub running, press Ctrl+C to stop");
    signal::ctrl_c().await.context("failed to listen for shutdown signal")?;

    info!("shutting down market-data hub");
    event_task.abort();
    hub.stop().await;

    Ok(())
}

fn log_event(event: &MarketEvent) {
    match event {
        MarketEvent::OrderBook(book) => {
            tracing::debug!(venue = %book.venue, symbol = %book.symbol, seq = book.seq, "order book event");
        }
        MarketEvent::Trade(trade) => {
            tracing::debug!(venue = %trade.venue, canonical = %trade.canonical, "trade event");
        }
        MarketEvent::Ticker(ticker) => {
            tracing::debug!(venue = %ticker.venue, canonical = %ticker.canonical, "ticker event");
        }
        MarketEvent::Funding(funding) => {
            tracing::debug!(venue = %funding.venue, canonical = %funding.canonical, "funding event");
        }
        MarketEvent::Connection(conn) => {
            info!(venue = %conn.venue, state = ?conn.state, "connection state changed");
        }
        MarketEvent::Error(err) => {
            warn!(venue = %err.venue, message = %err.message, "connector error");
        }
    }
}
