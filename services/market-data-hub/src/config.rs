//! Environment-based configuration, following the workspace's `from_env`/`validate`
//! convention (`spec.md` §6 "Configuration").

use md_rest::ApiCredentials;
use md_types::VenueId;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub venues: Vec<VenueId>,
    pub symbols: Vec<String>,
    pub broadcast_capacity: usize,
    pub reconnect_delay: Duration,
    pub max_reconnect: u32,
}

impl HubConfig {
    /// `MD_HUB_VENUES` is a comma-separated venue list (default: all five).
    /// `MD_HUB_SYMBOLS` is a comma-separated venue-native symbol list applied to every
    /// configured venue (default: `BTCUSDT,ETHUSDT`).
    pub fn from_env() -> Self {
        let venues = env::var("MD_HUB_VENUES")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .filter_map(|s| s.trim().parse::<VenueId>().ok())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| VenueId::ALL.to_vec());

        let symbols = env::var("MD_HUB_SYMBOLS")
            .ok()
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|| vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);

        let broadcast_capacity = env::var("MD_HUB_BROADCAST_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1024);

        let reconnect_delay_ms = env::var("MD_HUB_RECONNECT_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        let max_reconnect = env::var("MD_HUB_MAX_RECONNECT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Self {
            venues,
            symbols,
            broadcast_capacity,
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            max_reconnect,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.venues.is_empty() {
            return Err("MD_HUB_VENUES resolved to no known venue".to_string());
        }
        if self.symbols.is_empty() {
            return Err("MD_HUB_SYMBOLS resolved to no symbols".to_string());
        }
        if self.broadcast_capacity == 0 {
            return Err("MD_HUB_BROADCAST_CAPACITY must be nonzero".to_string());
        }
        Ok(())
    }

    /// Credentials for `venue`, read from `MD_{VENUE}_API_KEY` / `_API_SECRET` /
    /// `_PASSPHRASE`. `None` when no key is set; public market data needs none.
    pub fn credentials_for(venue: VenueId) -> Option<ApiCredentials> {
        let prefix = venue.as_str().to_ascii_uppercase();
        let api_key = env::var(format!("MD_{prefix}_API_KEY")).ok()?;
        let api_secret = env::var(format!("MD_{prefix}_API_SECRET")).unwrap_or_default();
        let passphrase = env::var(format!("MD_{prefix}_PASSPHRASE")).ok();
        Some(ApiCredentials {
            api_key,
            api_secret,
            passphrase,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_venues() {
        let config = HubConfig {
            venues: Vec::new(),
            symbols: vec!["BTCUSDT".to_string()],
            broadcast_capacity: 1024,
            reconnect_delay: Duration::from_millis(100),
            max_reconnect: 10,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        let config = HubConfig {
            venues: VenueId::ALL.to_vec(),
            symbols: vec!["BTCUSDT".to_string()],
            broadcast_capacity: 1024,
            reconnect_delay: Duration::from_millis(100),
            max_reconnect: 10,
        };
        assert!(config.validate().is_ok());
    }
}
