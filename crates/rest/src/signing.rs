//! Private-request signing, one scheme per venue (`spec.md` §4.6).
//!
//! HMAC-SHA256 throughout, but the signed string and the output encoding differ by
//! venue. Enriched from the pack's `ForgeTrade-mcp-trader/providers/binance-rs` client,
//! which signs Binance requests the same way (HMAC-SHA256 over the query string, hex
//! encoded) — the teacher's own workspace never talks to a centralized exchange, so this
//! module has no direct teacher counterpart for the signing routine itself, only for the
//! surrounding client/rate-limit/error plumbing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use md_types::{MdError, VenueId};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn hmac_bytes(secret: &str, message: &str) -> Result<Vec<u8>, MdError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| MdError::Configuration(format!("invalid api secret: {e}")))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Binance: HMAC-SHA256 over the sorted query string, hex-encoded.
pub fn sign_binance(secret: &str, query_string: &str) -> Result<String, MdError> {
    Ok(hex::encode(hmac_bytes(secret, query_string)?))
}

/// Bybit v5: HMAC-SHA256 over `timestamp + api_key + recv_window + payload`, hex-encoded.
pub fn sign_bybit(
    secret: &str,
    timestamp_ms: u64,
    api_key: &str,
    recv_window_ms: u64,
    payload: &str,
) -> Result<String, MdError> {
    let message = format!("{timestamp_ms}{api_key}{recv_window_ms}{payload}");
    Ok(hex::encode(hmac_bytes(secret, &message)?))
}

/// Bitget: HMAC-SHA256 over `timestamp + method + request_path + body`, base64-encoded.
pub fn sign_bitget(
    secret: &str,
    timestamp_ms: u64,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String, MdError> {
    let message = format!("{timestamp_ms}{}{request_path}{body}", method.to_ascii_uppercase());
    Ok(BASE64.encode(hmac_bytes(secret, &message)?))
}

/// KuCoin: HMAC-SHA256 over `timestamp + method + endpoint + body`, base64-encoded.
pub fn sign_kucoin(
    secret: &str,
    timestamp_ms: u64,
    method: &str,
    endpoint: &str,
    body: &str,
) -> Result<String, MdError> {
    let message = format!("{timestamp_ms}{}{endpoint}{body}", method.to_ascii_uppercase());
    Ok(BASE64.encode(hmac_bytes(secret, &message)?))
}

/// CoinEx: HMAC-SHA256 over the sorted query string plus secret suffix, hex-encoded,
/// uppercased per venue convention.
pub fn sign_coinex(secret: &str, query_string: &str) -> Result<String, MdError> {
    let message = format!("{query_string}&secret_key={secret}");
    Ok(hex::encode(hmac_bytes(secret, &message)?).to_uppercase())
}

pub fn sign_for_venue(
    venue: VenueId,
    secret: &str,
    timestamp_ms: u64,
    method: &str,
    path: &str,
    query_or_body: &str,
    api_key: &str,
) -> Result<String, MdError> {
    match venue {
        VenueId::Binance => sign_binance(secret, query_or_body),
        VenueId::Bybit => sign_bybit(secret, timestamp_ms, api_key, 5_000, query_or_body),
        VenueId::Bitget => sign_bitget(secret, timestamp_ms, method, path, query_or_body),
        VenueId::KuCoin => sign_kucoin(secret, timestamp_ms, method, path, query_or_body),
        VenueId::CoinEx => sign_coinex(secret, query_or_body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_signature_is_deterministic() {
        let a = sign_binance("secret", "symbol=BTCUSDT&timestamp=1").unwrap();
        let b = sign_binance("secret", "symbol=BTCUSDT&timestamp=1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // hex-encoded SHA-256 digest
    }

    #[test]
    fn bitget_signature_is_base64_and_deterministic() {
        let a = sign_bitget("secret", 1_700_000_000_000, "GET", "/api/v2/mix/order", "").unwrap();
        let b = sign_bitget("secret", 1_700_000_000_000, "GET", "/api/v2/mix/order", "").unwrap();
        assert_eq!(a, b);
        assert!(BASE64.decode(&a).is_ok());
    }

    #[test]
    fn different_inputs_yield_different_signatures() {
        let a = sign_bybit("secret", 1, "key", 5000, "{}").unwrap();
        let b = sign_bybit("secret", 2, "key", 5000, "{}").unwrap();
        assert_ne!(a, b);
    }
}
