//! Shared error taxonomy, used by every crate in this workspace.
//!
//! Grounded on the teacher's `services/adapters/src/error.rs`: one flat enum carrying
//! the venue where relevant, with classifier methods so callers can decide whether to
//! retry, surface, or fail fast without matching on every variant (see `spec.md` §7).

use crate::venue::VenueId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MdError>;

#[derive(Debug, Error)]
pub enum MdError {
    /// Transient network failure; the session runtime retries via reconnect.
    #[error("connection failed for {venue}: {reason}")]
    ConnectionFailed { venue: VenueId, reason: String },

    #[error("connection timed out for {venue} after {timeout_ms}ms")]
    ConnectionTimeout { venue: VenueId, timeout_ms: u64 },

    #[error("websocket for {venue} disconnected")]
    Disconnected { venue: VenueId },

    /// Malformed envelope or unknown message shape; logged and dropped.
    #[error("invalid message from {venue}: {reason}")]
    InvalidMessage { venue: VenueId, reason: String },

    #[error("failed to parse json: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Order-book sequence validation failed; the book needs a fresh snapshot.
    #[error("sequence gap for {venue} {symbol}: expected continuation of {expected}, got {found}")]
    SequenceGap {
        venue: VenueId,
        symbol: String,
        expected: u64,
        found: u64,
    },

    /// Authentication failure; surfaced verbatim, never auto-retried with the same
    /// credentials.
    #[error("authentication failed for {venue}: {reason}")]
    AuthenticationFailed { venue: VenueId, reason: String },

    #[error("rpc call timed out after {timeout_ms}ms")]
    RpcTimeout { timeout_ms: u64 },

    #[error("rate limited by {venue}")]
    RateLimited { venue: VenueId },

    /// Business-level rejection from the venue (bad order, unknown symbol, ...);
    /// returned to the caller verbatim.
    #[error("{venue} rejected request: {message}")]
    Business {
        venue: VenueId,
        message: String,
        venue_code: Option<String>,
    },

    /// Missing credentials, unknown category, or other startup misconfiguration.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("reconnect attempts exhausted for {venue} after {attempts}")]
    ReconnectExhausted { venue: VenueId, attempts: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MdError {
    /// Network, sequence, and rate-limit errors recover locally without user
    /// intervention (reconnect, resync, or backoff+retry respectively).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MdError::ConnectionFailed { .. }
                | MdError::ConnectionTimeout { .. }
                | MdError::Disconnected { .. }
                | MdError::SequenceGap { .. }
                | MdError::RateLimited { .. }
                | MdError::InvalidMessage { .. }
                | MdError::JsonParse(_)
        )
    }

    /// Auth, business, and fatal-config errors are always surfaced to the caller.
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            MdError::AuthenticationFailed { .. }
                | MdError::Business { .. }
                | MdError::Configuration(_)
                | MdError::ReconnectExhausted { .. }
        )
    }
}
