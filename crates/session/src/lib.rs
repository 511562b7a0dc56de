//! WebSocket session runtime shared by every venue adapter (`spec.md` §4.1).
//!
//! One [`Session`] owns one socket: framing, heartbeats, RPC correlation, and
//! reconnect-with-resubscribe-notification. Adapters in `md-adapters` supply the
//! venue-specific envelope parsing via [`FrameRouter`] and react to [`SessionEvent`].

mod circuit_breaker;
mod pending;
mod session;
mod state;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use pending::PendingCalls;
pub use session::{FrameRouter, Session, SessionConfig, SessionEvent};
pub use state::SessionState;
