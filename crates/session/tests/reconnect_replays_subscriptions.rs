//! Scenario test (`spec.md` §8, scenario 3): after a dropped connection, the session
//! reconnects on its own and tells the adapter to replay its subscriptions via
//! `SessionEvent::Reconnected`, and the session is back in a state where `mark_live`
//! (then `send`) succeeds — the exact contract every adapter's `Reconnected` handler
//! relies on.

use md_session::{FrameRouter, Session, SessionConfig, SessionEvent, SessionState};
use md_types::VenueId;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

struct EchoRouter;
impl FrameRouter for EchoRouter {
    fn correlation_id(&self, _frame: &serde_json::Value) -> Option<u64> {
        None
    }
    fn is_heartbeat(&self, raw: &str) -> bool {
        raw == "ping"
    }
}

#[tokio::test]
async fn reconnect_emits_replay_signal_and_session_accepts_sends_again() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind local listener");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        // First connection: accept then drop immediately, forcing the client's
        // reader loop into an error and triggering reconnect-with-backoff.
        let (stream, _) = listener.accept().await.expect("first accept");
        let ws = tokio_tungstenite::accept_async(stream).await.expect("first handshake");
        drop(ws);

        // Second connection (the reconnect): hold it open so the client settles
        // into `Open` and stays there for the rest of the test.
        let (stream, _) = listener.accept().await.expect("second accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("second handshake");
        use futures_util::StreamExt;
        while ws.next().await.is_some() {}
    });

    let config = SessionConfig {
        url: format!("ws://{addr}"),
        reconnect: true,
        reconnect_base_delay: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        max_reconnect_attempts: 5,
        ..Default::default()
    };

    let (event_tx, mut event_rx) = mpsc::channel(16);
    let session = Session::open(VenueId::Binance, config, Box::new(EchoRouter), event_tx)
        .await
        .expect("initial connect");

    let mut saw_disconnected = false;
    let mut saw_reconnected = false;
    for _ in 0..10 {
        let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(2), event_rx.recv()).await else {
            break;
        };
        match event {
            SessionEvent::Disconnected => saw_disconnected = true,
            SessionEvent::Reconnected => {
                saw_reconnected = true;
                break;
            }
            _ => {}
        }
    }

    assert!(saw_disconnected, "expected a Disconnected event before the reconnect");
    assert!(saw_reconnected, "expected a Reconnected event once the reader reconnected");
    assert_eq!(session.state().await, SessionState::Open, "reconnect lands back in Open, not Live");

    // This is the step every adapter's `Reconnected` handler must take before
    // replaying subscriptions (`spec.md` §4.1) — without it, `send` stays rejected.
    session.mark_live().await;
    assert_eq!(session.state().await, SessionState::Live);
    session
        .send(serde_json::json!({"op": "subscribe", "args": ["BTCUSDT@depth"]}))
        .await
        .expect("send accepted once Live after reconnect");
}
