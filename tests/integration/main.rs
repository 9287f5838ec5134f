//! Surfline integration test harness.
//!
//! Everything runs in-process over loopback: transports over in-memory
//! channel pairs, the signaling client against a WebSocket stub, and the
//! SDP exchange against an axum stub.
//!
//!   cargo test --test integration
//!
//! Each stub binds 127.0.0.1:0, so tests can run in parallel.

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

use surfline_core::envelope::Envelope;
use surfline_transport::transport::TransportEvent;

mod negotiation;
mod signaling;
mod transport;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Next transport event, failing after [`EVENT_TIMEOUT`].
pub async fn next_event(events: &mut UnboundedReceiver<TransportEvent>) -> Result<TransportEvent> {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .context("timed out waiting for a transport event")?
        .context("transport event queue ended")
}

/// Next delivered envelope, skipping lifecycle events.
pub async fn next_message(events: &mut UnboundedReceiver<TransportEvent>) -> Result<Envelope> {
    loop {
        match next_event(events).await? {
            TransportEvent::Message(envelope) => return Ok(envelope),
            TransportEvent::Open | TransportEvent::Secure(_) => continue,
            other => bail!("expected a message, got {other:?}"),
        }
    }
}

/// Serve `router` on an ephemeral loopback port. Returns the base URL.
pub async fn serve(router: axum::Router) -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            eprintln!("stub server stopped: {e}");
        }
    });
    Ok(format!("http://{addr}"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// The harness itself: an empty router answers 404 on loopback.
#[tokio::test]
async fn test_stub_server_reachable() -> Result<()> {
    let base = serve(axum::Router::new()).await?;
    let listener_port = base.rsplit(':').next().context("no port in url")?;
    assert!(listener_port.parse::<u16>()? > 0);

    let stream = tokio::net::TcpStream::connect(base.trim_start_matches("http://")).await?;
    assert!(stream.peer_addr()?.ip().is_loopback());
    Ok(())
}
