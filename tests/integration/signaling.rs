use crate::*;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use surfline_signal::messages::{ClientMessage, PeerInfo, PeerRole, ServerMessage, TransportType};
use surfline_signal::signaling::{ConnectOptions, SignalingClient, SignalingError, SignalingState};

// ── Stub server ───────────────────────────────────────────────────────────────

fn host_peer() -> PeerInfo {
    PeerInfo {
        id: "host".into(),
        role: PeerRole::Server,
        joined_at: 1_700_000_000_000,
        supported_transports: vec![TransportType::WebRtc],
        preferred_transport: Some(TransportType::WebRtc),
        metadata: None,
    }
}

/// Accept one WebSocket client and answer each client message with whatever
/// `respond` returns. Returns the `ws://` URL to connect to.
async fn spawn_stub<F>(respond: F) -> Result<String>
where
    F: Fn(ClientMessage) -> Vec<ServerMessage> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let Ok(request) = serde_json::from_str::<ClientMessage>(&text) else {
                continue;
            };
            for reply in respond(request) {
                let Ok(text) = serde_json::to_string(&reply) else {
                    continue;
                };
                if ws.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
        }
    });
    Ok(format!("ws://{addr}/ws"))
}

/// Admits every joiner into session "s-1" alongside a host, relays signals
/// back as if the addressee answered, and answers pings.
fn session_stub(request: ClientMessage) -> Vec<ServerMessage> {
    match request {
        ClientMessage::Join { peer_id, .. } => vec![ServerMessage::JoinSuccess {
            session_id: "s-1".into(),
            peer_id,
            peers: vec![host_peer()],
            available_transports: vec![TransportType::WebRtc, TransportType::Direct],
        }],
        ClientMessage::Signal { to_peer, signal } => vec![
            ServerMessage::PeerJoined {
                peer: PeerInfo {
                    id: "late".into(),
                    role: PeerRole::Client,
                    joined_at: 1_700_000_000_500,
                    supported_transports: vec![],
                    preferred_transport: None,
                    metadata: None,
                },
            },
            ServerMessage::PeerLeft {
                peer_id: "host".into(),
            },
            ServerMessage::Signal {
                from_peer: to_peer,
                signal,
            },
        ],
        ClientMessage::Ping => vec![ServerMessage::Pong],
    }
}

fn options(url: &str) -> ConnectOptions {
    let mut options = ConnectOptions::new(url);
    options.peer_id = "viewer-1".into();
    options.join_timeout = Duration::from_secs(2);
    options.heartbeat = None;
    options
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// Join, see the host, relay a signal, and watch the peer list change.
#[tokio::test]
async fn test_join_and_relay() -> Result<()> {
    let url = spawn_stub(session_stub).await?;
    let client = SignalingClient::connect(options(&url)).await?;

    assert_eq!(client.state(), SignalingState::Joined);
    assert_eq!(client.session_id(), "s-1");
    assert_eq!(client.peer_id(), "viewer-1");
    assert_eq!(
        client.join_info().available_transports,
        vec![TransportType::WebRtc, TransportType::Direct]
    );
    assert_eq!(client.peers(), vec![host_peer()]);

    let offer = json!({ "type": "offer", "sdp": "v=0" });
    client.send_signal("host", offer.clone())?;
    let relayed = client.wait_for_message("signal", EVENT_TIMEOUT).await?;
    assert_eq!(
        relayed,
        ServerMessage::Signal {
            from_peer: "host".into(),
            signal: offer,
        }
    );

    let peers: Vec<String> = client.peers().into_iter().map(|p| p.id).collect();
    assert_eq!(peers, vec!["late".to_string()]);

    client.close();
    assert_eq!(client.state(), SignalingState::Closed);
    assert!(matches!(
        client.send_signal("host", json!({})),
        Err(SignalingError::Closed)
    ));
    Ok(())
}

/// The passphrase travels in the join request; a wrong one is rejected.
#[tokio::test]
async fn test_join_rejected() -> Result<()> {
    let url = spawn_stub(|request| match request {
        ClientMessage::Join {
            passphrase: Some(p), ..
        } if p == "open sesame" => vec![ServerMessage::JoinSuccess {
            session_id: "s-2".into(),
            peer_id: "viewer-1".into(),
            peers: vec![],
            available_transports: vec![],
        }],
        ClientMessage::Join { .. } => vec![ServerMessage::JoinError {
            reason: "bad passphrase".into(),
        }],
        _ => vec![],
    })
    .await?;

    let mut wrong = options(&url);
    wrong.passphrase = Some("guess".into());
    match SignalingClient::connect(wrong).await {
        Err(SignalingError::JoinRejected(reason)) => assert_eq!(reason, "bad passphrase"),
        Err(other) => panic!("expected rejection, got {other}"),
        Ok(_) => panic!("join should have been rejected"),
    }
    Ok(())
}

/// A server that never answers the join times out.
#[tokio::test]
async fn test_join_times_out() -> Result<()> {
    let url = spawn_stub(|_| vec![]).await?;
    let mut opts = options(&url);
    opts.join_timeout = Duration::from_millis(200);

    match SignalingClient::connect(opts).await {
        Err(SignalingError::Timeout(after)) => assert_eq!(after, Duration::from_millis(200)),
        Err(other) => panic!("expected timeout, got {other}"),
        Ok(_) => panic!("join should not complete"),
    }
    Ok(())
}

/// Nothing listening: the connect error names the URL.
#[tokio::test]
async fn test_connect_refused() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let url = format!("ws://{addr}/ws");
    match SignalingClient::connect(options(&url)).await {
        Err(SignalingError::Connect(detail)) => assert!(detail.contains(&addr.to_string())),
        Err(other) => panic!("expected connect failure, got {other}"),
        Ok(_) => panic!("connect should fail"),
    }
    Ok(())
}

/// The heartbeat keeps pinging after join; pongs are visible to waiters.
#[tokio::test]
async fn test_heartbeat_pings() -> Result<()> {
    let url = spawn_stub(session_stub).await?;
    let mut opts = options(&url);
    opts.heartbeat = Some(Duration::from_millis(50));
    let client = SignalingClient::connect(opts).await?;

    let pong = client.wait_for_message("pong", EVENT_TIMEOUT).await?;
    assert_eq!(pong, ServerMessage::Pong);
    client.close();
    Ok(())
}
