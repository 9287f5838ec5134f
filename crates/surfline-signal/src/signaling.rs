//! Signaling client. WebSocket join handshake and peer tracking.
//!
//! ```text
//! Disconnected → Connecting → Open (join sent) → Joined → Closed
//! ```
//!
//! After the socket opens the client sends `join` and waits for
//! `join_success`. From then on a reader task keeps the peer list current
//! and fans every server message out to [`SignalingClient::wait_for_message`]
//! callers. A writer task owns the sink half of the socket.

use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use surfline_core::config::SignalingSettings;

use crate::messages::{ClientMessage, PeerInfo, ServerMessage, TransportType};

const INBOUND_CAPACITY: usize = 64;

// ── Socket seam ───────────────────────────────────────────────────────────────

/// A connected WebSocket, as a stream of inbound and a sink of outbound messages.
pub trait SignalingSocket:
    Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin
{
}

impl<T> SignalingSocket for T where
    T: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin
{
}

pub type BoxedSocket = Box<dyn SignalingSocket>;

/// Opens signaling sockets. Swap this out to run the client over anything
/// that speaks WebSocket messages.
pub trait SocketFactory: Send + Sync {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<BoxedSocket, SignalingError>>;
}

/// Plain `ws://` connections via tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteFactory;

impl SocketFactory for TungsteniteFactory {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<BoxedSocket, SignalingError>> {
        let url = url.to_owned();
        Box::pin(async move {
            let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| SignalingError::Connect(format!("{url}: {e}")))?;
            Ok(Box::new(stream) as BoxedSocket)
        })
    }
}

// ── Options and results ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub url: String,
    pub peer_id: String,
    pub supported_transports: Vec<TransportType>,
    pub preferred_transport: Option<TransportType>,
    pub passphrase: Option<String>,
    pub viewer_token: Option<String>,
    pub label: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
    pub join_timeout: Duration,
    /// Ping interval after joining. `None` disables the heartbeat.
    pub heartbeat: Option<Duration>,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            peer_id: random_peer_id(),
            supported_transports: vec![TransportType::WebRtc],
            preferred_transport: Some(TransportType::WebRtc),
            passphrase: None,
            viewer_token: None,
            label: None,
            metadata: None,
            join_timeout: Duration::from_secs(10),
            heartbeat: Some(Duration::from_secs(30)),
        }
    }

    pub fn from_settings(settings: &SignalingSettings) -> Self {
        let mut options = Self::new(settings.url.clone());
        options.label = settings.label.clone();
        options.join_timeout = Duration::from_millis(settings.join_timeout_ms.max(1));
        options.heartbeat = (settings.heartbeat_secs > 0)
            .then(|| Duration::from_secs(settings.heartbeat_secs));
        options
    }
}

/// 128-bit random peer id, hex encoded.
pub fn random_peer_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// What the server told us on `join_success`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    pub session_id: String,
    /// Our id as the server recorded it.
    pub peer_id: String,
    pub peers: Vec<PeerInfo>,
    pub available_transports: Vec<TransportType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Disconnected,
    Connecting,
    Open,
    Joined,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("failed to open signaling socket: {0}")]
    Connect(String),
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("signaling socket closed before join completed")]
    ClosedBeforeJoin,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("signaling connection is closed")]
    Closed,
    #[error("invalid message from signaling server: {0}")]
    Protocol(String),
    #[error("signaling server error: {0}")]
    Server(String),
    #[error("failed to encode signaling message: {0}")]
    Encode(#[from] serde_json::Error),
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Inbound {
    Message(ServerMessage),
    Invalid(String),
    Closed,
}

enum Outbound {
    Text(String),
    Close,
}

struct ClientInner {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: broadcast::Sender<Inbound>,
    state: Mutex<SignalingState>,
    peers: Mutex<HashMap<String, PeerInfo>>,
}

impl ClientInner {
    fn state(&self) -> SignalingState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SignalingState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "signaling state");
            *state = next;
        }
    }

    fn send(&self, message: &ClientMessage) -> Result<(), SignalingError> {
        let text = serde_json::to_string(message)?;
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| SignalingError::Closed)
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => {
                self.track_peers(&message);
                let _ = self.inbound.send(Inbound::Message(message));
            }
            Err(e) => {
                tracing::warn!(error = %e, "unparseable signaling message");
                let _ = self.inbound.send(Inbound::Invalid(e.to_string()));
            }
        }
    }

    fn track_peers(&self, message: &ServerMessage) {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        match message {
            ServerMessage::JoinSuccess { peers: list, .. } => {
                peers.clear();
                peers.extend(list.iter().map(|p| (p.id.clone(), p.clone())));
            }
            ServerMessage::PeerJoined { peer } => {
                tracing::info!(peer_id = %peer.id, role = ?peer.role, "peer joined");
                peers.insert(peer.id.clone(), peer.clone());
            }
            ServerMessage::PeerLeft { peer_id } => {
                tracing::info!(peer_id = %peer_id, "peer left");
                peers.remove(peer_id);
            }
            _ => {}
        }
    }

    fn mark_closed(&self) {
        self.set_state(SignalingState::Closed);
        let _ = self.inbound.send(Inbound::Closed);
    }

    fn shutdown(&self) {
        let _ = self.outbound.send(Outbound::Close);
        self.mark_closed();
    }
}

pub struct SignalingClient {
    inner: Arc<ClientInner>,
    join: JoinInfo,
    heartbeat: Option<JoinHandle<()>>,
}

impl SignalingClient {
    /// Connect with the default tokio-tungstenite socket.
    pub async fn connect(options: ConnectOptions) -> Result<Self, SignalingError> {
        Self::connect_with(&TungsteniteFactory, options).await
    }

    /// Connect through `factory` and complete the join handshake.
    pub async fn connect_with(
        factory: &dyn SocketFactory,
        options: ConnectOptions,
    ) -> Result<Self, SignalingError> {
        tracing::debug!(url = %options.url, peer_id = %options.peer_id, "signaling connecting");
        let socket = factory.connect(&options.url).await?;
        let (sink, stream) = socket.split();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, _) = broadcast::channel(INBOUND_CAPACITY);
        let inner = Arc::new(ClientInner {
            outbound: out_tx,
            inbound: in_tx,
            state: Mutex::new(SignalingState::Connecting),
            peers: Mutex::new(HashMap::new()),
        });

        let mut inbound = inner.inbound.subscribe();
        tokio::spawn(write_loop(sink, out_rx));
        tokio::spawn(read_loop(stream, inner.clone()));

        inner.send(&ClientMessage::Join {
            peer_id: options.peer_id.clone(),
            supported_transports: options.supported_transports.clone(),
            preferred_transport: options.preferred_transport.clone(),
            passphrase: options.passphrase.clone(),
            viewer_token: options.viewer_token.clone(),
            label: options.label.clone(),
            metadata: options.metadata.clone(),
        })?;
        inner.set_state(SignalingState::Open);

        let join = match tokio::time::timeout(options.join_timeout, await_join(&mut inbound)).await {
            Ok(Ok(join)) => join,
            Ok(Err(e)) => {
                inner.shutdown();
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(url = %options.url, "signaling join timed out");
                inner.shutdown();
                return Err(SignalingError::Timeout(options.join_timeout));
            }
        };
        inner.set_state(SignalingState::Joined);
        tracing::info!(
            session_id = %join.session_id,
            peer_id = %join.peer_id,
            peers = join.peers.len(),
            "signaling joined"
        );

        let heartbeat = options
            .heartbeat
            .map(|period| spawn_heartbeat(inner.clone(), period));
        Ok(Self {
            inner,
            join,
            heartbeat,
        })
    }

    pub fn join_info(&self) -> &JoinInfo {
        &self.join
    }

    pub fn session_id(&self) -> &str {
        &self.join.session_id
    }

    pub fn peer_id(&self) -> &str {
        &self.join.peer_id
    }

    pub fn state(&self) -> SignalingState {
        self.inner.state()
    }

    /// Current peers, ordered by join time.
    pub fn peers(&self) -> Vec<PeerInfo> {
        let peers = self.inner.peers.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<PeerInfo> = peers.values().cloned().collect();
        list.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// Relay an opaque signal to another peer.
    pub fn send_signal(&self, to_peer: &str, signal: Value) -> Result<(), SignalingError> {
        if self.state() == SignalingState::Closed {
            return Err(SignalingError::Closed);
        }
        self.inner.send(&ClientMessage::Signal {
            to_peer: to_peer.to_owned(),
            signal,
        })
    }

    /// Wait for the next message of type `kind` received after this call.
    ///
    /// A server `error` message or an unparseable frame fails the wait, as
    /// does the socket closing. Running out of time is reported as
    /// [`SignalingError::Timeout`].
    pub async fn wait_for_message(
        &self,
        kind: &str,
        timeout: Duration,
    ) -> Result<ServerMessage, SignalingError> {
        let mut inbound = self.inner.inbound.subscribe();
        if self.state() == SignalingState::Closed {
            return Err(SignalingError::Closed);
        }

        let wait = async {
            loop {
                match inbound.recv().await {
                    Ok(Inbound::Message(message)) if message.type_name() == kind => {
                        return Ok(message)
                    }
                    Ok(Inbound::Message(ServerMessage::Error { message })) => {
                        return Err(SignalingError::Server(message))
                    }
                    Ok(Inbound::Message(_)) => continue,
                    Ok(Inbound::Invalid(detail)) => return Err(SignalingError::Protocol(detail)),
                    Ok(Inbound::Closed) | Err(broadcast::error::RecvError::Closed) => {
                        return Err(SignalingError::Closed)
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "signaling waiter lagged");
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(Err(SignalingError::Timeout(timeout)))
    }

    /// Close the socket. Later sends fail with [`SignalingError::Closed`].
    pub fn close(&self) {
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
        if self.state() != SignalingState::Closed {
            tracing::debug!(session_id = %self.join.session_id, "closing signaling connection");
            self.inner.shutdown();
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn await_join(inbound: &mut broadcast::Receiver<Inbound>) -> Result<JoinInfo, SignalingError> {
    loop {
        match inbound.recv().await {
            Ok(Inbound::Message(ServerMessage::JoinSuccess {
                session_id,
                peer_id,
                peers,
                available_transports,
            })) => {
                return Ok(JoinInfo {
                    session_id,
                    peer_id,
                    peers,
                    available_transports,
                })
            }
            Ok(Inbound::Message(ServerMessage::JoinError { reason })) => {
                tracing::warn!(%reason, "signaling join rejected");
                return Err(SignalingError::JoinRejected(reason));
            }
            Ok(Inbound::Message(ServerMessage::Error { message })) => {
                return Err(SignalingError::Server(message))
            }
            Ok(Inbound::Message(_)) | Ok(Inbound::Invalid(_)) => continue,
            Ok(Inbound::Closed) | Err(broadcast::error::RecvError::Closed) => {
                return Err(SignalingError::ClosedBeforeJoin)
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "join waiter lagged");
            }
        }
    }
}

// ── Socket tasks ──────────────────────────────────────────────────────────────

async fn read_loop(mut stream: SplitStream<BoxedSocket>, inner: Arc<ClientInner>) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(Message::Text(text)) => inner.dispatch(&text),
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "signaling socket closed by server");
                break;
            }
            Ok(Message::Binary(bytes)) => {
                tracing::warn!(len = bytes.len(), "ignoring binary signaling message");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "signaling socket error");
                break;
            }
        }
    }
    inner.mark_closed();
}

async fn write_loop(
    mut sink: SplitSink<BoxedSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(next) = outbound.recv().await {
        match next {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(error = %e, "signaling send failed");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

fn spawn_heartbeat(inner: Arc<ClientInner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if inner.send(&ClientMessage::Ping).is_err() {
                break;
            }
            tracing::trace!("signaling ping sent");
        }
    })
}
