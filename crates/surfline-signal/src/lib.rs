//! surfline-signal — session rendezvous before the data channel exists.
//!
//! `signaling` joins a session over WebSocket and tracks peers.
//! `negotiation` exchanges SDP offers and answers over HTTP.

pub mod messages;
pub mod negotiation;
pub mod signaling;

pub use messages::{ClientMessage, PeerInfo, PeerRole, ServerMessage, TransportType};
pub use negotiation::{append_params, NegotiationError, RetryPolicy, SdpExchange, SdpPayload, SdpType};
pub use signaling::{
    ConnectOptions, JoinInfo, SignalingClient, SignalingError, SignalingState, SocketFactory,
    TungsteniteFactory,
};
