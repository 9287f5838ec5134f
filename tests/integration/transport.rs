use crate::*;

use bytes::Bytes;

use surfline_core::config::FramingConfig;
use surfline_core::envelope::{encode_envelope, Payload};
use surfline_core::frame::{FramingError, FIXED_HEADER_LEN};
use surfline_transport::adapter::terminal::{
    RawFrames, TerminalAdapter, TerminalEvent, READY_SENTINEL, STATUS_PREFIX,
};
use surfline_transport::adapter::ConnectionStatus;
use surfline_transport::channel::DataChannel;
use surfline_transport::encoder::encode_chunks;
use surfline_transport::memory::channel_pair;
use surfline_transport::transport::{
    SecureContext, Transport, TransportError, TransportOptions, DEFAULT_KIND, DEFAULT_NAMESPACE,
};

fn small_chunks() -> FramingConfig {
    FramingConfig::new(1024, Duration::from_secs(5), 64, 1024 * 1024)
}

type Side = (Transport, UnboundedReceiver<TransportEvent>);

fn connected_pair(config: FramingConfig) -> (Side, Side) {
    let ((a, a_rx), (b, b_rx)) = channel_pair("data");
    let (left, left_events) = Transport::new(a, config.clone(), TransportOptions::default());
    let (right, right_events) = Transport::new(b, config, TransportOptions::default());
    left.attach(a_rx);
    right.attach(b_rx);
    ((left, left_events), (right, right_events))
}

/// Mixed text and multi-chunk binary messages arrive intact and in order.
#[tokio::test]
async fn test_messages_cross_in_order() -> Result<()> {
    let ((left, _left_events), (_right, mut right_events)) = connected_pair(small_chunks());

    let blob: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(left.send_text("hello")?, 0);
    assert_eq!(left.send_binary(&blob)?, 1);
    assert_eq!(left.send_text("")?, 2);

    let first = next_message(&mut right_events).await?;
    assert_eq!(first.seq, 0);
    assert_eq!(first.payload, Payload::Text("hello".into()));

    let second = next_message(&mut right_events).await?;
    assert_eq!(second.seq, 1);
    assert_eq!(second.payload, Payload::Binary(Bytes::from(blob)));

    let third = next_message(&mut right_events).await?;
    assert_eq!(third.payload, Payload::Text(String::new()));
    Ok(())
}

/// Both directions share nothing: each side numbers its own messages.
#[tokio::test]
async fn test_bidirectional_sequences_are_independent() -> Result<()> {
    let ((left, mut left_events), (right, mut right_events)) = connected_pair(small_chunks());

    left.send_text("ping")?;
    left.send_text("ping again")?;
    let seq = right.send_text("pong")?;
    assert_eq!(seq, 0);

    assert_eq!(next_message(&mut right_events).await?.seq, 0);
    assert_eq!(next_message(&mut right_events).await?.seq, 1);
    let reply = next_message(&mut left_events).await?;
    assert_eq!(reply.payload, Payload::Text("pong".into()));
    Ok(())
}

/// A secure context is announced before the channel opens, and the first
/// outbound message uses the configured starting sequence.
#[tokio::test]
async fn test_secure_context_and_initial_sequence() -> Result<()> {
    let ((a, a_rx), (b, b_rx)) = channel_pair("secure");
    let secure = SecureContext {
        handshake_id: "hs-1".into(),
        verification_code: Some("123-456".into()),
    };
    let options = TransportOptions {
        initial_seq: 41,
        secure: Some(secure.clone()),
        ..TransportOptions::default()
    };
    let (left, mut left_events) = Transport::new(a, small_chunks(), options);
    let (right, mut right_events) = Transport::new(b, small_chunks(), TransportOptions::default());
    left.attach(a_rx);
    right.attach(b_rx);

    assert_eq!(next_event(&mut left_events).await?, TransportEvent::Secure(secure));
    assert_eq!(next_event(&mut left_events).await?, TransportEvent::Open);

    assert_eq!(left.send_text("first")?, 41);
    assert_eq!(next_message(&mut right_events).await?.seq, 41);
    Ok(())
}

/// Frames replayed after completion, or delivered out of order, never
/// produce a second copy of the message.
#[tokio::test]
async fn test_reordered_and_replayed_frames() -> Result<()> {
    let config = small_chunks();
    let ((a, _a_rx), _peer) = channel_pair("manual");
    let (transport, _events) = Transport::new(a, config.clone(), TransportOptions::default());

    let body: Vec<u8> = (0..4000u32).map(|i| i as u8).collect();
    let envelope = encode_envelope(7, &Payload::Binary(Bytes::from(body.clone())))?;
    let frames = encode_chunks(DEFAULT_NAMESPACE, DEFAULT_KIND, 7, &envelope, &config)?;
    assert!(frames.len() > 3);

    let (last, rest) = frames.split_last().context("no frames")?;
    for frame in rest.iter().rev() {
        assert!(transport.receive_frame(frame)?.is_none());
    }
    // Same chunk twice while in flight.
    assert!(transport.receive_frame(&rest[0])?.is_none());
    assert_eq!(transport.queue_depth().inflight_messages, 1);

    let delivered = transport.receive_frame(last)?.context("message not completed")?;
    assert_eq!(delivered.seq, 7);
    assert_eq!(delivered.payload, Payload::Binary(Bytes::from(body)));
    assert_eq!(transport.queue_depth().inflight_messages, 0);

    for frame in &frames {
        assert!(transport.receive_frame(frame)?.is_none());
    }
    Ok(())
}

/// Corrupting one chunk fails the checksum when the message completes.
#[tokio::test]
async fn test_corrupt_chunk_detected() -> Result<()> {
    let config = small_chunks();
    let ((a, _a_rx), _peer) = channel_pair("manual");
    let (transport, _events) = Transport::new(a, config.clone(), TransportOptions::default());

    let envelope = encode_envelope(3, &Payload::Binary(Bytes::from(vec![0x5a; 3000])))?;
    let mut frames = encode_chunks(DEFAULT_NAMESPACE, DEFAULT_KIND, 3, &envelope, &config)?;
    let mut tampered = frames[1].to_vec();
    let last = tampered.len() - 1;
    tampered[last] ^= 0xff;
    frames[1] = Bytes::from(tampered);

    let mut outcome = None;
    for frame in &frames {
        match transport.receive_frame(frame) {
            Ok(None) => continue,
            other => {
                outcome = Some(other);
                break;
            }
        }
    }
    match outcome {
        Some(Err(TransportError::Framing(FramingError::CrcMismatch { .. }))) => {}
        other => panic!("expected a checksum failure, got {other:?}"),
    }
    assert_eq!(transport.queue_depth().inflight_messages, 0);
    Ok(())
}

/// Garbage on the wire is dropped without disturbing later traffic.
#[tokio::test]
async fn test_garbage_frames_do_not_stall_delivery() -> Result<()> {
    let ((a, a_rx), (b, b_rx)) = channel_pair("noisy");
    let (right, mut right_events) = Transport::new(b, small_chunks(), TransportOptions::default());
    right.attach(b_rx);
    let (left, _left_events) = Transport::new(a.clone(), small_chunks(), TransportOptions::default());
    left.attach(a_rx);

    a.send(Bytes::from_static(&[0xA1, 0x00, 0x03]))?;
    a.send(Bytes::from(vec![0u8; FIXED_HEADER_LEN + 4]))?;
    a.send_text("not a frame")?;
    left.send_text("still here")?;

    let delivered = next_message(&mut right_events).await?;
    assert_eq!(delivered.payload, Payload::Text("still here".into()));
    Ok(())
}

/// Closing one side closes both, exactly once, and rejects later sends.
#[tokio::test]
async fn test_close_propagates() -> Result<()> {
    let ((left, mut left_events), (right, mut right_events)) = connected_pair(small_chunks());
    assert_eq!(next_event(&mut left_events).await?, TransportEvent::Open);
    assert_eq!(next_event(&mut right_events).await?, TransportEvent::Open);

    left.close();
    left.close();
    assert_eq!(next_event(&mut left_events).await?, TransportEvent::Close);
    assert_eq!(next_event(&mut right_events).await?, TransportEvent::Close);
    assert!(left_events.try_recv().is_err());

    assert!(!right.is_open());
    assert!(matches!(right.send_text("late"), Err(TransportError::Closed)));
    Ok(())
}

/// A terminal client announces readiness, then sees host frames and
/// status lines.
#[tokio::test]
async fn test_terminal_client_against_host() -> Result<()> {
    let ((host, mut host_events), (client, client_events)) = connected_pair(small_chunks());
    let mut terminal = TerminalAdapter::new(client, client_events, RawFrames, None);

    assert_eq!(
        terminal.next_event().await,
        Some(TerminalEvent::Connection(ConnectionStatus::Connected))
    );
    assert!(terminal.ready_sent());

    let ready = next_message(&mut host_events).await?;
    assert_eq!(ready.payload, Payload::Text(READY_SENTINEL.into()));

    host.send_text(&format!("{STATUS_PREFIX}resized 80x24"))?;
    host.send_binary(b"\x1b[2J")?;
    assert_eq!(
        terminal.next_event().await,
        Some(TerminalEvent::Status("resized 80x24".into()))
    );
    assert_eq!(
        terminal.next_event().await,
        Some(TerminalEvent::Frame(Bytes::from_static(b"\x1b[2J")))
    );

    terminal.send_input(b"ls\n")?;
    let input = next_message(&mut host_events).await?;
    assert_eq!(input.payload, Payload::Binary(Bytes::from_static(b"ls\n")));

    terminal.transport().close();
    assert_eq!(
        terminal.next_event().await,
        Some(TerminalEvent::Connection(ConnectionStatus::Disconnected))
    );
    Ok(())
}
