//! Round-trip a message through an in-memory transport pair.

use anyhow::{bail, Context, Result};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

use surfline_core::config::SurflineConfig;
use surfline_core::envelope::Payload;
use surfline_transport::memory::channel_pair;
use surfline_transport::transport::{Transport, TransportEvent, TransportOptions};

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn cmd_loopback(text: &str, config: &SurflineConfig) -> Result<()> {
    let framing = config.framing_config();
    let ((a, a_rx), (b, b_rx)) = channel_pair("loopback");

    let (sender, mut sender_events) =
        Transport::new(a, framing.clone(), TransportOptions::default());
    let (receiver, mut receiver_events) = Transport::new(b, framing, TransportOptions::default());
    sender.attach(a_rx);
    receiver.attach(b_rx);

    expect_open(&mut sender_events).await?;
    expect_open(&mut receiver_events).await?;

    let started = Instant::now();
    let seq = sender.send_text(text).context("send failed")?;
    let envelope = loop {
        let event = tokio::time::timeout(RECEIVE_TIMEOUT, receiver_events.recv())
            .await
            .context("timed out waiting for the message")?;
        match event {
            Some(TransportEvent::Message(envelope)) => break envelope,
            Some(TransportEvent::Error(e)) => bail!("receiver reported: {e}"),
            Some(TransportEvent::Close) | None => bail!("receiver closed before delivery"),
            Some(_) => continue,
        }
    };
    let elapsed = started.elapsed();

    println!("  Sent seq     : {seq}");
    println!("  Received seq : {}", envelope.seq);
    match &envelope.payload {
        Payload::Text(received) => println!("  Text         : {received:?}"),
        Payload::Binary(data) => println!("  Binary       : {} bytes", data.len()),
    }
    println!("  Round trip   : {:.2?}", elapsed);

    sender.close();
    Ok(())
}

async fn expect_open(events: &mut UnboundedReceiver<TransportEvent>) -> Result<()> {
    match tokio::time::timeout(RECEIVE_TIMEOUT, events.recv()).await {
        Ok(Some(TransportEvent::Open)) => Ok(()),
        Ok(Some(other)) => bail!("expected open, got {other:?}"),
        Ok(None) => bail!("transport dropped before opening"),
        Err(_) => bail!("timed out waiting for the channel to open"),
    }
}
