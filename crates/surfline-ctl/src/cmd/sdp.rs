//! Poll and post SDP payloads over the HTTP rendezvous.

use anyhow::{Context, Result};
use std::time::Duration;

use surfline_core::config::SurflineConfig;
use surfline_signal::negotiation::{RetryPolicy, SdpExchange, SdpPayload};

fn exchange(config: &SurflineConfig) -> SdpExchange {
    SdpExchange::new(RetryPolicy::from_settings(&config.negotiation))
}

fn borrowed(params: &[(String, String)]) -> Vec<(&str, &str)> {
    params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

fn print_payload(payload: &SdpPayload) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(payload)?);
    Ok(())
}

pub async fn cmd_poll(url: &str, params: &[(String, String)], config: &SurflineConfig) -> Result<()> {
    let params = borrowed(params);
    let found = exchange(config)
        .poll_sdp(url, Some(params.as_slice()))
        .await
        .with_context(|| format!("poll {url} failed"))?;
    match found {
        Some(payload) => print_payload(&payload),
        None => {
            println!("No SDP posted yet.");
            Ok(())
        }
    }
}

pub async fn cmd_wait(
    url: &str,
    params: &[(String, String)],
    deadline: Duration,
    config: &SurflineConfig,
) -> Result<()> {
    let params = borrowed(params);
    let interval = Duration::from_millis(config.negotiation.poll_interval_ms.max(1));
    let payload = exchange(config)
        .wait_for_sdp(url, Some(params.as_slice()), interval, deadline)
        .await
        .with_context(|| format!("waiting for SDP at {url} failed"))?;
    print_payload(&payload)
}

pub async fn cmd_post(
    url: &str,
    file: &str,
    params: &[(String, String)],
    config: &SurflineConfig,
) -> Result<()> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?;
    let payload: SdpPayload =
        serde_json::from_str(&raw).with_context(|| format!("{file} is not an SDP payload"))?;
    let params = borrowed(params);
    exchange(config)
        .post_sdp(url, &payload, Some(params.as_slice()))
        .await
        .with_context(|| format!("post to {url} failed"))?;
    println!(
        "Posted {:?} for handshake {} ({} → {}).",
        payload.sdp_type, payload.handshake_id, payload.from_peer, payload.to_peer
    );
    Ok(())
}
