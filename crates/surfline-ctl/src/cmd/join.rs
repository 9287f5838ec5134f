//! Join a signaling session and print who is there.

use anyhow::{bail, Context, Result};

use surfline_core::config::SurflineConfig;
use surfline_signal::signaling::{ConnectOptions, SignalingClient};

#[derive(Debug, Default)]
pub struct JoinArgs {
    pub peer_id: Option<String>,
    pub passphrase: Option<String>,
    pub label: Option<String>,
}

pub async fn cmd_join(url: Option<&str>, args: &JoinArgs, config: &SurflineConfig) -> Result<()> {
    let mut options = ConnectOptions::from_settings(&config.signaling);
    if let Some(url) = url {
        options.url = url.to_owned();
    }
    if options.url.is_empty() {
        bail!("no signaling url given and none configured (signaling.url)");
    }
    if let Some(peer_id) = &args.peer_id {
        options.peer_id = peer_id.clone();
    }
    options.passphrase = args.passphrase.clone();
    if args.label.is_some() {
        options.label = args.label.clone();
    }
    // One-shot command; no need to keep the connection alive.
    options.heartbeat = None;

    let url = options.url.clone();
    let client = SignalingClient::connect(options)
        .await
        .with_context(|| format!("failed to join {url}"))?;

    let join = client.join_info();
    println!("═══════════════════════════════════════");
    println!("  Session {}", join.session_id);
    println!("═══════════════════════════════════════");
    println!("  Peer id    : {}", join.peer_id);
    let transports: Vec<String> = join
        .available_transports
        .iter()
        .map(|t| format!("{t:?}"))
        .collect();
    println!("  Transports : {}", transports.join(", "));
    println!("  Peers      : {}", join.peers.len());
    for peer in client.peers() {
        println!("  {:<32}  {:?}  joined_at={}", peer.id, peer.role, peer.joined_at);
    }
    println!("═══════════════════════════════════════");

    client.close();
    Ok(())
}
