//! surfline-ctl — inspect frames and exercise the transport and rendezvous
//! protocols from the command line.

use anyhow::{Context, Result};
use std::time::Duration;

use surfline_core::config::SurflineConfig;

mod cmd;

use cmd::join::JoinArgs;

fn print_usage() {
    println!("surfline-ctl — framing and rendezvous tool");
    println!();
    println!("USAGE:");
    println!("  surfline-ctl [options] <command>");
    println!();
    println!("COMMANDS:");
    println!("  inspect <hex>              Parse one frame and print its header");
    println!("  plan <bytes>               Show how a message of this size is framed");
    println!("  loopback <text>            Send text through an in-memory transport pair");
    println!("  join [url]                 Join a signaling session and list peers");
    println!("  sdp poll <url>             Fetch the SDP posted at <url>");
    println!("  sdp wait <url>             Poll until an SDP is posted at <url>");
    println!("  sdp post <url> <file>      Publish the SDP payload in <file> (JSON)");
    println!("  config                     Print the config path, writing defaults if missing");
    println!();
    println!("OPTIONS:");
    println!("  --peer <id>                Peer id to join as (default: random)");
    println!("  --passphrase <p>           Session passphrase");
    println!("  --label <label>            Label announced on join");
    println!("  --param <key=value>        Extra query parameter for sdp commands (repeatable)");
    println!("  --timeout <secs>           Deadline for sdp wait (default: 30)");
    println!();
    println!("Log verbosity follows RUST_LOG.");
}

fn cmd_config() -> Result<()> {
    let path = SurflineConfig::write_default_if_missing().context("failed to write default config")?;
    println!("{}", path.display());
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = SurflineConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        SurflineConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut join = JoinArgs::default();
    let mut params: Vec<(String, String)> = Vec::new();
    let mut deadline = Duration::from_secs(30);
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--peer" => {
                i += 1;
                join.peer_id = Some(args.get(i).context("--peer requires a value")?.clone());
            }
            "--passphrase" => {
                i += 1;
                join.passphrase =
                    Some(args.get(i).context("--passphrase requires a value")?.clone());
            }
            "--label" => {
                i += 1;
                join.label = Some(args.get(i).context("--label requires a value")?.clone());
            }
            "--param" => {
                i += 1;
                let raw = args.get(i).context("--param requires key=value")?;
                let (key, value) = raw
                    .split_once('=')
                    .context("--param must look like key=value")?;
                params.push((key.to_owned(), value.to_owned()));
            }
            "--timeout" => {
                i += 1;
                let secs: u64 = args
                    .get(i)
                    .context("--timeout requires a value")?
                    .parse()
                    .context("--timeout must be a number of seconds")?;
                deadline = Duration::from_secs(secs);
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["inspect", hex] => cmd::frame::cmd_inspect(hex, &config),
        ["plan", bytes] => cmd::frame::cmd_plan(bytes, &config),
        ["loopback", text @ ..] if !text.is_empty() => {
            cmd::loopback::cmd_loopback(&text.join(" "), &config).await
        }
        ["join"] => cmd::join::cmd_join(None, &join, &config).await,
        ["join", url] => cmd::join::cmd_join(Some(*url), &join, &config).await,
        ["sdp", "poll", url] => cmd::sdp::cmd_poll(url, &params, &config).await,
        ["sdp", "wait", url] => cmd::sdp::cmd_wait(url, &params, deadline, &config).await,
        ["sdp", "post", url, file] => cmd::sdp::cmd_post(url, file, &params, &config).await,
        ["config"] => cmd_config(),
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
