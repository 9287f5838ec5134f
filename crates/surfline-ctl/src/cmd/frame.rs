//! Frame inspection and chunk planning.

use anyhow::{Context, Result};

use surfline_core::config::SurflineConfig;
use surfline_core::crc32c::crc32c;
use surfline_core::envelope::{decode_envelope, Payload, ENVELOPE_HEADER_LEN};
use surfline_core::frame::parse_frame;
use surfline_transport::encoder::plan_chunks;
use surfline_transport::transport::{DEFAULT_KIND, DEFAULT_NAMESPACE};

pub fn cmd_inspect(hex_frame: &str, config: &SurflineConfig) -> Result<()> {
    let cleaned: String = hex_frame.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&cleaned).context("frame must be hex encoded")?;
    let frame = parse_frame(&bytes, &config.framing_config()).context("failed to parse frame")?;

    println!("═══════════════════════════════════════");
    println!("  Frame");
    println!("═══════════════════════════════════════");
    println!("  Namespace   : {}", frame.namespace);
    println!("  Kind        : {}", frame.kind);
    println!("  Sequence    : {}", frame.seq);
    println!("  Chunk       : {}/{}", frame.chunk_index + 1, frame.chunk_count);
    println!("  Total len   : {} bytes", frame.total_len);
    println!("  Payload     : {} bytes", frame.payload.len());
    println!("  CRC-32C     : {:08x}", frame.crc32c);

    if !frame.is_single_chunk() {
        println!("═══════════════════════════════════════");
        return Ok(());
    }

    let actual = crc32c(&frame.payload);
    if actual == frame.crc32c {
        println!("  Checksum    : ok");
    } else {
        println!("  Checksum    : MISMATCH (payload {actual:08x})");
    }
    match decode_envelope(&frame.payload) {
        Ok(envelope) => {
            println!("───────────────────────────────────────");
            println!("  Envelope seq : {}", envelope.seq);
            match &envelope.payload {
                Payload::Text(text) => println!("  Text         : {text:?}"),
                Payload::Binary(data) => println!("  Binary       : {} bytes", data.len()),
            }
        }
        Err(e) => println!("  Envelope    : not decodable ({e})"),
    }
    println!("═══════════════════════════════════════");
    Ok(())
}

pub fn cmd_plan(len: &str, config: &SurflineConfig) -> Result<()> {
    let len: usize = len.parse().context("size must be a byte count")?;
    let framing = config.framing_config();
    // Transports frame the envelope, not the raw payload.
    let framed_len = len
        .checked_add(ENVELOPE_HEADER_LEN)
        .context("size is too large to frame")?;
    let plan = plan_chunks(DEFAULT_NAMESPACE, DEFAULT_KIND, framed_len, &framing)
        .with_context(|| format!("{len} bytes cannot be framed under the current limits"))?;

    println!("  Payload      : {len} bytes ({framed_len} with envelope)");
    println!("  Chunk size   : {} bytes", framing.chunk_size);
    println!("  Frames       : {}", plan.chunk_count);
    println!("  Overhead     : {} bytes/frame", plan.frame_overhead);
    println!("  On the wire  : {} bytes", plan.wire_bytes);
    Ok(())
}
