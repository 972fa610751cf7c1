// =============================================================================
// Feed Replay — drive the pipeline from a captured packet dump
// =============================================================================
//
// A dump is the raw wire frames, concatenated in arrival order. Replay
// parses them with the live codec and hands each packet to the caller,
// which makes backtests byte-identical with live parsing. Time comes from
// the packets themselves (LTT), so a replayed session is deterministic.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::frame::{self, FeedPacket};

/// Load a capture file and split it into packets. Malformed trailing data is
/// reported, not fatal.
pub fn read_dump(path: impl AsRef<Path>) -> Result<Vec<FeedPacket>> {
    let path = path.as_ref();
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read feed dump {}", path.display()))?;

    let (packets, dropped) = frame::split_frames(&data);
    if dropped > 0 {
        warn!(dropped, path = %path.display(), "dump contained malformed frames");
    }
    info!(
        packets = packets.len(),
        bytes = data.len(),
        path = %path.display(),
        "feed dump loaded"
    );
    Ok(packets)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ticker_frame(security_id: u32, ltp: f32, ltt: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(2u8);
        buf.extend_from_slice(&(frame::TICKER_LEN as u16).to_le_bytes());
        buf.push(0u8);
        buf.extend_from_slice(&security_id.to_le_bytes());
        buf.extend_from_slice(&ltp.to_le_bytes());
        buf.extend_from_slice(&ltt.to_le_bytes());
        buf
    }

    #[test]
    fn dump_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..3 {
            file.write_all(&ticker_frame(13, 100.0 + i as f32, 1_700_000_000 + i))
                .unwrap();
        }
        file.flush().unwrap();

        let packets = read_dump(file.path()).unwrap();
        assert_eq!(packets.len(), 3);
        match &packets[2] {
            FeedPacket::Ticker { ltp, .. } => assert!((ltp - 102.0).abs() < 0.01),
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[test]
    fn missing_dump_errors() {
        assert!(read_dump("/nonexistent/capture.bin").is_err());
    }
}
