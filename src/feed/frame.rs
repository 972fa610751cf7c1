// =============================================================================
// Vendor Frame Codec — fixed-offset little-endian packet decoding
// =============================================================================
//
// Every frame starts with an 8-byte header:
//
//   offset 0  u8   feed code
//   offset 1  u16  message length (whole frame, header included)
//   offset 3  u8   exchange segment
//   offset 4  u32  security id
//
// Recognized feed codes: 2 Ticker, 4 Quote, 5 OI, 6 PrevClose, 8 Full
// (quote + five-level depth + OI), 41/51 twenty-level bid/ask ladders, and
// 50 server disconnection. Lengths are validated before any field read;
// malformed frames are counted and dropped, never panicked on.
// =============================================================================

use serde::Serialize;
use thiserror::Error;

use crate::market_data::DepthLevel;
use crate::types::SubscriptionEntry;

pub const HEADER_LEN: usize = 8;
pub const TICKER_LEN: usize = 16;
pub const QUOTE_LEN: usize = 50;
pub const OI_LEN: usize = 12;
pub const PREV_CLOSE_LEN: usize = 16;
pub const FULL_LEN: usize = 162;
pub const DISCONNECT_LEN: usize = 10;
const DEPTH_LEVEL_LEN: usize = 16;
const MAX_DEPTH_LEVELS: usize = 20;

/// Vendor instrument caps.
pub const INSTRUMENTS_PER_REQUEST: usize = 100;
pub const MAX_INSTRUMENTS: usize = 5_000;
pub const MAX_DEPTH_INSTRUMENTS: usize = 50;

// =============================================================================
// Errors
// =============================================================================

/// Server-initiated disconnection reasons (packet 50).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    MaxConnections,
    DataPlanInactive,
    TokenExpired,
    InvalidClientId,
    InvalidToken,
    DuplicateConnection,
    SubscriptionLimit,
    ClientTimeout,
    ServerMaintenance,
    Unknown(u16),
}

impl DisconnectReason {
    pub fn from_code(code: u16) -> Self {
        match code {
            805 => Self::MaxConnections,
            806 => Self::DataPlanInactive,
            807 => Self::TokenExpired,
            808 => Self::InvalidClientId,
            809 => Self::InvalidToken,
            810 => Self::DuplicateConnection,
            811 => Self::SubscriptionLimit,
            812 => Self::ClientTimeout,
            813 => Self::ServerMaintenance,
            other => Self::Unknown(other),
        }
    }

    /// Auth-class reasons are terminal: reconnecting with the same
    /// credentials cannot succeed (or would collide with a live session).
    pub fn is_auth_class(self) -> bool {
        matches!(
            self,
            Self::TokenExpired
                | Self::InvalidClientId
                | Self::InvalidToken
                | Self::DuplicateConnection
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxConnections => write!(f, "maximum connections exceeded"),
            Self::DataPlanInactive => write!(f, "market-data plan inactive"),
            Self::TokenExpired => write!(f, "access token expired"),
            Self::InvalidClientId => write!(f, "invalid client id"),
            Self::InvalidToken => write!(f, "invalid access token"),
            Self::DuplicateConnection => write!(f, "duplicate connection"),
            Self::SubscriptionLimit => write!(f, "subscription limit exceeded"),
            Self::ClientTimeout => write!(f, "client timed out"),
            Self::ServerMaintenance => write!(f, "server maintenance"),
            Self::Unknown(code) => write!(f, "unknown reason {code}"),
        }
    }
}

/// Errors surfaced by the feed client.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("server disconnected the session: {0}")]
    ServerDisconnect(DisconnectReason),

    #[error("feed unavailable after {attempts} reconnect attempts")]
    Unavailable { attempts: u32 },

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("subscription set exceeds the vendor limit of {limit}")]
    SubscriptionLimit { limit: usize },
}

impl FeedError {
    /// Fatal errors must not trigger reconnection.
    pub fn is_fatal_auth(&self) -> bool {
        matches!(self, Self::ServerDisconnect(reason) if reason.is_auth_class())
    }
}

// =============================================================================
// Packets
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub feed_code: u8,
    pub message_length: u16,
    pub segment_code: u8,
    pub security_id: u32,
}

/// The quote region shared by Quote and Full packets.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteData {
    pub ltp: f64,
    pub ltq: i32,
    /// Last trade time, epoch seconds as sent by the vendor.
    pub ltt_epoch_s: i64,
    pub atp: f64,
    pub volume: i64,
    pub total_sell_qty: i64,
    pub total_buy_qty: i64,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
}

#[derive(Debug, Clone)]
pub enum FeedPacket {
    Ticker {
        header: FrameHeader,
        ltp: f64,
        ltt_epoch_s: i64,
    },
    Quote {
        header: FrameHeader,
        quote: QuoteData,
    },
    OpenInterest {
        header: FrameHeader,
        oi: i64,
    },
    PrevClose {
        header: FrameHeader,
        prev_close: f64,
        prev_oi: i64,
    },
    Full {
        header: FrameHeader,
        quote: QuoteData,
        oi: i64,
        oi_high: i64,
        oi_low: i64,
        bids: Vec<DepthLevel>,
        asks: Vec<DepthLevel>,
    },
    DepthBids {
        header: FrameHeader,
        levels: Vec<DepthLevel>,
    },
    DepthAsks {
        header: FrameHeader,
        levels: Vec<DepthLevel>,
    },
    Disconnect {
        header: FrameHeader,
        reason: DisconnectReason,
    },
}

impl FeedPacket {
    pub fn header(&self) -> &FrameHeader {
        match self {
            Self::Ticker { header, .. }
            | Self::Quote { header, .. }
            | Self::OpenInterest { header, .. }
            | Self::PrevClose { header, .. }
            | Self::Full { header, .. }
            | Self::DepthBids { header, .. }
            | Self::DepthAsks { header, .. }
            | Self::Disconnect { header, .. } => header,
        }
    }
}

// =============================================================================
// Field readers (bounds-checked)
// =============================================================================

fn f32_at(buf: &[u8], off: usize) -> Option<f64> {
    let bytes: [u8; 4] = buf.get(off..off + 4)?.try_into().ok()?;
    Some(f32::from_le_bytes(bytes) as f64)
}

fn f64_at(buf: &[u8], off: usize) -> Option<f64> {
    let bytes: [u8; 8] = buf.get(off..off + 8)?.try_into().ok()?;
    Some(f64::from_le_bytes(bytes))
}

fn i16_at(buf: &[u8], off: usize) -> Option<i32> {
    let bytes: [u8; 2] = buf.get(off..off + 2)?.try_into().ok()?;
    Some(i16::from_le_bytes(bytes) as i32)
}

fn i32_at(buf: &[u8], off: usize) -> Option<i64> {
    let bytes: [u8; 4] = buf.get(off..off + 4)?.try_into().ok()?;
    Some(i32::from_le_bytes(bytes) as i64)
}

fn u16_at(buf: &[u8], off: usize) -> Option<u16> {
    let bytes: [u8; 2] = buf.get(off..off + 2)?.try_into().ok()?;
    Some(u16::from_le_bytes(bytes))
}

fn u32_at(buf: &[u8], off: usize) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(off..off + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

// =============================================================================
// Decoding
// =============================================================================

pub fn parse_header(buf: &[u8]) -> Result<FrameHeader, FeedError> {
    if buf.len() < HEADER_LEN {
        return Err(FeedError::Malformed("short header"));
    }
    Ok(FrameHeader {
        feed_code: buf[0],
        message_length: u16_at(buf, 1).ok_or(FeedError::Malformed("short header"))?,
        segment_code: buf[3],
        security_id: u32_at(buf, 4).ok_or(FeedError::Malformed("short header"))?,
    })
}

/// Decode one frame. `buf` must hold exactly the frame (header length
/// validated against the buffer before field reads).
pub fn parse_frame(buf: &[u8]) -> Result<FeedPacket, FeedError> {
    let header = parse_header(buf)?;
    let declared = header.message_length as usize;
    if declared < HEADER_LEN || declared > buf.len() {
        return Err(FeedError::Malformed("declared length out of bounds"));
    }
    let frame = &buf[..declared];

    match header.feed_code {
        2 => parse_ticker(header, frame),
        4 => parse_quote_packet(header, frame),
        5 => parse_oi(header, frame),
        6 => parse_prev_close(header, frame),
        8 => parse_full(header, frame),
        41 => parse_depth_ladder(frame).map(|levels| FeedPacket::DepthBids { header, levels }),
        50 => parse_disconnect(header, frame),
        51 => parse_depth_ladder(frame).map(|levels| FeedPacket::DepthAsks { header, levels }),
        _ => Err(FeedError::Malformed("unknown feed code")),
    }
}

/// Split a websocket binary message into frames. The vendor may pack several
/// frames back to back; a malformed region aborts the remainder of the
/// buffer. Returns the parsed packets and the number of dropped frames.
pub fn split_frames(buf: &[u8]) -> (Vec<FeedPacket>, usize) {
    let mut packets = Vec::new();
    let mut dropped = 0;
    let mut cursor = 0;

    while cursor + HEADER_LEN <= buf.len() {
        let remaining = &buf[cursor..];
        let Ok(header) = parse_header(remaining) else {
            dropped += 1;
            break;
        };
        let declared = header.message_length as usize;
        if declared < HEADER_LEN || cursor + declared > buf.len() {
            dropped += 1;
            break;
        }
        match parse_frame(&remaining[..declared]) {
            Ok(packet) => packets.push(packet),
            Err(_) => dropped += 1,
        }
        cursor += declared;
    }

    (packets, dropped)
}

fn parse_ticker(header: FrameHeader, buf: &[u8]) -> Result<FeedPacket, FeedError> {
    if buf.len() < TICKER_LEN {
        return Err(FeedError::Malformed("short ticker packet"));
    }
    Ok(FeedPacket::Ticker {
        header,
        ltp: f32_at(buf, 8).ok_or(FeedError::Malformed("ticker ltp"))?,
        ltt_epoch_s: i32_at(buf, 12).ok_or(FeedError::Malformed("ticker ltt"))?,
    })
}

fn parse_quote_region(buf: &[u8]) -> Option<QuoteData> {
    Some(QuoteData {
        ltp: f32_at(buf, 8)?,
        ltq: i16_at(buf, 12)?,
        ltt_epoch_s: i32_at(buf, 14)?,
        atp: f32_at(buf, 18)?,
        volume: i32_at(buf, 22)?,
        total_sell_qty: i32_at(buf, 26)?,
        total_buy_qty: i32_at(buf, 30)?,
        open: f32_at(buf, 34)?,
        close: f32_at(buf, 38)?,
        high: f32_at(buf, 42)?,
        low: f32_at(buf, 46)?,
    })
}

fn parse_quote_packet(header: FrameHeader, buf: &[u8]) -> Result<FeedPacket, FeedError> {
    if buf.len() < QUOTE_LEN {
        return Err(FeedError::Malformed("short quote packet"));
    }
    let quote =
        parse_quote_region(buf).ok_or(FeedError::Malformed("quote region"))?;
    Ok(FeedPacket::Quote { header, quote })
}

fn parse_oi(header: FrameHeader, buf: &[u8]) -> Result<FeedPacket, FeedError> {
    if buf.len() < OI_LEN {
        return Err(FeedError::Malformed("short oi packet"));
    }
    Ok(FeedPacket::OpenInterest {
        header,
        oi: i32_at(buf, 8).ok_or(FeedError::Malformed("oi"))?,
    })
}

fn parse_prev_close(header: FrameHeader, buf: &[u8]) -> Result<FeedPacket, FeedError> {
    if buf.len() < PREV_CLOSE_LEN {
        return Err(FeedError::Malformed("short prev-close packet"));
    }
    Ok(FeedPacket::PrevClose {
        header,
        prev_close: f32_at(buf, 8).ok_or(FeedError::Malformed("prev close"))?,
        prev_oi: i32_at(buf, 12).ok_or(FeedError::Malformed("prev oi"))?,
    })
}

/// Full packet: the quote region at fixed offsets 8..62, then five depth
/// levels of 20 bytes each.
fn parse_full(header: FrameHeader, buf: &[u8]) -> Result<FeedPacket, FeedError> {
    if buf.len() < FULL_LEN {
        return Err(FeedError::Malformed("short full packet"));
    }

    let quote = QuoteData {
        ltp: f32_at(buf, 8).ok_or(FeedError::Malformed("full ltp"))?,
        ltq: i16_at(buf, 12).ok_or(FeedError::Malformed("full ltq"))?,
        ltt_epoch_s: i32_at(buf, 14).ok_or(FeedError::Malformed("full ltt"))?,
        atp: f32_at(buf, 18).ok_or(FeedError::Malformed("full atp"))?,
        volume: i32_at(buf, 22).ok_or(FeedError::Malformed("full volume"))?,
        total_sell_qty: i32_at(buf, 26).ok_or(FeedError::Malformed("full sell qty"))?,
        total_buy_qty: i32_at(buf, 30).ok_or(FeedError::Malformed("full buy qty"))?,
        open: f32_at(buf, 46).ok_or(FeedError::Malformed("full open"))?,
        close: f32_at(buf, 50).ok_or(FeedError::Malformed("full close"))?,
        high: f32_at(buf, 54).ok_or(FeedError::Malformed("full high"))?,
        low: f32_at(buf, 58).ok_or(FeedError::Malformed("full low"))?,
    };
    let oi = i32_at(buf, 34).ok_or(FeedError::Malformed("full oi"))?;
    let oi_high = i32_at(buf, 38).ok_or(FeedError::Malformed("full oi high"))?;
    let oi_low = i32_at(buf, 42).ok_or(FeedError::Malformed("full oi low"))?;

    let mut bids = Vec::with_capacity(5);
    let mut asks = Vec::with_capacity(5);
    for level in 0..5 {
        let base = 62 + level * 20;
        let bid_qty = i32_at(buf, base).ok_or(FeedError::Malformed("depth bid qty"))?;
        let ask_qty = i32_at(buf, base + 4).ok_or(FeedError::Malformed("depth ask qty"))?;
        let bid_orders = i16_at(buf, base + 8).ok_or(FeedError::Malformed("depth bid orders"))?;
        let ask_orders = i16_at(buf, base + 10).ok_or(FeedError::Malformed("depth ask orders"))?;
        let bid_price = f32_at(buf, base + 12).ok_or(FeedError::Malformed("depth bid price"))?;
        let ask_price = f32_at(buf, base + 16).ok_or(FeedError::Malformed("depth ask price"))?;

        if bid_qty > 0 {
            bids.push(DepthLevel {
                price: bid_price,
                quantity: bid_qty as u32,
                orders: bid_orders.max(0) as u32,
            });
        }
        if ask_qty > 0 {
            asks.push(DepthLevel {
                price: ask_price,
                quantity: ask_qty as u32,
                orders: ask_orders.max(0) as u32,
            });
        }
    }

    Ok(FeedPacket::Full {
        header,
        quote,
        oi,
        oi_high,
        oi_low,
        bids,
        asks,
    })
}

/// 20-level ladder frames: each level is `price f64, quantity u32, orders
/// u32`. The level count comes from the declared length.
fn parse_depth_ladder(buf: &[u8]) -> Result<Vec<DepthLevel>, FeedError> {
    let payload = buf.len() - HEADER_LEN;
    if payload % DEPTH_LEVEL_LEN != 0 {
        return Err(FeedError::Malformed("ladder payload not level-aligned"));
    }
    let count = (payload / DEPTH_LEVEL_LEN).min(MAX_DEPTH_LEVELS);

    let mut levels = Vec::with_capacity(count);
    for i in 0..count {
        let base = HEADER_LEN + i * DEPTH_LEVEL_LEN;
        let price = f64_at(buf, base).ok_or(FeedError::Malformed("ladder price"))?;
        let quantity = u32_at(buf, base + 8).ok_or(FeedError::Malformed("ladder qty"))?;
        let orders = u32_at(buf, base + 12).ok_or(FeedError::Malformed("ladder orders"))?;
        if quantity == 0 {
            continue;
        }
        levels.push(DepthLevel {
            price,
            quantity,
            orders,
        });
    }
    Ok(levels)
}

fn parse_disconnect(header: FrameHeader, buf: &[u8]) -> Result<FeedPacket, FeedError> {
    if buf.len() < DISCONNECT_LEN {
        return Err(FeedError::Malformed("short disconnect packet"));
    }
    let code = u16_at(buf, 8).ok_or(FeedError::Malformed("disconnect code"))?;
    Ok(FeedPacket::Disconnect {
        header,
        reason: DisconnectReason::from_code(code),
    })
}

// =============================================================================
// Control messages (JSON, client -> vendor)
// =============================================================================

#[derive(Debug, Serialize)]
struct InstrumentRef {
    #[serde(rename = "ExchangeSegment")]
    exchange_segment: &'static str,
    #[serde(rename = "SecurityId")]
    security_id: String,
}

#[derive(Debug, Serialize)]
struct ControlMessage {
    #[serde(rename = "RequestCode")]
    request_code: u8,
    #[serde(rename = "InstrumentCount")]
    instrument_count: usize,
    #[serde(rename = "InstrumentList")]
    instrument_list: Vec<InstrumentRef>,
}

fn control_messages(
    request_code: u8,
    entries: &[SubscriptionEntry],
    per_request: usize,
) -> Vec<String> {
    entries
        .chunks(per_request)
        .map(|chunk| {
            let message = ControlMessage {
                request_code,
                instrument_count: chunk.len(),
                instrument_list: chunk
                    .iter()
                    .map(|e| InstrumentRef {
                        exchange_segment: e.segment.as_str(),
                        security_id: e.security_id.to_string(),
                    })
                    .collect(),
            };
            serde_json::to_string(&message).expect("control message serialises")
        })
        .collect()
}

/// Full-packet subscription (RequestCode 15), chunked at the vendor's
/// 100-instrument request cap. Errors when the set exceeds the overall cap.
pub fn subscribe_messages(entries: &[SubscriptionEntry]) -> Result<Vec<String>, FeedError> {
    if entries.len() > MAX_INSTRUMENTS {
        return Err(FeedError::SubscriptionLimit {
            limit: MAX_INSTRUMENTS,
        });
    }
    Ok(control_messages(15, entries, INSTRUMENTS_PER_REQUEST))
}

/// 20-level depth subscription (RequestCode 23), capped at 50 instruments.
pub fn depth_subscribe_messages(entries: &[SubscriptionEntry]) -> Result<Vec<String>, FeedError> {
    if entries.len() > MAX_DEPTH_INSTRUMENTS {
        return Err(FeedError::SubscriptionLimit {
            limit: MAX_DEPTH_INSTRUMENTS,
        });
    }
    Ok(control_messages(23, entries, MAX_DEPTH_INSTRUMENTS))
}

/// Unsubscribe (RequestCode 12), sent on clean shutdown.
pub fn unsubscribe_messages(entries: &[SubscriptionEntry]) -> Vec<String> {
    control_messages(12, entries, INSTRUMENTS_PER_REQUEST)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExchangeSegment;

    fn put_header(buf: &mut Vec<u8>, code: u8, len: u16, segment: u8, security_id: u32) {
        buf.push(code);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.push(segment);
        buf.extend_from_slice(&security_id.to_le_bytes());
    }

    fn ticker_frame(security_id: u32, ltp: f32, ltt: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        put_header(&mut buf, 2, TICKER_LEN as u16, 0, security_id);
        buf.extend_from_slice(&ltp.to_le_bytes());
        buf.extend_from_slice(&ltt.to_le_bytes());
        buf
    }

    fn full_frame(security_id: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        put_header(&mut buf, 8, FULL_LEN as u16, 0, security_id);
        buf.extend_from_slice(&25_000.5_f32.to_le_bytes()); // ltp
        buf.extend_from_slice(&50_i16.to_le_bytes()); // ltq
        buf.extend_from_slice(&1_700_000_000_i32.to_le_bytes()); // ltt
        buf.extend_from_slice(&24_990.0_f32.to_le_bytes()); // atp
        buf.extend_from_slice(&1_000_000_i32.to_le_bytes()); // volume
        buf.extend_from_slice(&600_000_i32.to_le_bytes()); // total sell
        buf.extend_from_slice(&900_000_i32.to_le_bytes()); // total buy
        buf.extend_from_slice(&12_345_i32.to_le_bytes()); // oi
        buf.extend_from_slice(&13_000_i32.to_le_bytes()); // oi high
        buf.extend_from_slice(&12_000_i32.to_le_bytes()); // oi low
        buf.extend_from_slice(&24_900.0_f32.to_le_bytes()); // open
        buf.extend_from_slice(&24_950.0_f32.to_le_bytes()); // close
        buf.extend_from_slice(&25_050.0_f32.to_le_bytes()); // high
        buf.extend_from_slice(&24_880.0_f32.to_le_bytes()); // low
        for level in 0..5u32 {
            buf.extend_from_slice(&(1_000 + level as i32).to_le_bytes()); // bid qty
            buf.extend_from_slice(&(900 + level as i32).to_le_bytes()); // ask qty
            buf.extend_from_slice(&25_i16.to_le_bytes()); // bid orders
            buf.extend_from_slice(&20_i16.to_le_bytes()); // ask orders
            buf.extend_from_slice(&(25_000.0 - level as f32 * 0.5).to_le_bytes()); // bid px
            buf.extend_from_slice(&(25_000.5 + level as f32 * 0.5).to_le_bytes()); // ask px
        }
        assert_eq!(buf.len(), FULL_LEN);
        buf
    }

    #[test]
    fn header_roundtrip() {
        let frame = ticker_frame(13, 25_000.0, 1_700_000_000);
        let header = parse_header(&frame).unwrap();
        assert_eq!(header.feed_code, 2);
        assert_eq!(header.message_length as usize, TICKER_LEN);
        assert_eq!(header.segment_code, 0);
        assert_eq!(header.security_id, 13);
    }

    #[test]
    fn ticker_parses() {
        let frame = ticker_frame(13, 25_000.25, 1_700_000_000);
        match parse_frame(&frame).unwrap() {
            FeedPacket::Ticker {
                ltp, ltt_epoch_s, ..
            } => {
                assert!((ltp - 25_000.25).abs() < 0.01);
                assert_eq!(ltt_epoch_s, 1_700_000_000);
            }
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[test]
    fn full_packet_parses_all_offsets() {
        let frame = full_frame(13);
        match parse_frame(&frame).unwrap() {
            FeedPacket::Full {
                header,
                quote,
                oi,
                bids,
                asks,
                ..
            } => {
                assert_eq!(header.security_id, 13);
                assert!((quote.ltp - 25_000.5).abs() < 0.01);
                assert_eq!(quote.ltq, 50);
                assert_eq!(quote.ltt_epoch_s, 1_700_000_000);
                assert_eq!(quote.volume, 1_000_000);
                assert_eq!(quote.total_sell_qty, 600_000);
                assert_eq!(quote.total_buy_qty, 900_000);
                assert!((quote.open - 24_900.0).abs() < 0.01);
                assert!((quote.low - 24_880.0).abs() < 0.01);
                assert_eq!(oi, 12_345);
                assert_eq!(bids.len(), 5);
                assert_eq!(asks.len(), 5);
                assert_eq!(bids[0].quantity, 1_000);
                assert_eq!(bids[0].orders, 25);
                assert!((bids[0].price - 25_000.0).abs() < 0.01);
                assert!((asks[4].price - 25_002.5).abs() < 0.01);
            }
            other => panic!("expected full, got {other:?}"),
        }
    }

    #[test]
    fn truncated_full_packet_is_malformed_not_panic() {
        let frame = full_frame(13);
        for cut in [0, 7, 8, 61, 100, FULL_LEN - 1] {
            let err = parse_frame(&frame[..cut]);
            assert!(err.is_err(), "cut at {cut} should fail");
        }
    }

    #[test]
    fn declared_length_beyond_buffer_is_malformed() {
        let mut frame = ticker_frame(13, 1.0, 1);
        frame[1..3].copy_from_slice(&500u16.to_le_bytes());
        assert!(parse_frame(&frame).is_err());
    }

    #[test]
    fn unknown_feed_code_is_malformed() {
        let mut frame = ticker_frame(13, 1.0, 1);
        frame[0] = 99;
        assert!(parse_frame(&frame).is_err());
    }

    #[test]
    fn disconnect_reason_decoding() {
        let mut buf = Vec::new();
        put_header(&mut buf, 50, DISCONNECT_LEN as u16, 0, 13);
        buf.extend_from_slice(&807u16.to_le_bytes());
        match parse_frame(&buf).unwrap() {
            FeedPacket::Disconnect { reason, .. } => {
                assert_eq!(reason, DisconnectReason::TokenExpired);
                assert!(reason.is_auth_class());
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[test]
    fn auth_class_partition() {
        assert!(DisconnectReason::InvalidToken.is_auth_class());
        assert!(DisconnectReason::DuplicateConnection.is_auth_class());
        assert!(!DisconnectReason::ServerMaintenance.is_auth_class());
        assert!(!DisconnectReason::ClientTimeout.is_auth_class());
        assert_eq!(DisconnectReason::from_code(999), DisconnectReason::Unknown(999));
    }

    #[test]
    fn depth_ladder_parses_twenty_levels() {
        let levels = 20usize;
        let len = HEADER_LEN + levels * DEPTH_LEVEL_LEN;
        let mut buf = Vec::new();
        put_header(&mut buf, 41, len as u16, 0, 13);
        for i in 0..levels {
            buf.extend_from_slice(&(25_000.0 - i as f64 * 0.05).to_le_bytes());
            buf.extend_from_slice(&(100 + i as u32).to_le_bytes());
            buf.extend_from_slice(&5u32.to_le_bytes());
        }
        match parse_frame(&buf).unwrap() {
            FeedPacket::DepthBids { levels, .. } => {
                assert_eq!(levels.len(), 20);
                assert_eq!(levels[0].quantity, 100);
                assert!((levels[19].price - (25_000.0 - 19.0 * 0.05)).abs() < 1e-9);
            }
            other => panic!("expected bids, got {other:?}"),
        }
    }

    #[test]
    fn misaligned_ladder_is_malformed() {
        let mut buf = Vec::new();
        put_header(&mut buf, 51, (HEADER_LEN + 10) as u16, 0, 13);
        buf.extend_from_slice(&[0u8; 10]);
        assert!(parse_frame(&buf).is_err());
    }

    #[test]
    fn split_handles_concatenated_frames() {
        let mut buf = ticker_frame(13, 100.0, 1);
        buf.extend_from_slice(&ticker_frame(14, 200.0, 2));
        let (packets, dropped) = split_frames(&buf);
        assert_eq!(packets.len(), 2);
        assert_eq!(dropped, 0);
        assert_eq!(packets[1].header().security_id, 14);
    }

    #[test]
    fn split_counts_trailing_garbage() {
        let mut buf = ticker_frame(13, 100.0, 1);
        buf.extend_from_slice(&[1, 2, 3]); // not even a header
        let (packets, dropped) = split_frames(&buf);
        assert_eq!(packets.len(), 1);
        // The trailing bytes cannot form a frame; the loop simply stops.
        assert_eq!(dropped, 0);
    }

    #[test]
    fn subscribe_message_shape() {
        let entries = vec![SubscriptionEntry {
            segment: ExchangeSegment::Index,
            security_id: 13,
        }];
        let messages = subscribe_messages(&entries).unwrap();
        assert_eq!(messages.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(value["RequestCode"], 15);
        assert_eq!(value["InstrumentCount"], 1);
        assert_eq!(value["InstrumentList"][0]["ExchangeSegment"], "IDX_I");
        assert_eq!(value["InstrumentList"][0]["SecurityId"], "13");
    }

    #[test]
    fn subscribe_chunks_at_one_hundred() {
        let entries: Vec<SubscriptionEntry> = (0..250)
            .map(|i| SubscriptionEntry {
                segment: ExchangeSegment::NseEquity,
                security_id: i,
            })
            .collect();
        let messages = subscribe_messages(&entries).unwrap();
        assert_eq!(messages.len(), 3);
        let first: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(first["InstrumentCount"], 100);
        let last: serde_json::Value = serde_json::from_str(&messages[2]).unwrap();
        assert_eq!(last["InstrumentCount"], 50);
    }

    #[test]
    fn depth_subscription_cap() {
        let entries: Vec<SubscriptionEntry> = (0..51)
            .map(|i| SubscriptionEntry {
                segment: ExchangeSegment::NseEquity,
                security_id: i,
            })
            .collect();
        assert!(depth_subscribe_messages(&entries).is_err());
        assert!(depth_subscribe_messages(&entries[..50]).is_ok());
    }

    #[test]
    fn unsubscribe_uses_code_twelve() {
        let entries = vec![SubscriptionEntry {
            segment: ExchangeSegment::Index,
            security_id: 13,
        }];
        let messages = unsubscribe_messages(&entries);
        let value: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(value["RequestCode"], 12);
    }
}
