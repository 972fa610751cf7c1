// =============================================================================
// Feed — vendor binary protocol, transport, and capture replay
// =============================================================================

pub mod client;
pub mod frame;
pub mod replay;

pub use client::{FeedClient, FeedMode, FeedState, FeedStatus};
pub use frame::{DisconnectReason, FeedError, FeedPacket, FrameHeader, QuoteData};
