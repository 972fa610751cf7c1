// =============================================================================
// Market Data — ticks, depth, candles
// =============================================================================

pub mod aggregator;
pub mod candle;
pub mod candle_store;
pub mod depth_analytics;
pub mod depth_metrics;

pub use aggregator::CandleAggregator;
pub use candle::{Candle, CandleKey, Interval};
pub use candle_store::CandleStore;
pub use depth_analytics::{DepthAnalytics, DepthBookManager};
pub use depth_metrics::{DepthMetrics, VolumeDeltaTracker};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ExchangeSegment;

/// One price level of the order book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: u32,
    pub orders: u32,
}

/// Bid/ask ladders attached to a tick (five levels from Full packets) or to a
/// dedicated 20-level depth stream. Bids are price-descending, asks
/// price-ascending; levels with zero quantity are not kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketDepth {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

/// A fully enriched tick: the vendor quote plus derived depth metrics.
///
/// Built from Full packets; Quote packets produce one with empty depth and
/// Ticker packets a price-only form with zeroed totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedTick {
    pub security_id: u32,
    pub segment: ExchangeSegment,
    /// Last traded price.
    pub ltp: f64,
    /// Last traded quantity.
    pub ltq: i32,
    /// Last trade time, epoch ms (vendor sends epoch seconds).
    pub ltt: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Average traded price for the session.
    pub atp: f64,
    /// Cumulative session volume.
    pub volume: i64,
    pub total_buy_qty: i64,
    pub total_sell_qty: i64,
    pub oi: i64,
    pub depth: MarketDepth,
    pub metrics: DepthMetrics,
    /// Previous session close, filled once a PrevClose packet is seen.
    pub prev_close: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl EnrichedTick {
    /// Timestamp used for bar aggregation: the exchange trade time when
    /// present, else the capture time. Keeps replay runs deterministic.
    pub fn event_time_ms(&self) -> i64 {
        if self.ltt > 0 {
            self.ltt
        } else {
            self.captured_at.timestamp_millis()
        }
    }
}
