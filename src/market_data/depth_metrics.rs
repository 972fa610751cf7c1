// =============================================================================
// Depth Metrics — per-tick order-book derived values
// =============================================================================
//
// Pure math over the five-level ladders of a Full packet:
//
//   bid_ask_imbalance    sum(bidQty) / sum(askQty), sentinel 10.0 on empty asks
//   depth_spread         (bestAsk - bestBid) / ltp, fractional
//   order_book_strength  weighted bid qty minus weighted ask qty, weights 5..1
//   volume_delta         rolling delta of session buy/sell totals
//   liquidity_score      0..100, penalised by spread, thin depth, few orders
//
// The thresholds here are part of the contract: the strategy filters compare
// against them directly.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::DepthLevel;

/// Sentinel imbalance when the ask side is empty (extreme buy pressure).
pub const IMBALANCE_EMPTY_ASKS: f64 = 10.0;

/// Level weights for the order-book strength sum, best level first.
const STRENGTH_WEIGHTS: [f64; 5] = [5.0, 4.0, 3.0, 2.0, 1.0];

/// Number of (buy, sell) total samples retained per security.
const VOLUME_DELTA_WINDOW: usize = 5;

/// Depth-derived metrics attached to every enriched tick and averaged into
/// candles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DepthMetrics {
    pub bid_ask_imbalance: f64,
    pub depth_spread: f64,
    pub order_book_strength: f64,
    pub volume_delta: f64,
    pub liquidity_score: f64,
}

impl Default for DepthMetrics {
    fn default() -> Self {
        Self::neutral()
    }
}

impl DepthMetrics {
    /// Neutral metrics used when no depth is available (Ticker/Quote packets).
    pub fn neutral() -> Self {
        Self {
            bid_ask_imbalance: 1.0,
            depth_spread: 0.0,
            order_book_strength: 0.0,
            volume_delta: 0.0,
            liquidity_score: 0.0,
        }
    }
}

/// Compute the per-tick depth metrics from five-level ladders.
///
/// `volume_delta` is supplied by the caller (it is stateful, see
/// [`VolumeDeltaTracker`]). Missing sides yield sentinels instead of errors:
/// empty asks give imbalance 10.0, empty bids give 0.0.
pub fn compute(bids: &[DepthLevel], asks: &[DepthLevel], ltp: f64, volume_delta: f64) -> DepthMetrics {
    let sum_bid: u64 = bids.iter().map(|l| l.quantity as u64).sum();
    let sum_ask: u64 = asks.iter().map(|l| l.quantity as u64).sum();

    let bid_ask_imbalance = if sum_ask == 0 {
        if sum_bid == 0 {
            1.0
        } else {
            IMBALANCE_EMPTY_ASKS
        }
    } else if sum_bid == 0 {
        0.0
    } else {
        sum_bid as f64 / sum_ask as f64
    };

    let depth_spread = match (bids.first(), asks.first()) {
        (Some(bid), Some(ask)) if ltp > 0.0 => (ask.price - bid.price) / ltp,
        _ => 0.0,
    };

    let mut order_book_strength = 0.0;
    for (i, w) in STRENGTH_WEIGHTS.iter().enumerate() {
        let bid_qty = bids.get(i).map_or(0.0, |l| l.quantity as f64);
        let ask_qty = asks.get(i).map_or(0.0, |l| l.quantity as f64);
        order_book_strength += w * bid_qty - w * ask_qty;
    }

    let liquidity_score = liquidity_score(bids, asks, depth_spread, sum_bid + sum_ask);

    DepthMetrics {
        bid_ask_imbalance,
        depth_spread,
        order_book_strength,
        volume_delta,
        liquidity_score,
    }
}

/// Score liquidity in [0, 100]. Starts at 100 and deducts tiered penalties
/// for wide spreads, thin total depth, and sparse per-level order counts.
fn liquidity_score(bids: &[DepthLevel], asks: &[DepthLevel], spread: f64, total_qty: u64) -> f64 {
    let mut score = 100.0_f64;

    let spread_pct = spread * 100.0;
    if spread_pct > 0.15 {
        score -= 30.0;
    } else if spread_pct > 0.10 {
        score -= 20.0;
    } else if spread_pct > 0.05 {
        score -= 10.0;
    }

    if total_qty < 10_000 {
        score -= 25.0;
    } else if total_qty < 50_000 {
        score -= 10.0;
    }

    let level_count = bids.len() + asks.len();
    if level_count > 0 {
        let total_orders: u64 = bids
            .iter()
            .chain(asks.iter())
            .map(|l| l.orders as u64)
            .sum();
        let avg_orders = total_orders as f64 / level_count as f64;
        if avg_orders < 10.0 {
            score -= 15.0;
        } else if avg_orders < 20.0 {
            score -= 5.0;
        }
    }

    score.clamp(0.0, 100.0)
}

// =============================================================================
// Rolling volume delta
// =============================================================================

/// Tracks the last few `(totalBuyQty, totalSellQty)` samples per security and
/// derives the net flow delta between the newest and the oldest sample.
#[derive(Debug, Default)]
pub struct VolumeDeltaTracker {
    rings: HashMap<u32, VecDeque<(i64, i64)>>,
}

impl VolumeDeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new sample and return the current delta:
    /// `(newBuy - oldBuy) - (newSell - oldSell)`. Returns 0.0 until at least
    /// two samples exist for the security.
    pub fn update(&mut self, security_id: u32, total_buy: i64, total_sell: i64) -> f64 {
        let ring = self.rings.entry(security_id).or_default();
        ring.push_back((total_buy, total_sell));
        while ring.len() > VOLUME_DELTA_WINDOW {
            ring.pop_front();
        }
        if ring.len() < 2 {
            return 0.0;
        }
        let (old_buy, old_sell) = ring.front().copied().unwrap_or((0, 0));
        ((total_buy - old_buy) - (total_sell - old_sell)) as f64
    }
}
