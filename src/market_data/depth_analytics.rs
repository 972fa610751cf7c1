// =============================================================================
// Depth Analytics — 20-level ladder aggregation for the depth connection
// =============================================================================
//
// The vendor delivers bid and ask ladders on separate frames (up to 20 levels
// each). The manager keeps the latest ladders per security and derives a
// compact analytics record: total quantities, signed absorption strength, and
// the strongest (largest-quantity) level per side. The confluence strategy
// reads these to confirm that size is sitting in the direction of a breakout.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::DepthLevel;
use crate::types::Side;

/// Derived analytics for one security's 20-level book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthAnalytics {
    pub security_id: u32,
    pub total_bid_qty: u64,
    pub total_ask_qty: u64,
    /// bid/ask quantity ratio across the full ladder.
    pub imbalance: f64,
    /// Side with more resting size, if meaningfully lopsided.
    pub absorption_side: Option<Side>,
    /// Signed lopsidedness as a percentage of total book quantity
    /// ((bid - ask) / (bid + ask) * 100). Positive favours buyers.
    pub absorption_strength_pct: f64,
    /// Largest-quantity bid level.
    pub strongest_bid: Option<DepthLevel>,
    /// Largest-quantity ask level.
    pub strongest_ask: Option<DepthLevel>,
}

impl DepthAnalytics {
    fn from_ladders(security_id: u32, bids: &[DepthLevel], asks: &[DepthLevel]) -> Self {
        let total_bid_qty: u64 = bids.iter().map(|l| l.quantity as u64).sum();
        let total_ask_qty: u64 = asks.iter().map(|l| l.quantity as u64).sum();
        let total = total_bid_qty + total_ask_qty;

        let imbalance = if total_ask_qty == 0 {
            if total_bid_qty == 0 {
                1.0
            } else {
                super::depth_metrics::IMBALANCE_EMPTY_ASKS
            }
        } else {
            total_bid_qty as f64 / total_ask_qty as f64
        };

        let absorption_strength_pct = if total == 0 {
            0.0
        } else {
            (total_bid_qty as f64 - total_ask_qty as f64) / total as f64 * 100.0
        };
        let absorption_side = if absorption_strength_pct > 0.0 {
            Some(Side::Buy)
        } else if absorption_strength_pct < 0.0 {
            Some(Side::Sell)
        } else {
            None
        };

        let strongest_bid = bids.iter().max_by_key(|l| l.quantity).copied();
        let strongest_ask = asks.iter().max_by_key(|l| l.quantity).copied();

        Self {
            security_id,
            total_bid_qty,
            total_ask_qty,
            imbalance,
            absorption_side,
            absorption_strength_pct,
            strongest_bid,
            strongest_ask,
        }
    }

    /// True when the book absorbs in `side`'s favour with at least
    /// `min_strength_pct` lopsidedness.
    pub fn absorbs_toward(&self, side: Side, min_strength_pct: f64) -> bool {
        self.absorption_side == Some(side)
            && self.absorption_strength_pct.abs() >= min_strength_pct
    }
}

#[derive(Debug, Default, Clone)]
struct Ladders {
    bids: Vec<DepthLevel>,
    asks: Vec<DepthLevel>,
}

/// Keeps the latest 20-level ladders per security.
pub struct DepthBookManager {
    books: RwLock<HashMap<u32, Ladders>>,
}

impl DepthBookManager {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Replace one side of a book and return fresh analytics.
    ///
    /// Ladder ordering is enforced here (bids strictly descending, asks
    /// strictly ascending, quantities positive); out-of-order or empty levels
    /// are discarded rather than trusted.
    pub fn update_side(&self, security_id: u32, side: Side, levels: Vec<DepthLevel>) -> DepthAnalytics {
        let sanitized = sanitize_ladder(levels, side);
        let mut books = self.books.write();
        let book = books.entry(security_id).or_default();
        match side {
            Side::Buy => book.bids = sanitized,
            Side::Sell => book.asks = sanitized,
        }
        DepthAnalytics::from_ladders(security_id, &book.bids, &book.asks)
    }

    pub fn analytics(&self, security_id: u32) -> Option<DepthAnalytics> {
        self.books
            .read()
            .get(&security_id)
            .map(|b| DepthAnalytics::from_ladders(security_id, &b.bids, &b.asks))
    }
}

impl Default for DepthBookManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep the longest valid prefix: positive quantities, strictly monotone
/// prices (descending for bids, ascending for asks), at most 20 levels.
fn sanitize_ladder(levels: Vec<DepthLevel>, side: Side) -> Vec<DepthLevel> {
    let mut out: Vec<DepthLevel> = Vec::with_capacity(levels.len().min(20));
    for level in levels.into_iter().take(20) {
        if level.quantity == 0 || !level.price.is_finite() || level.price <= 0.0 {
            break;
        }
        if let Some(prev) = out.last() {
            let ok = match side {
                Side::Buy => level.price < prev.price,
                Side::Sell => level.price > prev.price,
            };
            if !ok {
                break;
            }
        }
        out.push(level);
    }
    out
}
