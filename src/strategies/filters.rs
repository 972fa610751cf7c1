// =============================================================================
// Shared entry contract — session window, depth filters, position sizing
// =============================================================================
//
// Every strategy runs this gate before emitting a signal. A block returns the
// reason so the strategies can log why an otherwise valid setup was skipped.
//
// Depth thresholds (part of the depth-metrics contract):
//   BUY   imbalance >= 1.3 and order-book strength > 0
//   SELL  imbalance <= 0.77 and order-book strength < 0
//   any   liquidity score >= 60
// =============================================================================

use chrono::{DateTime, FixedOffset, NaiveTime, Timelike};
use tracing::debug;

use crate::config::EngineConfig;
use crate::market_data::DepthMetrics;
use crate::types::Side;

/// Intraday entries are only taken between these exchange-local times.
pub const INTRADAY_START: (u32, u32) = (9, 30);
pub const INTRADAY_END: (u32, u32) = (15, 15);

const MIN_BUY_IMBALANCE: f64 = 1.3;
const MAX_SELL_IMBALANCE: f64 = 0.77;
const MIN_LIQUIDITY_SCORE: f64 = 60.0;

/// True when `now` falls inside the shared intraday entry window.
pub fn within_intraday_window(now: &DateTime<FixedOffset>) -> bool {
    let t = NaiveTime::from_hms_opt(now.hour(), now.minute(), now.second())
        .unwrap_or(NaiveTime::MIN);
    let start = NaiveTime::from_hms_opt(INTRADAY_START.0, INTRADAY_START.1, 0).unwrap();
    let end = NaiveTime::from_hms_opt(INTRADAY_END.0, INTRADAY_END.1, 0).unwrap();
    t >= start && t <= end
}

/// The full shared gate. Returns the block reason, or `None` when the entry
/// may proceed.
pub fn entry_gate(
    strategy: &str,
    side: Side,
    metrics: &DepthMetrics,
    intraday: bool,
    now_local: &DateTime<FixedOffset>,
    trades_today: u32,
    max_trades_per_day: Option<u32>,
) -> Option<String> {
    if intraday && !within_intraday_window(now_local) {
        return blocked(strategy, format!("outside entry window at {}", now_local.time()));
    }

    if let Some(cap) = max_trades_per_day {
        if trades_today >= cap {
            return blocked(strategy, format!("daily trade cap reached ({cap})"));
        }
    }

    if let Some(reason) = depth_filter(side, metrics) {
        return blocked(strategy, reason);
    }

    None
}

/// Depth-only portion of the gate.
pub fn depth_filter(side: Side, metrics: &DepthMetrics) -> Option<String> {
    match side {
        Side::Buy => {
            if metrics.bid_ask_imbalance < MIN_BUY_IMBALANCE {
                return Some(format!(
                    "imbalance {:.2} below buy threshold {MIN_BUY_IMBALANCE}",
                    metrics.bid_ask_imbalance
                ));
            }
            if metrics.order_book_strength <= 0.0 {
                return Some(format!(
                    "order-book strength {:.0} not positive",
                    metrics.order_book_strength
                ));
            }
        }
        Side::Sell => {
            if metrics.bid_ask_imbalance > MAX_SELL_IMBALANCE {
                return Some(format!(
                    "imbalance {:.2} above sell threshold {MAX_SELL_IMBALANCE}",
                    metrics.bid_ask_imbalance
                ));
            }
            if metrics.order_book_strength >= 0.0 {
                return Some(format!(
                    "order-book strength {:.0} not negative",
                    metrics.order_book_strength
                ));
            }
        }
    }
    if metrics.liquidity_score < MIN_LIQUIDITY_SCORE {
        return Some(format!(
            "liquidity score {:.0} below {MIN_LIQUIDITY_SCORE}",
            metrics.liquidity_score
        ));
    }
    None
}

fn blocked(strategy: &str, reason: String) -> Option<String> {
    debug!(strategy, reason = %reason, "entry blocked");
    Some(reason)
}

/// Risk-based position size, rounded down to whole lots with a one-lot floor.
///
/// The risk budget is `total_capital * risk_pct` of capital; the per-unit
/// risk term scales the entry price by the stop-loss percentage in whole
/// percent points. At index price levels the one-lot floor dominates.
pub fn position_size(config: &EngineConfig, entry_price: f64) -> u32 {
    let lot = config.lot_size.max(1);
    if entry_price <= 0.0 {
        return lot;
    }
    let risk_amount = config.total_capital * config.risk_pct / 100.0;
    let per_unit_risk = entry_price * config.stop_loss_pct;
    let raw_qty = if per_unit_risk > 0.0 {
        risk_amount / per_unit_risk
    } else {
        0.0
    };
    let lots = (raw_qty / lot as f64).floor() as u32;
    lots.max(1) * lot
}

/// Default stop/target at the configured percentages (1 % / 3 %), adverse and
/// favourable to `side` respectively.
pub fn default_levels(config: &EngineConfig, side: Side, entry_price: f64) -> (f64, f64) {
    let sl_frac = config.stop_loss_pct / 100.0;
    let tp_frac = config.target_pct / 100.0;
    match side {
        Side::Buy => (
            round2(entry_price * (1.0 - sl_frac)),
            round2(entry_price * (1.0 + tp_frac)),
        ),
        Side::Sell => (
            round2(entry_price * (1.0 + sl_frac)),
            round2(entry_price * (1.0 - tp_frac)),
        ),
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        ist().with_ymd_and_hms(2024, 1, 2, h, m, 0).unwrap()
    }

    fn good_buy_metrics() -> DepthMetrics {
        DepthMetrics {
            bid_ask_imbalance: 1.4,
            depth_spread: 0.0004,
            order_book_strength: 2_000.0,
            volume_delta: 0.0,
            liquidity_score: 80.0,
        }
    }

    #[test]
    fn window_bounds() {
        assert!(!within_intraday_window(&at(9, 29)));
        assert!(within_intraday_window(&at(9, 30)));
        assert!(within_intraday_window(&at(12, 0)));
        assert!(within_intraday_window(&at(15, 15)));
        assert!(!within_intraday_window(&at(15, 16)));
    }

    #[test]
    fn gate_passes_clean_buy() {
        let verdict = entry_gate(
            "test",
            Side::Buy,
            &good_buy_metrics(),
            true,
            &at(10, 0),
            0,
            Some(3),
        );
        assert!(verdict.is_none());
    }

    #[test]
    fn gate_blocks_outside_window_for_intraday_only() {
        let m = good_buy_metrics();
        assert!(entry_gate("t", Side::Buy, &m, true, &at(9, 0), 0, None).is_some());
        // Swing strategies are unrestricted.
        assert!(entry_gate("t", Side::Buy, &m, false, &at(9, 0), 0, None).is_none());
    }

    #[test]
    fn gate_blocks_at_daily_cap() {
        let m = good_buy_metrics();
        assert!(entry_gate("t", Side::Buy, &m, true, &at(10, 0), 3, Some(3)).is_some());
        assert!(entry_gate("t", Side::Buy, &m, true, &at(10, 0), 2, Some(3)).is_none());
    }

    #[test]
    fn buy_depth_thresholds() {
        let mut m = good_buy_metrics();
        m.bid_ask_imbalance = 1.2;
        assert!(depth_filter(Side::Buy, &m).is_some());

        let mut m = good_buy_metrics();
        m.order_book_strength = -1.0;
        assert!(depth_filter(Side::Buy, &m).is_some());

        let mut m = good_buy_metrics();
        m.liquidity_score = 59.0;
        assert!(depth_filter(Side::Buy, &m).is_some());
    }

    #[test]
    fn sell_depth_thresholds() {
        let m = DepthMetrics {
            bid_ask_imbalance: 0.6,
            depth_spread: 0.0004,
            order_book_strength: -1_500.0,
            volume_delta: 0.0,
            liquidity_score: 75.0,
        };
        assert!(depth_filter(Side::Sell, &m).is_none());

        let mut wrong = m;
        wrong.bid_ask_imbalance = 0.9;
        assert!(depth_filter(Side::Sell, &wrong).is_some());

        let mut wrong = m;
        wrong.order_book_strength = 10.0;
        assert!(depth_filter(Side::Sell, &wrong).is_some());
    }

    #[test]
    fn sizing_pins_index_levels_to_one_lot() {
        let config = EngineConfig::default();
        assert_eq!(position_size(&config, 110.0), 75);
        assert_eq!(position_size(&config, 25_060.0), 75);
        assert_eq!(position_size(&config, 20_000.0), 75);
    }

    #[test]
    fn sizing_scales_in_whole_lots_for_tiny_prices() {
        let config = EngineConfig::default();
        // risk 200 / (price * 1.0) >= 2 lots only for very low prices.
        assert_eq!(position_size(&config, 1.0), 150);
    }

    #[test]
    fn default_levels_match_contract() {
        let config = EngineConfig::default();
        let (sl, tp) = default_levels(&config, Side::Buy, 110.0);
        assert_eq!(sl, 108.9);
        assert_eq!(tp, 113.3);

        let (sl, tp) = default_levels(&config, Side::Sell, 20_000.0);
        assert_eq!(sl, 20_200.0);
        assert_eq!(tp, 19_400.0);
    }
}
