// =============================================================================
// Opening-Range Breakout — 1m intraday
// =============================================================================
//
// Phase 1 (09:15-09:30): sweep the high/low of every 1m bar; the range
// freezes at 09:30.
//
// Phase 2 (09:30-14:00): a close above the range high is a BUY with the
// range low as stop and `close + 2 * range height` as target; a close below
// the range low is the mirror SELL. Entries additionally need a 2x volume
// push against the trailing twenty 1m bars and an order-book strength of at
// least 1000 in the breakout direction.
//
// One bullish and one bearish entry per session (sticky flags), two trades
// per day overall.
// =============================================================================

use std::collections::HashMap;

use chrono::{NaiveTime, Timelike};
use tracing::{debug, info};

use super::filters;
use super::{build_signal, Signal, Strategy, StrategyContext};
use crate::market_data::{Candle, CandleKey, DepthMetrics, Interval};
use crate::types::Side;

const VOLUME_LOOKBACK: usize = 20;
const VOLUME_FACTOR: f64 = 2.0;
const MIN_STRENGTH: f64 = 1_000.0;
const MAX_TRADES_PER_DAY: u32 = 2;
const TARGET_RANGE_MULTIPLE: f64 = 2.0;

/// Opening-range window and the breakout cut-off, exchange-local.
const RANGE_START: (u32, u32) = (9, 15);
const RANGE_END: (u32, u32) = (9, 30);
const ENTRY_CUTOFF: (u32, u32) = (14, 0);

#[derive(Debug, Default, Clone)]
struct OrbState {
    high: Option<f64>,
    low: Option<f64>,
    traded_bullish: bool,
    traded_bearish: bool,
}

impl OrbState {
    fn height(&self) -> Option<f64> {
        match (self.high, self.low) {
            (Some(h), Some(l)) if h > l => Some(h - l),
            _ => None,
        }
    }
}

pub struct OpeningRangeBreakout {
    state: HashMap<u32, OrbState>,
}

impl OpeningRangeBreakout {
    pub fn new() -> Self {
        Self {
            state: HashMap::new(),
        }
    }
}

impl Default for OpeningRangeBreakout {
    fn default() -> Self {
        Self::new()
    }
}

fn hm(t: (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(t.0, t.1, 0).expect("static time")
}

impl Strategy for OpeningRangeBreakout {
    fn name(&self) -> &'static str {
        "opening-range-breakout"
    }

    fn timeframe(&self) -> Interval {
        Interval::M1
    }

    fn max_trades_per_day(&self) -> Option<u32> {
        Some(MAX_TRADES_PER_DAY)
    }

    fn on_candle(
        &mut self,
        candle: &Candle,
        metrics: &DepthMetrics,
        ctx: &StrategyContext<'_>,
    ) -> Option<Signal> {
        let name = self.name();
        let timeframe = self.timeframe();
        let intraday = self.is_intraday();
        let daily_cap = self.max_trades_per_day();

        let close_time = NaiveTime::from_hms_opt(
            ctx.now_local.hour(),
            ctx.now_local.minute(),
            ctx.now_local.second(),
        )
        .unwrap_or(NaiveTime::MIN);

        let state = self.state.entry(candle.security_id).or_default();

        // Phase 1: bars closing inside (09:15, 09:30] sweep the range.
        if close_time > hm(RANGE_START) && close_time <= hm(RANGE_END) {
            state.high = Some(state.high.map_or(candle.high, |h| h.max(candle.high)));
            state.low = Some(state.low.map_or(candle.low, |l| l.min(candle.low)));
            debug!(
                security_id = candle.security_id,
                high = ?state.high,
                low = ?state.low,
                "opening range sweep"
            );
            return None;
        }

        // Phase 2 only runs with a frozen range, before the cut-off.
        if close_time <= hm(RANGE_END) || close_time > hm(ENTRY_CUTOFF) {
            return None;
        }
        let (or_high, or_low, height) = match (state.high, state.low, state.height()) {
            (Some(h), Some(l), Some(d)) => (h, l, d),
            _ => return None,
        };

        let (side, stop_loss, target) = if candle.close > or_high && !state.traded_bullish {
            (
                Side::Buy,
                or_low,
                filters::round2(candle.close + TARGET_RANGE_MULTIPLE * height),
            )
        } else if candle.close < or_low && !state.traded_bearish {
            (
                Side::Sell,
                or_high,
                filters::round2(candle.close - TARGET_RANGE_MULTIPLE * height),
            )
        } else {
            return None;
        };

        // Volume push against the trailing 1m bars (current bar excluded).
        let key = CandleKey {
            security_id: candle.security_id,
            interval: timeframe,
        };
        let history = ctx.store.get_closed(&key, VOLUME_LOOKBACK + 1);
        let prior: Vec<f64> = history
            .iter()
            .filter(|c| c.timestamp != candle.timestamp)
            .map(|c| c.volume as f64)
            .collect();
        if prior.is_empty() {
            return None;
        }
        let avg_volume = prior.iter().sum::<f64>() / prior.len() as f64;
        if avg_volume <= 0.0 || (candle.volume as f64) < VOLUME_FACTOR * avg_volume {
            debug!(
                security_id = candle.security_id,
                volume = candle.volume,
                avg_volume,
                "breakout without volume push"
            );
            return None;
        }

        // Strength must confirm the breakout direction.
        let strength_ok = match side {
            Side::Buy => metrics.order_book_strength >= MIN_STRENGTH,
            Side::Sell => metrics.order_book_strength <= -MIN_STRENGTH,
        };
        if !strength_ok {
            debug!(
                security_id = candle.security_id,
                strength = metrics.order_book_strength,
                "breakout without book confirmation"
            );
            return None;
        }

        if filters::entry_gate(
            name,
            side,
            metrics,
            intraday,
            &ctx.now_local,
            ctx.trades_today,
            daily_cap,
        )
        .is_some()
        {
            return None;
        }

        match side {
            Side::Buy => state.traded_bullish = true,
            Side::Sell => state.traded_bearish = true,
        }

        let quantity = filters::position_size(ctx.config, candle.close);
        let volume_ratio = candle.volume as f64 / avg_volume;
        info!(
            security_id = candle.security_id,
            side = %side,
            or_high,
            or_low,
            close = candle.close,
            "opening-range breakout"
        );
        Some(build_signal(
            name,
            candle,
            side,
            stop_loss,
            target,
            quantity,
            format!(
                "{side} breakout of opening range [{or_low:.2}, {or_high:.2}], volume {volume_ratio:.1}x"
            ),
            metrics,
            (50.0 + volume_ratio * 10.0).min(100.0),
        ))
    }

    fn daily_reset(&mut self) {
        self.state.clear();
    }
}
