// =============================================================================
// EMA Crossover Strategy — 5m intraday, fast 9 / slow 21
// =============================================================================
//
// On each 5m close, recompute both EMAs over stored history and compare the
// last two aligned samples. A bullish cross with a volume push (>= 1.2x the
// trailing ten-bar average) emits a BUY with the default 1 % / 3 % levels;
// bearish is the mirror. Capped at three signals per day.
// =============================================================================

use tracing::debug;

use super::filters;
use super::{build_signal, Signal, Strategy, StrategyContext};
use crate::indicators::{calculate_ema, detect_ema_crossover, Crossover};
use crate::market_data::{Candle, CandleKey, DepthMetrics, Interval};
use crate::types::Side;

const FAST_PERIOD: usize = 9;
const SLOW_PERIOD: usize = 21;
const HISTORY: usize = 50;
const VOLUME_LOOKBACK: usize = 10;
const VOLUME_FACTOR: f64 = 1.2;
const MAX_TRADES_PER_DAY: u32 = 3;

pub struct EmaCrossoverStrategy;

impl EmaCrossoverStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EmaCrossoverStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for EmaCrossoverStrategy {
    fn name(&self) -> &'static str {
        "ema-crossover"
    }

    fn timeframe(&self) -> Interval {
        Interval::M5
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
        let key = CandleKey {
            security_id: candle.security_id,
            interval: self.timeframe(),
        };
        let history = ctx.store.get_closed(&key, HISTORY);
        if history.len() < SLOW_PERIOD + 1 {
            debug!(
                strategy = self.name(),
                candles = history.len(),
                "insufficient history"
            );
            return None;
        }

        let closes: Vec<f64> = history.iter().map(|c| c.close).collect();
        let fast = calculate_ema(&closes, FAST_PERIOD);
        let slow = calculate_ema(&closes, SLOW_PERIOD);

        let side = match detect_ema_crossover(&fast, &slow)? {
            Crossover::Bullish => Side::Buy,
            Crossover::Bearish => Side::Sell,
        };

        // Volume push over the trailing bars, current bar excluded.
        let volumes: Vec<f64> = history.iter().map(|c| c.volume as f64).collect();
        let prior = &volumes[..volumes.len() - 1];
        let window = &prior[prior.len().saturating_sub(VOLUME_LOOKBACK)..];
        if window.is_empty() {
            return None;
        }
        let avg_volume = window.iter().sum::<f64>() / window.len() as f64;
        let volume = *volumes.last().expect("history non-empty");
        if avg_volume <= 0.0 || volume < VOLUME_FACTOR * avg_volume {
            debug!(
                strategy = self.name(),
                volume,
                avg_volume,
                "volume push missing"
            );
            return None;
        }

        filters::entry_gate(
            self.name(),
            side,
            metrics,
            self.is_intraday(),
            &ctx.now_local,
            ctx.trades_today,
            self.max_trades_per_day(),
        )
        .is_none()
        .then(|| {
            let (stop_loss, target) = filters::default_levels(ctx.config, side, candle.close);
            let quantity = filters::position_size(ctx.config, candle.close);
            let volume_ratio = volume / avg_volume;
            build_signal(
                self.name(),
                candle,
                side,
                stop_loss,
                target,
                quantity,
                format!(
                    "EMA{FAST_PERIOD}/{SLOW_PERIOD} {side} crossover, volume {volume_ratio:.1}x average"
                ),
                metrics,
                (volume_ratio / 2.0 * 100.0).min(100.0),
            )
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::market_data::CandleStore;
    use chrono::{FixedOffset, TimeZone};

    fn metrics() -> DepthMetrics {
        DepthMetrics {
            bid_ask_imbalance: 1.4,
            depth_spread: 0.0004,
            order_book_strength: 2_000.0,
            volume_delta: 0.0,
            liquidity_score: 80.0,
        }
    }

    fn candle(ts: i64, close: f64, volume: i64) -> Candle {
        Candle {
            security_id: 13,
            interval: Interval::M5,
            timestamp: ts,
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume,
            avg_imbalance: 1.4,
            avg_spread: 0.0004,
            avg_strength: 2_000.0,
            is_closed: true,
        }
    }

    /// Bar timestamps anchored at 10:00 exchange time so the session window
    /// passes.
    fn base_ts() -> i64 {
        FixedOffset::east_opt(330 * 60)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 2, 10, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn ctx<'a>(
        config: &'a EngineConfig,
        store: &'a CandleStore,
        last: &Candle,
    ) -> StrategyContext<'a> {
        StrategyContext {
            config,
            store,
            now_local: config
                .timezone()
                .timestamp_millis_opt(last.close_time())
                .single()
                .unwrap(),
            depth_analytics: None,
            option_sentiment: None,
            trades_today: 0,
        }
    }

    /// A flat stretch at 105, one shake-out bar, then a high-volume
    /// reversal to 110. EMA9 re-crosses EMA21 exactly on the final bar:
    /// before it the pair is (104.0, 104.545...), after it (105.2, 105.041...).
    fn crossover_series() -> Vec<Candle> {
        let mut closes = vec![105.0; 21];
        closes.push(100.0);
        closes.push(110.0);
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let volume = if i == closes.len() - 1 { 1_600 } else { 1_000 };
                candle(base_ts() + i as i64 * 300_000, c, volume)
            })
            .collect()
    }

    #[test]
    fn bullish_crossover_emits_expected_signal() {
        let config = EngineConfig::default();
        let store = CandleStore::new(100);
        let series = crossover_series();
        for c in &series {
            store.push_closed(c.clone());
        }
        let last = series.last().unwrap();
        let mut strategy = EmaCrossoverStrategy::new();
        let signal = strategy
            .on_candle(last, &metrics(), &ctx(&config, &store, last))
            .expect("crossover should fire");

        assert_eq!(signal.side, Side::Buy);
        assert_eq!(signal.price, 110.0);
        assert_eq!(signal.stop_loss, 108.9);
        assert_eq!(signal.target, 113.3);
        assert_eq!(signal.quantity, 75);
    }

    #[test]
    fn no_signal_without_volume_push() {
        let config = EngineConfig::default();
        let store = CandleStore::new(100);
        let mut series = crossover_series();
        let idx = series.len() - 1;
        series[idx].volume = 1_100; // below 1.2x of the 1000 average
        for c in &series {
            store.push_closed(c.clone());
        }
        let last = series.last().unwrap();
        let mut strategy = EmaCrossoverStrategy::new();
        assert!(strategy
            .on_candle(last, &metrics(), &ctx(&config, &store, last))
            .is_none());
    }

    #[test]
    fn no_signal_on_short_history() {
        let config = EngineConfig::default();
        let store = CandleStore::new(100);
        let series: Vec<Candle> = (0..10)
            .map(|i| candle(base_ts() + i * 300_000, 100.0, 1_000))
            .collect();
        for c in &series {
            store.push_closed(c.clone());
        }
        let last = series.last().unwrap();
        let mut strategy = EmaCrossoverStrategy::new();
        assert!(strategy
            .on_candle(last, &metrics(), &ctx(&config, &store, last))
            .is_none());
    }

    #[test]
    fn no_signal_without_cross() {
        let config = EngineConfig::default();
        let store = CandleStore::new(100);
        // Steady uptrend: fast already above slow, no fresh cross on the
        // last bar.
        let series: Vec<Candle> = (0..40)
            .map(|i| candle(base_ts() + i * 300_000, 100.0 + i as f64, 2_000))
            .collect();
        for c in &series {
            store.push_closed(c.clone());
        }
        let last = series.last().unwrap();
        let mut strategy = EmaCrossoverStrategy::new();
        assert!(strategy
            .on_candle(last, &metrics(), &ctx(&config, &store, last))
            .is_none());
    }

    #[test]
    fn depth_filter_blocks_weak_book() {
        let config = EngineConfig::default();
        let store = CandleStore::new(100);
        let series = crossover_series();
        for c in &series {
            store.push_closed(c.clone());
        }
        let last = series.last().unwrap();
        let mut weak = metrics();
        weak.bid_ask_imbalance = 1.0;
        let mut strategy = EmaCrossoverStrategy::new();
        assert!(strategy
            .on_candle(last, &weak, &ctx(&config, &store, last))
            .is_none());
    }
}
