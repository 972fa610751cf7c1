// =============================================================================
// Candle Aggregator — folds ticks into OHLC bars per (security, interval)
// =============================================================================
//
// One open building candle per key. On every tick:
//
//   1. barStart = floor(event time / interval) (day bars: local midnight).
//   2. An open candle with a different barStart is closed and emitted.
//   3. A missing candle is created with OHLC seeded from the LTP.
//   4. The open candle grows in place; depth metrics accumulate per tick.
//
// A tick landing exactly on a boundary belongs to the new bar (floor rule).
// The aggregator is single-writer: the pipeline task owns it.
// =============================================================================

use std::collections::HashMap;

use chrono::FixedOffset;
use tracing::debug;

use super::candle::{Candle, CandleKey, Interval};
use super::EnrichedTick;

/// An open candle plus its metric accumulators.
#[derive(Debug, Clone)]
struct BuildingCandle {
    candle: Candle,
    sum_imbalance: f64,
    sum_spread: f64,
    sum_strength: f64,
    tick_count: u64,
}

impl BuildingCandle {
    fn new(tick: &EnrichedTick, interval: Interval, bar_start: i64) -> Self {
        Self {
            candle: Candle {
                security_id: tick.security_id,
                interval,
                timestamp: bar_start,
                open: tick.ltp,
                high: tick.ltp,
                low: tick.ltp,
                close: tick.ltp,
                volume: 0,
                avg_imbalance: 0.0,
                avg_spread: 0.0,
                avg_strength: 0.0,
                is_closed: false,
            },
            sum_imbalance: 0.0,
            sum_spread: 0.0,
            sum_strength: 0.0,
            tick_count: 0,
        }
    }

    fn apply(&mut self, tick: &EnrichedTick) {
        let c = &mut self.candle;
        c.high = c.high.max(tick.ltp);
        c.low = c.low.min(tick.ltp);
        c.close = tick.ltp;
        // Vendor volume is cumulative per session; keep the latest value.
        c.volume = tick.volume;
        self.sum_imbalance += tick.metrics.bid_ask_imbalance;
        self.sum_spread += tick.metrics.depth_spread;
        self.sum_strength += tick.metrics.order_book_strength;
        self.tick_count += 1;
    }

    /// Finalize the bar: divide the accumulators, falling back to neutral
    /// averages when no tick carried metrics.
    fn finalize(mut self) -> Candle {
        if self.tick_count > 0 {
            let n = self.tick_count as f64;
            self.candle.avg_imbalance = self.sum_imbalance / n;
            self.candle.avg_spread = self.sum_spread / n;
            self.candle.avg_strength = self.sum_strength / n;
        } else {
            self.candle.avg_imbalance = 1.0;
            self.candle.avg_spread = 0.0;
            self.candle.avg_strength = 0.0;
        }
        self.candle.is_closed = true;
        self.candle
    }
}

/// Result of feeding one tick: the bars it closed and the in-progress bars it
/// touched (for `candle:update` fan-out).
#[derive(Debug, Default)]
pub struct AggregationResult {
    pub closed: Vec<Candle>,
    pub updated: Vec<Candle>,
}

/// Tick-to-OHLC aggregator over a configurable set of intervals.
pub struct CandleAggregator {
    intervals: Vec<Interval>,
    tz: FixedOffset,
    building: HashMap<CandleKey, BuildingCandle>,
}

impl CandleAggregator {
    pub fn new(intervals: Vec<Interval>, tz: FixedOffset) -> Self {
        Self {
            intervals,
            tz,
            building: HashMap::new(),
        }
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Number of currently open bars, for the status snapshot.
    pub fn open_count(&self) -> usize {
        self.building.len()
    }

    /// Fold one enriched tick into every tracked interval.
    pub fn update(&mut self, tick: &EnrichedTick) -> AggregationResult {
        let mut result = AggregationResult::default();
        let now_ms = tick.event_time_ms();

        for &interval in &self.intervals {
            let key = CandleKey {
                security_id: tick.security_id,
                interval,
            };
            let bar_start = interval.floor(now_ms, self.tz);

            // Close a stale bar before touching the new one.
            if let Some(open) = self.building.get(&key) {
                if open.candle.timestamp != bar_start {
                    let open = self.building.remove(&key).expect("checked above");
                    let closed = open.finalize();
                    debug!(
                        key = %key,
                        ts = closed.timestamp,
                        close = closed.close,
                        "candle closed"
                    );
                    result.closed.push(closed);
                }
            }

            let entry = self
                .building
                .entry(key)
                .or_insert_with(|| BuildingCandle::new(tick, interval, bar_start));
            entry.apply(tick);
            result.updated.push(entry.candle.clone());
        }

        result
    }

    /// Close every open bar (shutdown path).
    pub fn close_all(&mut self) -> Vec<Candle> {
        let mut closed: Vec<Candle> = self
            .building
            .drain()
            .map(|(_, building)| building.finalize())
            .collect();
        closed.sort_by_key(|c| (c.security_id, c.interval.duration_ms(), c.timestamp));
        closed
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{DepthMetrics, MarketDepth};
    use crate::types::ExchangeSegment;
    use chrono::{TimeZone, Utc};

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).unwrap()
    }

    fn tick_at(ts_ms: i64, ltp: f64, volume: i64) -> EnrichedTick {
        EnrichedTick {
            security_id: 13,
            segment: ExchangeSegment::Index,
            ltp,
            ltq: 10,
            ltt: ts_ms,
            open: ltp,
            high: ltp,
            low: ltp,
            close: ltp,
            atp: ltp,
            volume,
            total_buy_qty: 0,
            total_sell_qty: 0,
            oi: 0,
            depth: MarketDepth::default(),
            metrics: DepthMetrics {
                bid_ask_imbalance: 1.4,
                depth_spread: 0.001,
                order_book_strength: 2_000.0,
                volume_delta: 0.0,
                liquidity_score: 80.0,
            },
            prev_close: None,
            captured_at: Utc.timestamp_millis_opt(ts_ms).single().unwrap(),
        }
    }

    #[test]
    fn first_tick_opens_bar_with_seeded_ohlc() {
        let mut agg = CandleAggregator::new(vec![Interval::M1], ist());
        let result = agg.update(&tick_at(60_000, 100.0, 500));
        assert!(result.closed.is_empty());
        assert_eq!(result.updated.len(), 1);
        let c = &result.updated[0];
        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 100.0);
        assert_eq!(c.low, 100.0);
        assert_eq!(c.close, 100.0);
        assert_eq!(c.timestamp, 60_000);
        assert!(!c.is_closed);
    }

    #[test]
    fn bar_grows_in_place() {
        let mut agg = CandleAggregator::new(vec![Interval::M1], ist());
        agg.update(&tick_at(60_000, 100.0, 500));
        agg.update(&tick_at(61_000, 105.0, 600));
        let result = agg.update(&tick_at(62_000, 98.0, 700));
        let c = &result.updated[0];
        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 105.0);
        assert_eq!(c.low, 98.0);
        assert_eq!(c.close, 98.0);
        assert_eq!(c.volume, 700);
    }

    #[test]
    fn boundary_crossing_closes_previous_bar() {
        let mut agg = CandleAggregator::new(vec![Interval::M1], ist());
        agg.update(&tick_at(60_000, 100.0, 500));
        agg.update(&tick_at(90_000, 101.0, 600));
        // Exactly on the next boundary -> belongs to the new bar.
        let result = agg.update(&tick_at(120_000, 102.0, 700));
        assert_eq!(result.closed.len(), 1);
        let closed = &result.closed[0];
        assert!(closed.is_closed);
        assert_eq!(closed.timestamp, 60_000);
        assert_eq!(closed.close, 101.0);
        assert_eq!(result.updated[0].timestamp, 120_000);
        assert_eq!(result.updated[0].open, 102.0);
    }

    #[test]
    fn closed_count_matches_crossed_boundaries() {
        let mut agg = CandleAggregator::new(vec![Interval::M1], ist());
        let mut closed_total = 0;
        // 10 minutes of ticks, 4 per minute.
        for i in 0..40 {
            let ts = 60_000 + i * 15_000;
            closed_total += agg.update(&tick_at(ts, 100.0 + i as f64, 100)).closed.len();
        }
        // Ticks span bars [1..=10]; nine boundaries were crossed.
        assert_eq!(closed_total, 9);
    }

    #[test]
    fn close_is_last_tick_in_window() {
        let mut agg = CandleAggregator::new(vec![Interval::M1], ist());
        agg.update(&tick_at(60_000, 100.0, 1));
        agg.update(&tick_at(119_999, 104.5, 2));
        let result = agg.update(&tick_at(120_000, 999.0, 3));
        assert_eq!(result.closed[0].close, 104.5);
    }

    #[test]
    fn metric_averages_divide_by_tick_count() {
        let mut agg = CandleAggregator::new(vec![Interval::M1], ist());
        agg.update(&tick_at(60_000, 100.0, 1));
        agg.update(&tick_at(61_000, 100.0, 2));
        let result = agg.update(&tick_at(120_000, 100.0, 3));
        let closed = &result.closed[0];
        assert!((closed.avg_imbalance - 1.4).abs() < 1e-12);
        assert!((closed.avg_spread - 0.001).abs() < 1e-12);
        assert!((closed.avg_strength - 2_000.0).abs() < 1e-9);
    }

    #[test]
    fn multiple_intervals_tracked_independently() {
        let mut agg = CandleAggregator::new(vec![Interval::M1, Interval::M5], ist());
        agg.update(&tick_at(0, 100.0, 1));
        // Crossing a 1m boundary closes only the 1m bar.
        let result = agg.update(&tick_at(60_000, 101.0, 2));
        assert_eq!(result.closed.len(), 1);
        assert_eq!(result.closed[0].interval, Interval::M1);
        // Crossing the 5m boundary closes both.
        let result = agg.update(&tick_at(300_000, 102.0, 3));
        assert_eq!(result.closed.len(), 2);
    }

    #[test]
    fn close_all_flushes_open_bars() {
        let mut agg = CandleAggregator::new(vec![Interval::M1, Interval::M5], ist());
        agg.update(&tick_at(60_000, 100.0, 1));
        let closed = agg.close_all();
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|c| c.is_closed));
        assert_eq!(agg.open_count(), 0);
    }

    #[test]
    fn invariant_low_lte_ohlc_lte_high() {
        let mut agg = CandleAggregator::new(vec![Interval::M1], ist());
        let prices = [100.0, 103.0, 97.0, 101.0, 99.0];
        for (i, p) in prices.iter().enumerate() {
            agg.update(&tick_at(60_000 + i as i64 * 1_000, *p, 1));
        }
        let closed = agg.close_all();
        let c = &closed[0];
        assert!(c.low <= c.open && c.open <= c.high);
        assert!(c.low <= c.close && c.close <= c.high);
        assert_eq!(c.timestamp % 60_000, 0);
    }
}
