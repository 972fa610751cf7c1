// =============================================================================
// Multi-Confluence Strategy — 5m intraday, four-of-five confirmation
// =============================================================================
//
// Keeps the last twenty 5m candles per instrument and scores five independent
// confluences on every close:
//
//   1. Breakout bar: directional body, close in the top (bottom) quartile of
//      its range, beyond the previous bar's extreme.
//   2. Volume >= 1.3x the rolling average.
//   3. 20-level depth: absorption toward the trade side with >= 20 %
//      lopsidedness, or price within 0.5 % of the strongest resting level.
//   4. Option-chain sentiment agreeing with >= 60 % strength. Absence of the
//      feed drops this confluence rather than rejecting the trade.
//   5. Accumulation: the five prior closes all within 1 % of their mean.
//
// Four confluences plus multi-timeframe alignment are required. A detected
// accumulation zone is also surfaced as a report for the hub.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::filters;
use super::{build_signal, Signal, Strategy, StrategyContext};
use crate::market_data::{Candle, DepthMetrics, Interval};
use crate::mtf;
use crate::types::Side;

const RING_CAPACITY: usize = 20;
const REQUIRED_CONFLUENCES: usize = 4;
const VOLUME_FACTOR: f64 = 1.3;
const MIN_ABSORPTION_PCT: f64 = 20.0;
const STRONG_LEVEL_PROXIMITY: f64 = 0.005;
const MIN_SENTIMENT_PCT: f64 = 60.0;
const ACCUMULATION_BARS: usize = 5;
const ACCUMULATION_BAND: f64 = 0.01;

/// A tight consolidation detected by confluence 5, surfaced to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccumulationReport {
    pub security_id: u32,
    pub interval: Interval,
    pub mean_close: f64,
    pub band_pct: f64,
    pub bars: usize,
    pub detected_at: DateTime<Utc>,
}

pub struct ConfluenceStrategy {
    rings: HashMap<u32, VecDeque<Candle>>,
    pending_reports: Vec<AccumulationReport>,
}

impl ConfluenceStrategy {
    pub fn new() -> Self {
        Self {
            rings: HashMap::new(),
            pending_reports: Vec::new(),
        }
    }

    fn evaluate_side(
        side: Side,
        candle: &Candle,
        ring: &VecDeque<Candle>,
        ctx: &StrategyContext<'_>,
    ) -> (usize, Vec<&'static str>) {
        let mut hits: Vec<&'static str> = Vec::with_capacity(5);

        if breakout_bar(side, candle, ring.back()) {
            hits.push("breakout");
        }
        if volume_push(candle, ring) {
            hits.push("volume");
        }
        if depth_confluence(side, candle, ctx) {
            hits.push("depth");
        }
        if sentiment_confluence(side, ctx) {
            hits.push("sentiment");
        }
        if accumulation_zone(ring).is_some() {
            hits.push("accumulation");
        }

        (hits.len(), hits)
    }
}

impl Default for ConfluenceStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for ConfluenceStrategy {
    fn name(&self) -> &'static str {
        "multi-confluence"
    }

    fn timeframe(&self) -> Interval {
        Interval::M5
    }

    fn on_candle(
        &mut self,
        candle: &Candle,
        metrics: &DepthMetrics,
        ctx: &StrategyContext<'_>,
    ) -> Option<Signal> {
        let name = self.name();
        let intraday = self.is_intraday();
        let daily_cap = self.max_trades_per_day();

        let ring = self.rings.entry(candle.security_id).or_default();

        // Surface accumulation zones even when no trade results.
        if let Some(mean_close) = accumulation_zone(ring) {
            self.pending_reports.push(AccumulationReport {
                security_id: candle.security_id,
                interval: candle.interval,
                mean_close,
                band_pct: ACCUMULATION_BAND * 100.0,
                bars: ACCUMULATION_BARS,
                detected_at: Utc
                    .timestamp_millis_opt(candle.close_time())
                    .single()
                    .unwrap_or_else(Utc::now),
            });
        }

        let mut outcome = None;
        for side in [Side::Buy, Side::Sell] {
            let (count, hits) = Self::evaluate_side(side, candle, ring, ctx);
            debug!(
                strategy = name,
                security_id = candle.security_id,
                side = %side,
                count,
                hits = ?hits,
                "confluence evaluation"
            );
            if count < REQUIRED_CONFLUENCES {
                continue;
            }

            // Multi-timeframe confirmation: disalignment rejects, missing
            // analysis passes.
            if let Some(analysis) =
                mtf::confirm(ctx.store, candle.security_id, candle.interval)
            {
                if !analysis.supports(side) {
                    debug!(
                        strategy = name,
                        side = %side,
                        recommendation = ?analysis.recommendation,
                        "blocked by timeframe alignment"
                    );
                    continue;
                }
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
                continue;
            }

            let (stop_loss, target) = filters::default_levels(ctx.config, side, candle.close);
            let quantity = filters::position_size(ctx.config, candle.close);
            outcome = Some(build_signal(
                name,
                candle,
                side,
                stop_loss,
                target,
                quantity,
                format!("confluences {count}/5: {}", hits.join("+")),
                metrics,
                count as f64 * 20.0,
            ));
            break;
        }

        let ring = self.rings.entry(candle.security_id).or_default();
        ring.push_back(candle.clone());
        while ring.len() > RING_CAPACITY {
            ring.pop_front();
        }

        outcome
    }

    fn daily_reset(&mut self) {
        self.rings.clear();
        self.pending_reports.clear();
    }

    fn take_reports(&mut self) -> Vec<AccumulationReport> {
        std::mem::take(&mut self.pending_reports)
    }
}

/// Confluence 1: a directional bar closing beyond the previous extreme, with
/// the close in the leading quartile of its own range.
fn breakout_bar(side: Side, candle: &Candle, prev: Option<&Candle>) -> bool {
    let Some(prev) = prev else {
        return false;
    };
    let range = candle.range();
    if range <= 0.0 {
        return false;
    }
    match side {
        Side::Buy => {
            candle.close > candle.open
                && candle.close >= candle.low + 0.75 * range
                && candle.close > prev.high
        }
        Side::Sell => {
            candle.close < candle.open
                && candle.close <= candle.low + 0.25 * range
                && candle.close < prev.low
        }
    }
}

/// Confluence 2: volume against the ring average.
fn volume_push(candle: &Candle, ring: &VecDeque<Candle>) -> bool {
    if ring.is_empty() {
        return false;
    }
    let avg = ring.iter().map(|c| c.volume as f64).sum::<f64>() / ring.len() as f64;
    avg > 0.0 && candle.volume as f64 >= VOLUME_FACTOR * avg
}

/// Confluence 3: resting size backs the move, or price sits on the strongest
/// level of the supporting side.
fn depth_confluence(side: Side, candle: &Candle, ctx: &StrategyContext<'_>) -> bool {
    let Some(analytics) = &ctx.depth_analytics else {
        return false;
    };
    if analytics.absorbs_toward(side, MIN_ABSORPTION_PCT) {
        return true;
    }
    let strongest = match side {
        Side::Buy => analytics.strongest_bid,
        Side::Sell => analytics.strongest_ask,
    };
    strongest.is_some_and(|level| {
        candle.close > 0.0 && ((candle.close - level.price).abs() / candle.close) <= STRONG_LEVEL_PROXIMITY
    })
}

/// Confluence 4: external option-chain sentiment. Missing input never counts
/// and never rejects.
fn sentiment_confluence(side: Side, ctx: &StrategyContext<'_>) -> bool {
    ctx.option_sentiment
        .as_ref()
        .is_some_and(|s| s.direction == side && s.strength_pct >= MIN_SENTIMENT_PCT)
}

/// Confluence 5: the last five prior closes hold within a 1 % band of their
/// mean. Returns the mean when detected.
fn accumulation_zone(ring: &VecDeque<Candle>) -> Option<f64> {
    if ring.len() < ACCUMULATION_BARS {
        return None;
    }
    let tail: Vec<f64> = ring
        .iter()
        .skip(ring.len() - ACCUMULATION_BARS)
        .map(|c| c.close)
        .collect();
    let mean = tail.iter().sum::<f64>() / tail.len() as f64;
    if mean <= 0.0 {
        return None;
    }
    tail.iter()
        .all(|c| (c - mean).abs() / mean <= ACCUMULATION_BAND)
        .then_some(mean)
}
