// =============================================================================
// Strategy Engine — routes closed candles to the hosted strategies
// =============================================================================
//
// Every strategy implements `Strategy`: it is handed each closed candle on
// its declared timeframe together with the bar's averaged depth metrics, and
// may answer with a `Signal`. The shared entry contract (session window,
// daily caps, depth filters, sizing) lives in `filters` and is applied inside
// `on_candle` before any strategy-specific logic emits.
//
// The engine owns per-strategy counters (lifetime signals, trades today) and
// performs the daily reset that clears strategy state at market open.
// =============================================================================

pub mod confluence;
pub mod ema_crossover;
pub mod filters;
pub mod orb;

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::market_data::{Candle, CandleStore, DepthAnalytics, DepthMetrics, Interval};
use crate::option_chain::OptionSentiment;
use crate::types::Side;

pub use confluence::{AccumulationReport, ConfluenceStrategy};
pub use ema_crossover::EmaCrossoverStrategy;
pub use orb::OpeningRangeBreakout;

// =============================================================================
// Signal
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Pending,
    Executed,
    Rejected,
    Expired,
}

impl SignalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

/// A trade intent produced by a strategy. Immediately after creation the
/// executor either executes it (order + position) or rejects it; both
/// outcomes are terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub strategy: String,
    pub security_id: u32,
    pub side: Side,
    pub price: f64,
    pub stop_loss: f64,
    pub target: f64,
    pub quantity: u32,
    pub reason: String,
    pub depth_snapshot: DepthMetrics,
    /// Strategy-assigned conviction in [0, 100].
    pub quality_score: f64,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

// =============================================================================
// Strategy trait & context
// =============================================================================

/// Read-only context handed to a strategy on every candle close.
pub struct StrategyContext<'a> {
    pub config: &'a EngineConfig,
    pub store: &'a CandleStore,
    /// Close time of the candle in the exchange zone.
    pub now_local: DateTime<FixedOffset>,
    /// Latest 20-level analytics for the candle's security, if the depth
    /// connection delivered any.
    pub depth_analytics: Option<DepthAnalytics>,
    /// Latest option-chain sentiment, if the poller runs.
    pub option_sentiment: Option<OptionSentiment>,
    /// Signals already emitted by this strategy today.
    pub trades_today: u32,
}

/// A systematic trading strategy hosted by the engine.
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// The candle interval this strategy consumes.
    fn timeframe(&self) -> Interval;

    /// Daily signal cap; `None` means unlimited.
    fn max_trades_per_day(&self) -> Option<u32> {
        None
    }

    /// Intraday strategies are bound to the shared session window.
    fn is_intraday(&self) -> bool {
        true
    }

    fn on_candle(
        &mut self,
        candle: &Candle,
        metrics: &DepthMetrics,
        ctx: &StrategyContext<'_>,
    ) -> Option<Signal>;

    /// Clear per-day state at the market-open reset.
    fn daily_reset(&mut self) {}

    /// Side-channel reports (e.g. accumulation zones) drained after each
    /// dispatch.
    fn take_reports(&mut self) -> Vec<AccumulationReport> {
        Vec::new()
    }
}

/// Serialisable per-strategy status for the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyStatus {
    pub name: String,
    pub active: bool,
    pub timeframe: Interval,
    pub signals_generated: u64,
    pub trades_today: u32,
    pub max_trades_per_day: Option<u32>,
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Default)]
struct StrategyCounters {
    signals_total: u64,
    trades_today: u32,
    active: bool,
}

/// Output of one candle dispatch.
#[derive(Debug, Default)]
pub struct DispatchResult {
    pub signals: Vec<Signal>,
    pub reports: Vec<AccumulationReport>,
}

pub struct StrategyEngine {
    strategies: Vec<Box<dyn Strategy>>,
    counters: HashMap<&'static str, StrategyCounters>,
}

impl StrategyEngine {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            counters: HashMap::new(),
        }
    }

    /// The production roster: EMA crossover, opening-range breakout, and the
    /// multi-confluence strategy.
    pub fn with_default_strategies() -> Self {
        let mut engine = Self::new();
        engine.register(Box::new(EmaCrossoverStrategy::new()));
        engine.register(Box::new(OpeningRangeBreakout::new()));
        engine.register(Box::new(ConfluenceStrategy::new()));
        engine
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        info!(
            strategy = strategy.name(),
            timeframe = %strategy.timeframe(),
            "strategy registered"
        );
        self.counters.insert(
            strategy.name(),
            StrategyCounters {
                active: true,
                ..Default::default()
            },
        );
        self.strategies.push(strategy);
    }

    /// Dispatch a closed candle to every active strategy on its timeframe.
    pub fn on_candle_close(
        &mut self,
        candle: &Candle,
        metrics: &DepthMetrics,
        config: &EngineConfig,
        store: &CandleStore,
        depth_analytics: Option<DepthAnalytics>,
        option_sentiment: Option<OptionSentiment>,
    ) -> DispatchResult {
        let mut result = DispatchResult::default();
        let tz = config.timezone();
        let now_local = tz
            .timestamp_millis_opt(candle.close_time())
            .single()
            .unwrap_or_else(|| tz.timestamp_millis_opt(0).single().expect("epoch"));

        for strategy in &mut self.strategies {
            if strategy.timeframe() != candle.interval {
                continue;
            }
            let name = strategy.name();
            let counters = self.counters.entry(name).or_default();
            if !counters.active {
                continue;
            }

            let ctx = StrategyContext {
                config,
                store,
                now_local,
                depth_analytics: depth_analytics.clone(),
                option_sentiment: option_sentiment.clone(),
                trades_today: counters.trades_today,
            };

            if let Some(signal) = strategy.on_candle(candle, metrics, &ctx) {
                counters.signals_total += 1;
                counters.trades_today += 1;
                info!(
                    strategy = name,
                    security_id = signal.security_id,
                    side = %signal.side,
                    price = signal.price,
                    quantity = signal.quantity,
                    reason = %signal.reason,
                    "signal generated"
                );
                result.signals.push(signal);
            } else {
                debug!(strategy = name, key = %candle.key(), "no signal");
            }
            result.reports.extend(strategy.take_reports());
        }

        result
    }

    /// Market-open reset: clears daily counters and strategy state.
    pub fn daily_reset(&mut self) {
        for strategy in &mut self.strategies {
            strategy.daily_reset();
        }
        for counters in self.counters.values_mut() {
            counters.trades_today = 0;
        }
        info!("strategy engine daily reset complete");
    }

    pub fn set_active(&mut self, name: &str, active: bool) {
        if let Some(counters) = self.counters.get_mut(name) {
            counters.active = active;
        }
    }

    pub fn statuses(&self) -> Vec<StrategyStatus> {
        self.strategies
            .iter()
            .map(|s| {
                let counters = self.counters.get(s.name());
                StrategyStatus {
                    name: s.name().to_string(),
                    active: counters.map_or(true, |c| c.active),
                    timeframe: s.timeframe(),
                    signals_generated: counters.map_or(0, |c| c.signals_total),
                    trades_today: counters.map_or(0, |c| c.trades_today),
                    max_trades_per_day: s.max_trades_per_day(),
                }
            })
            .collect()
    }
}

impl Default for StrategyEngine {
    fn default() -> Self {
        Self::with_default_strategies()
    }
}

/// Shared constructor so every strategy builds signals the same way.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_signal(
    strategy: &'static str,
    candle: &Candle,
    side: Side,
    stop_loss: f64,
    target: f64,
    quantity: u32,
    reason: String,
    metrics: &DepthMetrics,
    quality_score: f64,
) -> Signal {
    Signal {
        id: Uuid::new_v4().to_string(),
        strategy: strategy.to_string(),
        security_id: candle.security_id,
        side,
        price: candle.close,
        stop_loss,
        target,
        quantity,
        reason,
        depth_snapshot: *metrics,
        quality_score: quality_score.clamp(0.0, 100.0),
        status: SignalStatus::Pending,
        created_at: Utc
            .timestamp_millis_opt(candle.close_time())
            .single()
            .unwrap_or_else(Utc::now),
        decided_at: None,
        rejection_reason: None,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::CandleStore;

    struct AlwaysFires;

    impl Strategy for AlwaysFires {
        fn name(&self) -> &'static str {
            "always-fires"
        }

        fn timeframe(&self) -> Interval {
            Interval::M5
        }

        fn on_candle(
            &mut self,
            candle: &Candle,
            metrics: &DepthMetrics,
            _ctx: &StrategyContext<'_>,
        ) -> Option<Signal> {
            Some(build_signal(
                "always-fires",
                candle,
                Side::Buy,
                candle.close * 0.99,
                candle.close * 1.03,
                75,
                "test".to_string(),
                metrics,
                50.0,
            ))
        }
    }

    fn candle(interval: Interval, close: f64) -> Candle {
        Candle {
            security_id: 13,
            interval,
            timestamp: 0,
            open: close,
            high: close,
            low: close,
            close,
            volume: 100,
            avg_imbalance: 1.0,
            avg_spread: 0.0,
            avg_strength: 0.0,
            is_closed: true,
        }
    }

    #[test]
    fn dispatch_matches_timeframe() {
        let mut engine = StrategyEngine::new();
        engine.register(Box::new(AlwaysFires));
        let config = EngineConfig::default();
        let store = CandleStore::new(10);
        let metrics = DepthMetrics::neutral();

        let result = engine.on_candle_close(
            &candle(Interval::M1, 100.0),
            &metrics,
            &config,
            &store,
            None,
            None,
        );
        assert!(result.signals.is_empty());

        let result = engine.on_candle_close(
            &candle(Interval::M5, 100.0),
            &metrics,
            &config,
            &store,
            None,
            None,
        );
        assert_eq!(result.signals.len(), 1);
    }

    #[test]
    fn counters_track_signals_and_reset() {
        let mut engine = StrategyEngine::new();
        engine.register(Box::new(AlwaysFires));
        let config = EngineConfig::default();
        let store = CandleStore::new(10);
        let metrics = DepthMetrics::neutral();

        for _ in 0..3 {
            engine.on_candle_close(
                &candle(Interval::M5, 100.0),
                &metrics,
                &config,
                &store,
                None,
                None,
            );
        }
        let status = &engine.statuses()[0];
        assert_eq!(status.signals_generated, 3);
        assert_eq!(status.trades_today, 3);

        engine.daily_reset();
        let status = &engine.statuses()[0];
        assert_eq!(status.signals_generated, 3);
        assert_eq!(status.trades_today, 0);
    }

    #[test]
    fn inactive_strategy_is_skipped() {
        let mut engine = StrategyEngine::new();
        engine.register(Box::new(AlwaysFires));
        engine.set_active("always-fires", false);
        let config = EngineConfig::default();
        let store = CandleStore::new(10);
        let result = engine.on_candle_close(
            &candle(Interval::M5, 100.0),
            &DepthMetrics::neutral(),
            &config,
            &store,
            None,
            None,
        );
        assert!(result.signals.is_empty());
    }

    #[test]
    fn default_roster_has_three_strategies() {
        let engine = StrategyEngine::with_default_strategies();
        let statuses = engine.statuses();
        assert_eq!(statuses.len(), 3);
        assert!(statuses.iter().all(|s| s.active));
    }
}
