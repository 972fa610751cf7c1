// =============================================================================
// Central Application State
// =============================================================================
//
// Ties the engine's components together behind one `Arc`. The pipeline and
// the scheduler mutate through it; the hub reads snapshots from it. The
// persist-and-publish helpers live here so every path that closes a trade or
// executes a signal records it identically.
//
// Thread safety: subsystems carry their own interior mutability; the strategy
// engine, which is stateful and single-threaded by contract, sits behind a
// parking_lot::Mutex.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, warn};

use crate::config::EngineConfig;
use crate::events::{ConnectionStatus, EngineEvent, EventBus};
use crate::executor::{ClosedTrade, ExecutionReport, PaperExecutor, Position};
use crate::feed::FeedStatus;
use crate::indicators;
use crate::market_data::{CandleKey, CandleStore, DepthBookManager, Interval};
use crate::option_chain::OptionSentimentCache;
use crate::portfolio::Portfolio;
use crate::scheduler::SessionClock;
use crate::storage::Storage;
use crate::strategies::{StrategyEngine, StrategyStatus};
use crate::types::SubscriptionEntry;

pub struct AppState {
    pub config: EngineConfig,
    pub clock: SessionClock,
    pub bus: EventBus,
    pub storage: Arc<Storage>,
    pub store: Arc<CandleStore>,
    pub executor: Arc<PaperExecutor>,
    pub engine: Mutex<StrategyEngine>,
    pub depth_books: DepthBookManager,
    pub option_sentiment: OptionSentimentCache,
    /// Feed health handles, attached once the clients are built.
    feed: RwLock<Option<Arc<FeedStatus>>>,
    pub persistence_failures: AtomicU64,
}

impl AppState {
    pub fn new(
        config: EngineConfig,
        storage: Arc<Storage>,
        executor: Arc<PaperExecutor>,
        engine: StrategyEngine,
        bus: EventBus,
    ) -> Self {
        let clock = SessionClock::from_config(&config);
        Self {
            config,
            clock,
            bus,
            storage,
            store: Arc::new(CandleStore::new(500)),
            executor,
            engine: Mutex::new(engine),
            depth_books: DepthBookManager::new(),
            option_sentiment: crate::option_chain::new_cache(),
            feed: RwLock::new(None),
            persistence_failures: AtomicU64::new(0),
        }
    }

    pub fn attach_feed_status(&self, status: Arc<FeedStatus>) {
        *self.feed.write() = Some(status);
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let feed = self.feed.read();
        ConnectionStatus {
            connected: feed.as_ref().map_or(false, |f| f.is_connected()),
            subscribed_instruments: self.config.subscription_set.len(),
            last_packet_age_ms: feed.as_ref().and_then(|f| f.last_packet_age_ms()),
        }
    }

    // -------------------------------------------------------------------------
    // Persist-and-publish helpers
    // -------------------------------------------------------------------------

    /// Log and count a persistence failure; the pipeline continues.
    pub fn persist_non_fatal(&self, result: Result<()>, what: &str) {
        if let Err(e) = result {
            self.persistence_failures.fetch_add(1, Ordering::Relaxed);
            warn!(what, error = %e, "persistence failure (non-fatal)");
        }
    }

    /// A position write that must not be lost. On exhausted retries the
    /// executor halts new signal execution.
    fn persist_position_critical(&self, position: &Position) {
        if let Err(e) = self.storage.upsert_position_with_retry(position) {
            self.persistence_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                position_id = %position.id,
                error = %e,
                "position write failed permanently — halting executor"
            );
            self.executor.halt();
        }
    }

    /// Record a signal execution (or rejection): persistence plus fan-out.
    pub fn record_execution(&self, report: ExecutionReport) {
        self.persist_non_fatal(self.storage.upsert_signal(&report.signal), "signal");

        if let Some(order) = &report.order {
            self.persist_non_fatal(self.storage.insert_order(order), "order");
        }
        if let Some(position) = &report.position {
            self.persist_position_critical(position);
            self.bus.publish(EngineEvent::PositionUpdate(position.clone()));
        }
        if let Some(portfolio) = &report.portfolio {
            self.persist_non_fatal(self.storage.upsert_portfolio(portfolio), "portfolio");
            self.bus.publish(EngineEvent::PortfolioUpdate(portfolio.clone()));
        }
        self.bus.publish(EngineEvent::Signal(report.signal));
    }

    /// Record a position close from any path (stop, target, EOD, manual).
    pub fn record_closed_trade(&self, trade: &ClosedTrade) {
        self.persist_position_critical(&trade.position);
        self.persist_non_fatal(self.storage.insert_order(&trade.exit_order), "exit order");
        self.persist_non_fatal(self.storage.upsert_portfolio(&trade.portfolio), "portfolio");
        self.bus
            .publish(EngineEvent::PositionClosed(trade.position.clone()));
        self.bus
            .publish(EngineEvent::PortfolioUpdate(trade.portfolio.clone()));
    }

    /// Per-tick mark-to-market snapshot; a lost write here is acceptable.
    pub fn record_position_mark(&self, position: &Position) {
        self.persist_non_fatal(self.storage.upsert_position(position), "position mark");
        self.bus.publish(EngineEvent::PositionUpdate(position.clone()));
    }

    pub fn publish_strategy_statuses(&self) {
        let statuses = self.engine.lock().statuses();
        self.bus.publish(EngineEvent::StrategiesStatus(statuses));
    }

    // -------------------------------------------------------------------------
    // Status snapshot
    // -------------------------------------------------------------------------

    /// The full snapshot a hub subscriber receives on connect.
    pub fn build_status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connection: self.connection_status(),
            session_open: self.clock.in_session(&self.clock.now_local()),
            subscriptions: self.config.subscription_set.clone(),
            candle_intervals: self.config.candle_intervals.clone(),
            stored_candles: self.store.total_count(),
            indicators: self.build_indicator_readouts(),
            strategies: self.engine.lock().statuses(),
            executor_halted: self.executor.is_halted(),
            open_positions: self.executor.open_positions(),
            portfolio: self.executor.portfolio_snapshot(),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            server_time: Utc::now().timestamp_millis(),
        }
    }

    /// Per-security indicator readout over the stored 5m bars. Values are
    /// absent until enough history has accumulated.
    fn build_indicator_readouts(&self) -> Vec<SecurityIndicators> {
        self.config
            .subscription_set
            .iter()
            .map(|entry| {
                let key = CandleKey {
                    security_id: entry.security_id,
                    interval: Interval::M5,
                };
                let candles = self.store.get_closed(&key, 100);
                let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

                let pattern = (candles.len() >= 2)
                    .then(|| {
                        indicators::detect_pattern(
                            &candles[candles.len() - 2],
                            &candles[candles.len() - 1],
                        )
                    })
                    .flatten()
                    .map(|p| format!("{p:?}"));

                SecurityIndicators {
                    security_id: entry.security_id,
                    ema_9: indicators::calculate_ema(&closes, 9).last().copied(),
                    ema_21: indicators::calculate_ema(&closes, 21).last().copied(),
                    rsi_14: indicators::calculate_rsi(&closes, 14).last().copied(),
                    atr_14: indicators::calculate_atr(&candles, 14).last().copied(),
                    adx_14: indicators::calculate_adx(&candles, 14).last().copied(),
                    bollinger_width: indicators::calculate_bollinger(&closes, 20, 2.0)
                        .map(|b| b.upper - b.lower),
                    macd_histogram: indicators::calculate_macd(&closes, 12, 26, 9)
                        .and_then(|m| m.histogram.last().copied()),
                    pattern,
                }
            })
            .collect()
    }
}

/// Latest indicator values for one tracked security.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityIndicators {
    pub security_id: u32,
    pub ema_9: Option<f64>,
    pub ema_21: Option<f64>,
    pub rsi_14: Option<f64>,
    pub atr_14: Option<f64>,
    pub adx_14: Option<f64>,
    pub bollinger_width: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub pattern: Option<String>,
}

/// Initial state pushed to every new hub subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub connection: ConnectionStatus,
    pub session_open: bool,
    pub subscriptions: Vec<SubscriptionEntry>,
    pub candle_intervals: Vec<Interval>,
    pub stored_candles: usize,
    pub indicators: Vec<SecurityIndicators>,
    pub strategies: Vec<StrategyStatus>,
    pub executor_halted: bool,
    pub open_positions: Vec<Position>,
    pub portfolio: Option<Portfolio>,
    pub persistence_failures: u64,
    pub server_time: i64,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<AppState> {
        let config = EngineConfig::default();
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let executor = Arc::new(PaperExecutor::new(
            Portfolio::new(&config.user_id, config.total_capital, config.max_daily_loss()),
            config.lot_size,
            true,
        ));
        Arc::new(AppState::new(
            config,
            storage,
            executor,
            StrategyEngine::with_default_strategies(),
            EventBus::new(),
        ))
    }

    #[test]
    fn snapshot_reflects_configuration() {
        let state = state();
        let snapshot = state.build_status_snapshot();
        assert!(!snapshot.connection.connected);
        assert_eq!(snapshot.subscriptions.len(), 1);
        assert_eq!(snapshot.strategies.len(), 3);
        assert!(!snapshot.executor_halted);
        assert!(snapshot.portfolio.is_some());
        assert_eq!(snapshot.persistence_failures, 0);
    }

    #[test]
    fn non_fatal_failures_are_counted() {
        let state = state();
        state.persist_non_fatal(Err(anyhow::anyhow!("disk on fire")), "test");
        state.persist_non_fatal(Err(anyhow::anyhow!("still on fire")), "test");
        assert_eq!(state.persistence_failures.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn snapshot_serialises() {
        let state = state();
        let snapshot = state.build_status_snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("connection").is_some());
        assert!(json.get("strategies").is_some());
        assert!(json.get("portfolio").is_some());
        assert!(json.get("indicators").is_some());
    }

    #[test]
    fn indicator_readouts_fill_in_with_history() {
        use crate::market_data::Candle;

        let state = state();
        let snapshot = state.build_status_snapshot();
        assert_eq!(snapshot.indicators.len(), 1);
        assert!(snapshot.indicators[0].rsi_14.is_none());

        for i in 0..60 {
            let close = 100.0 + (i as f64 * 0.4).sin() * 3.0;
            state.store.push_closed(Candle {
                security_id: 13,
                interval: Interval::M5,
                timestamp: i * 300_000,
                open: close - 0.2,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000,
                avg_imbalance: 1.0,
                avg_spread: 0.0,
                avg_strength: 0.0,
                is_closed: true,
            });
        }

        let readout = &state.build_status_snapshot().indicators[0];
        assert!(readout.ema_9.is_some());
        assert!(readout.ema_21.is_some());
        assert!(readout.rsi_14.is_some());
        assert!(readout.atr_14.is_some());
        assert!(readout.adx_14.is_some());
        assert!(readout.bollinger_width.is_some());
        assert!(readout.macd_histogram.is_some());
    }
}
