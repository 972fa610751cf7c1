// =============================================================================
// Pipeline — ordered consumer from the feed to every downstream component
// =============================================================================
//
// A single task drains the feed channel, which preserves per-security tick
// order through metrics, candles, strategies, and the executor. All the work
// in here is in-memory and non-blocking; sockets and timers live elsewhere.
//
// Per packet:
//   Full/Quote/Ticker -> enriched tick -> persist, aggregate, mark positions
//   candle close      -> store, persist, dispatch strategies, execute signals
//   20-level ladders  -> depth analytics fan-out
//   PrevClose/OI      -> per-security enrichment caches
//
// `handle_packet` is synchronous so tests and the replay subcommand can
// drive the whole engine without sockets.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::events::EngineEvent;
use crate::feed::{FeedPacket, FrameHeader, QuoteData};
use crate::market_data::{
    depth_metrics, Candle, CandleAggregator, DepthMetrics, EnrichedTick, MarketDepth,
    VolumeDeltaTracker,
};
use crate::types::{ExchangeSegment, Side};

/// Counters reported after a replay run.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub ticks: u64,
    pub candles_closed: u64,
    pub signals: u64,
    pub ignored_packets: u64,
}

pub struct Pipeline {
    state: Arc<AppState>,
    aggregator: CandleAggregator,
    delta: VolumeDeltaTracker,
    prev_closes: HashMap<u32, f64>,
    last_oi: HashMap<u32, i64>,
    /// Latest cumulative session volume, reused for price-only ticks.
    last_volume: HashMap<u32, i64>,
    /// Latest full-depth metrics per security; closing bars borrow the
    /// liquidity and flow-delta terms from here.
    last_metrics: HashMap<u32, DepthMetrics>,
    pub stats: PipelineStats,
}

impl Pipeline {
    pub fn new(state: Arc<AppState>) -> Self {
        let aggregator = CandleAggregator::new(
            state.config.candle_intervals.clone(),
            state.clock.tz(),
        );
        Self {
            state,
            aggregator,
            delta: VolumeDeltaTracker::new(),
            prev_closes: HashMap::new(),
            last_oi: HashMap::new(),
            last_volume: HashMap::new(),
            last_metrics: HashMap::new(),
            stats: PipelineStats::default(),
        }
    }

    /// Consume feed packets until the channel closes or shutdown fires, then
    /// flush open candles and persist positions.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<FeedPacket>,
        mut shutdown: watch::Receiver<bool>,
    ) -> PipelineStats {
        loop {
            tokio::select! {
                packet = rx.recv() => {
                    match packet {
                        Some(packet) => self.handle_packet(packet),
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.flush();
        self.stats.clone()
    }

    /// Process one parsed packet. Synchronous by design.
    pub fn handle_packet(&mut self, packet: FeedPacket) {
        match packet {
            FeedPacket::Full {
                header,
                quote,
                oi,
                bids,
                asks,
                ..
            } => {
                let volume_delta = self.delta.update(
                    header.security_id,
                    quote.total_buy_qty,
                    quote.total_sell_qty,
                );
                let metrics = depth_metrics::compute(&bids, &asks, quote.ltp, volume_delta);
                self.last_metrics.insert(header.security_id, metrics);
                let tick = self.build_tick(
                    &header,
                    quote,
                    MarketDepth { bids, asks },
                    metrics,
                    Some(oi),
                );
                self.process_tick(tick);
            }
            FeedPacket::Quote { header, quote } => {
                let volume_delta = self.delta.update(
                    header.security_id,
                    quote.total_buy_qty,
                    quote.total_sell_qty,
                );
                let mut metrics = DepthMetrics::neutral();
                metrics.volume_delta = volume_delta;
                let tick =
                    self.build_tick(&header, quote, MarketDepth::default(), metrics, None);
                self.process_tick(tick);
            }
            FeedPacket::Ticker {
                header,
                ltp,
                ltt_epoch_s,
            } => {
                let quote = QuoteData {
                    ltp,
                    ltt_epoch_s,
                    volume: self
                        .last_volume
                        .get(&header.security_id)
                        .copied()
                        .unwrap_or(0),
                    ..QuoteData::default()
                };
                let tick = self.build_tick(
                    &header,
                    quote,
                    MarketDepth::default(),
                    DepthMetrics::neutral(),
                    None,
                );
                self.process_tick(tick);
            }
            FeedPacket::PrevClose {
                header, prev_close, ..
            } => {
                self.prev_closes.insert(header.security_id, prev_close);
            }
            FeedPacket::OpenInterest { header, oi } => {
                self.last_oi.insert(header.security_id, oi);
            }
            FeedPacket::DepthBids { header, levels } => {
                let analytics =
                    self.state
                        .depth_books
                        .update_side(header.security_id, Side::Buy, levels);
                self.state.bus.publish(EngineEvent::DepthAnalytics(analytics));
            }
            FeedPacket::DepthAsks { header, levels } => {
                let analytics =
                    self.state
                        .depth_books
                        .update_side(header.security_id, Side::Sell, levels);
                self.state.bus.publish(EngineEvent::DepthAnalytics(analytics));
            }
            FeedPacket::Disconnect { .. } => {
                // The feed client consumes these before they reach us.
                self.stats.ignored_packets += 1;
            }
        }
    }

    fn build_tick(
        &mut self,
        header: &FrameHeader,
        quote: QuoteData,
        depth: MarketDepth,
        metrics: DepthMetrics,
        oi: Option<i64>,
    ) -> EnrichedTick {
        let security_id = header.security_id;
        if quote.volume > 0 {
            self.last_volume.insert(security_id, quote.volume);
        }
        EnrichedTick {
            security_id,
            segment: ExchangeSegment::from_code(header.segment_code)
                .unwrap_or(ExchangeSegment::Index),
            ltp: quote.ltp,
            ltq: quote.ltq,
            ltt: quote.ltt_epoch_s * 1_000,
            open: quote.open,
            high: quote.high,
            low: quote.low,
            close: quote.close,
            atp: quote.atp,
            volume: quote.volume,
            total_buy_qty: quote.total_buy_qty,
            total_sell_qty: quote.total_sell_qty,
            oi: oi.or_else(|| self.last_oi.get(&security_id).copied()).unwrap_or(0),
            depth,
            metrics,
            prev_close: self.prev_closes.get(&security_id).copied(),
            captured_at: Utc::now(),
        }
    }

    fn process_tick(&mut self, tick: EnrichedTick) {
        self.stats.ticks += 1;
        let now = event_time(&tick);

        self.state
            .persist_non_fatal(self.state.storage.insert_tick(&tick), "tick");

        let result = self.aggregator.update(&tick);
        for candle in &result.updated {
            self.state
                .bus
                .publish(EngineEvent::CandleUpdate(candle.clone()));
        }
        for candle in result.closed {
            self.on_candle_closed(candle, now);
        }

        let sweep = self.state.executor.on_tick(tick.security_id, tick.ltp, now);
        for position in sweep.updated {
            self.state.record_position_mark(&position);
        }
        for trade in sweep.closed {
            self.state.record_closed_trade(&trade);
        }

        self.state.bus.publish(EngineEvent::Tick(tick));
    }

    fn on_candle_closed(&mut self, candle: Candle, now: DateTime<Utc>) {
        self.stats.candles_closed += 1;
        debug!(key = %candle.key(), ts = candle.timestamp, close = candle.close, "bar closed");

        self.state.store.push_closed(candle.clone());
        self.state
            .persist_non_fatal(self.state.storage.upsert_candle(&candle), "candle");
        self.state
            .bus
            .publish(EngineEvent::CandleClose(candle.clone()));

        // The bar carries its own averaged metrics; liquidity and flow delta
        // come from the latest full-depth observation.
        let latest = self
            .last_metrics
            .get(&candle.security_id)
            .copied()
            .unwrap_or_default();
        let metrics = DepthMetrics {
            bid_ask_imbalance: candle.avg_imbalance,
            depth_spread: candle.avg_spread,
            order_book_strength: candle.avg_strength,
            volume_delta: latest.volume_delta,
            liquidity_score: latest.liquidity_score,
        };

        let analytics = self.state.depth_books.analytics(candle.security_id);
        let sentiment = self
            .state
            .option_sentiment
            .read()
            .get(&candle.security_id)
            .cloned();

        let dispatch = self.state.engine.lock().on_candle_close(
            &candle,
            &metrics,
            &self.state.config,
            &self.state.store,
            analytics,
            sentiment,
        );

        for report in dispatch.reports {
            self.state
                .bus
                .publish(EngineEvent::AccumulationReport(report));
        }

        if dispatch.signals.is_empty() {
            return;
        }
        self.stats.signals += dispatch.signals.len() as u64;
        for signal in dispatch.signals {
            let report = self.state.executor.execute_signal(signal, now);
            self.state.record_execution(report);
        }
        self.state.publish_strategy_statuses();
    }

    /// Shutdown path: close open bars and persist the open positions.
    pub fn flush(&mut self) {
        let closed = self.aggregator.close_all();
        if !closed.is_empty() {
            info!(count = closed.len(), "closing open candles on shutdown");
        }
        for candle in closed {
            self.state.store.push_closed(candle.clone());
            self.state
                .persist_non_fatal(self.state.storage.upsert_candle(&candle), "candle");
            self.state.bus.publish(EngineEvent::CandleClose(candle));
        }
        for position in self.state.executor.open_positions() {
            self.state
                .persist_non_fatal(self.state.storage.upsert_position(&position), "position");
        }
    }
}

fn event_time(tick: &EnrichedTick) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(tick.event_time_ms())
        .single()
        .unwrap_or_else(Utc::now)
}
