// =============================================================================
// Scheduler — exchange-local session clock, daily reset, EOD square-off
// =============================================================================
//
// A 60-second probe drives the two time-triggered sweeps:
//
//   09:00  daily reset    — strategy state + portfolio day counters
//   15:20  EOD square-off — force-close every open position
//
// Each sweep runs at most once per exchange-local day, so a probe landing
// twice inside the trigger minute stays idempotent. TTL purges piggyback on
// the same probe.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::config::EngineConfig;

/// Exchange-local time helpers derived from the configuration.
#[derive(Debug, Clone)]
pub struct SessionClock {
    tz: FixedOffset,
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    pub eod_square_off: NaiveTime,
    pub daily_reset: NaiveTime,
}

impl SessionClock {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            tz: config.timezone(),
            market_open: config.market_open_time(),
            market_close: config.market_close_time(),
            eod_square_off: config.eod_square_off_time(),
            daily_reset: config.daily_reset_time(),
        }
    }

    pub fn tz(&self) -> FixedOffset {
        self.tz
    }

    /// Epoch milliseconds to exchange-local time.
    pub fn local(&self, ts_ms: i64) -> DateTime<FixedOffset> {
        self.tz
            .timestamp_millis_opt(ts_ms)
            .single()
            .unwrap_or_else(|| self.tz.timestamp_millis_opt(0).single().expect("epoch"))
    }

    pub fn now_local(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.tz)
    }

    /// True between market open and close (inclusive bounds).
    pub fn in_session(&self, now: &DateTime<FixedOffset>) -> bool {
        let t = now.time();
        t >= self.market_open && t <= self.market_close
    }

    /// A sweep with trigger time `at` is due when the local clock has passed
    /// it and it has not yet run today.
    pub fn sweep_due(
        &self,
        now: &DateTime<FixedOffset>,
        at: NaiveTime,
        last_run: Option<NaiveDate>,
    ) -> bool {
        now.time() >= at && last_run != Some(now.date_naive())
    }
}

/// Run the probe loop until shutdown.
pub async fn run_scheduler(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let clock = state.clock.clone();
    let mut probe = tokio::time::interval(std::time::Duration::from_secs(60));
    let mut last_reset: Option<NaiveDate> = None;
    let mut last_eod: Option<NaiveDate> = None;

    info!(
        reset = %clock.daily_reset,
        square_off = %clock.eod_square_off,
        "scheduler started"
    );

    loop {
        tokio::select! {
            _ = probe.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scheduler stopping");
                    return;
                }
                continue;
            }
        }

        let now_local = clock.now_local();
        let today = now_local.date_naive();

        if clock.sweep_due(&now_local, clock.daily_reset, last_reset) {
            last_reset = Some(today);
            run_daily_reset(&state);
        }

        if clock.sweep_due(&now_local, clock.eod_square_off, last_eod) {
            last_eod = Some(today);
            run_eod_sweep(&state);
        }

        if let Err(e) = state.storage.purge_expired(Utc::now().timestamp_millis()) {
            warn!(error = %e, "ttl purge failed");
        }
    }
}

fn run_daily_reset(state: &Arc<AppState>) {
    info!("daily reset sweep");
    state.engine.lock().daily_reset();
    if let Some(portfolio) = state.executor.daily_reset() {
        state.persist_non_fatal(state.storage.upsert_portfolio(&portfolio), "portfolio");
        state
            .bus
            .publish(crate::events::EngineEvent::PortfolioUpdate(portfolio));
    }
    state.publish_strategy_statuses();
}

fn run_eod_sweep(state: &Arc<AppState>) {
    let closed = state.executor.square_off_all(Utc::now());
    if closed.is_empty() {
        return;
    }
    info!(count = closed.len(), "EOD square-off sweep");
    for trade in &closed {
        state.record_closed_trade(trade);
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> SessionClock {
        SessionClock::from_config(&EngineConfig::default())
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(330 * 60)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 2, h, m, s)
            .unwrap()
    }

    #[test]
    fn session_bounds() {
        let clock = clock();
        assert!(!clock.in_session(&at(9, 14, 59)));
        assert!(clock.in_session(&at(9, 15, 0)));
        assert!(clock.in_session(&at(15, 30, 0)));
        assert!(!clock.in_session(&at(15, 31, 0)));
    }

    #[test]
    fn sweep_fires_once_per_day() {
        let clock = clock();
        let eod = clock.eod_square_off;
        let now = at(15, 20, 0);

        assert!(clock.sweep_due(&now, eod, None));
        // Already ran today: the next probe inside the minute is a no-op.
        assert!(!clock.sweep_due(&now, eod, Some(now.date_naive())));
        // A new day re-arms it.
        let yesterday = now.date_naive().pred_opt().unwrap();
        assert!(clock.sweep_due(&now, eod, Some(yesterday)));
    }

    #[test]
    fn sweep_not_due_before_trigger() {
        let clock = clock();
        assert!(!clock.sweep_due(&at(15, 19, 59), clock.eod_square_off, None));
        assert!(clock.sweep_due(&at(15, 20, 0), clock.eod_square_off, None));
        assert!(clock.sweep_due(&at(15, 59, 0), clock.eod_square_off, None));
    }

    #[test]
    fn reset_trigger_uses_config_time() {
        let clock = clock();
        assert!(!clock.sweep_due(&at(8, 59, 0), clock.daily_reset, None));
        assert!(clock.sweep_due(&at(9, 0, 0), clock.daily_reset, None));
    }

    #[test]
    fn local_conversion_is_exchange_zone() {
        let clock = clock();
        // 04:30 UTC == 10:00 IST.
        let utc_ms = Utc
            .with_ymd_and_hms(2024, 1, 2, 4, 30, 0)
            .unwrap()
            .timestamp_millis();
        let local = clock.local(utc_ms);
        assert_eq!(local.time(), NaiveTime::from_hms_opt(10, 0, 0).unwrap());
    }
}
