// =============================================================================
// Paper-Trading Executor — simulated fills, position tracking, square-off
// =============================================================================
//
// Life-cycle: a signal is validated against the portfolio, filled with an
// adverse slippage model, and becomes an executed order plus an open
// position. Every tick for the position's security updates its mark and
// checks stop (before target); the EOD sweep force-closes whatever is left.
// Closing synthesizes an exit order and settles the portfolio.
//
// Rejections mark the signal rejected with a reason and never raise.
//
// Thread-safety: portfolio and position lists live behind parking_lot locks;
// per-position mutation is serialized by them.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use uuid::Uuid;

use crate::portfolio::Portfolio;
use crate::strategies::{Signal, SignalStatus};
use crate::types::{PositionSide, Side};

/// Closed positions retained in memory for the hub.
const CLOSED_RING: usize = 500;

// =============================================================================
// Orders & positions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Executed,
}

/// A simulated order. Entry orders are one-to-one with executed signals;
/// exit orders are synthesized when a position closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub signal_id: String,
    pub security_id: u32,
    pub side: Side,
    pub quantity: u32,
    pub requested_price: f64,
    pub fill_price: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    Stop,
    Target,
    Eod,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub signal_id: String,
    pub security_id: u32,
    pub strategy: String,
    pub side: PositionSide,
    pub quantity: u32,
    pub entry_price: f64,
    pub current_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Why a signal was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    NoPortfolio,
    DailyLossLimit,
    InsufficientCapital,
    DuplicateOpenPosition,
    ExecutorHalted,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPortfolio => "noPortfolio",
            Self::DailyLossLimit => "dailyLossLimit",
            Self::InsufficientCapital => "insufficientCapital",
            Self::DuplicateOpenPosition => "duplicateOpenPosition",
            Self::ExecutorHalted => "executorHalted",
        }
    }
}

/// Result of processing one signal. The signal inside carries its terminal
/// status either way.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub signal: Signal,
    pub order: Option<Order>,
    pub position: Option<Position>,
    pub portfolio: Option<Portfolio>,
    pub rejection: Option<RejectionReason>,
}

/// A position close together with its synthesized exit order and the
/// portfolio snapshot after settlement.
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub position: Position,
    pub exit_order: Order,
    pub portfolio: Portfolio,
}

/// Result of marking one tick against the open positions.
#[derive(Debug, Default)]
pub struct TickSweep {
    pub updated: Vec<Position>,
    pub closed: Vec<ClosedTrade>,
}

// =============================================================================
// Executor
// =============================================================================

pub struct PaperExecutor {
    portfolio: RwLock<Option<Portfolio>>,
    open: RwLock<Vec<Position>>,
    closed: RwLock<Vec<Position>>,
    /// Instrument lot size, used to scale the size term of the slippage.
    lot_size: u32,
    /// Replay mode: slippage jitter off so runs are reproducible.
    deterministic: bool,
    /// Set when position persistence fails permanently; refuses new signals.
    halted: AtomicBool,
}

impl PaperExecutor {
    pub fn new(portfolio: Portfolio, lot_size: u32, deterministic: bool) -> Self {
        Self {
            portfolio: RwLock::new(Some(portfolio)),
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
            lot_size: lot_size.max(1),
            deterministic,
            halted: AtomicBool::new(false),
        }
    }

    /// An executor with no portfolio attached; every signal is rejected with
    /// `noPortfolio` until one is set.
    pub fn without_portfolio(lot_size: u32, deterministic: bool) -> Self {
        Self {
            portfolio: RwLock::new(None),
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
            lot_size: lot_size.max(1),
            deterministic,
            halted: AtomicBool::new(false),
        }
    }

    pub fn set_portfolio(&self, portfolio: Portfolio) {
        *self.portfolio.write() = Some(portfolio);
    }

    /// Reload open positions persisted by a previous run.
    pub fn restore_positions(&self, positions: Vec<Position>) {
        let mut open = self.open.write();
        for p in positions {
            if p.status == PositionStatus::Open {
                open.push(p);
            }
        }
    }

    pub fn portfolio_snapshot(&self) -> Option<Portfolio> {
        self.portfolio.read().clone()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.open.read().clone()
    }

    pub fn closed_positions(&self, count: usize) -> Vec<Position> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }

    /// Stop accepting signals after a persistent position-write failure.
    pub fn halt(&self) {
        warn!("executor halted — new signal execution disabled");
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Market-open reset of the portfolio day counters.
    pub fn daily_reset(&self) -> Option<Portfolio> {
        let mut guard = self.portfolio.write();
        let portfolio = guard.as_mut()?;
        portfolio.daily_reset();
        Some(portfolio.clone())
    }

    // -------------------------------------------------------------------------
    // Signal execution
    // -------------------------------------------------------------------------

    /// Validate a signal and simulate its fill.
    pub fn execute_signal(&self, mut signal: Signal, now: DateTime<Utc>) -> ExecutionReport {
        if self.is_halted() {
            return self.reject(signal, RejectionReason::ExecutorHalted, now);
        }

        let mut guard = self.portfolio.write();
        let Some(portfolio) = guard.as_mut() else {
            drop(guard);
            return self.reject(signal, RejectionReason::NoPortfolio, now);
        };

        if portfolio.daily_loss_exhausted() {
            drop(guard);
            return self.reject(signal, RejectionReason::DailyLossLimit, now);
        }

        let duplicate = self
            .open
            .read()
            .iter()
            .any(|p| p.strategy == signal.strategy && p.security_id == signal.security_id);
        if duplicate {
            drop(guard);
            return self.reject(signal, RejectionReason::DuplicateOpenPosition, now);
        }

        let required = signal.price * signal.quantity as f64;
        if portfolio.available_capital < required {
            drop(guard);
            return self.reject(signal, RejectionReason::InsufficientCapital, now);
        }

        let fill_price = self.simulate_fill(&signal);
        let position_value = fill_price * signal.quantity as f64;
        portfolio.reserve(position_value);
        let portfolio_snapshot = portfolio.clone();
        drop(guard);

        let order = Order {
            id: Uuid::new_v4().to_string(),
            signal_id: signal.id.clone(),
            security_id: signal.security_id,
            side: signal.side,
            quantity: signal.quantity,
            requested_price: signal.price,
            fill_price,
            status: OrderStatus::Executed,
            created_at: now,
            filled_at: Some(now),
        };

        let position = Position {
            id: Uuid::new_v4().to_string(),
            signal_id: signal.id.clone(),
            security_id: signal.security_id,
            strategy: signal.strategy.clone(),
            side: PositionSide::from_entry(signal.side),
            quantity: signal.quantity,
            entry_price: fill_price,
            current_price: fill_price,
            stop_loss: signal.stop_loss,
            target: signal.target,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            status: PositionStatus::Open,
            opened_at: now,
            closed_at: None,
            close_reason: None,
        };
        self.open.write().push(position.clone());

        signal.status = SignalStatus::Executed;
        signal.decided_at = Some(now);

        info!(
            signal_id = %signal.id,
            strategy = %signal.strategy,
            side = %signal.side,
            requested = signal.price,
            fill = fill_price,
            quantity = signal.quantity,
            "signal executed"
        );

        ExecutionReport {
            signal,
            order: Some(order),
            position: Some(position),
            portfolio: Some(portfolio_snapshot),
            rejection: None,
        }
    }

    fn reject(
        &self,
        mut signal: Signal,
        reason: RejectionReason,
        now: DateTime<Utc>,
    ) -> ExecutionReport {
        signal.status = SignalStatus::Rejected;
        signal.decided_at = Some(now);
        signal.rejection_reason = Some(reason.as_str().to_string());
        warn!(
            signal_id = %signal.id,
            strategy = %signal.strategy,
            reason = reason.as_str(),
            "signal rejected"
        );
        ExecutionReport {
            signal,
            order: None,
            position: None,
            portfolio: None,
            rejection: Some(reason),
        }
    }

    // -------------------------------------------------------------------------
    // Slippage
    // -------------------------------------------------------------------------

    /// Simulated fill, always adverse to the trade direction:
    /// 5 bps base, a liquidity penalty below score 70, 0.5 bps per extra
    /// lot, and (live mode only) a +/- 0.5 bps jitter. Rounded to 2 decimals.
    fn simulate_fill(&self, signal: &Signal) -> f64 {
        let liquidity = signal.depth_snapshot.liquidity_score;
        let mut bps = 5.0;
        if liquidity < 70.0 {
            bps += ((70.0 - liquidity) / 70.0) * 2.0;
        }
        let lots = (signal.quantity / self.lot_size).max(1);
        if lots > 1 {
            bps += 0.5 * (lots - 1) as f64;
        }
        if !self.deterministic {
            bps += rand::thread_rng().gen_range(-0.5..=0.5);
        }

        let pct = bps / 10_000.0;
        let fill = match signal.side {
            Side::Buy => signal.price * (1.0 + pct),
            Side::Sell => signal.price * (1.0 - pct),
        };
        (fill * 100.0).round() / 100.0
    }

    // -------------------------------------------------------------------------
    // Tick updates
    // -------------------------------------------------------------------------

    /// Mark every open position for `security_id` against the latest trade
    /// price; stops are checked before targets and equality triggers.
    pub fn on_tick(&self, security_id: u32, ltp: f64, now: DateTime<Utc>) -> TickSweep {
        let mut sweep = TickSweep::default();
        let mut to_close: Vec<(Position, CloseReason)> = Vec::new();

        {
            let mut open = self.open.write();
            for pos in open.iter_mut().filter(|p| p.security_id == security_id) {
                pos.current_price = ltp;
                pos.unrealized_pnl = pos.side.sign() * (ltp - pos.entry_price) * pos.quantity as f64;

                let stop_hit = match pos.side {
                    PositionSide::Long => ltp <= pos.stop_loss,
                    PositionSide::Short => ltp >= pos.stop_loss,
                };
                let target_hit = match pos.side {
                    PositionSide::Long => ltp >= pos.target,
                    PositionSide::Short => ltp <= pos.target,
                };

                if stop_hit {
                    to_close.push((pos.clone(), CloseReason::Stop));
                } else if target_hit {
                    to_close.push((pos.clone(), CloseReason::Target));
                } else {
                    sweep.updated.push(pos.clone());
                }
            }
        }

        for (pos, reason) in to_close {
            if let Some(closed) = self.close_position(&pos.id, ltp, reason, now) {
                sweep.closed.push(closed);
            }
        }

        sweep
    }

    // -------------------------------------------------------------------------
    // Closing
    // -------------------------------------------------------------------------

    /// Close an open position at `exit_price`. Settles the portfolio and
    /// synthesizes the exit order. Returns `None` for an unknown id.
    pub fn close_position(
        &self,
        position_id: &str,
        exit_price: f64,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Option<ClosedTrade> {
        let mut pos = {
            let mut open = self.open.write();
            let idx = open.iter().position(|p| p.id == position_id)?;
            open.remove(idx)
        };

        let realized = pos.side.sign() * (exit_price - pos.entry_price) * pos.quantity as f64;
        let entry_value = pos.entry_price * pos.quantity as f64;

        let portfolio_snapshot = {
            let mut guard = self.portfolio.write();
            match guard.as_mut() {
                Some(portfolio) => {
                    portfolio.settle(entry_value, realized);
                    portfolio.clone()
                }
                // A portfolio must exist for an open position; fall back to a
                // zeroed snapshot rather than dropping the close.
                None => Portfolio::new("unknown", 0.0, 0.0),
            }
        };

        pos.current_price = exit_price;
        pos.unrealized_pnl = 0.0;
        pos.realized_pnl = realized;
        pos.status = PositionStatus::Closed;
        pos.closed_at = Some(now);
        pos.close_reason = Some(reason);

        let exit_order = Order {
            id: Uuid::new_v4().to_string(),
            signal_id: pos.signal_id.clone(),
            security_id: pos.security_id,
            side: match pos.side {
                PositionSide::Long => Side::Sell,
                PositionSide::Short => Side::Buy,
            },
            quantity: pos.quantity,
            requested_price: exit_price,
            fill_price: exit_price,
            status: OrderStatus::Executed,
            created_at: now,
            filled_at: Some(now),
        };

        info!(
            position_id = %pos.id,
            strategy = %pos.strategy,
            reason = ?reason,
            exit_price,
            realized,
            "position closed"
        );

        {
            let mut closed = self.closed.write();
            closed.push(pos.clone());
            while closed.len() > CLOSED_RING {
                closed.remove(0);
            }
        }

        Some(ClosedTrade {
            position: pos,
            exit_order,
            portfolio: portfolio_snapshot,
        })
    }

    /// End-of-day sweep: close every open position at its current mark with
    /// reason `eod`. Safe to call repeatedly; an empty book is a no-op.
    pub fn square_off_all(&self, now: DateTime<Utc>) -> Vec<ClosedTrade> {
        let snapshot: Vec<(String, f64)> = self
            .open
            .read()
            .iter()
            .map(|p| (p.id.clone(), p.current_price))
            .collect();

        let mut closed = Vec::with_capacity(snapshot.len());
        for (id, price) in snapshot {
            if let Some(trade) = self.close_position(&id, price, CloseReason::Eod, now) {
                closed.push(trade);
            }
        }
        if !closed.is_empty() {
            info!(count = closed.len(), "end-of-day square-off complete");
        }
        closed
    }
}
