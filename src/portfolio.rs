// =============================================================================
// Portfolio — virtual capital accounting
// =============================================================================
//
// Identity maintained by every mutation:
//
//   available_capital + used_margin == total_capital + total_pnl
//
// Opening a trade moves value from available capital into margin at the fill
// price; closing releases the margin and books the realised PnL on both
// sides of the identity. Losing trades accumulate `current_daily_loss`,
// which only the daily reset winds back.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::info;

/// Per-user paper portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub user_id: String,
    pub total_capital: f64,
    pub available_capital: f64,
    pub used_margin: f64,
    pub today_pnl: f64,
    pub total_pnl: f64,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub max_daily_loss: f64,
    pub current_daily_loss: f64,
}

impl Portfolio {
    pub fn new(user_id: impl Into<String>, total_capital: f64, max_daily_loss: f64) -> Self {
        Self {
            user_id: user_id.into(),
            total_capital,
            available_capital: total_capital,
            used_margin: 0.0,
            today_pnl: 0.0,
            total_pnl: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            max_daily_loss,
            current_daily_loss: 0.0,
        }
    }

    /// True when the daily loss cap has been reached.
    pub fn daily_loss_exhausted(&self) -> bool {
        self.current_daily_loss >= self.max_daily_loss
    }

    /// Reserve margin for a new position at the fill price.
    ///
    /// The caller must have verified `available_capital` covers the value;
    /// this only moves the books.
    pub fn reserve(&mut self, position_value: f64) {
        self.available_capital -= position_value;
        self.used_margin += position_value;
    }

    /// Release a closed position's margin and book its realised PnL.
    pub fn settle(&mut self, entry_value: f64, realized_pnl: f64) {
        self.available_capital += entry_value + realized_pnl;
        self.used_margin -= entry_value;
        self.total_pnl += realized_pnl;
        self.today_pnl += realized_pnl;

        self.total_trades += 1;
        if realized_pnl > 0.0 {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
            self.current_daily_loss += realized_pnl.abs();
        }
        self.win_rate = if self.total_trades > 0 {
            self.winning_trades as f64 / self.total_trades as f64
        } else {
            0.0
        };
    }

    /// Zero the per-day counters at the daily reset.
    pub fn daily_reset(&mut self) {
        info!(
            user = %self.user_id,
            today_pnl = self.today_pnl,
            daily_loss = self.current_daily_loss,
            "portfolio daily reset"
        );
        self.today_pnl = 0.0;
        self.current_daily_loss = 0.0;
    }

    /// The accounting identity, exposed for tests and the status snapshot.
    pub fn identity_holds(&self) -> bool {
        let lhs = self.available_capital + self.used_margin;
        let rhs = self.total_capital + self.total_pnl;
        (lhs - rhs).abs() < 1e-6
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn portfolio() -> Portfolio {
        Portfolio::new("paper", 20_000.0, 600.0)
    }

    #[test]
    fn fresh_portfolio_identity() {
        let p = portfolio();
        assert!(p.identity_holds());
        assert_eq!(p.available_capital, 20_000.0);
        assert_eq!(p.win_rate, 0.0);
    }

    #[test]
    fn reserve_preserves_identity() {
        let mut p = portfolio();
        p.reserve(8_250.0);
        assert_eq!(p.available_capital, 11_750.0);
        assert_eq!(p.used_margin, 8_250.0);
        assert!(p.identity_holds());
    }

    #[test]
    fn winning_settle_books_profit() {
        let mut p = portfolio();
        p.reserve(8_250.0);
        p.settle(8_250.0, 500.0);
        assert_eq!(p.available_capital, 20_500.0);
        assert_eq!(p.used_margin, 0.0);
        assert_eq!(p.total_pnl, 500.0);
        assert_eq!(p.today_pnl, 500.0);
        assert_eq!(p.winning_trades, 1);
        assert_eq!(p.losing_trades, 0);
        assert_eq!(p.current_daily_loss, 0.0);
        assert_eq!(p.win_rate, 1.0);
        assert!(p.identity_holds());
    }

    #[test]
    fn losing_settle_accumulates_daily_loss() {
        let mut p = portfolio();
        p.reserve(15_000.0);
        p.settle(15_000.0, -15_000.0);
        assert_eq!(p.available_capital, 5_000.0);
        assert_eq!(p.current_daily_loss, 15_000.0);
        assert_eq!(p.losing_trades, 1);
        assert!(p.daily_loss_exhausted());
        assert!(p.identity_holds());
    }

    #[test]
    fn zero_pnl_counts_as_loss() {
        let mut p = portfolio();
        p.reserve(1_000.0);
        p.settle(1_000.0, 0.0);
        assert_eq!(p.losing_trades, 1);
        assert_eq!(p.current_daily_loss, 0.0);
    }

    #[test]
    fn trade_tallies_are_consistent() {
        let mut p = portfolio();
        for pnl in [100.0, -50.0, 200.0, -25.0, 75.0] {
            p.reserve(1_000.0);
            p.settle(1_000.0, pnl);
        }
        assert_eq!(p.total_trades, 5);
        assert_eq!(p.winning_trades + p.losing_trades, p.total_trades);
        assert!((p.win_rate - 0.6).abs() < 1e-12);
        assert_eq!(p.current_daily_loss, 75.0);
        assert!(p.identity_holds());
    }

    #[test]
    fn available_after_close_equals_before_open_plus_pnl() {
        let mut p = portfolio();
        let before = p.available_capital;
        p.reserve(5_000.0);
        p.settle(5_000.0, -300.0);
        assert!((p.available_capital - (before - 300.0)).abs() < 1e-9);
    }

    #[test]
    fn daily_reset_zeroes_day_counters_only() {
        let mut p = portfolio();
        p.reserve(1_000.0);
        p.settle(1_000.0, -200.0);
        p.daily_reset();
        assert_eq!(p.today_pnl, 0.0);
        assert_eq!(p.current_daily_loss, 0.0);
        assert_eq!(p.total_pnl, -200.0);
        assert_eq!(p.total_trades, 1);
        assert!(p.identity_holds());
    }
}
