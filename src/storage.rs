// =============================================================================
// Storage — SQLite persistence with TTL maintenance
// =============================================================================
//
// Append-only ticks (24 h TTL), candle upserts keyed by
// (security, interval, bar start) with a 7-day TTL on 1-minute bars, and
// CRUD for signals, orders, positions, portfolios, and instruments.
//
// WAL mode keeps readers off the writer's back. All access goes through a
// parking_lot::Mutex<Connection>; statements are short and the pipeline
// treats every failure here as non-fatal (logged and counted upstream),
// except position writes, which the caller retries.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::executor::{Order, Position};
use crate::market_data::{Candle, CandleKey, EnrichedTick, Interval};
use crate::portfolio::Portfolio;
use crate::strategies::Signal;
use crate::types::Instrument;

/// Tick retention.
const TICK_TTL_MS: i64 = 24 * 3_600 * 1_000;
/// Retention for 1-minute candles; other intervals are kept indefinitely.
const M1_CANDLE_TTL_MS: i64 = 7 * 24 * 3_600 * 1_000;

/// Position writes retry this many times with doubling backoff before the
/// caller halts execution.
const POSITION_WRITE_ATTEMPTS: u32 = 3;
const POSITION_WRITE_BACKOFF: Duration = Duration::from_millis(50);

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ticks (
    security_id INTEGER NOT NULL,
    ts          INTEGER NOT NULL,
    ltp         REAL NOT NULL,
    ltq         INTEGER NOT NULL,
    volume      INTEGER NOT NULL,
    buy_qty     INTEGER NOT NULL,
    sell_qty    INTEGER NOT NULL,
    imbalance   REAL NOT NULL,
    spread      REAL NOT NULL,
    strength    REAL NOT NULL,
    liquidity   REAL NOT NULL,
    vol_delta   REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ticks_security_ts ON ticks(security_id, ts DESC);

CREATE TABLE IF NOT EXISTS candles (
    security_id  INTEGER NOT NULL,
    interval     TEXT NOT NULL,
    ts           INTEGER NOT NULL,
    open         REAL NOT NULL,
    high         REAL NOT NULL,
    low          REAL NOT NULL,
    close        REAL NOT NULL,
    volume       INTEGER NOT NULL,
    avg_imbalance REAL NOT NULL,
    avg_spread   REAL NOT NULL,
    avg_strength REAL NOT NULL,
    is_closed    INTEGER NOT NULL,
    PRIMARY KEY (security_id, interval, ts)
);

CREATE TABLE IF NOT EXISTS signals (
    id               TEXT PRIMARY KEY,
    strategy         TEXT NOT NULL,
    security_id      INTEGER NOT NULL,
    side             TEXT NOT NULL,
    price            REAL NOT NULL,
    stop_loss        REAL NOT NULL,
    target           REAL NOT NULL,
    quantity         INTEGER NOT NULL,
    reason           TEXT NOT NULL,
    quality_score    REAL NOT NULL,
    status           TEXT NOT NULL,
    rejection_reason TEXT,
    created_at       INTEGER NOT NULL,
    decided_at       INTEGER
);
CREATE INDEX IF NOT EXISTS idx_signals_strategy ON signals(strategy, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_signals_status ON signals(status);

CREATE TABLE IF NOT EXISTS orders (
    id              TEXT PRIMARY KEY,
    signal_id       TEXT NOT NULL,
    security_id     INTEGER NOT NULL,
    side            TEXT NOT NULL,
    quantity        INTEGER NOT NULL,
    requested_price REAL NOT NULL,
    fill_price      REAL NOT NULL,
    status          TEXT NOT NULL,
    created_at      INTEGER NOT NULL,
    filled_at       INTEGER
);

CREATE TABLE IF NOT EXISTS positions (
    id             TEXT PRIMARY KEY,
    signal_id      TEXT NOT NULL,
    security_id    INTEGER NOT NULL,
    strategy       TEXT NOT NULL,
    side           TEXT NOT NULL,
    quantity       INTEGER NOT NULL,
    entry_price    REAL NOT NULL,
    current_price  REAL NOT NULL,
    stop_loss      REAL NOT NULL,
    target         REAL NOT NULL,
    unrealized_pnl REAL NOT NULL,
    realized_pnl   REAL NOT NULL,
    status         TEXT NOT NULL,
    opened_at      INTEGER NOT NULL,
    closed_at      INTEGER,
    close_reason   TEXT
);
CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
CREATE INDEX IF NOT EXISTS idx_positions_strategy ON positions(strategy, opened_at DESC);

CREATE TABLE IF NOT EXISTS portfolios (
    user_id            TEXT PRIMARY KEY,
    total_capital      REAL NOT NULL,
    available_capital  REAL NOT NULL,
    used_margin        REAL NOT NULL,
    today_pnl          REAL NOT NULL,
    total_pnl          REAL NOT NULL,
    total_trades       INTEGER NOT NULL,
    winning_trades     INTEGER NOT NULL,
    losing_trades      INTEGER NOT NULL,
    win_rate           REAL NOT NULL,
    max_daily_loss     REAL NOT NULL,
    current_daily_loss REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS instruments (
    security_id      INTEGER PRIMARY KEY,
    symbol           TEXT NOT NULL,
    exchange_segment TEXT NOT NULL,
    lot_size         INTEGER NOT NULL,
    tick_size        REAL NOT NULL,
    display_name     TEXT
);
"#;

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Self::initialize(conn, Some(path))
    }

    /// In-memory database for tests and throwaway replays.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::initialize(conn, None)
    }

    fn initialize(conn: Connection, path: Option<&Path>) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply storage schema")?;
        if let Some(path) = path {
            info!(path = %path.display(), "storage ready");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -------------------------------------------------------------------------
    // Ticks
    // -------------------------------------------------------------------------

    /// Append one enriched tick.
    pub fn insert_tick(&self, tick: &EnrichedTick) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO ticks (security_id, ts, ltp, ltq, volume, buy_qty, sell_qty,
                                    imbalance, spread, strength, liquidity, vol_delta)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    tick.security_id,
                    tick.event_time_ms(),
                    tick.ltp,
                    tick.ltq,
                    tick.volume,
                    tick.total_buy_qty,
                    tick.total_sell_qty,
                    tick.metrics.bid_ask_imbalance,
                    tick.metrics.depth_spread,
                    tick.metrics.order_book_strength,
                    tick.metrics.liquidity_score,
                    tick.metrics.volume_delta,
                ],
            )
            .context("tick insert failed")?;
        Ok(())
    }

    pub fn tick_count(&self, security_id: u32) -> Result<u64> {
        let conn = self.conn.lock();
        let count: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM ticks WHERE security_id = ?1",
                params![security_id],
                |row| row.get(0),
            )
            .context("tick count failed")?;
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Candles
    // -------------------------------------------------------------------------

    /// Idempotent upsert keyed by (security, interval, bar start).
    pub fn upsert_candle(&self, candle: &Candle) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO candles (security_id, interval, ts, open, high, low, close,
                                      volume, avg_imbalance, avg_spread, avg_strength, is_closed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(security_id, interval, ts) DO UPDATE SET
                     open = excluded.open,
                     high = excluded.high,
                     low = excluded.low,
                     close = excluded.close,
                     volume = excluded.volume,
                     avg_imbalance = excluded.avg_imbalance,
                     avg_spread = excluded.avg_spread,
                     avg_strength = excluded.avg_strength,
                     is_closed = excluded.is_closed",
                params![
                    candle.security_id,
                    candle.interval.as_str(),
                    candle.timestamp,
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume,
                    candle.avg_imbalance,
                    candle.avg_spread,
                    candle.avg_strength,
                    candle.is_closed as i64,
                ],
            )
            .context("candle upsert failed")?;
        Ok(())
    }

    /// The most recent closed candles for a key, oldest first.
    pub fn recent_candles(&self, key: &CandleKey, count: usize) -> Result<Vec<Candle>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT ts, open, high, low, close, volume, avg_imbalance, avg_spread,
                        avg_strength, is_closed
                 FROM candles
                 WHERE security_id = ?1 AND interval = ?2 AND is_closed = 1
                 ORDER BY ts DESC LIMIT ?3",
            )
            .context("candle query prepare failed")?;

        let mut rows: Vec<Candle> = stmt
            .query_map(
                params![key.security_id, key.interval.as_str(), count as i64],
                |row| {
                    Ok(Candle {
                        security_id: key.security_id,
                        interval: key.interval,
                        timestamp: row.get(0)?,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                        avg_imbalance: row.get(6)?,
                        avg_spread: row.get(7)?,
                        avg_strength: row.get(8)?,
                        is_closed: row.get::<_, i64>(9)? != 0,
                    })
                },
            )
            .context("candle query failed")?
            .collect::<std::result::Result<_, _>>()
            .context("candle row decode failed")?;

        rows.reverse();
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Signals & orders
    // -------------------------------------------------------------------------

    pub fn upsert_signal(&self, signal: &Signal) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO signals (id, strategy, security_id, side, price, stop_loss, target,
                                      quantity, reason, quality_score, status, rejection_reason,
                                      created_at, decided_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     rejection_reason = excluded.rejection_reason,
                     decided_at = excluded.decided_at",
                params![
                    signal.id,
                    signal.strategy,
                    signal.security_id,
                    signal.side.to_string(),
                    signal.price,
                    signal.stop_loss,
                    signal.target,
                    signal.quantity,
                    signal.reason,
                    signal.quality_score,
                    signal.status.as_str(),
                    signal.rejection_reason,
                    signal.created_at.timestamp_millis(),
                    signal.decided_at.map(|t| t.timestamp_millis()),
                ],
            )
            .context("signal upsert failed")?;
        Ok(())
    }

    pub fn insert_order(&self, order: &Order) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO orders (id, signal_id, security_id, side, quantity,
                                                requested_price, fill_price, status, created_at,
                                                filled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    order.id,
                    order.signal_id,
                    order.security_id,
                    order.side.to_string(),
                    order.quantity,
                    order.requested_price,
                    order.fill_price,
                    "executed",
                    order.created_at.timestamp_millis(),
                    order.filled_at.map(|t| t.timestamp_millis()),
                ],
            )
            .context("order insert failed")?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Positions
    // -------------------------------------------------------------------------

    pub fn upsert_position(&self, position: &Position) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO positions (id, signal_id, security_id, strategy, side,
                                                   quantity, entry_price, current_price, stop_loss,
                                                   target, unrealized_pnl, realized_pnl, status,
                                                   opened_at, closed_at, close_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    position.id,
                    position.signal_id,
                    position.security_id,
                    position.strategy,
                    position.side.to_string(),
                    position.quantity,
                    position.entry_price,
                    position.current_price,
                    position.stop_loss,
                    position.target,
                    position.unrealized_pnl,
                    position.realized_pnl,
                    match position.status {
                        crate::executor::PositionStatus::Open => "open",
                        crate::executor::PositionStatus::Closed => "closed",
                    },
                    position.opened_at.timestamp_millis(),
                    position.closed_at.map(|t| t.timestamp_millis()),
                    position.close_reason.map(|r| format!("{r:?}").to_lowercase()),
                ],
            )
            .context("position upsert failed")?;
        Ok(())
    }

    /// Position writes must not be lost: retry with doubling backoff and
    /// report failure only after the attempts are exhausted. The caller halts
    /// new signal execution on `Err`.
    pub fn upsert_position_with_retry(&self, position: &Position) -> Result<()> {
        let mut backoff = POSITION_WRITE_BACKOFF;
        let mut last_err = None;
        for attempt in 1..=POSITION_WRITE_ATTEMPTS {
            match self.upsert_position(position) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        position_id = %position.id,
                        attempt,
                        error = %e,
                        "position write failed"
                    );
                    last_err = Some(e);
                    if attempt < POSITION_WRITE_ATTEMPTS {
                        std::thread::sleep(backoff);
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last_err.expect("at least one attempt"))
    }

    /// Load the open positions persisted by a previous run, oldest first.
    pub fn load_open_positions(&self) -> Result<Vec<Position>> {
        use crate::executor::PositionStatus;
        use crate::types::PositionSide;
        use chrono::TimeZone;

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, signal_id, security_id, strategy, side, quantity, entry_price,
                        current_price, stop_loss, target, unrealized_pnl, realized_pnl, opened_at
                 FROM positions WHERE status = 'open' ORDER BY opened_at ASC",
            )
            .context("open-position query prepare failed")?;

        let rows = stmt
            .query_map([], |row| {
                let side: String = row.get(4)?;
                let opened_ms: i64 = row.get(12)?;
                Ok(Position {
                    id: row.get(0)?,
                    signal_id: row.get(1)?,
                    security_id: row.get(2)?,
                    strategy: row.get(3)?,
                    side: if side == "SHORT" {
                        PositionSide::Short
                    } else {
                        PositionSide::Long
                    },
                    quantity: row.get(5)?,
                    entry_price: row.get(6)?,
                    current_price: row.get(7)?,
                    stop_loss: row.get(8)?,
                    target: row.get(9)?,
                    unrealized_pnl: row.get(10)?,
                    realized_pnl: row.get(11)?,
                    status: PositionStatus::Open,
                    opened_at: chrono::Utc
                        .timestamp_millis_opt(opened_ms)
                        .single()
                        .unwrap_or_else(chrono::Utc::now),
                    closed_at: None,
                    close_reason: None,
                })
            })
            .context("open-position query failed")?
            .collect::<std::result::Result<_, _>>()
            .context("open-position row decode failed")?;

        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Portfolios
    // -------------------------------------------------------------------------

    pub fn upsert_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO portfolios (user_id, total_capital, available_capital,
                                                    used_margin, today_pnl, total_pnl, total_trades,
                                                    winning_trades, losing_trades, win_rate,
                                                    max_daily_loss, current_daily_loss)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    portfolio.user_id,
                    portfolio.total_capital,
                    portfolio.available_capital,
                    portfolio.used_margin,
                    portfolio.today_pnl,
                    portfolio.total_pnl,
                    portfolio.total_trades,
                    portfolio.winning_trades,
                    portfolio.losing_trades,
                    portfolio.win_rate,
                    portfolio.max_daily_loss,
                    portfolio.current_daily_loss,
                ],
            )
            .context("portfolio upsert failed")?;
        Ok(())
    }

    pub fn load_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT total_capital, available_capital, used_margin, today_pnl, total_pnl,
                    total_trades, winning_trades, losing_trades, win_rate, max_daily_loss,
                    current_daily_loss
             FROM portfolios WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(Portfolio {
                    user_id: user_id.to_string(),
                    total_capital: row.get(0)?,
                    available_capital: row.get(1)?,
                    used_margin: row.get(2)?,
                    today_pnl: row.get(3)?,
                    total_pnl: row.get(4)?,
                    total_trades: row.get(5)?,
                    winning_trades: row.get(6)?,
                    losing_trades: row.get(7)?,
                    win_rate: row.get(8)?,
                    max_daily_loss: row.get(9)?,
                    current_daily_loss: row.get(10)?,
                })
            },
        )
        .optional()
        .context("portfolio load failed")
    }

    // -------------------------------------------------------------------------
    // Instruments
    // -------------------------------------------------------------------------

    pub fn upsert_instrument(&self, instrument: &Instrument) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO instruments (security_id, symbol, exchange_segment,
                                                     lot_size, tick_size, display_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    instrument.security_id,
                    instrument.symbol,
                    instrument.exchange_segment.as_str(),
                    instrument.lot_size,
                    instrument.tick_size,
                    instrument.display_name,
                ],
            )
            .context("instrument upsert failed")?;
        Ok(())
    }

    pub fn instrument_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: u64 = conn
            .query_row("SELECT COUNT(*) FROM instruments", [], |row| row.get(0))
            .context("instrument count failed")?;
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // TTL maintenance
    // -------------------------------------------------------------------------

    /// Drop expired rows: ticks older than 24 h and 1-minute candles older
    /// than 7 days. Returns (ticks, candles) purged.
    pub fn purge_expired(&self, now_ms: i64) -> Result<(usize, usize)> {
        let conn = self.conn.lock();
        let ticks = conn
            .execute(
                "DELETE FROM ticks WHERE ts < ?1",
                params![now_ms - TICK_TTL_MS],
            )
            .context("tick purge failed")?;
        let candles = conn
            .execute(
                "DELETE FROM candles WHERE interval = ?1 AND ts < ?2",
                params![Interval::M1.as_str(), now_ms - M1_CANDLE_TTL_MS],
            )
            .context("candle purge failed")?;
        if ticks > 0 || candles > 0 {
            debug!(ticks, candles, "expired rows purged");
        }
        Ok((ticks, candles))
    }
}
