// =============================================================================
// Engine Configuration — JSON file + environment overrides
// =============================================================================
//
// Read once at startup. Every field carries a serde default so that older
// config files missing new fields still deserialise. Percentages are stored
// in whole percent points (3.0 == 3 %), matching how they appear in the
// config file.
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::market_data::candle::Interval;
use crate::types::{ExchangeSegment, SubscriptionEntry};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_feed_endpoint() -> String {
    "wss://api-feed.dhan.co".to_string()
}

fn default_subscription_set() -> Vec<SubscriptionEntry> {
    // NSE NIFTY 50 index.
    vec![SubscriptionEntry {
        segment: ExchangeSegment::Index,
        security_id: 13,
    }]
}

fn default_candle_intervals() -> Vec<Interval> {
    vec![Interval::M1, Interval::M5]
}

fn default_total_capital() -> f64 {
    20_000.0
}

fn default_max_daily_loss_pct() -> f64 {
    3.0
}

fn default_risk_pct() -> f64 {
    1.0
}

fn default_stop_loss_pct() -> f64 {
    1.0
}

fn default_target_pct() -> f64 {
    3.0
}

fn default_lot_size() -> u32 {
    75
}

fn default_market_open() -> String {
    "09:15".to_string()
}

fn default_market_close() -> String {
    "15:30".to_string()
}

fn default_eod_square_off() -> String {
    "15:20".to_string()
}

fn default_daily_reset_at() -> String {
    "09:00".to_string()
}

fn default_timezone_offset_minutes() -> i32 {
    330 // +05:30, the exchange zone
}

fn default_reconnect_initial_delay_ms() -> u64 {
    5_000
}

fn default_reconnect_max_attempts() -> u32 {
    5
}

fn default_keepalive_interval_secs() -> u64 {
    30
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_database_path() -> String {
    "tickforge.db".to_string()
}

fn default_user_id() -> String {
    "paper".to_string()
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Feed -----------------------------------------------------------------

    /// Vendor feed base URL.
    #[serde(default = "default_feed_endpoint")]
    pub feed_endpoint: String,

    /// Feed access token, supplied by the auth collaborator. Opaque.
    #[serde(default)]
    pub feed_token: String,

    /// Vendor client id. Opaque.
    #[serde(default)]
    pub client_id: String,

    /// Initial subscription set. Defaults to the NSE index `(IDX_I, 13)`.
    #[serde(default = "default_subscription_set")]
    pub subscription_set: Vec<SubscriptionEntry>,

    /// Whether to open the separate 20-level depth connection.
    #[serde(default)]
    pub enable_depth_feed: bool,

    // --- Candles --------------------------------------------------------------

    /// Intervals the aggregator tracks.
    #[serde(default = "default_candle_intervals")]
    pub candle_intervals: Vec<Interval>,

    // --- Portfolio & risk (percentages in whole percent points) ---------------

    /// Portfolio seed capital.
    #[serde(default = "default_total_capital")]
    pub total_capital: f64,

    /// Daily loss cap as a percentage of total capital (3.0 == 3 %).
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,

    /// Capital fraction risked per trade (1.0 == 1 %).
    #[serde(default = "default_risk_pct")]
    pub risk_pct: f64,

    /// Default stop-loss distance (1.0 == 1 %).
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    /// Default target distance (3.0 == 3 %).
    #[serde(default = "default_target_pct")]
    pub target_pct: f64,

    /// Instrument lot size used for position sizing.
    #[serde(default = "default_lot_size")]
    pub lot_size: u32,

    /// Portfolio owner id.
    #[serde(default = "default_user_id")]
    pub user_id: String,

    // --- Session times (exchange-local "HH:MM") --------------------------------

    #[serde(default = "default_market_open")]
    pub market_open: String,

    #[serde(default = "default_market_close")]
    pub market_close: String,

    #[serde(default = "default_eod_square_off")]
    pub eod_square_off: String,

    #[serde(default = "default_daily_reset_at")]
    pub daily_reset_at: String,

    /// Exchange zone as minutes east of UTC (330 == +05:30).
    #[serde(default = "default_timezone_offset_minutes")]
    pub timezone_offset_minutes: i32,

    // --- Transport ------------------------------------------------------------

    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,

    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,

    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    // --- Hub / storage / option chain ------------------------------------------

    /// Address the subscriber hub listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite database path.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Optional option-chain REST endpoint. Absent means the poller stays off
    /// and the option-sentiment confluence is simply unavailable.
    #[serde(default)]
    pub option_chain_endpoint: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialise")
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        info!(
            path = %path.display(),
            subscriptions = config.subscription_set.len(),
            intervals = ?config.candle_intervals,
            "engine config loaded"
        );
        Ok(config)
    }

    /// Defaults + environment overrides, for running without a config file.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Credentials and the bind address may come from the environment so they
    /// stay out of the config file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TICKFORGE_FEED_TOKEN") {
            self.feed_token = v;
        }
        if let Ok(v) = std::env::var("TICKFORGE_CLIENT_ID") {
            self.client_id = v;
        }
        if let Ok(v) = std::env::var("TICKFORGE_FEED_ENDPOINT") {
            self.feed_endpoint = v;
        }
        if let Ok(v) = std::env::var("TICKFORGE_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("TICKFORGE_DB_PATH") {
            self.database_path = v;
        }
    }

    /// Reject configurations the engine cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.total_capital <= 0.0 {
            bail!("total_capital must be positive, got {}", self.total_capital);
        }
        if self.lot_size == 0 {
            bail!("lot_size must be at least 1");
        }
        if self.candle_intervals.is_empty() {
            bail!("candle_intervals must not be empty");
        }
        if self.subscription_set.is_empty() {
            bail!("subscription_set must not be empty");
        }
        if self.max_daily_loss_pct <= 0.0 {
            bail!("max_daily_loss_pct must be positive");
        }
        for (name, raw) in [
            ("market_open", &self.market_open),
            ("market_close", &self.market_close),
            ("eod_square_off", &self.eod_square_off),
            ("daily_reset_at", &self.daily_reset_at),
        ] {
            parse_hhmm(raw).with_context(|| format!("invalid {name}: {raw:?}"))?;
        }
        if FixedOffset::east_opt(self.timezone_offset_minutes * 60).is_none() {
            bail!(
                "timezone_offset_minutes out of range: {}",
                self.timezone_offset_minutes
            );
        }
        Ok(())
    }

    /// Exchange time zone.
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60)
            .expect("validated at startup")
    }

    /// Absolute daily loss cap in currency units.
    pub fn max_daily_loss(&self) -> f64 {
        self.total_capital * self.max_daily_loss_pct / 100.0
    }

    pub fn market_open_time(&self) -> NaiveTime {
        parse_hhmm(&self.market_open).expect("validated at startup")
    }

    pub fn market_close_time(&self) -> NaiveTime {
        parse_hhmm(&self.market_close).expect("validated at startup")
    }

    pub fn eod_square_off_time(&self) -> NaiveTime {
        parse_hhmm(&self.eod_square_off).expect("validated at startup")
    }

    pub fn daily_reset_time(&self) -> NaiveTime {
        parse_hhmm(&self.daily_reset_at).expect("validated at startup")
    }
}

/// Parse `"HH:MM"` into a `NaiveTime`.
fn parse_hhmm(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M").map_err(|e| anyhow::anyhow!("{e}"))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.feed_endpoint, "wss://api-feed.dhan.co");
        assert_eq!(cfg.subscription_set.len(), 1);
        assert_eq!(cfg.subscription_set[0].security_id, 13);
        assert_eq!(cfg.candle_intervals, vec![Interval::M1, Interval::M5]);
        assert_eq!(cfg.total_capital, 20_000.0);
        assert_eq!(cfg.lot_size, 75);
        assert_eq!(cfg.max_daily_loss(), 600.0);
        assert_eq!(cfg.timezone_offset_minutes, 330);
        assert_eq!(cfg.reconnect_initial_delay_ms, 5_000);
        assert_eq!(cfg.reconnect_max_attempts, 5);
        assert_eq!(cfg.keepalive_interval_secs, 30);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.market_open, "09:15");
        assert_eq!(cfg.eod_square_off, "15:20");
        assert_eq!(cfg.daily_reset_at, "09:00");
        assert!(cfg.option_chain_endpoint.is_none());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "total_capital": 50000.0, "candle_intervals": ["1m"] }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.total_capital, 50_000.0);
        assert_eq!(cfg.candle_intervals, vec![Interval::M1]);
        assert_eq!(cfg.lot_size, 75);
    }

    #[test]
    fn validate_rejects_bad_session_time() {
        let mut cfg = EngineConfig::default();
        cfg.market_open = "9am".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_capital() {
        let mut cfg = EngineConfig::default();
        cfg.total_capital = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.subscription_set, cfg2.subscription_set);
        assert_eq!(cfg.candle_intervals, cfg2.candle_intervals);
        assert_eq!(cfg.total_capital, cfg2.total_capital);
    }

    #[test]
    fn timezone_is_ist_by_default() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.timezone().local_minus_utc(), 330 * 60);
    }
}
