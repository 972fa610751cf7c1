// =============================================================================
// Candle model — OHLC bars keyed by (security, interval, bar start)
// =============================================================================

use chrono::{FixedOffset, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Supported bar intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    pub fn duration_ms(self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::H1 => 3_600_000,
            Self::D1 => 86_400_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::D1 => "1d",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "1m" => Some(Self::M1),
            "5m" => Some(Self::M5),
            "15m" => Some(Self::M15),
            "1h" => Some(Self::H1),
            "1d" => Some(Self::D1),
            _ => None,
        }
    }

    /// Bar start for a timestamp: `floor(ts / duration) * duration` for
    /// intraday intervals; day bars truncate to exchange-local midnight.
    pub fn floor(self, ts_ms: i64, tz: FixedOffset) -> i64 {
        match self {
            Self::D1 => {
                let local = tz.timestamp_millis_opt(ts_ms).single().unwrap_or_else(|| {
                    tz.timestamp_millis_opt(0).single().expect("epoch is valid")
                });
                let midnight = local
                    .with_hour(0)
                    .and_then(|t| t.with_minute(0))
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(local);
                midnight.timestamp_millis()
            }
            _ => {
                let dur = self.duration_ms();
                (ts_ms.div_euclid(dur)) * dur
            }
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub security_id: u32,
    pub interval: Interval,
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.security_id, self.interval)
    }
}

/// An OHLC bar with averaged per-bar depth metrics.
///
/// `timestamp` is the bar start (epoch ms), floor-aligned to the interval
/// boundary. `volume` is the vendor's cumulative session volume as of the
/// last tick in the bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub security_id: u32,
    pub interval: Interval,
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub avg_imbalance: f64,
    pub avg_spread: f64,
    pub avg_strength: f64,
    pub is_closed: bool,
}

impl Candle {
    pub fn key(&self) -> CandleKey {
        CandleKey {
            security_id: self.security_id,
            interval: self.interval,
        }
    }

    /// Bar end (exclusive), epoch ms.
    pub fn close_time(&self) -> i64 {
        self.timestamp + self.interval.duration_ms()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}
