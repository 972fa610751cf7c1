// =============================================================================
// Multi-Timeframe Confirmer — trend alignment across three intervals
// =============================================================================
//
// For a primary interval the hierarchy fixes a mid and higher interval:
//
//   1m  -> (5m, 15m)     5m  -> (15m, 1h)
//   15m -> (1h, 1d)      1h  -> (1d, 1d)
//
// Each interval is classified from its EMA(9)/EMA(21) stack over the last 50
// closed candles:
//   BULLISH  when EMA9 > EMA21 and EMA9 is rising
//   BEARISH  when EMA9 < EMA21 and EMA9 is falling
//   NEUTRAL  otherwise
//
// Alignment holds when all three agree on a non-neutral direction, or the
// higher and mid agree and the primary is that direction or neutral. Missing
// history returns `None`; the caller treats the check as passing (the filter
// fails closed only on actual disalignment).
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::calculate_ema;
use crate::market_data::{CandleKey, CandleStore, Interval};
use crate::types::Side;

/// Candle history consulted per interval.
const LOOKBACK: usize = 50;

/// Minimum closes for a classification: EMA(21) needs 21 and the rising/
/// falling check needs a previous EMA(9) sample.
const MIN_CLOSES: usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Buy,
    Sell,
    Wait,
}

/// Full multi-timeframe alignment snapshot for one security.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtfAnalysis {
    pub security_id: u32,
    pub primary_interval: Interval,
    pub primary: Trend,
    pub mid: Trend,
    pub higher: Trend,
    pub is_aligned: bool,
    pub alignment_score: u32,
    pub recommendation: Recommendation,
}

impl MtfAnalysis {
    /// True when the analysis supports a signal in `side`'s direction.
    pub fn supports(&self, side: Side) -> bool {
        match side {
            Side::Buy => self.recommendation == Recommendation::Buy,
            Side::Sell => self.recommendation == Recommendation::Sell,
        }
    }
}

/// Mid and higher interval for a primary interval.
pub fn hierarchy(primary: Interval) -> (Interval, Interval) {
    match primary {
        Interval::M1 => (Interval::M5, Interval::M15),
        Interval::M5 => (Interval::M15, Interval::H1),
        Interval::M15 => (Interval::H1, Interval::D1),
        Interval::H1 | Interval::D1 => (Interval::D1, Interval::D1),
    }
}

/// Run the confirmation for `security_id` on `primary`.
///
/// Returns `None` when any consulted interval lacks enough closed candles.
pub fn confirm(store: &CandleStore, security_id: u32, primary: Interval) -> Option<MtfAnalysis> {
    let (mid_iv, higher_iv) = hierarchy(primary);

    let primary_trend = classify_interval(store, security_id, primary)?;
    let mid_trend = classify_interval(store, security_id, mid_iv)?;
    let higher_trend = classify_interval(store, security_id, higher_iv)?;

    let direction = aligned_direction(primary_trend, mid_trend, higher_trend);
    let is_aligned = direction.is_some();

    let mut score = alignment_score(primary_trend, mid_trend, higher_trend, is_aligned);
    if higher_trend != Trend::Neutral {
        score = (score + 15).min(100);
    }

    let recommendation = match direction {
        Some(Trend::Bullish) => Recommendation::Buy,
        Some(Trend::Bearish) => Recommendation::Sell,
        _ => Recommendation::Wait,
    };

    debug!(
        security_id,
        primary = %primary_trend,
        mid = %mid_trend,
        higher = %higher_trend,
        score,
        aligned = is_aligned,
        "multi-timeframe confirmation"
    );

    Some(MtfAnalysis {
        security_id,
        primary_interval: primary,
        primary: primary_trend,
        mid: mid_trend,
        higher: higher_trend,
        is_aligned,
        alignment_score: score,
        recommendation,
    })
}

fn classify_interval(store: &CandleStore, security_id: u32, interval: Interval) -> Option<Trend> {
    let key = CandleKey {
        security_id,
        interval,
    };
    let closes = store.get_closes(&key, LOOKBACK);
    if closes.len() < MIN_CLOSES {
        return None;
    }
    Some(classify(&closes))
}

/// Classify a close series from its EMA(9)/EMA(21) stack.
pub fn classify(closes: &[f64]) -> Trend {
    let ema9 = calculate_ema(closes, 9);
    let ema21 = calculate_ema(closes, 21);
    if ema9.len() < 2 || ema21.is_empty() {
        return Trend::Neutral;
    }

    let e9_last = ema9[ema9.len() - 1];
    let e9_prev = ema9[ema9.len() - 2];
    let e21_last = ema21[ema21.len() - 1];

    if e9_last > e21_last && e9_last > e9_prev {
        Trend::Bullish
    } else if e9_last < e21_last && e9_last < e9_prev {
        Trend::Bearish
    } else {
        Trend::Neutral
    }
}

/// The non-neutral direction the stack is aligned toward, if any.
fn aligned_direction(primary: Trend, mid: Trend, higher: Trend) -> Option<Trend> {
    if higher == Trend::Neutral || mid != higher {
        return None;
    }
    // Higher and mid agree; the primary must match or be neutral.
    (primary == higher || primary == Trend::Neutral).then_some(higher)
}

fn alignment_score(primary: Trend, mid: Trend, higher: Trend, is_aligned: bool) -> u32 {
    if is_aligned {
        if primary == mid && mid == higher {
            return 100;
        }
        return 75; // higher + mid agree, neutral primary
    }
    // Partial agreement: any two non-neutral matches.
    let pairs = [(primary, mid), (primary, higher), (mid, higher)];
    if pairs
        .iter()
        .any(|(a, b)| a == b && *a != Trend::Neutral)
    {
        50
    } else {
        0
    }
}
