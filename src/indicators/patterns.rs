// =============================================================================
// Candlestick Patterns — two-candle detection
// =============================================================================
//
// Ratio rules:
//   Doji           body <= 10% of the bar range
//   Hammer         lower shadow >= 2x body, upper shadow <= body
//   Shooting star  upper shadow >= 2x body, lower shadow <= body
//   Engulfing      opposite-colour body fully containing the previous body
//
// Doji wins over hammer/shooting star when both would match (a tiny body
// satisfies every shadow rule).

use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandlePattern {
    Hammer,
    ShootingStar,
    Doji,
    BullishEngulfing,
    BearishEngulfing,
}

/// Detect a pattern from the last two candles, engulfing patterns first
/// (they carry the most directional information).
pub fn detect_pattern(prev: &Candle, cur: &Candle) -> Option<CandlePattern> {
    if let Some(p) = detect_engulfing(prev, cur) {
        return Some(p);
    }
    detect_single(cur)
}

fn detect_engulfing(prev: &Candle, cur: &Candle) -> Option<CandlePattern> {
    let prev_body = (prev.close - prev.open).abs();
    let cur_body = (cur.close - cur.open).abs();
    if prev_body <= 0.0 || cur_body <= 0.0 {
        return None;
    }

    let prev_bearish = prev.close < prev.open;
    let cur_bullish = cur.close > cur.open;

    if prev_bearish && cur_bullish && cur.open <= prev.close && cur.close >= prev.open {
        return Some(CandlePattern::BullishEngulfing);
    }
    if !prev_bearish && !cur_bullish && cur.open >= prev.close && cur.close <= prev.open {
        return Some(CandlePattern::BearishEngulfing);
    }
    None
}

fn detect_single(c: &Candle) -> Option<CandlePattern> {
    let range = c.high - c.low;
    if range <= 0.0 {
        return None;
    }

    let body = (c.close - c.open).abs();
    if body <= range * 0.10 {
        return Some(CandlePattern::Doji);
    }

    let upper_shadow = c.high - c.open.max(c.close);
    let lower_shadow = c.open.min(c.close) - c.low;

    if lower_shadow >= 2.0 * body && upper_shadow <= body {
        return Some(CandlePattern::Hammer);
    }
    if upper_shadow >= 2.0 * body && lower_shadow <= body {
        return Some(CandlePattern::ShootingStar);
    }
    None
}
