// =============================================================================
// Average Directional Index (ADX) — Wilder's smoothing
// =============================================================================
//
// Step 1 — per-bar True Range, +DM and -DM.
// Step 2 — Wilder-smooth TR, +DM and -DM over the period.
// Step 3 — +DI = 100 * smoothed(+DM) / smoothed(TR), -DI likewise.
// Step 4 — DX = 100 * |+DI - -DI| / (+DI + -DI).
// Step 5 — ADX = Wilder-smoothed DX, seeded with the SMA of the first
//          `period` DX values.
// =============================================================================

use crate::market_data::Candle;

/// Compute the ADX series from OHLC candles (oldest first).
///
/// Needs at least `2 * period + 1` candles for the first value; returns an
/// empty `Vec` otherwise.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return Vec::new();
    }

    let n = candles.len() - 1;
    let mut tr = Vec::with_capacity(n);
    let mut plus_dm = Vec::with_capacity(n);
    let mut minus_dm = Vec::with_capacity(n);

    for i in 1..candles.len() {
        let cur = &candles[i];
        let prev = &candles[i - 1];

        let hl = cur.high - cur.low;
        let hc = (cur.high - prev.close).abs();
        let lc = (cur.low - prev.close).abs();
        tr.push(hl.max(hc).max(lc));

        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    // Wilder smoothing: seed with the plain sum, then
    // smoothed_t = smoothed_{t-1} - smoothed_{t-1}/period + value_t.
    let mut sm_tr: f64 = tr[..period].iter().sum();
    let mut sm_plus: f64 = plus_dm[..period].iter().sum();
    let mut sm_minus: f64 = minus_dm[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(n - period + 1);
    dx_values.push(dx(sm_plus, sm_minus, sm_tr));

    for i in period..n {
        sm_tr = sm_tr - sm_tr / period as f64 + tr[i];
        sm_plus = sm_plus - sm_plus / period as f64 + plus_dm[i];
        sm_minus = sm_minus - sm_minus / period as f64 + minus_dm[i];
        dx_values.push(dx(sm_plus, sm_minus, sm_tr));
    }

    if dx_values.len() < period {
        return Vec::new();
    }

    let mut adx = Vec::with_capacity(dx_values.len() - period + 1);
    let mut current: f64 = dx_values[..period].iter().sum::<f64>() / period as f64;
    adx.push(current);
    for &d in &dx_values[period..] {
        current = (current * (period as f64 - 1.0) + d) / period as f64;
        adx.push(current);
    }

    adx.retain(|v| v.is_finite());
    adx
}

fn dx(sm_plus: f64, sm_minus: f64, sm_tr: f64) -> f64 {
    if sm_tr <= 0.0 {
        return 0.0;
    }
    let plus_di = 100.0 * sm_plus / sm_tr;
    let minus_di = 100.0 * sm_minus / sm_tr;
    let sum = plus_di + minus_di;
    if sum == 0.0 {
        0.0
    } else {
        100.0 * (plus_di - minus_di).abs() / sum
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Interval;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            security_id: 13,
            interval: Interval::M5,
            timestamp: 0,
            open: close,
            high,
            low,
            close,
            volume: 100,
            avg_imbalance: 1.0,
            avg_spread: 0.0,
            avg_strength: 0.0,
            is_closed: true,
        }
    }

    #[test]
    fn adx_insufficient_data() {
        let candles = vec![candle(101.0, 99.0, 100.0); 20];
        assert!(calculate_adx(&candles, 14).is_empty());
    }

    #[test]
    fn adx_period_zero() {
        let candles = vec![candle(101.0, 99.0, 100.0); 40];
        assert!(calculate_adx(&candles, 0).is_empty());
    }

    #[test]
    fn adx_in_range() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.4).sin() * 4.0;
                candle(base + 1.5, base - 1.5, base)
            })
            .collect();
        let adx = calculate_adx(&candles, 14);
        assert!(!adx.is_empty());
        for v in adx {
            assert!((0.0..=100.0).contains(&v), "ADX {v} out of range");
        }
    }

    #[test]
    fn adx_high_in_strong_trend() {
        // A relentless uptrend drives ADX well above the 25 trend threshold.
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(base + 1.0, base - 1.0, base)
            })
            .collect();
        let adx = calculate_adx(&candles, 14);
        assert!(*adx.last().unwrap() > 25.0);
    }

    #[test]
    fn adx_low_in_flat_market() {
        let candles = vec![candle(100.5, 99.5, 100.0); 60];
        let adx = calculate_adx(&candles, 14);
        // No directional movement at all: +DM = -DM = 0 -> DX = 0.
        assert!(*adx.last().unwrap() < 1.0);
    }
}
