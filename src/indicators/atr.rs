// =============================================================================
// Average True Range (ATR)
// =============================================================================
//
// True Range for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the simple moving average of TR over the period. Output has one
// value per bar starting at index `period`, i.e. length
// `candles.len() - period`.
// =============================================================================

use super::calculate_sma;
use crate::market_data::Candle;

/// Compute the ATR series from OHLC candles (oldest first).
///
/// Empty when `period` is zero or there are fewer than `period + 1` candles
/// (each True Range needs a previous close).
pub fn calculate_atr(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period + 1 {
        return Vec::new();
    }

    let mut tr_values: Vec<f64> = Vec::with_capacity(candles.len() - 1);
    for i in 1..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;

        let hl = high - low;
        let hc = (high - prev_close).abs();
        let lc = (low - prev_close).abs();
        tr_values.push(hl.max(hc).max(lc));
    }

    calculate_sma(&tr_values, period)
}

/// The most recent ATR value, if computable.
pub fn latest_atr(candles: &[Candle], period: usize) -> Option<f64> {
    calculate_atr(candles, period).last().copied()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Interval;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            security_id: 13,
            interval: Interval::M5,
            timestamp: 0,
            open,
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
    fn atr_period_zero() {
        let candles = vec![candle(100.0, 105.0, 95.0, 102.0); 20];
        assert!(calculate_atr(&candles, 0).is_empty());
    }

    #[test]
    fn atr_insufficient_data() {
        let candles = vec![candle(100.0, 105.0, 95.0, 102.0); 10];
        assert!(calculate_atr(&candles, 14).is_empty());
    }

    #[test]
    fn atr_output_length_contract() {
        let candles = vec![candle(100.0, 103.0, 97.0, 101.0); 30];
        assert_eq!(calculate_atr(&candles, 14).len(), 16);
    }

    #[test]
    fn atr_constant_range_converges() {
        // Identical bars with close at the midpoint of a 10-point range.
        let candles = vec![candle(100.0, 105.0, 95.0, 100.0); 30];
        let atr = latest_atr(&candles, 14).unwrap();
        assert!((atr - 10.0).abs() < 1e-9);
    }

    #[test]
    fn atr_uses_gap_from_prev_close() {
        // Gap up: |H - prevClose| dominates H - L.
        let candles = vec![
            candle(100.0, 105.0, 95.0, 95.0),
            candle(110.0, 115.0, 108.0, 112.0), // TR = |115 - 95| = 20
            candle(112.0, 118.0, 110.0, 115.0),
            candle(115.0, 120.0, 113.0, 118.0),
        ];
        let atr = latest_atr(&candles, 3).unwrap();
        assert!(atr > 7.0, "gap should widen ATR, got {atr}");
    }

    #[test]
    fn atr_is_positive() {
        let candles: Vec<Candle> = (0..50)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.5).sin() * 10.0;
                candle(base - 0.5, base + 2.0, base - 2.0, base + 0.5)
            })
            .collect();
        for v in calculate_atr(&candles, 14) {
            assert!(v > 0.0);
        }
    }
}
