// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators used by the
// strategy engine. Every function degrades to an empty `Vec` or `None` on
// short or degenerate input; none of them panic.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod patterns;
pub mod rsi;

pub use adx::calculate_adx;
pub use atr::calculate_atr;
pub use bollinger::{calculate_bollinger, BollingerBands};
pub use ema::calculate_ema;
pub use macd::{calculate_macd, MacdResult};
pub use patterns::{detect_pattern, CandlePattern};
pub use rsi::calculate_rsi;

/// Simple moving average. Returns one value per full window, so the output
/// length is `prices.len() - period + 1`; empty when the input is shorter
/// than the period or the period is zero.
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }
    let mut result = Vec::with_capacity(prices.len() - period + 1);
    let mut sum: f64 = prices[..period].iter().sum();
    result.push(sum / period as f64);
    for i in period..prices.len() {
        sum += prices[i] - prices[i - period];
        result.push(sum / period as f64);
    }
    result
}

/// Outcome of comparing the last two aligned samples of a fast and slow
/// moving-average series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossover {
    Bullish,
    Bearish,
}

/// Detect an EMA crossover from the last two aligned samples of each series.
///
/// Bullish: fast was at or below slow and is now strictly above. Bearish is
/// the mirror. Returns `None` when either series has fewer than two samples
/// or no cross occurred.
pub fn detect_ema_crossover(fast: &[f64], slow: &[f64]) -> Option<Crossover> {
    if fast.len() < 2 || slow.len() < 2 {
        return None;
    }
    let (f_prev, f_cur) = (fast[fast.len() - 2], fast[fast.len() - 1]);
    let (s_prev, s_cur) = (slow[slow.len() - 2], slow[slow.len() - 1]);

    if f_prev <= s_prev && f_cur > s_cur {
        Some(Crossover::Bullish)
    } else if f_prev >= s_prev && f_cur < s_cur {
        Some(Crossover::Bearish)
    } else {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_empty_and_short_input() {
        assert!(calculate_sma(&[], 5).is_empty());
        assert!(calculate_sma(&[1.0, 2.0], 5).is_empty());
        assert!(calculate_sma(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn sma_known_values() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0];
        let sma = calculate_sma(&prices, 3);
        assert_eq!(sma, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn sma_output_length() {
        let prices: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        assert_eq!(calculate_sma(&prices, 10).len(), 21);
    }

    #[test]
    fn crossover_bullish() {
        // Fast crosses from below to above between the last two samples.
        let fast = [9.0, 11.0];
        let slow = [10.0, 10.0];
        assert_eq!(detect_ema_crossover(&fast, &slow), Some(Crossover::Bullish));
    }

    #[test]
    fn crossover_bearish() {
        let fast = [11.0, 9.0];
        let slow = [10.0, 10.0];
        assert_eq!(detect_ema_crossover(&fast, &slow), Some(Crossover::Bearish));
    }

    #[test]
    fn crossover_from_equality_counts() {
        let fast = [10.0, 11.0];
        let slow = [10.0, 10.0];
        assert_eq!(detect_ema_crossover(&fast, &slow), Some(Crossover::Bullish));
    }

    #[test]
    fn no_crossover_when_already_above() {
        let fast = [11.0, 12.0];
        let slow = [10.0, 10.0];
        assert_eq!(detect_ema_crossover(&fast, &slow), None);
    }

    #[test]
    fn no_crossover_on_short_series() {
        assert_eq!(detect_ema_crossover(&[1.0], &[1.0, 2.0]), None);
    }
}
