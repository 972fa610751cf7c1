// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line  = EMA(fast) - EMA(slow)
// Signal     = EMA(signal period) of the MACD line
// Histogram  = MACD - Signal
//
// All three arrays are trimmed to the signal line's length so that index i of
// each refers to the same bar.
// =============================================================================

use super::calculate_ema;

/// Tail-aligned MACD arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct MacdResult {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// Compute MACD with the given periods (conventionally 12/26/9).
///
/// Returns `None` when the input cannot produce at least one signal value,
/// i.e. fewer than `slow + signal_period - 1` closes, or when any period is
/// zero or `fast >= slow`.
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return None;
    }

    let fast_ema = calculate_ema(closes, fast);
    let slow_ema = calculate_ema(closes, slow);
    if slow_ema.is_empty() {
        return None;
    }

    // Align the fast series to the slow series' tail.
    let offset = fast_ema.len().checked_sub(slow_ema.len())?;
    let macd_line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, s)| fast_ema[offset + i] - s)
        .collect();

    let signal = calculate_ema(&macd_line, signal_period);
    if signal.is_empty() {
        return None;
    }

    let macd_tail = macd_line[macd_line.len() - signal.len()..].to_vec();
    let histogram: Vec<f64> = macd_tail
        .iter()
        .zip(signal.iter())
        .map(|(m, s)| m - s)
        .collect();

    Some(MacdResult {
        macd: macd_tail,
        signal,
        histogram,
    })
}
