// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Middle band = SMA(period); upper/lower = middle +/- k * sigma over the same
// window.

/// Result of a Bollinger Band calculation on the latest window.
#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Calculate Bollinger Bands over the last `period` closes.
///
/// Returns `None` when there are fewer than `period` data points or the
/// result is non-finite.
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std * std_dev;
    let lower = middle - num_std * std_dev;

    (upper.is_finite() && lower.is_finite()).then_some(BollingerBands {
        upper,
        middle,
        lower,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!((bb.middle - 10.5).abs() < 1e-10);
    }

    #[test]
    fn bollinger_insufficient_data() {
        assert!(calculate_bollinger(&[1.0, 2.0, 3.0], 20, 2.0).is_none());
        assert!(calculate_bollinger(&[], 20, 2.0).is_none());
    }

    #[test]
    fn bollinger_flat_series_has_zero_width() {
        let closes = vec![50.0; 25];
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!((bb.upper - bb.lower).abs() < 1e-10);
        assert_eq!(bb.middle, 50.0);
    }

    #[test]
    fn bollinger_symmetric_around_middle() {
        let closes: Vec<f64> = (1..=40).map(|x| (x as f64 * 0.7).cos() * 3.0 + 100.0).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(((bb.upper - bb.middle) - (bb.middle - bb.lower)).abs() < 1e-10);
    }
}
