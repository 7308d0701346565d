// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line  = EMA(close, fast) - EMA(close, slow)
// Signal     = EMA(MACD line, signal_period)
// Histogram  = MACD line - Signal
//
// The gate only consumes the histogram sign and magnitude, so the output is a
// single snapshot of the latest values rather than full series.
// =============================================================================

use super::ema::calculate_ema;

/// Latest MACD snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the latest MACD(fast, slow, signal) values over `closes`
/// (oldest first). Standard parameters are (12, 26, 9).
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<MacdValue> {
    if fast == 0 || slow <= fast || closes.len() < slow + signal_period {
        return None;
    }

    let fast_series = calculate_ema(closes, fast);
    let slow_series = calculate_ema(closes, slow);
    if slow_series.is_empty() {
        return None;
    }

    // Both series end at the latest close; align them from the tail.
    let len = slow_series.len().min(fast_series.len());
    let fast_tail = &fast_series[fast_series.len() - len..];
    let slow_tail = &slow_series[slow_series.len() - len..];

    let macd_line: Vec<f64> = fast_tail
        .iter()
        .zip(slow_tail.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_series = calculate_ema(&macd_line, signal_period);
    let signal = *signal_series.last()?;
    let macd = *macd_line.last()?;
    let histogram = macd - signal;

    (macd.is_finite() && signal.is_finite()).then_some(MacdValue {
        macd,
        signal,
        histogram,
    })
}

/// Standard MACD(12, 26, 9).
pub fn standard_macd(closes: &[f64]) -> Option<MacdValue> {
    calculate_macd(closes, 12, 26, 9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(standard_macd(&closes).is_none());
    }

    #[test]
    fn macd_invalid_periods() {
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 26, 12, 9).is_none());
        assert!(calculate_macd(&closes, 0, 26, 9).is_none());
    }

    #[test]
    fn macd_positive_histogram_in_uptrend_acceleration() {
        // Accelerating uptrend: fast EMA pulls away from slow EMA.
        let closes: Vec<f64> = (1..=120).map(|x| (x as f64).powf(1.3)).collect();
        let macd = standard_macd(&closes).unwrap();
        assert!(macd.macd > 0.0);
        assert!(macd.histogram > 0.0);
    }

    #[test]
    fn macd_negative_in_downtrend() {
        let closes: Vec<f64> = (1..=120).rev().map(|x| (x as f64).powf(1.3)).collect();
        let macd = standard_macd(&closes).unwrap();
        assert!(macd.macd < 0.0);
    }

    #[test]
    fn macd_near_zero_on_flat() {
        let closes = vec![100.0; 120];
        let macd = standard_macd(&closes).unwrap();
        assert!(macd.macd.abs() < 1e-9);
        assert!(macd.histogram.abs() < 1e-9);
    }
}
