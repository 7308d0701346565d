// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The very first EMA value is seeded with the SMA of the first `period` closes.
// =============================================================================

/// Compute the EMA series for the given `closes` slice and look-back `period`.
///
/// Returns an empty `Vec` when the input is too short or the period is zero.
/// Each output element corresponds to a close starting at index `period - 1`.
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period + 1) as f64;

    // Seed: SMA of the first `period` values.
    let sma: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    if !sma.is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    result.push(sma);

    let mut prev_ema = sma;
    for &close in &closes[period..] {
        let ema = close * multiplier + prev_ema * (1.0 - multiplier);
        if !ema.is_finite() {
            // Stop producing values once the series is broken.
            break;
        }
        result.push(ema);
        prev_ema = ema;
    }

    result
}

/// Directional verdict of the EMA-9 / EMA-21 stack used for higher-timeframe
/// trend hydration when a pushed snapshot carries no direction.
///
/// Returns `Some((is_bullish, separation_pct))`, or `None` when the series is
/// too short, flat, or mixed.
pub fn ema_stack_direction(closes: &[f64]) -> Option<(bool, f64)> {
    if closes.len() < 21 {
        return None;
    }

    let e9 = *calculate_ema(closes, 9).last()?;
    let e21 = *calculate_ema(closes, 21).last()?;

    if e21 == 0.0 {
        return None;
    }

    let bullish = e9 > e21;
    let bearish = e9 < e21;
    if !bullish && !bearish {
        return None;
    }

    let separation = ((e9 - e21) / e21).abs() * 100.0;
    if !separation.is_finite() {
        return None;
    }

    Some((bullish, separation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascending(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn ema_empty_input() {
        assert!(calculate_ema(&[], 5).is_empty());
    }

    #[test]
    fn ema_period_zero() {
        assert!(calculate_ema(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn ema_period_equals_length_is_sma() {
        let ema = calculate_ema(&[2.0, 4.0, 6.0], 3);
        assert_eq!(ema.len(), 1);
        assert!((ema[0] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn ema_known_values() {
        // 5-period EMA of [1..10]: SMA seed 3.0, multiplier 1/3.
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let ema = calculate_ema(&closes, 5);
        assert_eq!(ema.len(), 6);

        let mult = 2.0 / 6.0;
        let mut expected = 3.0;
        for (i, &c) in closes[5..].iter().enumerate() {
            expected = c * mult + expected * (1.0 - mult);
            assert!((ema[i + 1] - expected).abs() < 1e-10);
        }
    }

    #[test]
    fn ema_truncates_on_nan() {
        let ema = calculate_ema(&[1.0, 2.0, 3.0, f64::NAN, 5.0], 3);
        assert_eq!(ema.len(), 1);
    }

    #[test]
    fn stack_direction_bullish_on_ascending() {
        let (bullish, sep) = ema_stack_direction(&ascending(100)).unwrap();
        assert!(bullish);
        assert!(sep > 0.0);
    }

    #[test]
    fn stack_direction_bearish_on_descending() {
        let closes: Vec<f64> = (1..=100).rev().map(|x| x as f64).collect();
        let (bullish, _) = ema_stack_direction(&closes).unwrap();
        assert!(!bullish);
    }

    #[test]
    fn stack_direction_none_on_flat() {
        assert!(ema_stack_direction(&[100.0; 100]).is_none());
    }
}
