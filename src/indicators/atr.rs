// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing
// =============================================================================
//
// True range of bar t:
//   TR_t = max(high_t - low_t, |high_t - close_{t-1}|, |low_t - close_{t-1}|)
//
// ATR is seeded with the SMA of the first `period` true ranges and then
// smoothed with Wilder's method:
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

/// One OHLC row as consumed by the ATR calculation. Kept deliberately minimal
/// so both bridge bars and snapshot candles can be projected into it.
#[derive(Debug, Clone, Copy)]
pub struct OhlcRow {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Compute the latest ATR value over `rows` (oldest first).
///
/// Returns `None` when fewer than `period + 1` rows are available or the
/// computation degenerates.
pub fn calculate_atr(rows: &[OhlcRow], period: usize) -> Option<f64> {
    if period == 0 || rows.len() < period + 1 {
        return None;
    }

    let mut true_ranges = Vec::with_capacity(rows.len() - 1);
    for w in rows.windows(2) {
        let prev_close = w[0].close;
        let bar = w[1];
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        if !tr.is_finite() || tr < 0.0 {
            return None;
        }
        true_ranges.push(tr);
    }

    let mut atr: f64 = true_ranges[..period].iter().sum::<f64>() / period as f64;
    for &tr in &true_ranges[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }

    atr.is_finite().then_some(atr)
}

/// ATR expressed as a percentage of the latest close. Used by the crypto
/// volatility-spike hard gate.
pub fn atr_percent(rows: &[OhlcRow], period: usize) -> Option<f64> {
    let atr = calculate_atr(rows, period)?;
    let last_close = rows.last()?.close;
    if last_close <= 0.0 {
        return None;
    }
    Some(atr / last_close * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(high: f64, low: f64, close: f64) -> OhlcRow {
        OhlcRow { high, low, close }
    }

    fn flat_rows(n: usize, range: f64) -> Vec<OhlcRow> {
        (0..n).map(|_| row(100.0 + range, 100.0, 100.0 + range / 2.0)).collect()
    }

    #[test]
    fn atr_insufficient_data() {
        assert!(calculate_atr(&flat_rows(14, 1.0), 14).is_none());
    }

    #[test]
    fn atr_constant_range() {
        // Identical bars: TR equals high-low every bar, ATR converges to it.
        let rows = flat_rows(40, 2.0);
        let atr = calculate_atr(&rows, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn atr_accounts_for_gaps() {
        // A large overnight gap inflates true range beyond the bar range.
        let mut rows = flat_rows(20, 1.0);
        rows.push(row(120.0, 119.0, 119.5));
        let atr = calculate_atr(&rows, 14).unwrap();
        assert!(atr > 1.0);
    }

    #[test]
    fn atr_percent_of_close() {
        let rows = flat_rows(40, 2.0);
        let pct = atr_percent(&rows, 14).unwrap();
        assert!((pct - 2.0 / 101.0 * 100.0).abs() < 1e-6);
    }
}
