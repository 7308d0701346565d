// =============================================================================
// Historical Value-at-Risk over realized trade returns
// =============================================================================
//
// Keeps the last N realized returns (percent of account) and reads the loss
// quantile at the configured confidence. Not ready until the minimum sample
// count is reached.
// =============================================================================

use std::collections::VecDeque;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VarMetrics {
    pub ready: bool,
    /// Loss at the confidence level, percent of account (positive number).
    pub value_pct: f64,
    pub limit_pct: f64,
    pub breach: bool,
    pub confidence: f64,
    pub lookback: usize,
    pub sample_count: usize,
    pub last_updated: i64,
}

pub struct HistoricalVar {
    returns: VecDeque<f64>,
    confidence: f64,
    lookback: usize,
    min_samples: usize,
    limit_pct: f64,
    last_updated: i64,
}

impl HistoricalVar {
    pub fn new(confidence: f64, lookback: usize, min_samples: usize, limit_pct: f64) -> Self {
        Self {
            returns: VecDeque::new(),
            confidence: confidence.clamp(0.5, 0.999),
            lookback: lookback.max(1),
            min_samples: min_samples.max(1),
            limit_pct,
            last_updated: 0,
        }
    }

    /// Record a realized return (percent of account, signed).
    pub fn record_return(&mut self, return_pct: f64, now_ms: i64) {
        self.returns.push_back(return_pct);
        while self.returns.len() > self.lookback {
            self.returns.pop_front();
        }
        self.last_updated = now_ms;
    }

    /// Current metrics snapshot.
    pub fn metrics(&self) -> VarMetrics {
        let sample_count = self.returns.len();
        if sample_count < self.min_samples {
            return VarMetrics {
                ready: false,
                value_pct: 0.0,
                limit_pct: self.limit_pct,
                breach: false,
                confidence: self.confidence,
                lookback: self.lookback,
                sample_count,
                last_updated: self.last_updated,
            };
        }

        // Historical quantile: sort ascending (worst first) and read the
        // (1 - confidence) tail.
        let mut sorted: Vec<f64> = self.returns.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let tail_index = ((1.0 - self.confidence) * sample_count as f64).floor() as usize;
        let tail_index = tail_index.min(sample_count - 1);
        let value_pct = (-sorted[tail_index]).max(0.0);

        VarMetrics {
            ready: true,
            value_pct,
            limit_pct: self.limit_pct,
            breach: value_pct > self.limit_pct,
            confidence: self.confidence,
            lookback: self.lookback,
            sample_count,
            last_updated: self.last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_below_min_samples() {
        let mut var = HistoricalVar::new(0.95, 100, 20, 4.0);
        for i in 0..19 {
            var.record_return(-0.5, i);
        }
        let metrics = var.metrics();
        assert!(!metrics.ready);
        assert!(!metrics.breach);
    }

    #[test]
    fn var_reads_loss_tail() {
        let mut var = HistoricalVar::new(0.95, 100, 20, 4.0);
        // 95 small wins, 5 big losses.
        for i in 0..95 {
            var.record_return(0.2, i);
        }
        for i in 0..5 {
            var.record_return(-3.0, 100 + i);
        }
        let metrics = var.metrics();
        assert!(metrics.ready);
        assert!(metrics.value_pct >= 2.9);
        assert!(!metrics.breach);
    }

    #[test]
    fn breach_above_limit() {
        let mut var = HistoricalVar::new(0.95, 100, 20, 4.0);
        for i in 0..30 {
            var.record_return(-6.0, i);
        }
        let metrics = var.metrics();
        assert!(metrics.breach);
        assert!(metrics.value_pct > 4.0);
    }

    #[test]
    fn lookback_is_bounded() {
        let mut var = HistoricalVar::new(0.95, 50, 20, 4.0);
        for i in 0..200 {
            var.record_return(0.1, i);
        }
        assert_eq!(var.metrics().sample_count, 50);
    }

    #[test]
    fn all_gains_give_zero_var() {
        let mut var = HistoricalVar::new(0.95, 100, 20, 4.0);
        for i in 0..30 {
            var.record_return(0.5, i);
        }
        assert_eq!(var.metrics().value_pct, 0.0);
    }
}
