// =============================================================================
// Decision memory — bounded per-pair ring of recent gate outcomes
// =============================================================================
//
// The last 8 normalized scores per pair feed the confidence-momentum
// modifier: a pair whose scores are improving gets a small boost, a
// deteriorating one a small haircut.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::DecisionState;

/// Ring capacity per pair.
pub const MEMORY_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionPoint {
    /// Normalized score, 0..1.
    pub score01: f64,
    pub state: DecisionState,
    pub at: i64,
}

pub struct DecisionMemory {
    rings: RwLock<HashMap<String, Vec<DecisionPoint>>>,
}

impl DecisionMemory {
    pub fn new() -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, pair: &str, score01: f64, state: DecisionState, at: i64) {
        let mut rings = self.rings.write();
        let ring = rings.entry(pair.to_string()).or_default();
        ring.push(DecisionPoint {
            score01: score01.clamp(0.0, 1.0),
            state,
            at,
        });
        while ring.len() > MEMORY_DEPTH {
            ring.remove(0);
        }
    }

    /// Momentum in [-1, 1]: latest score versus the mean of the ring.
    /// Zero when fewer than 3 points exist.
    pub fn momentum(&self, pair: &str) -> f64 {
        let rings = self.rings.read();
        let Some(ring) = rings.get(pair) else {
            return 0.0;
        };
        if ring.len() < 3 {
            return 0.0;
        }
        let mean: f64 = ring.iter().map(|p| p.score01).sum::<f64>() / ring.len() as f64;
        let latest = ring.last().map(|p| p.score01).unwrap_or(mean);
        (latest - mean).clamp(-1.0, 1.0)
    }

    pub fn recent(&self, pair: &str) -> Vec<DecisionPoint> {
        self.rings.read().get(pair).cloned().unwrap_or_default()
    }
}

impl Default for DecisionMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded_to_depth() {
        let memory = DecisionMemory::new();
        for i in 0..20 {
            memory.record("EURUSD", 0.5, DecisionState::WaitMonitor, i);
        }
        assert_eq!(memory.recent("EURUSD").len(), MEMORY_DEPTH);
        assert_eq!(memory.recent("EURUSD")[0].at, 12);
    }

    #[test]
    fn momentum_zero_with_sparse_history() {
        let memory = DecisionMemory::new();
        memory.record("EURUSD", 0.8, DecisionState::Enter, 0);
        memory.record("EURUSD", 0.9, DecisionState::Enter, 1);
        assert_eq!(memory.momentum("EURUSD"), 0.0);
    }

    #[test]
    fn improving_scores_give_positive_momentum() {
        let memory = DecisionMemory::new();
        for (i, score) in [0.3, 0.4, 0.5, 0.7].iter().enumerate() {
            memory.record("EURUSD", *score, DecisionState::WaitMonitor, i as i64);
        }
        assert!(memory.momentum("EURUSD") > 0.0);
    }

    #[test]
    fn deteriorating_scores_give_negative_momentum() {
        let memory = DecisionMemory::new();
        for (i, score) in [0.8, 0.7, 0.5, 0.3].iter().enumerate() {
            memory.record("EURUSD", *score, DecisionState::WaitMonitor, i as i64);
        }
        assert!(memory.momentum("EURUSD") < 0.0);
    }

    #[test]
    fn pairs_are_isolated() {
        let memory = DecisionMemory::new();
        for (i, score) in [0.2, 0.4, 0.9].iter().enumerate() {
            memory.record("EURUSD", *score, DecisionState::Enter, i as i64);
        }
        assert_eq!(memory.momentum("GBPUSD"), 0.0);
    }
}
