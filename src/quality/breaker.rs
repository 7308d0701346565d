// =============================================================================
// Per-pair circuit breaker with healthy-streak auto-reenable
// =============================================================================
//
// A pair has at most one active breaker entry; expired entries are evicted on
// read. Once activated, a breaker lives at least MIN_BREAKER_MS regardless of
// the configured duration.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Minimum breaker lifetime.
pub const MIN_BREAKER_MS: i64 = 120_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerReason {
    WideSpread,
    WeekendGap,
    QualityScore,
}

impl std::fmt::Display for BreakerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WideSpread => write!(f, "wide_spread"),
            Self::WeekendGap => write!(f, "weekend_gap"),
            Self::QualityScore => write!(f, "quality_score"),
        }
    }
}

/// Metrics captured at activation time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerContext {
    pub score: f64,
    pub spread_pips: f64,
    pub weekend_gap_pips: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerEntry {
    pub reason: BreakerReason,
    pub activated_at: i64,
    pub expires_at: i64,
    pub context: BreakerContext,
}

/// Healthy-streak tracking for auto-reenable.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthyStreak {
    pub healthy_count: u32,
    pub healthy_since: i64,
}

pub struct CircuitBreakerStore {
    entries: RwLock<HashMap<String, BreakerEntry>>,
    streaks: RwLock<HashMap<String, HealthyStreak>>,
}

impl CircuitBreakerStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            streaks: RwLock::new(HashMap::new()),
        }
    }

    /// Activate a breaker for `pair`. The configured duration is floored at
    /// [`MIN_BREAKER_MS`]. An existing entry is replaced.
    pub fn activate(
        &self,
        pair: &str,
        reason: BreakerReason,
        context: BreakerContext,
        duration_ms: i64,
        now_ms: i64,
    ) -> BreakerEntry {
        let entry = BreakerEntry {
            reason,
            activated_at: now_ms,
            expires_at: now_ms + duration_ms.max(MIN_BREAKER_MS),
            context,
        };
        warn!(
            pair = %pair,
            reason = %reason,
            expires_in_ms = entry.expires_at - now_ms,
            score = context.score,
            "data quality circuit breaker activated"
        );
        self.entries.write().insert(pair.to_string(), entry.clone());
        self.streaks.write().remove(pair);
        entry
    }

    /// Active breaker for `pair`, evicting it first when expired.
    pub fn active(&self, pair: &str, now_ms: i64) -> Option<BreakerEntry> {
        let mut entries = self.entries.write();
        match entries.get(pair) {
            Some(entry) if entry.expires_at > now_ms => Some(entry.clone()),
            Some(_) => {
                entries.remove(pair);
                None
            }
            None => None,
        }
    }

    /// Explicit clear (admin action or auto-reenable).
    pub fn clear(&self, pair: &str) -> bool {
        self.entries.write().remove(pair).is_some()
    }

    /// Record the outcome of an assessment for streak tracking. Returns the
    /// updated streak.
    pub fn record_assessment(&self, pair: &str, healthy: bool, now_ms: i64) -> HealthyStreak {
        let mut streaks = self.streaks.write();
        if healthy {
            let streak = streaks.entry(pair.to_string()).or_insert(HealthyStreak {
                healthy_count: 0,
                healthy_since: now_ms,
            });
            streak.healthy_count += 1;
            *streak
        } else {
            streaks.remove(pair);
            HealthyStreak::default()
        }
    }

    /// Attempt auto-reenable after a healthy assessment. Clears the breaker
    /// and returns true when the streak policy is satisfied.
    #[allow(clippy::too_many_arguments)]
    pub fn try_auto_reenable(
        &self,
        pair: &str,
        score: f64,
        streak: HealthyStreak,
        min_score: f64,
        min_healthy_count: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> bool {
        if self.active(pair, now_ms).is_none() {
            return false;
        }
        let within_window = now_ms - streak.healthy_since <= window_ms;
        if score >= min_score && streak.healthy_count >= min_healthy_count && within_window {
            self.clear(pair);
            info!(
                pair = %pair,
                score,
                healthy_count = streak.healthy_count,
                "circuit breaker auto-reenabled"
            );
            return true;
        }
        false
    }

    /// All currently active entries (expired ones evicted).
    pub fn all_active(&self, now_ms: i64) -> Vec<(String, BreakerEntry)> {
        let mut entries = self.entries.write();
        entries.retain(|_, e| e.expires_at > now_ms);
        let mut list: Vec<(String, BreakerEntry)> = entries
            .iter()
            .map(|(pair, entry)| (pair.clone(), entry.clone()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }
}

impl Default for CircuitBreakerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BreakerContext {
        BreakerContext {
            score: 40.0,
            spread_pips: 3.5,
            weekend_gap_pips: 0.0,
        }
    }

    #[test]
    fn breaker_lifetime_is_floored() {
        let store = CircuitBreakerStore::new();
        let entry = store.activate("EURUSD", BreakerReason::WideSpread, ctx(), 1_000, 0);
        assert!(entry.expires_at - entry.activated_at >= MIN_BREAKER_MS);
    }

    #[test]
    fn expired_breaker_is_evicted_on_read() {
        let store = CircuitBreakerStore::new();
        store.activate("EURUSD", BreakerReason::QualityScore, ctx(), 120_000, 0);
        assert!(store.active("EURUSD", 119_999).is_some());
        assert!(store.active("EURUSD", 120_001).is_none());
        // Eviction happened; a second read stays empty.
        assert!(store.active("EURUSD", 0).is_none());
    }

    #[test]
    fn unhealthy_assessment_resets_streak() {
        let store = CircuitBreakerStore::new();
        store.record_assessment("EURUSD", true, 0);
        store.record_assessment("EURUSD", true, 1_000);
        let streak = store.record_assessment("EURUSD", false, 2_000);
        assert_eq!(streak.healthy_count, 0);
        let streak = store.record_assessment("EURUSD", true, 3_000);
        assert_eq!(streak.healthy_count, 1);
        assert_eq!(streak.healthy_since, 3_000);
    }

    #[test]
    fn auto_reenable_requires_full_policy() {
        let store = CircuitBreakerStore::new();
        store.activate("EURUSD", BreakerReason::WeekendGap, ctx(), 600_000, 0);

        let s1 = store.record_assessment("EURUSD", true, 10_000);
        // One healthy assessment is not enough.
        assert!(!store.try_auto_reenable("EURUSD", 85.0, s1, 78.0, 2, 240_000, 10_000));

        let s2 = store.record_assessment("EURUSD", true, 20_000);
        // Score below the floor fails.
        assert!(!store.try_auto_reenable("EURUSD", 70.0, s2, 78.0, 2, 240_000, 20_000));
        // Outside the window fails.
        assert!(!store.try_auto_reenable("EURUSD", 85.0, s2, 78.0, 2, 240_000, 400_000));
        // All conditions met clears the breaker.
        assert!(store.try_auto_reenable("EURUSD", 85.0, s2, 78.0, 2, 240_000, 20_000));
        assert!(store.active("EURUSD", 20_000).is_none());
    }

    #[test]
    fn activation_resets_streak() {
        let store = CircuitBreakerStore::new();
        store.record_assessment("EURUSD", true, 0);
        store.activate("EURUSD", BreakerReason::WideSpread, ctx(), 600_000, 1_000);
        let streak = store.record_assessment("EURUSD", true, 2_000);
        assert_eq!(streak.healthy_count, 1);
        assert_eq!(streak.healthy_since, 2_000);
    }
}
