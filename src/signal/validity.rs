// =============================================================================
// Signal validity lifecycle
// =============================================================================
//
// TTL derivation:
//   base = primary_timeframe_minutes * 3 * 60_000
//   ttl  = clamp(base * global_multiplier * decision_multiplier,
//                min_ttl, max_ttl)
//
// The decision multiplier rewards actionable states with longer lifetimes and
// expires neutral/blocked signals quickly.
// =============================================================================

use crate::config::ValidityConfig;
use crate::types::{DecisionState, Direction, SignalStatus, Timeframe};

/// Lifecycle outcome stamped onto the signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidityStamp {
    pub ttl_ms: i64,
    pub expires_at: i64,
    pub status: SignalStatus,
}

fn decision_multiplier(state: Option<DecisionState>, direction: Direction, valid: bool) -> f64 {
    match state {
        Some(DecisionState::Enter) if valid => 1.0,
        Some(DecisionState::WaitMonitor) => 0.6,
        Some(DecisionState::NoTradeBlocked) => 0.2,
        _ if direction == Direction::Neutral => 0.2,
        _ => 0.5,
    }
}

fn status_for(state: Option<DecisionState>, direction: Direction, valid: bool) -> SignalStatus {
    match state {
        Some(DecisionState::Enter) if valid => SignalStatus::Active,
        Some(DecisionState::WaitMonitor) => SignalStatus::Watch,
        Some(DecisionState::NoTradeBlocked) => SignalStatus::Blocked,
        _ if direction == Direction::Neutral => SignalStatus::Neutral,
        _ => SignalStatus::Pending,
    }
}

/// Compute the validity stamp for a signal generated at `now_ms` off the
/// given primary timeframe.
pub fn stamp_validity(
    config: &ValidityConfig,
    primary: Timeframe,
    state: Option<DecisionState>,
    direction: Direction,
    valid: bool,
    now_ms: i64,
) -> ValidityStamp {
    let base_ms = primary.minutes() as f64 * 3.0 * 60_000.0;
    let raw = base_ms * config.multiplier * decision_multiplier(state, direction, valid);
    let ttl_ms = (raw as i64).clamp(config.min_ttl_ms, config.max_ttl_ms);

    ValidityStamp {
        ttl_ms,
        expires_at: now_ms + ttl_ms,
        status: status_for(state, direction, valid),
    }
}
