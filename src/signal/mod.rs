// =============================================================================
// Signal Model
// =============================================================================
//
// The raw signal is exclusively owned by the orchestration for the scope of
// one generation call, then handed to the execution engine by value. The
// pipeline treats it as a sequence of transforms: analyzers fill components,
// the risk engine attaches sizing, the decision gate attaches its verdict,
// and the validity step stamps the lifecycle.

pub mod orchestrator;
pub mod validity;

pub use orchestrator::{AnalysisMode, GenerateOptions, SignalOrchestrator};

use serde::Serialize;

use crate::analyzers::{CandleReport, EconomicReport, NewsReport, TechnicalReport};
use crate::gate::Decision;
use crate::types::{Direction, SignalStatus, VolatilityState};

/// Hard cap on accumulated reasoning lines.
pub const MAX_REASONING_LINES: usize = 20;

/// Spread classification attached to `components.market_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadVerdict {
    Normal,
    Elevated,
    Critical,
    Unknown,
}

/// EA-quote details captured at orchestration time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EaQuoteInfo {
    pub broker: String,
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    /// Receipt-time age when the signal was built, ms.
    pub age_ms: i64,
}

/// Market-data component of the signal.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataComponent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_pips: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_status: Option<SpreadVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ea_quote: Option<EaQuoteInfo>,
}

/// Per-analyzer components folded into the signal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalComponents {
    pub economic: EconomicReport,
    pub news: NewsReport,
    pub technical: TechnicalReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candles: Option<CandleReport>,
    pub market_data: MarketDataComponent,
}

/// Trailing-stop plan attached to an entry.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailingPlan {
    pub enabled: bool,
    /// Fraction of the TP distance at which SL moves to breakeven.
    pub breakeven_at_fraction: f64,
    /// Fraction of the TP distance at which trailing activates.
    pub activation_at_fraction: f64,
    /// Absolute price level where trailing activates.
    pub activation_level: f64,
    /// Trailing distance in price units.
    pub trailing_distance: f64,
    /// Minimum SL improvement before a broker modify is sent.
    pub step_distance: f64,
}

/// Fully specified entry plan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub price: f64,
    pub direction: Direction,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub atr: f64,
    pub risk_reward: f64,
    pub stop_multiple: f64,
    pub take_profit_multiple: f64,
    pub volatility_state: VolatilityState,
    pub stop_loss_pips: f64,
    pub take_profit_pips: f64,
    pub trailing_stop: TrailingPlan,
}

/// Outcome of the risk-management sizing step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskManagement {
    pub position_size: f64,
    pub risk_fraction: f64,
    pub kelly: f64,
    pub correlation_penalty: f64,
    pub can_trade: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub stress_tests: StressTests,
    pub exposure_impact: ExposureImpact,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StressTests {
    /// Projected loss fraction if the spread doubles before the stop.
    pub spread_widening_loss: f64,
    /// Projected loss fraction with worst-case slippage on the stop.
    pub slippage_loss: f64,
    /// Projected drawdown fraction if the stop is hit.
    pub max_drawdown_projection: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureImpact {
    pub base_currency: String,
    pub quote_currency: String,
    pub base_added: f64,
    pub quote_added: f64,
}

/// Validity verdict carried on the signal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Validity {
    pub is_valid: bool,
    pub reason: String,
}

/// The raw signal produced by one orchestration call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSignal {
    pub pair: String,
    /// Generation time, epoch millis.
    pub timestamp: i64,
    pub direction: Direction,
    /// 0..100.
    pub strength: f64,
    /// 0..100.
    pub confidence: f64,
    /// 0..100 blended conviction.
    pub final_score: f64,
    pub components: SignalComponents,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<Entry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_management: Option<RiskManagement>,
    pub is_valid: Validity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    /// Expiry stamp, epoch millis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub signal_status: SignalStatus,
    pub reasoning: Vec<String>,
    pub trade_plan: String,
    /// 0..100.
    pub estimated_win_rate: f64,
}

impl RawSignal {
    /// Append a reasoning line, respecting the hard cap.
    pub fn push_reason(&mut self, reason: impl Into<String>) {
        if self.reasoning.len() < MAX_REASONING_LINES {
            self.reasoning.push(reason.into());
        }
    }

    /// Decision score shorthand used for candidate ranking.
    pub fn decision_score(&self) -> f64 {
        self.decision.as_ref().map(|d| d.score).unwrap_or(0.0)
    }

    /// Coerce to a neutral, non-tradeable state (blocked or failed paths).
    /// Neutral signals carry no strength, score, entry, or sizing.
    pub fn coerce_neutral(&mut self, reason: impl Into<String>) {
        self.direction = Direction::Neutral;
        self.strength = 0.0;
        self.final_score = 0.0;
        self.entry = None;
        self.risk_management = None;
        self.push_reason(reason);
    }

    /// Whether the signal has expired relative to `now_ms`.
    pub fn expired(&self, now_ms: i64) -> bool {
        self.expires_at.map(|at| now_ms >= at).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::TechnicalReport;

    pub(crate) fn minimal_signal(pair: &str) -> RawSignal {
        RawSignal {
            pair: pair.to_string(),
            timestamp: 0,
            direction: Direction::Buy,
            strength: 60.0,
            confidence: 65.0,
            final_score: 62.0,
            components: SignalComponents {
                economic: EconomicReport::neutral(),
                news: NewsReport::neutral(),
                technical: TechnicalReport::neutral_scaffold(1.0),
                candles: None,
                market_data: MarketDataComponent::default(),
            },
            entry: None,
            risk_management: None,
            is_valid: Validity {
                is_valid: true,
                reason: String::new(),
            },
            decision: None,
            expires_at: None,
            signal_status: SignalStatus::Pending,
            reasoning: Vec::new(),
            trade_plan: String::new(),
            estimated_win_rate: 55.0,
        }
    }

    #[test]
    fn coerce_neutral_clears_tradeable_state() {
        let mut signal = minimal_signal("EURUSD");
        signal.coerce_neutral("blocked by gate");
        assert_eq!(signal.direction, Direction::Neutral);
        assert_eq!(signal.strength, 0.0);
        assert_eq!(signal.final_score, 0.0);
        assert!(signal.entry.is_none());
        assert!(signal.risk_management.is_none());
        assert_eq!(signal.reasoning.last().unwrap(), "blocked by gate");
    }

    #[test]
    fn reasoning_is_capped() {
        let mut signal = minimal_signal("EURUSD");
        for i in 0..40 {
            signal.push_reason(format!("reason {i}"));
        }
        assert_eq!(signal.reasoning.len(), MAX_REASONING_LINES);
    }

    #[test]
    fn expiry_check() {
        let mut signal = minimal_signal("EURUSD");
        assert!(!signal.expired(1_000));
        signal.expires_at = Some(500);
        assert!(signal.expired(500));
        assert!(!signal.expired(499));
    }

    #[test]
    fn signal_serialises_camel_case() {
        let signal = minimal_signal("EURUSD");
        let json = serde_json::to_value(&signal).unwrap();
        assert!(json.get("finalScore").is_some());
        assert!(json.get("estimatedWinRate").is_some());
        assert!(json.get("signalStatus").is_some());
    }
}
