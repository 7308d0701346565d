// =============================================================================
// Analyzer Adapters
// =============================================================================
//
// Thin contracts over the economic, news, technical, and candle analyses.
// Analyzers are pluggable producers of typed reports: the orchestration
// coordinator composes them but never reaches into their internals. Failing
// analyzers are substituted with neutral placeholders upstream.

pub mod candles;
pub mod economic;
pub mod news;
pub mod technical;

pub use candles::{analyze_candles, CandleReport};
pub use economic::CalendarEconomicAnalyzer;
pub use news::HeadlineNewsAnalyzer;
pub use technical::BridgeTechnicalAnalyzer;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::EngineError;
use crate::pairs::PairInfo;
use crate::types::{Direction, Timeframe, VolatilityState};

// =============================================================================
// Typed reports
// =============================================================================

/// Macro-economic context for one pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomicReport {
    pub bias: Direction,
    /// Aggregate impact pressure, 0..100.
    pub impact_score: f64,
    /// Calendar events relevant to the pair within the look-ahead window.
    pub upcoming_events: usize,
    pub summary: String,
}

impl EconomicReport {
    pub fn neutral() -> Self {
        Self {
            bias: Direction::Neutral,
            impact_score: 0.0,
            upcoming_events: 0,
            summary: "no economic data".to_string(),
        }
    }
}

/// Headline sentiment context for one pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsReport {
    /// -1 (bearish) .. +1 (bullish).
    pub sentiment: f64,
    /// Aggregate impact pressure, 0..100.
    pub impact_score: f64,
    pub headline_count: usize,
    pub upcoming_high_impact: usize,
    pub summary: String,
}

impl NewsReport {
    pub fn neutral() -> Self {
        Self {
            sentiment: 0.0,
            impact_score: 0.0,
            headline_count: 0,
            upcoming_high_impact: 0,
            summary: "no news data".to_string(),
        }
    }
}

/// Bars-coverage facts consumed by the decision gate's hard checks.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BarsCoverage {
    pub m15_count: usize,
    pub h1_count: usize,
    /// Age of the latest bar per timeframe, epoch-milli deltas.
    pub m15_age_ms: i64,
    pub h1_age_ms: i64,
}

/// Technical picture for one pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalReport {
    pub direction: Direction,
    /// Signed aggregate score, -100..100.
    pub score: f64,
    pub latest_price: f64,
    /// ATR in price units (primary timeframe).
    pub atr: f64,
    pub atr_pips: f64,
    /// ATR as a percentage of price; drives the crypto vol-spike gate.
    pub atr_pct: f64,
    pub volatility_state: VolatilityState,
    pub rsi_by_tf: HashMap<Timeframe, f64>,
    pub macd_hist_by_tf: HashMap<Timeframe, f64>,
    pub direction_by_tf: HashMap<Timeframe, Direction>,
    pub bars_coverage: BarsCoverage,
    /// True when the report was scaffolded rather than computed from bars.
    pub synthetic: bool,
}

impl TechnicalReport {
    /// Neutral scaffold used when no bars are available; `price` comes from
    /// the quote mid when possible.
    pub fn neutral_scaffold(price: f64) -> Self {
        Self {
            direction: Direction::Neutral,
            score: 0.0,
            latest_price: price,
            atr: 0.0,
            atr_pips: 0.0,
            atr_pct: 0.0,
            volatility_state: VolatilityState::Normal,
            rsi_by_tf: HashMap::new(),
            macd_hist_by_tf: HashMap::new(),
            direction_by_tf: HashMap::new(),
            bars_coverage: BarsCoverage::default(),
            synthetic: true,
        }
    }

    pub fn rsi(&self, tf: Timeframe) -> Option<f64> {
        self.rsi_by_tf.get(&tf).copied()
    }

    pub fn macd_hist(&self, tf: Timeframe) -> Option<f64> {
        self.macd_hist_by_tf.get(&tf).copied()
    }

    pub fn tf_direction(&self, tf: Timeframe) -> Option<Direction> {
        self.direction_by_tf.get(&tf).copied()
    }
}

// =============================================================================
// Analyzer seams
// =============================================================================

#[async_trait]
pub trait EconomicAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        broker: &str,
        pair: &PairInfo,
        now_ms: i64,
    ) -> Result<EconomicReport, EngineError>;
}

#[async_trait]
pub trait NewsAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        broker: &str,
        pair: &PairInfo,
        now_ms: i64,
    ) -> Result<NewsReport, EngineError>;
}

#[async_trait]
pub trait TechnicalAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        broker: &str,
        pair: &PairInfo,
        now_ms: i64,
    ) -> Result<TechnicalReport, EngineError>;
}
