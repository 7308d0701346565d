// =============================================================================
// Candle Analyzer — momentum / volatility / structure from raw bars
// =============================================================================
//
// Pure functions over a closed-bar window. Used by the EA-only orchestration
// path and by the decisive-candle and follow-through confluence layers.
// =============================================================================

use serde::Serialize;

use crate::bridge::Bar;
use crate::types::Direction;

/// Body fraction at or above which a candle counts as decisive.
pub const DECISIVE_BODY_FRACTION: f64 = 0.55;
/// Close must land within this fraction of the range edge to be decisive.
pub const DECISIVE_EDGE_FRACTION: f64 = 0.25;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleReport {
    /// Signed momentum from recent closes, -1..1.
    pub momentum: f64,
    /// Mean bar range relative to price, in percent.
    pub volatility_pct: f64,
    /// Higher-high/higher-low (or inverse) cleanliness, 0..1.
    pub structure_score: f64,
    /// Whether the latest closed candle is decisive.
    pub decisive: bool,
    pub latest_body_fraction: f64,
    pub direction_vote: Direction,
    /// Fraction of recent bars closing in the vote direction, 0..1.
    pub follow_through: f64,
}

impl CandleReport {
    pub fn neutral() -> Self {
        Self {
            momentum: 0.0,
            volatility_pct: 0.0,
            structure_score: 0.0,
            decisive: false,
            latest_body_fraction: 0.0,
            direction_vote: Direction::Neutral,
            follow_through: 0.0,
        }
    }
}

/// Whether the latest candle has a dominant body closing near its edge.
pub fn is_decisive(bar: &Bar) -> bool {
    let range = bar.high - bar.low;
    if range <= 0.0 {
        return false;
    }
    if bar.body_fraction() < DECISIVE_BODY_FRACTION {
        return false;
    }
    if bar.is_bullish() {
        (bar.high - bar.close) / range <= DECISIVE_EDGE_FRACTION
    } else {
        (bar.close - bar.low) / range <= DECISIVE_EDGE_FRACTION
    }
}

/// Analyze the trailing window of closed bars (oldest first).
pub fn analyze_candles(bars: &[Bar]) -> CandleReport {
    if bars.len() < 8 {
        return CandleReport::neutral();
    }

    let latest = bars.last().expect("non-empty checked");

    // Momentum: net close-to-close move over the window, normalised by the
    // mean bar range so quiet pairs and volatile pairs compare fairly.
    let first_close = bars[0].close;
    let net_move = latest.close - first_close;
    let mean_range: f64 =
        bars.iter().map(|b| (b.high - b.low).max(0.0)).sum::<f64>() / bars.len() as f64;
    let momentum = if mean_range > 0.0 {
        (net_move / (mean_range * bars.len() as f64 * 0.5)).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    let volatility_pct = if latest.close > 0.0 {
        mean_range / latest.close * 100.0
    } else {
        0.0
    };

    // Structure: count higher-highs + higher-lows (bull) or lower-highs +
    // lower-lows (bear) across consecutive bars.
    let mut bull_steps = 0usize;
    let mut bear_steps = 0usize;
    for w in bars.windows(2) {
        if w[1].high >= w[0].high && w[1].low >= w[0].low {
            bull_steps += 1;
        } else if w[1].high <= w[0].high && w[1].low <= w[0].low {
            bear_steps += 1;
        }
    }
    let steps = (bars.len() - 1) as f64;
    let structure_score = (bull_steps.max(bear_steps) as f64 / steps).clamp(0.0, 1.0);

    let direction_vote = if momentum > 0.12 {
        Direction::Buy
    } else if momentum < -0.12 {
        Direction::Sell
    } else {
        Direction::Neutral
    };

    // Follow-through: share of the last 8 bars closing with the vote.
    let tail = &bars[bars.len().saturating_sub(8)..];
    let follow_through = match direction_vote {
        Direction::Buy => {
            tail.iter().filter(|b| b.is_bullish()).count() as f64 / tail.len() as f64
        }
        Direction::Sell => {
            tail.iter().filter(|b| !b.is_bullish()).count() as f64 / tail.len() as f64
        }
        Direction::Neutral => 0.0,
    };

    CandleReport {
        momentum,
        volatility_pct,
        structure_score,
        decisive: is_decisive(latest),
        latest_body_fraction: latest.body_fraction(),
        direction_vote,
        follow_through,
    }
}
