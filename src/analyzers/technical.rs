// =============================================================================
// Technical Analyzer — bridge-backed indicator pipeline
// =============================================================================
//
// Computes RSI / MACD / ATR over the EA-pushed bar histories, hydrates
// per-timeframe direction from the latest snapshot when bars are thin, and
// aggregates a signed score with a direction vote.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::bridge::MarketDataBridge;
use crate::errors::EngineError;
use crate::indicators::atr::{atr_percent, calculate_atr, OhlcRow};
use crate::indicators::ema::ema_stack_direction;
use crate::indicators::macd::standard_macd;
use crate::indicators::rsi::latest_rsi;
use crate::pairs::PairInfo;
use crate::types::{Direction, Timeframe, VolatilityState};

use super::{BarsCoverage, TechnicalAnalyzer, TechnicalReport};

/// Timeframes folded into the aggregate vote, with their weights.
const VOTE_TIMEFRAMES: [(Timeframe, f64); 4] = [
    (Timeframe::M15, 0.15),
    (Timeframe::H1, 0.35),
    (Timeframe::H4, 0.30),
    (Timeframe::D1, 0.20),
];

/// Bars fetched per timeframe for indicator computation.
const BARS_PER_TF: usize = 120;

pub struct BridgeTechnicalAnalyzer {
    bridge: Arc<MarketDataBridge>,
}

impl BridgeTechnicalAnalyzer {
    pub fn new(bridge: Arc<MarketDataBridge>) -> Self {
        Self { bridge }
    }

    /// Classify volatility by comparing ATR pips to the pair's synthetic
    /// baseline.
    fn classify_volatility(atr_pips: f64, baseline: f64) -> VolatilityState {
        if baseline <= 0.0 || atr_pips <= 0.0 {
            return VolatilityState::Normal;
        }
        let ratio = atr_pips / baseline;
        if ratio < 0.6 {
            VolatilityState::Calm
        } else if ratio < 1.4 {
            VolatilityState::Normal
        } else if ratio < 2.2 {
            VolatilityState::Volatile
        } else {
            VolatilityState::Extreme
        }
    }

    /// Build the full report. Public for the EA-only orchestration path and
    /// for tests; the trait impl simply delegates.
    pub fn build_report(
        &self,
        broker: &str,
        pair: &PairInfo,
        now_ms: i64,
    ) -> Result<TechnicalReport, EngineError> {
        let snapshot = self.bridge.snapshots.latest(broker, &pair.pair);

        let mut rsi_by_tf = HashMap::new();
        let mut macd_by_tf = HashMap::new();
        let mut direction_by_tf = HashMap::new();
        let mut latest_price = 0.0f64;

        for (tf, _) in VOTE_TIMEFRAMES {
            let closes = self
                .bridge
                .bars
                .recent_closes(broker, &pair.pair, tf, BARS_PER_TF);

            if let Some(&price) = closes.last() {
                latest_price = price;
            }

            if let Some(rsi) = latest_rsi(&closes, 14) {
                rsi_by_tf.insert(tf, rsi);
            }
            if let Some(macd) = standard_macd(&closes) {
                macd_by_tf.insert(tf, macd.histogram);
            }
            if let Some((bullish, _)) = ema_stack_direction(&closes) {
                direction_by_tf.insert(tf, if bullish { Direction::Buy } else { Direction::Sell });
            }
        }

        // Hydrate gaps from the pushed snapshot.
        if let Some(snapshot) = &snapshot {
            for (tf, tf_snapshot) in &snapshot.timeframes {
                if let Some(rsi) = tf_snapshot.rsi {
                    rsi_by_tf.entry(*tf).or_insert(rsi);
                }
                if let Some(hist) = tf_snapshot.macd_histogram {
                    macd_by_tf.entry(*tf).or_insert(hist);
                }
                if let Some(dir) = tf_snapshot.direction {
                    direction_by_tf.entry(*tf).or_insert(dir);
                }
            }
        }

        if latest_price <= 0.0 {
            if let Some(quote) = self.bridge.freshest_quote(broker, &pair.pair) {
                latest_price = quote.mid();
            }
        }
        if latest_price <= 0.0 {
            return Err(EngineError::Analyzer(format!(
                "no price available for {}",
                pair.pair
            )));
        }

        // ATR from the H1 series; snapshot ATR as fallback.
        let h1_rows: Vec<OhlcRow> = self
            .bridge
            .bars
            .recent_closed(broker, &pair.pair, Timeframe::H1, BARS_PER_TF)
            .iter()
            .map(|b| b.ohlc_row())
            .collect();
        let mut atr = calculate_atr(&h1_rows, 14).unwrap_or(0.0);
        let mut atr_pct = atr_percent(&h1_rows, 14).unwrap_or(0.0);
        if atr <= 0.0 {
            if let Some(snapshot_atr) = snapshot
                .as_ref()
                .and_then(|s| s.timeframe(Timeframe::H1))
                .and_then(|tf| tf.atr)
            {
                atr = snapshot_atr;
                atr_pct = if latest_price > 0.0 {
                    atr / latest_price * 100.0
                } else {
                    0.0
                };
            }
        }
        let atr_pips = pair.to_pips(atr);

        // Weighted direction vote across timeframes plus momentum nudges.
        let mut vote = 0.0f64;
        for (tf, weight) in VOTE_TIMEFRAMES {
            if let Some(dir) = direction_by_tf.get(&tf) {
                vote += dir.sign() * weight;
            }
            if let Some(hist) = macd_by_tf.get(&tf) {
                vote += hist.signum() * weight * 0.3;
            }
            if let Some(rsi) = rsi_by_tf.get(&tf) {
                // Stretch away from 50 votes with the trend; extremes fade.
                let stretch = (rsi - 50.0) / 50.0;
                vote += stretch.clamp(-1.0, 1.0) * weight * 0.4;
            }
        }

        let score = (vote * 100.0).clamp(-100.0, 100.0);
        let direction = if score >= 18.0 {
            Direction::Buy
        } else if score <= -18.0 {
            Direction::Sell
        } else {
            Direction::Neutral
        };

        let m15_count = self
            .bridge
            .bars
            .count(broker, &pair.pair, Timeframe::M15);
        let h1_count = self.bridge.bars.count(broker, &pair.pair, Timeframe::H1);
        let m15_age_ms = self
            .bridge
            .bars
            .latest_bar_time(broker, &pair.pair, Timeframe::M15)
            .map(|t| now_ms - t)
            .unwrap_or(i64::MAX);
        let h1_age_ms = self
            .bridge
            .bars
            .latest_bar_time(broker, &pair.pair, Timeframe::H1)
            .map(|t| now_ms - t)
            .unwrap_or(i64::MAX);

        debug!(
            pair = %pair.pair,
            score,
            direction = %direction,
            atr_pips,
            "technical analysis complete"
        );

        Ok(TechnicalReport {
            direction,
            score,
            latest_price,
            atr,
            atr_pips,
            atr_pct,
            volatility_state: Self::classify_volatility(atr_pips, pair.synthetic_volatility),
            rsi_by_tf,
            macd_hist_by_tf: macd_by_tf,
            direction_by_tf,
            bars_coverage: BarsCoverage {
                m15_count,
                h1_count,
                m15_age_ms,
                h1_age_ms,
            },
            synthetic: false,
        })
    }
}

#[async_trait]
impl TechnicalAnalyzer for BridgeTechnicalAnalyzer {
    async fn analyze(
        &self,
        broker: &str,
        pair: &PairInfo,
        now_ms: i64,
    ) -> Result<TechnicalReport, EngineError> {
        self.build_report(broker, pair, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bar;
    use crate::broadcast::BroadcastBus;
    use crate::config::EngineConfig;
    use crate::pairs;

    fn bridge_with_trend(rising: bool) -> Arc<MarketDataBridge> {
        let bridge = Arc::new(MarketDataBridge::new(
            &EngineConfig::default(),
            Arc::new(BroadcastBus::new()),
        ));
        for tf in [Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1] {
            let step = tf.interval_ms();
            let bars: Vec<Bar> = (0..100)
                .map(|i| {
                    let x = if rising { i as f64 } else { (100 - i) as f64 };
                    let close = 1.05 + x * 0.0005;
                    Bar {
                        broker: String::new(),
                        symbol: String::new(),
                        timeframe: tf,
                        open: close - 0.0002,
                        high: close + 0.0006,
                        low: close - 0.0006,
                        close,
                        volume: Some(50.0),
                        time: i * step,
                        closed: true,
                    }
                })
                .collect();
            bridge.bars.record("mt5", "EURUSD", tf, bars);
        }
        bridge
    }

    #[test]
    fn rising_market_votes_buy() {
        let bridge = bridge_with_trend(true);
        let analyzer = BridgeTechnicalAnalyzer::new(bridge);
        let pair = pairs::lookup("EURUSD");
        let report = analyzer
            .build_report("mt5", &pair, 100 * Timeframe::D1.interval_ms())
            .unwrap();
        assert_eq!(report.direction, Direction::Buy);
        assert!(report.score > 0.0);
        assert!(report.latest_price > 1.05);
        assert!(!report.synthetic);
        assert!(report.bars_coverage.h1_count >= 60);
    }

    #[test]
    fn falling_market_votes_sell() {
        let bridge = bridge_with_trend(false);
        let analyzer = BridgeTechnicalAnalyzer::new(bridge);
        let pair = pairs::lookup("EURUSD");
        let report = analyzer
            .build_report("mt5", &pair, 100 * Timeframe::D1.interval_ms())
            .unwrap();
        assert_eq!(report.direction, Direction::Sell);
        assert!(report.score < 0.0);
    }

    #[test]
    fn no_data_is_an_analyzer_error() {
        let bridge = Arc::new(MarketDataBridge::new(
            &EngineConfig::default(),
            Arc::new(BroadcastBus::new()),
        ));
        let analyzer = BridgeTechnicalAnalyzer::new(bridge);
        let pair = pairs::lookup("EURUSD");
        let err = analyzer.build_report("mt5", &pair, 0).unwrap_err();
        assert_eq!(err.class(), "analyzer");
    }

    #[test]
    fn volatility_classification_against_baseline() {
        assert_eq!(
            BridgeTechnicalAnalyzer::classify_volatility(4.0, 9.0),
            VolatilityState::Calm
        );
        assert_eq!(
            BridgeTechnicalAnalyzer::classify_volatility(9.0, 9.0),
            VolatilityState::Normal
        );
        assert_eq!(
            BridgeTechnicalAnalyzer::classify_volatility(15.0, 9.0),
            VolatilityState::Volatile
        );
        assert_eq!(
            BridgeTechnicalAnalyzer::classify_volatility(25.0, 9.0),
            VolatilityState::Extreme
        );
    }
}
