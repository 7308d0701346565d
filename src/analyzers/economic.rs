// =============================================================================
// Economic Analyzer — calendar-event pressure from the bridge news ring
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::MarketDataBridge;
use crate::errors::EngineError;
use crate::pairs::PairInfo;
use crate::types::Direction;

use super::{EconomicAnalyzer, EconomicReport};

/// Look-ahead window for "upcoming" calendar events.
const LOOKAHEAD_MS: i64 = 8 * 3_600_000;
/// Look-back window for released events still pressuring the pair.
const LOOKBACK_MS: i64 = 2 * 3_600_000;

pub struct CalendarEconomicAnalyzer {
    bridge: Arc<MarketDataBridge>,
}

impl CalendarEconomicAnalyzer {
    pub fn new(bridge: Arc<MarketDataBridge>) -> Self {
        Self { bridge }
    }

    pub fn build_report(&self, broker: &str, pair: &PairInfo, now_ms: i64) -> EconomicReport {
        let events = self.bridge.snapshots.news(broker);

        let mut impact_sum = 0.0f64;
        let mut upcoming = 0usize;
        let mut base_pressure = 0.0f64;
        let mut quote_pressure = 0.0f64;

        for event in &events {
            if !event.concerns(&pair.base, &pair.quote) {
                continue;
            }
            let Some(at) = event.scheduled_at else {
                continue;
            };
            let delta = at - now_ms;
            if delta > LOOKAHEAD_MS || delta < -LOOKBACK_MS {
                continue;
            }

            let weight = event.impact as f64 * event.relevance.max(0.1);
            impact_sum += weight;
            if delta > 0 {
                upcoming += 1;
            }

            // High-impact events on one leg weaken that currency's certainty;
            // treated as pressure against holding exposure in it.
            if event.currencies.iter().any(|c| c.eq_ignore_ascii_case(&pair.base)) {
                base_pressure += weight;
            }
            if event.currencies.iter().any(|c| c.eq_ignore_ascii_case(&pair.quote)) {
                quote_pressure += weight;
            }
        }

        let impact_score = (impact_sum * 6.0).min(100.0);
        let tilt = quote_pressure - base_pressure;
        let bias = if tilt > 2.0 {
            Direction::Buy
        } else if tilt < -2.0 {
            Direction::Sell
        } else {
            Direction::Neutral
        };

        EconomicReport {
            bias,
            impact_score,
            upcoming_events: upcoming,
            summary: format!(
                "{upcoming} upcoming events, impact {impact_score:.0}/100, tilt {tilt:+.1}"
            ),
        }
    }
}

#[async_trait]
impl EconomicAnalyzer for CalendarEconomicAnalyzer {
    async fn analyze(
        &self,
        broker: &str,
        pair: &PairInfo,
        now_ms: i64,
    ) -> Result<EconomicReport, EngineError> {
        Ok(self.build_report(broker, pair, now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::NewsEvent;
    use crate::broadcast::BroadcastBus;
    use crate::config::EngineConfig;
    use crate::pairs;

    fn event(currency: &str, impact: u8, scheduled_at: i64) -> NewsEvent {
        NewsEvent {
            id: String::new(),
            title: "event".to_string(),
            currencies: vec![currency.to_string()],
            impact,
            scheduled_at: Some(scheduled_at),
            published_at: 0,
            relevance: 1.0,
        }
    }

    fn analyzer_with(events: Vec<NewsEvent>) -> CalendarEconomicAnalyzer {
        let bridge = Arc::new(MarketDataBridge::new(
            &EngineConfig::default(),
            Arc::new(BroadcastBus::new()),
        ));
        bridge.snapshots.record_news("mt5", events);
        CalendarEconomicAnalyzer::new(bridge)
    }

    #[test]
    fn no_events_is_neutral() {
        let analyzer = analyzer_with(Vec::new());
        let report = analyzer.build_report("mt5", &pairs::lookup("EURUSD"), 0);
        assert_eq!(report.bias, Direction::Neutral);
        assert_eq!(report.upcoming_events, 0);
        assert_eq!(report.impact_score, 0.0);
    }

    #[test]
    fn quote_side_pressure_tilts_buy() {
        // Heavy USD calendar pressure on EURUSD tilts toward base strength.
        let analyzer = analyzer_with(vec![event("USD", 4, 60 * 60_000)]);
        let report = analyzer.build_report("mt5", &pairs::lookup("EURUSD"), 0);
        assert_eq!(report.bias, Direction::Buy);
        assert_eq!(report.upcoming_events, 1);
        assert!(report.impact_score > 0.0);
    }

    #[test]
    fn events_outside_window_are_ignored(){
        let analyzer = analyzer_with(vec![event("USD", 5, 24 * 3_600_000)]);
        let report = analyzer.build_report("mt5", &pairs::lookup("EURUSD"), 0);
        assert_eq!(report.upcoming_events, 0);
    }

    #[test]
    fn unrelated_currency_is_ignored() {
        let analyzer = analyzer_with(vec![event("JPY", 5, 60 * 60_000)]);
        let report = analyzer.build_report("mt5", &pairs::lookup("EURUSD"), 0);
        assert_eq!(report.impact_score, 0.0);
    }
}
