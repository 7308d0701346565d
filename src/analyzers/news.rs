// =============================================================================
// News Analyzer — headline sentiment from the bridge news ring
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::MarketDataBridge;
use crate::errors::EngineError;
use crate::pairs::PairInfo;

use super::{NewsAnalyzer, NewsReport};

/// Headlines older than this are ignored.
const HEADLINE_WINDOW_MS: i64 = 12 * 3_600_000;

const BULLISH_MARKERS: &[&str] = &[
    "beat", "beats", "strong", "surge", "rally", "hawkish", "hike", "growth", "upgrade",
];
const BEARISH_MARKERS: &[&str] = &[
    "miss", "misses", "weak", "plunge", "slump", "dovish", "cut", "recession", "downgrade",
];

pub struct HeadlineNewsAnalyzer {
    bridge: Arc<MarketDataBridge>,
}

impl HeadlineNewsAnalyzer {
    pub fn new(bridge: Arc<MarketDataBridge>) -> Self {
        Self { bridge }
    }

    fn headline_tone(title: &str) -> f64 {
        let lower = title.to_ascii_lowercase();
        let bull = BULLISH_MARKERS.iter().filter(|m| lower.contains(**m)).count() as f64;
        let bear = BEARISH_MARKERS.iter().filter(|m| lower.contains(**m)).count() as f64;
        (bull - bear).clamp(-1.0, 1.0)
    }

    pub fn build_report(&self, broker: &str, pair: &PairInfo, now_ms: i64) -> NewsReport {
        let events = self.bridge.snapshots.news(broker);

        let mut tone_sum = 0.0f64;
        let mut weight_sum = 0.0f64;
        let mut headline_count = 0usize;
        let mut upcoming_high_impact = 0usize;
        let mut impact_sum = 0.0f64;

        for event in &events {
            if !event.concerns(&pair.base, &pair.quote) {
                continue;
            }

            match event.scheduled_at {
                // Calendar entry still pending.
                Some(at) if at > now_ms => {
                    if event.impact >= 4 {
                        upcoming_high_impact += 1;
                    }
                    continue;
                }
                _ => {}
            }

            if now_ms - event.published_at > HEADLINE_WINDOW_MS {
                continue;
            }

            headline_count += 1;
            let weight = event.impact.max(1) as f64 * event.relevance.max(0.1);
            tone_sum += Self::headline_tone(&event.title) * weight;
            weight_sum += weight;
            impact_sum += weight;
        }

        let sentiment = if weight_sum > 0.0 {
            (tone_sum / weight_sum).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        NewsReport {
            sentiment,
            impact_score: (impact_sum * 8.0).min(100.0),
            headline_count,
            upcoming_high_impact,
            summary: format!(
                "{headline_count} headlines, sentiment {sentiment:+.2}, \
                 {upcoming_high_impact} high-impact pending"
            ),
        }
    }
}

#[async_trait]
impl NewsAnalyzer for HeadlineNewsAnalyzer {
    async fn analyze(
        &self,
        broker: &str,
        pair: &PairInfo,
        now_ms: i64,
    ) -> Result<NewsReport, EngineError> {
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

    fn headline(title: &str, impact: u8, published_at: i64) -> NewsEvent {
        NewsEvent {
            id: String::new(),
            title: title.to_string(),
            currencies: vec!["USD".to_string()],
            impact,
            scheduled_at: None,
            published_at,
            relevance: 1.0,
        }
    }

    fn analyzer_with(events: Vec<NewsEvent>) -> HeadlineNewsAnalyzer {
        let bridge = Arc::new(MarketDataBridge::new(
            &EngineConfig::default(),
            Arc::new(BroadcastBus::new()),
        ));
        bridge.snapshots.record_news("mt5", events);
        HeadlineNewsAnalyzer::new(bridge)
    }

    #[test]
    fn bullish_headlines_raise_sentiment() {
        let analyzer = analyzer_with(vec![
            headline("GDP beats expectations, strong growth", 3, 0),
            headline("Markets rally on hawkish surprise", 3, 0),
        ]);
        let report = analyzer.build_report("mt5", &pairs::lookup("EURUSD"), 1_000);
        assert!(report.sentiment > 0.0);
        assert_eq!(report.headline_count, 2);
    }

    #[test]
    fn bearish_headlines_lower_sentiment() {
        let analyzer = analyzer_with(vec![headline("Payrolls miss, recession fears plunge", 4, 0)]);
        let report = analyzer.build_report("mt5", &pairs::lookup("EURUSD"), 1_000);
        assert!(report.sentiment < 0.0);
    }

    #[test]
    fn pending_high_impact_events_are_counted_not_scored() {
        let mut event = headline("CPI release", 5, 0);
        event.scheduled_at = Some(3_600_000);
        let analyzer = analyzer_with(vec![event]);
        let report = analyzer.build_report("mt5", &pairs::lookup("EURUSD"), 0);
        assert_eq!(report.headline_count, 0);
        assert_eq!(report.upcoming_high_impact, 1);
    }

    #[test]
    fn stale_headlines_are_ignored() {
        let analyzer = analyzer_with(vec![headline("strong rally", 3, 0)]);
        let report =
            analyzer.build_report("mt5", &pairs::lookup("EURUSD"), HEADLINE_WINDOW_MS + 1);
        assert_eq!(report.headline_count, 0);
        assert_eq!(report.sentiment, 0.0);
    }
}
