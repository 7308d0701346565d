// =============================================================================
// Snapshot Store — per-symbol indicator bundles and the broker news ring
// =============================================================================
//
// Agents push a full indicator snapshot per (broker, symbol); the latest one
// is canonical. News and calendar events land in a bounded ring per broker
// with relevance metadata for the analyzers.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{Direction, Timeframe};

/// Latest candle embedded in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Bar open time, epoch millis.
    pub time: i64,
}

/// High/low levels of a trailing window (day/week/month).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeLevels {
    pub high: f64,
    pub low: f64,
}

impl RangeLevels {
    /// Position of `price` inside the range, 0 (low) .. 1 (high).
    pub fn position(&self, price: f64) -> Option<f64> {
        let span = self.high - self.low;
        if span <= 0.0 {
            return None;
        }
        Some(((price - self.low) / span).clamp(0.0, 1.0))
    }
}

/// Classic floor-trader pivot levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotLevels {
    pub pivot: f64,
    pub r1: f64,
    pub r2: f64,
    pub s1: f64,
    pub s2: f64,
}

impl PivotLevels {
    /// Distance in price units from `price` to the nearest pivot level.
    pub fn nearest_distance(&self, price: f64) -> f64 {
        [self.pivot, self.r1, self.r2, self.s1, self.s2]
            .iter()
            .map(|level| (price - level).abs())
            .fold(f64::INFINITY, f64::min)
    }
}

/// Per-timeframe indicator bundle inside a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeframeSnapshot {
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub macd_histogram: Option<f64>,
    #[serde(default)]
    pub atr: Option<f64>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub latest_candle: Option<SnapshotCandle>,
}

/// Full indicator snapshot for one (broker, symbol).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    #[serde(default)]
    pub broker: String,
    pub symbol: String,
    #[serde(default)]
    pub timeframes: HashMap<Timeframe, TimeframeSnapshot>,
    #[serde(default)]
    pub day_range: Option<RangeLevels>,
    #[serde(default)]
    pub week_range: Option<RangeLevels>,
    #[serde(default)]
    pub month_range: Option<RangeLevels>,
    #[serde(default)]
    pub pivots: Option<PivotLevels>,
    /// Aggregate agent-side direction vote.
    #[serde(default)]
    pub direction: Option<Direction>,
    /// Aggregate agent-side score, -100..100.
    #[serde(default)]
    pub score: Option<f64>,
    /// Server receipt time, epoch millis.
    #[serde(default)]
    pub received_at: i64,
}

impl MarketSnapshot {
    pub fn timeframe(&self, tf: Timeframe) -> Option<&TimeframeSnapshot> {
        self.timeframes.get(&tf)
    }
}

/// A news headline or calendar event pushed by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsEvent {
    #[serde(default)]
    pub id: String,
    pub title: String,
    /// Currencies the event is relevant to (e.g. ["USD", "EUR"]).
    #[serde(default)]
    pub currencies: Vec<String>,
    /// Impact rating 1 (low) .. 5 (critical).
    #[serde(default)]
    pub impact: u8,
    /// Scheduled release time for calendar events, epoch millis.
    #[serde(default)]
    pub scheduled_at: Option<i64>,
    /// Publication/receipt time, epoch millis.
    #[serde(default)]
    pub published_at: i64,
    /// Agent-side relevance hint, 0..1.
    #[serde(default)]
    pub relevance: f64,
}

impl NewsEvent {
    /// Whether this event concerns either side of `base`/`quote`.
    pub fn concerns(&self, base: &str, quote: &str) -> bool {
        self.currencies.is_empty()
            || self
                .currencies
                .iter()
                .any(|c| c.eq_ignore_ascii_case(base) || c.eq_ignore_ascii_case(quote))
    }
}

const MAX_NEWS_PER_BROKER: usize = 200;

pub struct SnapshotStore {
    snapshots: RwLock<HashMap<(String, String), MarketSnapshot>>,
    news: RwLock<HashMap<String, VecDeque<NewsEvent>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            news: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the canonical snapshot for (broker, symbol).
    pub fn record(&self, mut snapshot: MarketSnapshot, broker: &str, received_at: i64) {
        snapshot.broker = broker.to_string();
        snapshot.received_at = received_at;
        let key = (broker.to_string(), snapshot.symbol.clone());
        self.snapshots.write().insert(key, snapshot);
    }

    pub fn latest(&self, broker: &str, symbol: &str) -> Option<MarketSnapshot> {
        self.snapshots
            .read()
            .get(&(broker.to_string(), symbol.to_string()))
            .cloned()
    }

    pub fn record_news(&self, broker: &str, events: Vec<NewsEvent>) {
        let mut news = self.news.write();
        let ring = news.entry(broker.to_string()).or_default();
        for event in events {
            ring.push_back(event);
        }
        while ring.len() > MAX_NEWS_PER_BROKER {
            ring.pop_front();
        }
    }

    pub fn news(&self, broker: &str) -> Vec<NewsEvent> {
        self.news
            .read()
            .get(broker)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Calendar events for `base`/`quote` scheduled within ±`window_ms`
    /// of `now_ms`, at or above `min_impact`.
    pub fn upcoming_events(
        &self,
        broker: &str,
        base: &str,
        quote: &str,
        now_ms: i64,
        window_ms: i64,
        min_impact: u8,
    ) -> Vec<NewsEvent> {
        self.news
            .read()
            .get(broker)
            .map(|ring| {
                ring.iter()
                    .filter(|e| e.impact >= min_impact)
                    .filter(|e| e.concerns(base, quote))
                    .filter(|e| {
                        e.scheduled_at
                            .map(|at| (at - now_ms).abs() <= window_ms)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(symbol: &str) -> MarketSnapshot {
        MarketSnapshot {
            broker: String::new(),
            symbol: symbol.to_string(),
            timeframes: HashMap::new(),
            day_range: Some(RangeLevels { high: 1.10, low: 1.08 }),
            week_range: None,
            month_range: None,
            pivots: None,
            direction: Some(Direction::Buy),
            score: Some(40.0),
            received_at: 0,
        }
    }

    fn event(impact: u8, scheduled_at: Option<i64>, currencies: &[&str]) -> NewsEvent {
        NewsEvent {
            id: String::new(),
            title: "CPI".to_string(),
            currencies: currencies.iter().map(|s| s.to_string()).collect(),
            impact,
            scheduled_at,
            published_at: 0,
            relevance: 0.8,
        }
    }

    #[test]
    fn snapshot_is_replaced_per_key() {
        let store = SnapshotStore::new();
        store.record(snapshot("EURUSD"), "mt5", 1_000);
        let mut second = snapshot("EURUSD");
        second.score = Some(70.0);
        store.record(second, "mt5", 2_000);
        let latest = store.latest("mt5", "EURUSD").unwrap();
        assert_eq!(latest.score, Some(70.0));
        assert_eq!(latest.received_at, 2_000);
    }

    #[test]
    fn range_position_is_clamped() {
        let range = RangeLevels { high: 1.10, low: 1.08 };
        assert!((range.position(1.09).unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(range.position(1.20).unwrap(), 1.0);
    }

    #[test]
    fn news_ring_is_bounded() {
        let store = SnapshotStore::new();
        for _ in 0..(MAX_NEWS_PER_BROKER + 20) {
            store.record_news("mt5", vec![event(2, None, &["USD"])]);
        }
        assert_eq!(store.news("mt5").len(), MAX_NEWS_PER_BROKER);
    }

    #[test]
    fn upcoming_events_filters_window_impact_and_currency() {
        let store = SnapshotStore::new();
        store.record_news(
            "mt5",
            vec![
                event(4, Some(10 * 60_000), &["USD"]),  // in window
                event(4, Some(90 * 60_000), &["USD"]),  // outside window
                event(1, Some(10 * 60_000), &["USD"]),  // low impact
                event(4, Some(10 * 60_000), &["JPY"]),  // wrong currency
            ],
        );
        let hits = store.upcoming_events("mt5", "EUR", "USD", 0, 30 * 60_000, 3);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn event_at_exact_window_boundary_is_included() {
        let store = SnapshotStore::new();
        store.record_news("mt5", vec![event(4, Some(30 * 60_000), &["USD"])]);
        let hits = store.upcoming_events("mt5", "EUR", "USD", 0, 30 * 60_000, 3);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn pivot_nearest_distance() {
        let pivots = PivotLevels { pivot: 1.09, r1: 1.10, r2: 1.11, s1: 1.08, s2: 1.07 };
        assert!((pivots.nearest_distance(1.0895) - 0.0005).abs() < 1e-9);
    }
}
