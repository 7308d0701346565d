// =============================================================================
// Quote Book — canonical quotes plus a bounded telemetry ring
// =============================================================================
//
// The most recent quote per (broker, symbol) is canonical. A time-ordered
// history is retained for velocity and slippage inference, pruned first by
// retention window and then capped by point count.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single quote pushed by an EA agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    #[serde(default)]
    pub broker: String,
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub digits: u32,
    #[serde(default)]
    pub point: f64,
    #[serde(default)]
    pub spread_points: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    /// Optional agent-side hint about book depth, 0..1 (1 = deep).
    #[serde(default)]
    pub liquidity_hint: Option<f64>,
    /// Broker-side timestamp, epoch millis.
    pub timestamp: i64,
    /// Server receipt time, epoch millis. Used for freshness decisions.
    #[serde(default)]
    pub received_at: i64,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            (self.bid + self.ask) / 2.0
        } else {
            self.last.unwrap_or(0.0)
        }
    }

    /// Spread in pips for the given pip size.
    pub fn spread_pips(&self, pip_size: f64) -> f64 {
        if pip_size > 0.0 && self.ask >= self.bid {
            (self.ask - self.bid) / pip_size
        } else {
            0.0
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.received_at).max(0)
    }
}

/// Retention policy for the telemetry ring.
#[derive(Debug, Clone, Copy)]
pub struct QuoteRetention {
    pub window_ms: i64,
    pub max_points: usize,
}

impl Default for QuoteRetention {
    fn default() -> Self {
        Self {
            window_ms: 30 * 60_000,
            max_points: 2_400,
        }
    }
}

pub struct QuoteBook {
    canonical: RwLock<HashMap<(String, String), Quote>>,
    history: RwLock<HashMap<(String, String), VecDeque<Quote>>>,
    retention: QuoteRetention,
}

impl QuoteBook {
    pub fn new(retention: QuoteRetention) -> Self {
        Self {
            canonical: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Store a validated quote as canonical and append it to the ring.
    pub fn record(&self, quote: Quote) {
        let key = (quote.broker.clone(), quote.symbol.clone());

        {
            let mut history = self.history.write();
            let ring = history.entry(key.clone()).or_default();
            // Keep the ring time-ordered even under out-of-order delivery:
            // drop any stray newer-than-incoming tail entries' ordering issues
            // by only appending when not older than the current tail.
            let append_ok = ring
                .back()
                .map(|last| quote.received_at >= last.received_at)
                .unwrap_or(true);
            if append_ok {
                ring.push_back(quote.clone());
            }

            // Prune by time first, then cap by count.
            let cutoff = quote.received_at - self.retention.window_ms;
            while ring.front().map(|q| q.received_at < cutoff).unwrap_or(false) {
                ring.pop_front();
            }
            while ring.len() > self.retention.max_points {
                ring.pop_front();
            }
        }

        self.canonical.write().insert(key, quote);
    }

    pub fn latest(&self, broker: &str, symbol: &str) -> Option<Quote> {
        self.canonical
            .read()
            .get(&(broker.to_string(), symbol.to_string()))
            .cloned()
    }

    /// Most recent quote for `symbol` on any broker; freshest wins.
    pub fn latest_any_broker(&self, symbol: &str) -> Option<Quote> {
        self.canonical
            .read()
            .values()
            .filter(|q| q.symbol == symbol)
            .max_by_key(|q| q.received_at)
            .cloned()
    }

    pub fn history_len(&self, broker: &str, symbol: &str) -> usize {
        self.history
            .read()
            .get(&(broker.to_string(), symbol.to_string()))
            .map_or(0, VecDeque::len)
    }

    /// Mid-price velocity in price-units per second over the trailing
    /// `window_ms`, from the telemetry ring. Used by the slippage-risk layer.
    pub fn velocity(&self, broker: &str, symbol: &str, window_ms: i64) -> Option<f64> {
        let history = self.history.read();
        let ring = history.get(&(broker.to_string(), symbol.to_string()))?;
        let newest = ring.back()?;
        let cutoff = newest.received_at - window_ms;

        let oldest_in_window = ring.iter().find(|q| q.received_at >= cutoff)?;
        let dt_ms = newest.received_at - oldest_in_window.received_at;
        if dt_ms <= 0 {
            return None;
        }
        Some((newest.mid() - oldest_in_window.mid()).abs() / (dt_ms as f64 / 1_000.0))
    }

    /// Spread trajectory: ratio of the latest spread to the ring average.
    /// Values well above 1 indicate a widening book.
    pub fn spread_expansion(&self, broker: &str, symbol: &str) -> Option<f64> {
        let history = self.history.read();
        let ring = history.get(&(broker.to_string(), symbol.to_string()))?;
        if ring.len() < 4 {
            return None;
        }
        let avg: f64 = ring
            .iter()
            .map(|q| (q.ask - q.bid).max(0.0))
            .sum::<f64>()
            / ring.len() as f64;
        let latest = (ring.back()?.ask - ring.back()?.bid).max(0.0);
        if avg <= 0.0 {
            return None;
        }
        Some(latest / avg)
    }

    /// Distinct symbols with a canonical quote for `broker`.
    pub fn symbols(&self, broker: &str) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .canonical
            .read()
            .keys()
            .filter(|(b, _)| b == broker)
            .map(|(_, s)| s.clone())
            .collect();
        symbols.sort();
        symbols
    }
}
