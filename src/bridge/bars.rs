// =============================================================================
// Bar Book — append-only OHLCV history per (broker, symbol, timeframe)
// =============================================================================
//
// Bars are stored ascending by open time and bounded in length. Closed bars
// (and large seed batches) are realtime triggers for the signal runner.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::indicators::atr::OhlcRow;
use crate::types::Timeframe;

/// Batches at least this large count as a seed and trigger recomputation
/// even when no bar in them is flagged closed.
pub const SEED_BATCH_TRIGGER: usize = 50;

/// A single OHLCV bar pushed by an EA agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bar {
    #[serde(default)]
    pub broker: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    /// Bar open time, epoch millis.
    pub time: i64,
    /// Whether the bar is finalized.
    #[serde(default)]
    pub closed: bool,
}

impl Bar {
    pub fn ohlc_row(&self) -> OhlcRow {
        OhlcRow {
            high: self.high,
            low: self.low,
            close: self.close,
        }
    }

    /// Candle body as a fraction of the full range, 0..1.
    pub fn body_fraction(&self) -> f64 {
        let range = self.high - self.low;
        if range <= 0.0 {
            return 0.0;
        }
        (self.close - self.open).abs() / range
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

type BarKey = (String, String, Timeframe);

pub struct BarBook {
    series: RwLock<HashMap<BarKey, VecDeque<Bar>>>,
    max_bars: usize,
}

impl BarBook {
    /// Retain at most `max_bars` bars per series.
    pub fn new(max_bars: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            max_bars,
        }
    }

    /// Append a batch of bars for one series. A bar whose open time matches
    /// the current tail replaces it (in-progress update); older bars are
    /// dropped. Returns true when the batch should trigger the realtime
    /// runner (any closed bar, or a seed batch).
    pub fn record(&self, broker: &str, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) -> bool {
        if bars.is_empty() {
            return false;
        }

        let is_seed = bars.len() >= SEED_BATCH_TRIGGER;
        let mut any_closed = false;

        let key = (broker.to_string(), symbol.to_string(), timeframe);
        let mut series = self.series.write();
        let ring = series
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_bars + 1));

        for mut bar in bars {
            bar.broker = broker.to_string();
            bar.symbol = symbol.to_string();
            bar.timeframe = timeframe;
            if bar.closed {
                any_closed = true;
            }

            match ring.back() {
                Some(last) if bar.time == last.time => {
                    // In-progress update of the tail bar.
                    ring.pop_back();
                    ring.push_back(bar);
                }
                Some(last) if bar.time < last.time => {
                    // Out-of-order history is ignored; the ring stays ascending.
                }
                _ => ring.push_back(bar),
            }
        }

        while ring.len() > self.max_bars {
            ring.pop_front();
        }

        any_closed || is_seed
    }

    /// Most recent `count` bars, ascending by time.
    pub fn recent(
        &self,
        broker: &str,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Vec<Bar> {
        let series = self.series.read();
        match series.get(&(broker.to_string(), symbol.to_string(), timeframe)) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Most recent `count` closed bars, ascending by time.
    pub fn recent_closed(
        &self,
        broker: &str,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Vec<Bar> {
        let series = self.series.read();
        match series.get(&(broker.to_string(), symbol.to_string(), timeframe)) {
            Some(ring) => {
                let closed: Vec<&Bar> = ring.iter().filter(|b| b.closed).collect();
                let start = closed.len().saturating_sub(count);
                closed[start..].iter().map(|b| (*b).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    /// Close prices of the most recent `count` closed bars, ascending.
    pub fn recent_closes(
        &self,
        broker: &str,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Vec<f64> {
        self.recent_closed(broker, symbol, timeframe, count)
            .iter()
            .map(|b| b.close)
            .collect()
    }

    pub fn count(&self, broker: &str, symbol: &str, timeframe: Timeframe) -> usize {
        self.series
            .read()
            .get(&(broker.to_string(), symbol.to_string(), timeframe))
            .map_or(0, VecDeque::len)
    }

    /// Open time of the latest bar, epoch millis.
    pub fn latest_bar_time(&self, broker: &str, symbol: &str, timeframe: Timeframe) -> Option<i64> {
        self.series
            .read()
            .get(&(broker.to_string(), symbol.to_string(), timeframe))
            .and_then(|ring| ring.back().map(|b| b.time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn bar(time: i64, close: f64, closed: bool) -> Bar {
        Bar {
            broker: String::new(),
            symbol: String::new(),
            timeframe: Timeframe::M15,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: Some(100.0),
            time,
            closed,
        }
    }

    #[test]
    fn closed_bar_triggers_runner() {
        let book = BarBook::new(500);
        assert!(book.record("mt5", "EURUSD", Timeframe::M15, vec![bar(0, 1.0, true)]));
        assert!(!book.record("mt5", "EURUSD", Timeframe::M15, vec![bar(900_000, 1.1, false)]));
    }

    #[test]
    fn seed_batch_triggers_runner() {
        let book = BarBook::new(500);
        let bars: Vec<Bar> = (0..SEED_BATCH_TRIGGER as i64)
            .map(|i| bar(i * 900_000, 1.0 + i as f64 * 0.001, false))
            .collect();
        assert!(book.record("mt5", "EURUSD", Timeframe::M15, bars));
    }

    #[test]
    fn in_progress_bar_replaces_tail() {
        let book = BarBook::new(500);
        book.record("mt5", "EURUSD", Timeframe::M15, vec![bar(0, 1.0, false)]);
        book.record("mt5", "EURUSD", Timeframe::M15, vec![bar(0, 1.2, true)]);
        assert_eq!(book.count("mt5", "EURUSD", Timeframe::M15), 1);
        let bars = book.recent("mt5", "EURUSD", Timeframe::M15, 10);
        assert!((bars[0].close - 1.2).abs() < 1e-9);
        assert!(bars[0].closed);
    }

    #[test]
    fn ring_is_bounded_and_ascending() {
        let book = BarBook::new(5);
        for i in 0..10 {
            book.record("mt5", "EURUSD", Timeframe::H1, vec![bar(i * 3_600_000, 1.0, true)]);
        }
        let bars = book.recent("mt5", "EURUSD", Timeframe::H1, 100);
        assert_eq!(bars.len(), 5);
        assert!(bars.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[test]
    fn out_of_order_bar_is_dropped() {
        let book = BarBook::new(500);
        book.record("mt5", "EURUSD", Timeframe::H1, vec![bar(7_200_000, 1.0, true)]);
        book.record("mt5", "EURUSD", Timeframe::H1, vec![bar(3_600_000, 0.9, true)]);
        assert_eq!(book.count("mt5", "EURUSD", Timeframe::H1), 1);
    }

    #[test]
    fn recent_closed_filters_open_bars() {
        let book = BarBook::new(500);
        book.record("mt5", "EURUSD", Timeframe::M15, vec![bar(0, 1.0, true)]);
        book.record("mt5", "EURUSD", Timeframe::M15, vec![bar(900_000, 1.1, false)]);
        assert_eq!(book.recent_closed("mt5", "EURUSD", Timeframe::M15, 10).len(), 1);
        assert_eq!(book.recent("mt5", "EURUSD", Timeframe::M15, 10).len(), 2);
    }

    #[test]
    fn body_fraction_of_decisive_candle() {
        let decisive = Bar {
            broker: String::new(),
            symbol: String::new(),
            timeframe: Timeframe::M15,
            open: 1.0,
            high: 1.1,
            low: 0.995,
            close: 1.09,
            volume: None,
            time: 0,
            closed: true,
        };
        assert!(decisive.body_fraction() > 0.55);
        assert!(decisive.is_bullish());
    }
}
