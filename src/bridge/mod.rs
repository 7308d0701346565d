// =============================================================================
// Market Data Bridge
// =============================================================================
//
// Process-scoped state container for everything the EA agents push: sessions,
// quotes, bars, snapshots, news, symbol lists, active-symbol claims, and the
// per-broker command queues the agents poll. All ingestion is best-effort:
// malformed payloads are rejected with a validation error and never mutate
// state; history growth is strictly bounded.

pub mod bars;
pub mod commands;
pub mod quotes;
pub mod sessions;
pub mod snapshots;
pub mod symbols;

pub use bars::{Bar, BarBook};
pub use commands::{CommandKind, CommandQueues, ManagementCommand, SnapshotRequest};
pub use quotes::{Quote, QuoteBook, QuoteRetention};
pub use sessions::{Session, SessionConnect, SessionRegistry};
pub use snapshots::{
    MarketSnapshot, NewsEvent, PivotLevels, RangeLevels, SnapshotCandle, SnapshotStore,
    TimeframeSnapshot,
};
pub use symbols::SymbolDirectory;

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::broadcast::{BroadcastBus, EngineEvent};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::types::{AssetClass, Timeframe};

/// Symbol sanity bounds enforced on every quote ingestion.
const SYMBOL_MIN_LEN: usize = 3;
const SYMBOL_MAX_LEN: usize = 20;

/// Uppercase A–Z, digits, and `_ . # -`, length 3–20.
pub fn symbol_is_sane(symbol: &str) -> bool {
    let len = symbol.len();
    if !(SYMBOL_MIN_LEN..=SYMBOL_MAX_LEN).contains(&len) {
        return false;
    }
    symbol
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '#' | '-'))
}

/// The bridge facade tying the individual stores together.
pub struct MarketDataBridge {
    pub sessions: SessionRegistry,
    pub quotes: QuoteBook,
    pub bars: BarBook,
    pub snapshots: SnapshotStore,
    pub symbols: SymbolDirectory,
    pub commands: CommandQueues,
    bus: Arc<BroadcastBus>,
    /// Strict asset-class allow list; disabled when `allow_all_symbols`.
    strict_symbol_filter: bool,
}

impl MarketDataBridge {
    pub fn new(config: &EngineConfig, bus: Arc<BroadcastBus>) -> Self {
        let retention = QuoteRetention {
            window_ms: config.telemetry.quote_retention_minutes * 60_000,
            max_points: config.telemetry.quote_max_points,
        };
        Self {
            sessions: SessionRegistry::new(),
            quotes: QuoteBook::new(retention),
            bars: BarBook::new(500),
            snapshots: SnapshotStore::new(),
            symbols: SymbolDirectory::default(),
            commands: CommandQueues::new(),
            bus,
            strict_symbol_filter: !config.ea.allow_all_symbols,
        }
    }

    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ── Quote ingestion ─────────────────────────────────────────────────

    /// Accept a batch of quotes for `broker`. Returns the number stored, or a
    /// validation error when every record is malformed.
    pub fn record_quotes(
        &self,
        broker: &str,
        mut batch: Vec<Quote>,
        now_ms: i64,
    ) -> Result<usize, EngineError> {
        if batch.is_empty() {
            return Err(EngineError::Validation("empty quote batch".into()));
        }

        let mut accepted = 0usize;
        let mut rejected = 0usize;

        for quote in batch.drain(..) {
            if !symbol_is_sane(&quote.symbol) {
                rejected += 1;
                continue;
            }
            if self.strict_symbol_filter && !self.symbol_allowed(&quote.symbol) {
                rejected += 1;
                continue;
            }
            if quote.bid <= 0.0 && quote.ask <= 0.0 && quote.last.unwrap_or(0.0) <= 0.0 {
                rejected += 1;
                continue;
            }

            let mut quote = quote;
            quote.broker = broker.to_string();
            if quote.received_at == 0 {
                quote.received_at = now_ms;
            }
            self.bus.stage_quote(broker, &quote.symbol);
            self.quotes.record(quote);
            accepted += 1;
        }

        if rejected > 0 {
            debug!(broker = %broker, rejected, "quote records rejected by sanity filter");
        }
        if accepted == 0 {
            return Err(EngineError::Validation(format!(
                "all {rejected} quote records rejected"
            )));
        }
        Ok(accepted)
    }

    fn symbol_allowed(&self, symbol: &str) -> bool {
        !matches!(
            crate::pairs::lookup(symbol).asset_class,
            AssetClass::Other
        )
    }

    // ── Bar ingestion ───────────────────────────────────────────────────

    /// Accept a batch of bars. Closed bars and large seed batches emit a
    /// `BarTrigger` event for the realtime runner.
    pub fn record_bars(
        &self,
        broker: &str,
        symbol: &str,
        timeframe: Timeframe,
        batch: Vec<Bar>,
    ) -> Result<usize, EngineError> {
        if !symbol_is_sane(symbol) {
            return Err(EngineError::Validation(format!("bad symbol {symbol:?}")));
        }
        if batch.is_empty() {
            return Err(EngineError::Validation("empty bar batch".into()));
        }
        let count = batch.len();
        let triggered = self.bars.record(broker, symbol, timeframe, batch);
        if triggered {
            self.bus.publish(EngineEvent::BarTrigger {
                broker: broker.to_string(),
                symbol: symbol.to_string(),
            });
        }
        Ok(count)
    }

    // ── Snapshot & news ingestion ───────────────────────────────────────

    pub fn record_snapshot(
        &self,
        broker: &str,
        snapshot: MarketSnapshot,
        now_ms: i64,
    ) -> Result<(), EngineError> {
        if !symbol_is_sane(&snapshot.symbol) {
            return Err(EngineError::Validation(format!(
                "bad symbol {:?}",
                snapshot.symbol
            )));
        }
        let symbol = snapshot.symbol.clone();
        self.snapshots.record(snapshot, broker, now_ms);
        self.bus.publish(EngineEvent::SnapshotUpdated {
            broker: broker.to_string(),
            symbol,
        });
        Ok(())
    }

    pub fn record_news(&self, broker: &str, events: Vec<NewsEvent>) -> Result<usize, EngineError> {
        if events.is_empty() {
            return Err(EngineError::Validation("empty news batch".into()));
        }
        let count = events.len();
        self.snapshots.record_news(broker, events);
        Ok(count)
    }

    // ── Symbols ─────────────────────────────────────────────────────────

    pub fn record_symbols(
        &self,
        broker: &str,
        symbols: Vec<String>,
        now_ms: i64,
    ) -> Result<usize, EngineError> {
        let sane: Vec<String> = symbols.into_iter().filter(|s| symbol_is_sane(s)).collect();
        if sane.is_empty() {
            return Err(EngineError::Validation("no sane symbols in batch".into()));
        }
        let count = sane.len();
        self.symbols.record_symbols(broker, &sane, now_ms);
        Ok(count)
    }

    // ── Composed freshness helpers ──────────────────────────────────────

    /// Fresh quote for the pair on `broker`, falling back to any broker.
    pub fn freshest_quote(&self, broker: &str, symbol: &str) -> Option<Quote> {
        self.quotes
            .latest(broker, symbol)
            .or_else(|| self.quotes.latest_any_broker(symbol))
    }

    /// Age of the latest quote in milliseconds, if one exists.
    pub fn quote_age_ms(&self, broker: &str, symbol: &str, now_ms: i64) -> Option<i64> {
        self.freshest_quote(broker, symbol).map(|q| q.age_ms(now_ms))
    }

    /// Diagnostics summary for the status endpoint.
    pub fn statistics(&self, broker: &str, now_ms: i64) -> serde_json::Value {
        serde_json::json!({
            "connected": self.sessions.is_connected(broker, now_ms),
            "quotedSymbols": self.quotes.symbols(broker).len(),
            "knownSymbols": self.symbols.registered_symbols(broker).len(),
            "activeSymbols": self.symbols.active_symbols(broker, now_ms).len(),
            "pendingCommands": self.commands.management_depth(broker),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bridge() -> MarketDataBridge {
        let config = EngineConfig::default();
        MarketDataBridge::new(&config, Arc::new(BroadcastBus::new()))
    }

    fn quote(symbol: &str) -> Quote {
        Quote {
            broker: String::new(),
            symbol: symbol.to_string(),
            bid: 1.0840,
            ask: 1.0841,
            last: None,
            digits: 5,
            point: 0.00001,
            spread_points: 10.0,
            volume: None,
            liquidity_hint: None,
            timestamp: 1_000,
            received_at: 1_000,
        }
    }

    #[test]
    fn symbol_sanity_rules() {
        assert!(symbol_is_sane("EURUSD"));
        assert!(symbol_is_sane("XAUUSD.M"));
        assert!(symbol_is_sane("US30-CASH"));
        assert!(!symbol_is_sane("eu"));
        assert!(!symbol_is_sane("eurusd"));
        assert!(!symbol_is_sane("EURUSD WITH SPACE"));
        assert!(!symbol_is_sane("TOOLONGSYMBOLNAME12345"));
    }

    #[test]
    fn malformed_quotes_do_not_mutate_state() {
        let bridge = test_bridge();
        let mut bad = quote("eurusd");
        bad.symbol = "eu".to_string();
        let result = bridge.record_quotes("mt5", vec![bad], 1_000);
        assert!(result.is_err());
        assert!(bridge.quotes.latest("mt5", "eu").is_none());
    }

    #[test]
    fn mixed_batch_stores_only_valid_records() {
        let bridge = test_bridge();
        let mut bad = quote("EURUSD");
        bad.bid = 0.0;
        bad.ask = 0.0;
        let accepted = bridge
            .record_quotes("mt5", vec![quote("EURUSD"), bad], 1_000)
            .unwrap();
        assert_eq!(accepted, 1);
        assert!(bridge.quotes.latest("mt5", "EURUSD").is_some());
    }

    #[test]
    fn bar_trigger_event_on_closed_bar() {
        let bridge = test_bridge();
        let mut rx = bridge.bus.subscribe();
        let bar = Bar {
            broker: String::new(),
            symbol: String::new(),
            timeframe: Timeframe::M15,
            open: 1.0,
            high: 1.1,
            low: 0.9,
            close: 1.05,
            volume: None,
            time: 0,
            closed: true,
        };
        bridge
            .record_bars("mt5", "EURUSD", Timeframe::M15, vec![bar])
            .unwrap();
        match rx.try_recv().unwrap() {
            EngineEvent::BarTrigger { broker, symbol } => {
                assert_eq!(broker, "mt5");
                assert_eq!(symbol, "EURUSD");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn freshest_quote_falls_back_across_brokers() {
        let bridge = test_bridge();
        bridge
            .record_quotes("mt4", vec![quote("EURUSD")], 1_000)
            .unwrap();
        let q = bridge.freshest_quote("mt5", "EURUSD").unwrap();
        assert_eq!(q.broker, "mt4");
    }
}
