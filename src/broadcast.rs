// =============================================================================
// Broadcast Bus — engine events fanned out to the dashboard feed and the
// realtime signal runner
// =============================================================================
//
// Quote ingestion is far too chatty to broadcast per-update, so quote events
// are coalesced into per-broker batches and flushed on a fixed cadence
// (default 250 ms). Everything else is forwarded immediately.
// =============================================================================

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Flush cadence for coalesced quote batches.
pub const QUOTE_FLUSH_INTERVAL_MS: u64 = 250;

/// Bounded channel capacity; slow consumers lose oldest events.
const BUS_CAPACITY: usize = 512;

/// Engine-wide event envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Coalesced quote updates: symbols touched since the last flush.
    QuoteBatch {
        broker: String,
        symbols: Vec<String>,
    },
    /// A market snapshot was replaced.
    SnapshotUpdated { broker: String, symbol: String },
    /// A closed bar (or a large seed batch) arrived — realtime trigger.
    BarTrigger { broker: String, symbol: String },
    /// A signal finished orchestration and was published.
    SignalPublished {
        broker: String,
        pair: String,
        state: String,
        score: f64,
    },
    TradeOpened { trade_id: String, pair: String },
    TradeClosed {
        trade_id: String,
        pair: String,
        reason: String,
        final_pnl: f64,
        /// Signal that drove a smart exit, when applicable.
        #[serde(skip_serializing_if = "Option::is_none")]
        origin_signal: Option<String>,
    },
    /// Live supervision context for an open trade.
    TradeLiveContext {
        trade_id: String,
        pair: String,
        payload: serde_json::Value,
    },
    RiskAlert {
        kind: String,
        severity: String,
        message: String,
    },
}

/// Process-wide broadcast bus.
pub struct BroadcastBus {
    sender: broadcast::Sender<EngineEvent>,
    pending_quotes: Mutex<HashSet<(String, String)>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            sender,
            pending_quotes: Mutex::new(HashSet::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event immediately. Errors (no receivers) are ignored.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    /// Stage a quote update for the next coalesced flush.
    pub fn stage_quote(&self, broker: &str, symbol: &str) {
        self.pending_quotes
            .lock()
            .insert((broker.to_string(), symbol.to_string()));
    }

    /// Flush staged quote updates as per-broker batches. Called by the flush
    /// task on its fixed cadence; safe to call with nothing staged.
    pub fn flush_quotes(&self) {
        let staged: Vec<(String, String)> = {
            let mut pending = self.pending_quotes.lock();
            pending.drain().collect()
        };
        if staged.is_empty() {
            return;
        }

        let mut by_broker: std::collections::HashMap<String, Vec<String>> =
            std::collections::HashMap::new();
        for (broker, symbol) in staged {
            by_broker.entry(broker).or_default().push(symbol);
        }

        for (broker, mut symbols) in by_broker {
            symbols.sort();
            debug!(broker = %broker, count = symbols.len(), "quote batch flushed");
            self.publish(EngineEvent::QuoteBatch { broker, symbols });
        }
    }

    /// Number of staged, unflushed quote updates. Diagnostics only.
    pub fn staged_quote_count(&self) -> usize {
        self.pending_quotes.lock().len()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the quote flush loop forever. Spawned once at engine startup.
pub async fn run_quote_flush_loop(bus: std::sync::Arc<BroadcastBus>) {
    let mut ticker =
        tokio::time::interval(tokio::time::Duration::from_millis(QUOTE_FLUSH_INTERVAL_MS));
    loop {
        ticker.tick().await;
        bus.flush_quotes();
    }
}
