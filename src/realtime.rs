// =============================================================================
// Realtime Signal Runner — debounced per-symbol recomputation
// =============================================================================
//
// Bar-close and snapshot events collapse into one recomputation per
// (broker, symbol) inside a small debounce window. On fire the runner
// regenerates an EA-mode signal, which the orchestrator publishes, and hands
// it to the trade manager's realtime path. Two bounded background loops keep
// coverage fresh: a revalidation sweep over previously published symbols and
// an optional cursor-driven scan over the known-symbol universe.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::bridge::MarketDataBridge;
use crate::broadcast::{BroadcastBus, EngineEvent};
use crate::config::EngineConfig;
use crate::signal::{AnalysisMode, GenerateOptions, SignalOrchestrator};
use crate::trade_manager::TradeManager;

/// Debounce window collapsing repeated triggers per (broker, symbol).
const DEBOUNCE_MS: i64 = 400;
/// Revalidation sweep cadence.
const REVALIDATE_INTERVAL_MS: u64 = 60_000;
/// Published signals older than this are revalidated.
const REVALIDATE_AFTER_MS: i64 = 5 * 60_000;

pub struct RealtimeRunner {
    orchestrator: Arc<SignalOrchestrator>,
    manager: Arc<TradeManager>,
    bridge: Arc<MarketDataBridge>,
    config: Arc<RwLock<EngineConfig>>,
    bus: Arc<BroadcastBus>,
    /// (broker, symbol) -> debounce deadline for a pending fire.
    pending: Mutex<HashMap<(String, String), i64>>,
    /// (broker, symbol) -> last publish time, for revalidation.
    published: RwLock<HashMap<(String, String), i64>>,
    /// Per-broker round-robin cursor for the background scan.
    scan_cursor: Mutex<HashMap<String, usize>>,
}

impl RealtimeRunner {
    pub fn new(
        orchestrator: Arc<SignalOrchestrator>,
        manager: Arc<TradeManager>,
        bridge: Arc<MarketDataBridge>,
        config: Arc<RwLock<EngineConfig>>,
        bus: Arc<BroadcastBus>,
    ) -> Self {
        Self {
            orchestrator,
            manager,
            bridge,
            config,
            bus,
            pending: Mutex::new(HashMap::new()),
            published: RwLock::new(HashMap::new()),
            scan_cursor: Mutex::new(HashMap::new()),
        }
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ── Ingestion ───────────────────────────────────────────────────────

    /// Queue symbols for recomputation. Repeated triggers inside the
    /// debounce window collapse into one fire.
    pub fn ingest_symbols(self: &Arc<Self>, broker: &str, symbols: &[String]) {
        let now = Self::now_ms();
        for symbol in symbols {
            let key = (broker.to_string(), symbol.clone());
            let schedule = {
                let mut pending = self.pending.lock();
                if pending.contains_key(&key) {
                    // Collapsed into the already-scheduled fire.
                    false
                } else {
                    pending.insert(key.clone(), now + DEBOUNCE_MS);
                    true
                }
            };
            if schedule {
                let runner = self.clone();
                let broker = broker.to_string();
                let symbol = symbol.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(tokio::time::Duration::from_millis(DEBOUNCE_MS as u64))
                        .await;
                    runner.fire(&broker, &symbol).await;
                });
            }
        }
    }

    /// Number of symbols currently pending a fire. Diagnostics only.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    async fn fire(self: &Arc<Self>, broker: &str, symbol: &str) {
        self.pending
            .lock()
            .remove(&(broker.to_string(), symbol.to_string()));

        let opts = GenerateOptions {
            broker: Some(broker.to_string()),
            analysis_mode: AnalysisMode::Ea,
            data_quality_ttl_ms: None,
        };
        let signal = self.orchestrator.generate_signal(symbol, &opts).await;

        self.published
            .write()
            .insert((broker.to_string(), symbol.to_string()), Self::now_ms());

        debug!(
            broker = %broker,
            symbol = %symbol,
            status = %signal.signal_status,
            "realtime recomputation fired"
        );
        self.manager.enqueue_realtime_signal(broker, signal);
    }

    // ── Event loop ──────────────────────────────────────────────────────

    /// Consume bar/snapshot triggers from the bus forever.
    pub async fn run_event_loop(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();
        info!("realtime runner event loop started");
        loop {
            match rx.recv().await {
                Ok(EngineEvent::BarTrigger { broker, symbol })
                | Ok(EngineEvent::SnapshotUpdated { broker, symbol }) => {
                    self.ingest_symbols(&broker, &[symbol]);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "realtime runner lagged behind the bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    // ── Revalidation loop ───────────────────────────────────────────────

    /// Periodically re-evaluate previously published symbols so downgrades
    /// and expirations surface even without new bars.
    pub async fn run_revalidation_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(
            REVALIDATE_INTERVAL_MS,
        ));
        loop {
            ticker.tick().await;
            let now = Self::now_ms();
            let stale: Vec<(String, String)> = {
                let published = self.published.read();
                published
                    .iter()
                    .filter(|(_, &at)| now - at >= REVALIDATE_AFTER_MS)
                    .map(|(key, _)| key.clone())
                    .collect()
            };
            if stale.is_empty() {
                continue;
            }
            debug!(count = stale.len(), "revalidating published symbols");
            for (broker, symbol) in stale {
                self.ingest_symbols(&broker, std::slice::from_ref(&symbol));
            }
        }
    }

    // ── Background scan ─────────────────────────────────────────────────

    /// Next batch of the known-symbol universe for `broker`, advancing the
    /// round-robin cursor.
    fn next_scan_batch(&self, broker: &str, now_ms: i64) -> Vec<String> {
        let config = self.config.read();
        let universe = self.bridge.symbols.list_known(
            broker,
            config.ea.scan_symbol_max_age_ms,
            config.ea.scan_symbols_max,
            now_ms,
        );
        if universe.is_empty() {
            return Vec::new();
        }
        let batch_size = config.ea.scan_batch_size.max(1);
        drop(config);

        let mut cursors = self.scan_cursor.lock();
        let cursor = cursors.entry(broker.to_string()).or_insert(0);
        let mut batch = Vec::with_capacity(batch_size.min(universe.len()));
        for i in 0..batch_size.min(universe.len()) {
            batch.push(universe[(*cursor + i) % universe.len()].clone());
        }
        *cursor = (*cursor + batch.len()) % universe.len();
        batch
    }

    /// Cursor-driven sweep over the known-symbol list, feeding the ingest
    /// pipe at the configured cadence.
    pub async fn run_background_scan(self: Arc<Self>) {
        let interval_ms = self.config.read().ea.scan_interval_ms.max(1_000);
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(
            interval_ms as u64,
        ));
        info!(interval_ms, "background symbol scan started");
        loop {
            ticker.tick().await;
            if !self.config.read().ea.background_signals {
                continue;
            }
            let now = Self::now_ms();
            for broker in self.manager.enabled_brokers() {
                let batch = self.next_scan_batch(&broker, now);
                if !batch.is_empty() {
                    debug!(broker = %broker, count = batch.len(), "background scan batch");
                    self.ingest_symbols(&broker, &batch);
                }
            }
        }
    }
}
