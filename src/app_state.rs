// =============================================================================
// Engine Context — the arena tying every subsystem together
// =============================================================================
//
// The single composition root for the engine. Subsystems own their state
// behind their own locks; the context holds Arc handles only, so no
// parent/child reference cycles exist: the trade manager and runner depend
// on this facade, never on each other's internals.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for the small shared rings owned here.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::analyzers::{
    BridgeTechnicalAnalyzer, CalendarEconomicAnalyzer, HeadlineNewsAnalyzer,
};
use crate::bridge::MarketDataBridge;
use crate::broadcast::BroadcastBus;
use crate::config::EngineConfig;
use crate::execution::{
    BrokerRouter, ExecutionEngine, QueueRouter, TradeBook, TradeSupervisor,
};
use crate::gate::DecisionGate;
use crate::persistence::MemorySink;
use crate::quality::QualityGuard;
use crate::realtime::RealtimeRunner;
use crate::risk::RiskEngine;
use crate::signal::SignalOrchestrator;
use crate::trade_manager::TradeManager;

/// Maximum number of recent errors retained for the status payload.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent decision summaries retained.
const MAX_RECENT_DECISIONS: usize = 100;

/// A recorded error event for the status error log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub at: String,
}

/// Compact decision summary kept in the audit ring.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSummary {
    pub pair: String,
    pub state: String,
    pub score: f64,
    pub at: String,
}

pub struct EngineContext {
    pub state_version: AtomicU64,

    pub config: Arc<RwLock<EngineConfig>>,
    pub bus: Arc<BroadcastBus>,
    pub bridge: Arc<MarketDataBridge>,
    pub sink: Arc<MemorySink>,
    pub quality: Arc<QualityGuard>,
    pub gate: Arc<DecisionGate>,
    pub risk: Arc<RiskEngine>,
    pub book: Arc<TradeBook>,
    pub execution: Arc<ExecutionEngine>,
    pub supervisor: Arc<TradeSupervisor>,
    pub orchestrator: Arc<SignalOrchestrator>,
    pub trade_manager: Arc<TradeManager>,
    pub runner: Arc<RealtimeRunner>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub recent_decisions: RwLock<Vec<DecisionSummary>>,

    pub start_time: std::time::Instant,
}

impl EngineContext {
    /// Wire the full engine from a config. The default broker route is the
    /// EA command queue.
    pub fn build(config: EngineConfig) -> Arc<Self> {
        let config = Arc::new(RwLock::new(config));
        let bus = Arc::new(BroadcastBus::new());
        let bridge = Arc::new(MarketDataBridge::new(&config.read(), bus.clone()));
        let sink = Arc::new(MemorySink::new());

        let quality = Arc::new(QualityGuard::new(
            bridge.clone(),
            sink.clone(),
            config.read().quality.clone(),
        ));
        let gate = Arc::new(DecisionGate::new());
        let risk = Arc::new(RiskEngine::new(
            config.read().risk.clone(),
            config.read().execution.max_slippage_pips,
            bus.clone(),
        ));

        let book = Arc::new(TradeBook::new());
        let router: Arc<dyn BrokerRouter> = Arc::new(QueueRouter::new(bridge.clone()));
        let execution = Arc::new(ExecutionEngine::new(
            book.clone(),
            Some(router),
            risk.clone(),
            bridge.clone(),
            sink.clone(),
            bus.clone(),
            config.clone(),
        ));
        let supervisor = Arc::new(
            TradeSupervisor::new(execution.clone()).with_breakers(quality.breakers.clone()),
        );

        let orchestrator = Arc::new(SignalOrchestrator::new(
            bridge.clone(),
            quality.clone(),
            gate.clone(),
            risk.clone(),
            Arc::new(CalendarEconomicAnalyzer::new(bridge.clone())),
            Arc::new(HeadlineNewsAnalyzer::new(bridge.clone())),
            Arc::new(BridgeTechnicalAnalyzer::new(bridge.clone())),
            book.clone(),
            config.clone(),
            bus.clone(),
        ));

        let trade_manager = Arc::new(TradeManager::new(
            orchestrator.clone(),
            execution.clone(),
            config.clone(),
            bus.clone(),
        ));

        let runner = Arc::new(RealtimeRunner::new(
            orchestrator.clone(),
            trade_manager.clone(),
            bridge.clone(),
            config.clone(),
            bus.clone(),
        ));

        Arc::new(Self {
            state_version: AtomicU64::new(1),
            config,
            bus,
            bridge,
            sink,
            quality,
            gate,
            risk,
            book,
            execution,
            supervisor,
            orchestrator,
            trade_manager,
            runner,
            recent_errors: RwLock::new(Vec::new()),
            recent_decisions: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        })
    }

    // ── Version management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Rings ───────────────────────────────────────────────────────────

    pub fn push_error(&self, message: impl Into<String>, code: Option<String>) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message: message.into(),
            code,
            at: Utc::now().to_rfc3339(),
        });
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        self.increment_version();
    }

    pub fn push_decision(&self, pair: &str, state: &str, score: f64) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(DecisionSummary {
            pair: pair.to_string(),
            state: state.to_string(),
            score,
            at: Utc::now().to_rfc3339(),
        });
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }
        self.increment_version();
    }

    // ── Status snapshot ─────────────────────────────────────────────────

    /// Full serialisable engine status for the diagnostics endpoint and the
    /// WebSocket feed.
    pub fn build_status(&self) -> serde_json::Value {
        let now_ms = Utc::now().timestamp_millis();
        let config = self.config.read();

        let sessions = self.bridge.sessions.all_sessions();
        let open_trades = self.book.open_trades();
        let recent_closed = self.book.recent_closed(10);

        serde_json::json!({
            "stateVersion": self.current_state_version(),
            "serverTime": now_ms,
            "uptimeSeconds": self.start_time.elapsed().as_secs(),
            "tradingMode": config.trading_mode.to_string(),
            "accountMode": config.account_mode.to_string(),
            "environment": config.environment,
            "autoTrading": {
                "enabled": config.auto_trading.enabled,
                "brokers": self.trade_manager.enabled_brokers(),
            },
            "sessions": sessions,
            "openTrades": open_trades,
            "recentClosed": recent_closed,
            "riskCommand": self.risk.command_snapshot(),
            "dailyRisk": self.risk.daily_risk(now_ms),
            "drawdownPct": self.execution.drawdown_pct(),
            "circuitBreakers": self.quality.breakers.all_active(now_ms),
            "rejections": self.gate.rejections.recent(10),
            "rejectionCounters": self.gate.rejections.counters(),
            "recentErrors": self.recent_errors.read().clone(),
            "recentDecisions": self.recent_decisions.read().clone(),
            "brokerRouter": self.execution.router().map(|r| r.status()),
            "reconcile": {
                "lastOkAt": *self.execution.last_reconcile_ok.read(),
                "lastError": self.execution.last_reconcile_error.read().clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::TradeView;

    #[test]
    fn build_wires_the_full_engine() {
        let ctx = EngineContext::build(EngineConfig::default());
        assert_eq!(ctx.current_state_version(), 1);
        assert_eq!(ctx.book.open_count(), 0);
        let status = ctx.build_status();
        assert!(status.get("stateVersion").is_some());
        assert!(status.get("sessions").is_some());
        assert!(status.get("riskCommand").is_some());
    }

    #[test]
    fn error_ring_is_bounded() {
        let ctx = EngineContext::build(EngineConfig::default());
        for i in 0..(MAX_RECENT_ERRORS + 10) {
            ctx.push_error(format!("error {i}"), None);
        }
        assert_eq!(ctx.recent_errors.read().len(), MAX_RECENT_ERRORS);
        assert!(ctx.current_state_version() > MAX_RECENT_ERRORS as u64);
    }

    #[test]
    fn decision_ring_is_bounded() {
        let ctx = EngineContext::build(EngineConfig::default());
        for i in 0..(MAX_RECENT_DECISIONS + 5) {
            ctx.push_decision("EURUSD", "WAIT_MONITOR", i as f64);
        }
        assert_eq!(ctx.recent_decisions.read().len(), MAX_RECENT_DECISIONS);
    }
}
