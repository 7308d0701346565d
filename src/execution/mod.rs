// =============================================================================
// Execution Engine — idempotent order placement and trade lifecycle
// =============================================================================
//
// Order path:
//   validate -> reserve daily risk -> insert trade -> audit accepted ->
//   route to broker -> capture fill/slippage, or roll back completely.
//
// The order path is serialized behind an async mutex so placement and the
// corresponding trade-book mutation are atomic with respect to concurrent
// execute calls. No partial state survives a broker failure.

pub mod router;
pub mod supervisor;

pub use router::{
    validate_order, BrokerRouter, ClosePayload, HttpRouter, ModifyPayload, OrderAck,
    OrderPayload, QueueRouter, ReconcileSummary,
};
pub use supervisor::{run_supervision_loop, TradeSupervisor};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::bridge::MarketDataBridge;
use crate::broadcast::{BroadcastBus, EngineEvent};
use crate::config::EngineConfig;
use crate::persistence::{AuditEvent, PersistenceSink};
use crate::risk::{RiskEngine, TradeSummary, TradeView};
use crate::signal::{RawSignal, TrailingPlan};
use crate::types::Direction;

// =============================================================================
// Trade model
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

/// Fill telemetry captured at placement time.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDetails {
    pub requested_price: f64,
    pub filled_price: f64,
    pub slippage_pips: f64,
    pub slippage_exceeded: bool,
    pub latency_ms: i64,
    pub broker: String,
    pub order_id: String,
}

/// Compact snapshot of the originating signal kept on the trade.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSnapshot {
    pub strength: f64,
    pub confidence: f64,
    pub decision_score: f64,
    pub estimated_win_rate: f64,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub pair: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub position_size: f64,
    pub risk_fraction: f64,
    pub guardrails: serde_json::Value,
    /// Epoch millis.
    pub open_time: i64,
    pub status: TradeStatus,
    pub trailing_stop: TrailingPlan,
    pub signal: SignalSnapshot,
    pub broker: String,
    pub broker_order: Option<String>,
    pub broker_route: Option<String>,
    pub execution: ExecutionDetails,
    pub moved_to_breakeven: bool,
    /// Throttle bookkeeping for protection syncs.
    pub last_broker_modify_at: i64,
    pub last_broker_stop_loss_sent: Option<f64>,
    pub manual_close_acknowledged: bool,
    pub current_price: f64,
    pub current_pnl: f64,
    pub close_price: Option<f64>,
    pub close_time: Option<i64>,
    pub close_reason: Option<String>,
    pub final_pnl: Option<f64>,
}

impl Trade {
    /// Signed PnL at `price` in account currency.
    pub fn pnl_at(&self, price: f64) -> f64 {
        let info = crate::pairs::lookup(&self.pair);
        if info.pip_size <= 0.0 {
            return 0.0;
        }
        let pips = (price - self.entry_price) / info.pip_size * self.direction.sign();
        let pip_value = match info.asset_class {
            crate::types::AssetClass::Crypto | crate::types::AssetClass::Cfd => 1.0,
            _ => 10.0,
        };
        pips * self.position_size * pip_value
    }

    /// Profit as a fraction of the distance from entry to take-profit.
    pub fn progress_to_target(&self, price: f64) -> f64 {
        let span = (self.take_profit - self.entry_price).abs();
        if span <= 0.0 {
            return 0.0;
        }
        ((price - self.entry_price) * self.direction.sign() / span).max(-10.0)
    }

    pub fn summary(&self) -> TradeSummary {
        TradeSummary {
            id: self.id.clone(),
            pair: self.pair.clone(),
            direction: self.direction,
            risk_fraction: self.risk_fraction,
            position_size: self.position_size,
            entry_price: self.entry_price,
            current_pnl: self.current_pnl,
            realized_pnl: self.final_pnl.unwrap_or(0.0),
        }
    }
}

// =============================================================================
// Trade book
// =============================================================================

const MAX_HISTORY: usize = 1_000;

pub struct TradeBook {
    open: RwLock<Vec<Trade>>,
    history: RwLock<VecDeque<Trade>>,
}

impl TradeBook {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
        }
    }

    pub fn insert(&self, trade: Trade) {
        self.open.write().push(trade);
    }

    pub fn remove(&self, trade_id: &str) -> Option<Trade> {
        let mut open = self.open.write();
        let idx = open.iter().position(|t| t.id == trade_id)?;
        Some(open.remove(idx))
    }

    pub fn get(&self, trade_id: &str) -> Option<Trade> {
        self.open
            .read()
            .iter()
            .find(|t| t.id == trade_id)
            .cloned()
            .or_else(|| {
                self.history
                    .read()
                    .iter()
                    .find(|t| t.id == trade_id)
                    .cloned()
            })
    }

    /// Apply a mutation to an open trade in place.
    pub fn update<F: FnOnce(&mut Trade)>(&self, trade_id: &str, mutate: F) -> bool {
        let mut open = self.open.write();
        match open.iter_mut().find(|t| t.id == trade_id) {
            Some(trade) => {
                mutate(trade);
                true
            }
            None => false,
        }
    }

    pub fn open_trades(&self) -> Vec<Trade> {
        self.open.read().clone()
    }

    pub fn open_for_pair(&self, broker: &str, pair: &str) -> Vec<Trade> {
        self.open
            .read()
            .iter()
            .filter(|t| t.pair == pair && t.broker == broker)
            .cloned()
            .collect()
    }

    pub fn archive(&self, trade: Trade) {
        let mut history = self.history.write();
        history.push_back(trade);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    pub fn recent_closed(&self, count: usize) -> Vec<Trade> {
        let history = self.history.read();
        history.iter().rev().take(count).cloned().collect()
    }
}

impl Default for TradeBook {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeView for TradeBook {
    fn open_summaries(&self) -> Vec<TradeSummary> {
        self.open.read().iter().map(Trade::summary).collect()
    }

    fn open_count(&self) -> usize {
        self.open.read().len()
    }

    fn has_open_for_pair(&self, broker: &str, pair: &str) -> bool {
        self.open
            .read()
            .iter()
            .any(|t| t.pair == pair && t.broker == broker)
    }
}

// =============================================================================
// Outcome
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl ExecutionOutcome {
    fn ok(trade_id: String) -> Self {
        Self {
            success: true,
            trade_id: Some(trade_id),
            reason: None,
            error_type: None,
        }
    }

    fn rejected(reason: impl Into<String>, error_type: &str) -> Self {
        Self {
            success: false,
            trade_id: None,
            reason: Some(reason.into()),
            error_type: Some(error_type.to_string()),
        }
    }
}

// =============================================================================
// Performance tracking
// =============================================================================

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairPerformance {
    pub trades: u64,
    pub wins: u64,
    pub net_pnl: f64,
}

#[derive(Default)]
struct PerformanceState {
    equity: f64,
    peak_equity: f64,
    drawdown_pct: f64,
    last_drawdown_alert_pct: f64,
    equity_curve: VecDeque<(i64, f64)>,
    by_pair: HashMap<String, PairPerformance>,
    by_strategy: HashMap<String, PairPerformance>,
}

/// Drawdown alert threshold, percent of peak equity.
const DRAWDOWN_ALERT_PCT: f64 = 10.0;
/// Minimum movement before re-alerting, percentage points.
const DRAWDOWN_ALERT_DELTA_PP: f64 = 0.5;
const MAX_EQUITY_POINTS: usize = 500;

// =============================================================================
// Engine
// =============================================================================

pub struct ExecutionEngine {
    pub book: Arc<TradeBook>,
    router: Option<Arc<dyn BrokerRouter>>,
    risk: Arc<RiskEngine>,
    bridge: Arc<MarketDataBridge>,
    sink: Arc<dyn PersistenceSink>,
    bus: Arc<BroadcastBus>,
    config: Arc<RwLock<EngineConfig>>,
    /// Serializes the order path (§ concurrency: placement + book mutation
    /// atomic w.r.t. other execute calls).
    order_lock: tokio::sync::Mutex<()>,
    performance: RwLock<PerformanceState>,
    pub last_reconcile_ok: RwLock<Option<i64>>,
    pub last_reconcile_error: RwLock<Option<String>>,
}

impl ExecutionEngine {
    pub fn new(
        book: Arc<TradeBook>,
        router: Option<Arc<dyn BrokerRouter>>,
        risk: Arc<RiskEngine>,
        bridge: Arc<MarketDataBridge>,
        sink: Arc<dyn PersistenceSink>,
        bus: Arc<BroadcastBus>,
        config: Arc<RwLock<EngineConfig>>,
    ) -> Self {
        Self {
            book,
            router,
            risk,
            bridge,
            sink,
            bus,
            config,
            order_lock: tokio::sync::Mutex::new(()),
            performance: RwLock::new(PerformanceState::default()),
            last_reconcile_ok: RwLock::new(None),
            last_reconcile_error: RwLock::new(None),
        }
    }

    fn account_balance(&self, broker: &str) -> f64 {
        self.bridge
            .sessions
            .latest_session(broker)
            .map(|s| if s.equity > 0.0 { s.equity } else { s.balance })
            .filter(|b| *b > 0.0)
            .unwrap_or(10_000.0)
    }

    /// Execute an accepted signal. A fresh trade id is generated; use
    /// [`execute_trade_with_id`](Self::execute_trade_with_id) to retry
    /// idempotently.
    pub async fn execute_trade(
        &self,
        signal: &RawSignal,
        broker: &str,
        source: &str,
    ) -> ExecutionOutcome {
        self.execute_trade_with_id(signal, broker, source, uuid::Uuid::new_v4().to_string())
            .await
    }

    /// Idempotent order placement: re-using a trade id observes the first
    /// attempt's state instead of creating a duplicate.
    pub async fn execute_trade_with_id(
        &self,
        signal: &RawSignal,
        broker: &str,
        source: &str,
        trade_id: String,
    ) -> ExecutionOutcome {
        let now_ms = Utc::now().timestamp_millis();

        if let Some(existing) = self.book.get(&trade_id) {
            return ExecutionOutcome {
                success: true,
                trade_id: Some(existing.id),
                reason: Some("duplicate trade id; original state returned".to_string()),
                error_type: None,
            };
        }

        if !signal.is_valid.is_valid {
            self.audit_rejected(signal, "signal not valid for execution");
            return ExecutionOutcome::rejected("signal not valid for execution", "validation");
        }
        if signal.expired(now_ms) {
            self.audit_rejected(signal, "signal expired");
            return ExecutionOutcome::rejected("signal expired", "validation");
        }
        let Some(entry) = &signal.entry else {
            self.audit_rejected(signal, "no entry plan");
            return ExecutionOutcome::rejected("no entry plan", "validation");
        };
        let Some(rm) = &signal.risk_management else {
            self.audit_rejected(signal, "no risk sizing");
            return ExecutionOutcome::rejected("no risk sizing", "validation");
        };
        if !rm.can_trade {
            let reason = rm
                .reason
                .clone()
                .unwrap_or_else(|| "risk sizing rejected".to_string());
            self.audit_rejected(signal, &reason);
            return ExecutionOutcome::rejected(reason, "validation");
        }

        let config = self.config.read().clone();
        let pair_info = crate::pairs::lookup(&signal.pair);

        let payload = OrderPayload {
            broker: broker.to_string(),
            symbol: pair_info.pair.clone(),
            pair: pair_info.pair.clone(),
            direction: entry.direction,
            side: entry.direction.to_string(),
            volume: rm.position_size,
            price: entry.price,
            take_profit: entry.take_profit,
            stop_loss: entry.stop_loss,
            comment: format!("meridian:{source}"),
            trade_id: trade_id.clone(),
            idempotency_key: trade_id.clone(),
            source: source.to_string(),
            time_in_force: "GTC".to_string(),
        };
        if let Err(reason) = validate_order(&payload) {
            self.audit_rejected(signal, &reason);
            return ExecutionOutcome::rejected(reason, "validation");
        }

        // Atomic section: capacity checks + risk reservation + book insert,
        // then the broker call with rollback on failure.
        let _guard = self.order_lock.lock().await;

        if self.book.open_count() >= config.risk.max_concurrent_trades {
            let reason = format!(
                "max concurrent trades reached ({})",
                config.risk.max_concurrent_trades
            );
            self.audit_rejected(signal, &reason);
            return ExecutionOutcome::rejected(reason, "validation");
        }

        let symbol_risk: f64 = self
            .book
            .open_for_pair(broker, &signal.pair)
            .iter()
            .map(|t| t.risk_fraction)
            .sum();
        if symbol_risk + rm.risk_fraction > config.risk.max_risk_per_symbol {
            let reason = format!(
                "symbol risk {:.4} + {:.4} exceeds cap {:.4}",
                symbol_risk, rm.risk_fraction, config.risk.max_risk_per_symbol
            );
            self.audit_rejected(signal, &reason);
            return ExecutionOutcome::rejected(reason, "validation");
        }

        if let Err(reason) = self.risk.reserve_daily_risk(rm.risk_fraction, now_ms) {
            self.audit_rejected(signal, &reason);
            return ExecutionOutcome::rejected(reason, "validation");
        }

        let trade = Trade {
            id: trade_id.clone(),
            pair: signal.pair.clone(),
            direction: entry.direction,
            entry_price: entry.price,
            stop_loss: entry.stop_loss,
            take_profit: entry.take_profit,
            position_size: rm.position_size,
            risk_fraction: rm.risk_fraction,
            guardrails: json!({
                "stressTests": rm.stress_tests,
                "kelly": rm.kelly,
                "correlationPenalty": rm.correlation_penalty,
            }),
            open_time: now_ms,
            status: TradeStatus::Open,
            trailing_stop: entry.trailing_stop,
            signal: SignalSnapshot {
                strength: signal.strength,
                confidence: signal.confidence,
                decision_score: signal.decision_score(),
                estimated_win_rate: signal.estimated_win_rate,
                source: source.to_string(),
            },
            broker: broker.to_string(),
            broker_order: None,
            broker_route: None,
            execution: ExecutionDetails {
                requested_price: entry.price,
                broker: broker.to_string(),
                ..Default::default()
            },
            moved_to_breakeven: false,
            last_broker_modify_at: 0,
            last_broker_stop_loss_sent: None,
            manual_close_acknowledged: false,
            current_price: entry.price,
            current_pnl: 0.0,
            close_price: None,
            close_time: None,
            close_reason: None,
            final_pnl: None,
        };
        self.book.insert(trade);

        self.sink.record_audit(
            AuditEvent::new(
                "execution.trade.accepted",
                json!({
                    "tradeId": trade_id,
                    "direction": entry.direction,
                    "volume": rm.position_size,
                    "riskFraction": rm.risk_fraction,
                }),
            )
            .with_pair(signal.pair.clone())
            .with_broker(broker),
        );

        // Broker round-trip.
        if let Some(router) = &self.router {
            match router.place_order(payload).await {
                Ok(ack) => {
                    let slippage_pips =
                        pair_info.to_pips(ack.filled_price - entry.price);
                    let slippage_exceeded =
                        slippage_pips.abs() > config.execution.max_slippage_pips;
                    let route = router.route_id().to_string();
                    self.book.update(&trade_id, |t| {
                        t.broker_order = Some(ack.order_id.clone());
                        t.broker_route = Some(route.clone());
                        t.execution.filled_price = ack.filled_price;
                        t.execution.slippage_pips = slippage_pips;
                        t.execution.slippage_exceeded = slippage_exceeded;
                        t.execution.latency_ms = ack.latency_ms;
                        t.execution.order_id = ack.order_id.clone();
                    });
                    if slippage_exceeded {
                        warn!(
                            trade_id = %trade_id,
                            slippage_pips,
                            "fill slippage exceeded configured maximum"
                        );
                    }
                    self.sink.record_audit(
                        AuditEvent::new(
                            "execution.slippage",
                            json!({
                                "tradeId": trade_id,
                                "slippagePips": slippage_pips,
                                "exceeded": slippage_exceeded,
                                "latencyMs": ack.latency_ms,
                            }),
                        )
                        .with_pair(signal.pair.clone()),
                    );
                }
                Err(err) => {
                    // Full rollback: no partial state survives.
                    self.book.remove(&trade_id);
                    self.risk.refund_daily_risk(rm.risk_fraction);
                    self.sink.record_audit(
                        AuditEvent::new(
                            "execution.trade.broker_failed",
                            json!({ "tradeId": trade_id, "error": err.to_string() }),
                        )
                        .with_pair(signal.pair.clone())
                        .with_broker(broker),
                    );
                    warn!(trade_id = %trade_id, error = %err, "broker placement failed; rolled back");
                    return ExecutionOutcome::rejected(err.to_string(), "execution");
                }
            }
        }

        self.risk.refresh_command_snapshot(
            self.book.open_summaries(),
            self.book
                .recent_closed(20)
                .iter()
                .map(Trade::summary)
                .collect(),
            now_ms,
        );
        self.bus.publish(EngineEvent::TradeOpened {
            trade_id: trade_id.clone(),
            pair: signal.pair.clone(),
        });

        info!(
            trade_id = %trade_id,
            pair = %signal.pair,
            direction = %entry.direction,
            volume = rm.position_size,
            "trade executed"
        );
        ExecutionOutcome::ok(trade_id)
    }

    fn audit_rejected(&self, signal: &RawSignal, reason: &str) {
        self.sink.record_audit(
            AuditEvent::new(
                "execution.trade.rejected",
                json!({ "reason": reason }),
            )
            .with_pair(signal.pair.clone()),
        );
    }

    // ── Close path ──────────────────────────────────────────────────────

    /// Close a trade at `price`. `origin_signal` names the signal that drove
    /// a smart exit, when applicable.
    pub async fn close_trade(
        &self,
        trade_id: &str,
        price: f64,
        reason: &str,
        origin_signal: Option<String>,
    ) -> Option<Trade> {
        let now_ms = Utc::now().timestamp_millis();
        let trade = self.book.get(trade_id)?;
        if trade.status == TradeStatus::Closed {
            return Some(trade);
        }

        // Broker-side close first; a failure is recorded on the trade but
        // does not remove it from active state (the monitor retries).
        if let Some(router) = &self.router {
            if !trade.manual_close_acknowledged {
                let payload = ClosePayload {
                    broker: trade.broker.clone(),
                    symbol: trade.pair.clone(),
                    trade_id: trade_id.to_string(),
                    volume: Some(trade.position_size),
                    reason: reason.to_string(),
                };
                if let Err(err) = router.close_position(payload).await {
                    warn!(trade_id = %trade_id, error = %err, "broker close failed; trade stays active");
                    self.book.update(trade_id, |t| {
                        t.close_reason = Some(format!("close_failed: {err}"));
                    });
                    return None;
                }
            }
        }

        let mut closed = self.book.remove(trade_id)?;
        let final_pnl = closed.pnl_at(price);
        closed.status = TradeStatus::Closed;
        closed.close_price = Some(price);
        closed.close_time = Some(now_ms);
        closed.close_reason = Some(reason.to_string());
        closed.final_pnl = Some(final_pnl);
        closed.current_pnl = 0.0;

        self.book.archive(closed.clone());
        self.sink.record_trade_closed(
            serde_json::to_value(&closed).unwrap_or(serde_json::Value::Null),
        );
        self.bus.publish(EngineEvent::TradeClosed {
            trade_id: trade_id.to_string(),
            pair: closed.pair.clone(),
            reason: reason.to_string(),
            final_pnl,
            origin_signal,
        });

        self.handle_trade_closed(&closed, now_ms);

        info!(
            trade_id = %trade_id,
            pair = %closed.pair,
            reason = %reason,
            final_pnl,
            "trade closed"
        );
        Some(closed)
    }

    /// Equity curve, drawdown, VaR, and performance-breakdown updates after
    /// a close.
    fn handle_trade_closed(&self, trade: &Trade, now_ms: i64) {
        let balance = self.account_balance(&trade.broker);
        let final_pnl = trade.final_pnl.unwrap_or(0.0);

        if balance > 0.0 {
            self.risk
                .record_realized_return(final_pnl / balance * 100.0, now_ms);
        }

        let alert = {
            let mut perf = self.performance.write();
            perf.equity += final_pnl;
            if perf.equity > perf.peak_equity {
                perf.peak_equity = perf.equity;
            }
            let equity = perf.equity;
            perf.equity_curve.push_back((now_ms, equity));
            while perf.equity_curve.len() > MAX_EQUITY_POINTS {
                perf.equity_curve.pop_front();
            }

            let reference = perf.peak_equity.max(balance);
            perf.drawdown_pct = if reference > 0.0 {
                ((perf.peak_equity - perf.equity) / reference * 100.0).max(0.0)
            } else {
                0.0
            };

            {
                let entry = perf.by_pair.entry(trade.pair.clone()).or_default();
                entry.trades += 1;
                if final_pnl > 0.0 {
                    entry.wins += 1;
                }
                entry.net_pnl += final_pnl;
            }
            {
                let entry = perf
                    .by_strategy
                    .entry(trade.signal.source.clone())
                    .or_default();
                entry.trades += 1;
                if final_pnl > 0.0 {
                    entry.wins += 1;
                }
                entry.net_pnl += final_pnl;
            }

            let should_alert = perf.drawdown_pct >= DRAWDOWN_ALERT_PCT
                && (perf.drawdown_pct - perf.last_drawdown_alert_pct).abs()
                    >= DRAWDOWN_ALERT_DELTA_PP;
            if should_alert {
                perf.last_drawdown_alert_pct = perf.drawdown_pct;
            }
            should_alert.then_some(perf.drawdown_pct)
        };

        if let Some(drawdown) = alert {
            self.bus.publish(EngineEvent::RiskAlert {
                kind: "drawdown".to_string(),
                severity: "critical".to_string(),
                message: format!("drawdown {drawdown:.1}% of peak equity"),
            });
        }

        self.risk.refresh_command_snapshot(
            self.book.open_summaries(),
            self.book
                .recent_closed(20)
                .iter()
                .map(Trade::summary)
                .collect(),
            now_ms,
        );
    }

    pub fn performance_by_pair(&self) -> HashMap<String, PairPerformance> {
        self.performance.read().by_pair.clone()
    }

    pub fn drawdown_pct(&self) -> f64 {
        self.performance.read().drawdown_pct
    }

    pub fn router(&self) -> Option<Arc<dyn BrokerRouter>> {
        self.router.clone()
    }

    pub fn bridge(&self) -> Arc<MarketDataBridge> {
        self.bridge.clone()
    }

    pub fn config(&self) -> Arc<RwLock<EngineConfig>> {
        self.config.clone()
    }

    pub fn sink(&self) -> Arc<dyn PersistenceSink> {
        self.sink.clone()
    }

    pub fn bus(&self) -> Arc<BroadcastBus> {
        self.bus.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{EconomicReport, NewsReport, TechnicalReport};
    use crate::persistence::MemorySink;
    use crate::signal::{
        Entry, MarketDataComponent, RiskManagement, SignalComponents, StressTests, Validity,
    };
    use crate::signal::ExposureImpact;
    use crate::types::{SignalStatus, VolatilityState};
    use anyhow::Result;
    use async_trait::async_trait;

    struct FailingRouter;

    #[async_trait]
    impl BrokerRouter for FailingRouter {
        async fn place_order(&self, _payload: OrderPayload) -> Result<OrderAck> {
            anyhow::bail!("timeout")
        }
        async fn modify_position(&self, _payload: ModifyPayload) -> Result<()> {
            Ok(())
        }
        async fn close_position(&self, _payload: ClosePayload) -> Result<()> {
            Ok(())
        }
        async fn run_reconciliation(&self, _broker: &str) -> Result<ReconcileSummary> {
            Ok(ReconcileSummary::default())
        }
        fn route_id(&self) -> &'static str {
            "failing"
        }
    }

    struct FillRouter {
        fill_offset: f64,
    }

    #[async_trait]
    impl BrokerRouter for FillRouter {
        async fn place_order(&self, payload: OrderPayload) -> Result<OrderAck> {
            Ok(OrderAck {
                order_id: format!("b-{}", payload.trade_id),
                filled_price: payload.price + self.fill_offset,
                latency_ms: 12,
                route: "test".to_string(),
            })
        }
        async fn modify_position(&self, _payload: ModifyPayload) -> Result<()> {
            Ok(())
        }
        async fn close_position(&self, _payload: ClosePayload) -> Result<()> {
            Ok(())
        }
        async fn run_reconciliation(&self, _broker: &str) -> Result<ReconcileSummary> {
            Ok(ReconcileSummary::default())
        }
        fn route_id(&self) -> &'static str {
            "test"
        }
    }

    fn valid_signal(pair: &str) -> RawSignal {
        let entry = Entry {
            price: 1.0850,
            direction: Direction::Buy,
            stop_loss: 1.0835,
            take_profit: 1.0883,
            atr: 0.0009,
            risk_reward: 2.2,
            stop_multiple: 1.5,
            take_profit_multiple: 3.3,
            volatility_state: VolatilityState::Normal,
            stop_loss_pips: 15.0,
            take_profit_pips: 33.0,
            trailing_stop: TrailingPlan {
                enabled: true,
                breakeven_at_fraction: 0.5,
                activation_at_fraction: 0.6,
                activation_level: 1.0870,
                trailing_distance: 0.0008,
                step_distance: 0.0002,
            },
        };
        RawSignal {
            pair: pair.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            direction: Direction::Buy,
            strength: 60.0,
            confidence: 66.0,
            final_score: 63.0,
            components: SignalComponents {
                economic: EconomicReport::neutral(),
                news: NewsReport::neutral(),
                technical: TechnicalReport::neutral_scaffold(1.0850),
                candles: None,
                market_data: MarketDataComponent::default(),
            },
            entry: Some(entry),
            risk_management: Some(RiskManagement {
                position_size: 0.10,
                risk_fraction: 0.01,
                kelly: 0.015,
                correlation_penalty: 1.0,
                can_trade: true,
                reason: None,
                stress_tests: StressTests {
                    spread_widening_loss: 0.011,
                    slippage_loss: 0.011,
                    max_drawdown_projection: 0.01,
                    passed: true,
                },
                exposure_impact: ExposureImpact {
                    base_currency: "EUR".to_string(),
                    quote_currency: "USD".to_string(),
                    base_added: 0.01,
                    quote_added: 0.01,
                },
            }),
            is_valid: Validity {
                is_valid: true,
                reason: "ENTER".to_string(),
            },
            decision: None,
            expires_at: Some(Utc::now().timestamp_millis() + 60_000),
            signal_status: SignalStatus::Active,
            reasoning: Vec::new(),
            trade_plan: String::new(),
            estimated_win_rate: 62.0,
        }
    }

    fn engine_with(router: Option<Arc<dyn BrokerRouter>>) -> (ExecutionEngine, Arc<MemorySink>) {
        let config = Arc::new(RwLock::new(EngineConfig::default()));
        let bus = Arc::new(BroadcastBus::new());
        let bridge = Arc::new(MarketDataBridge::new(&config.read(), bus.clone()));
        let sink = Arc::new(MemorySink::new());
        let risk = Arc::new(RiskEngine::new(
            config.read().risk.clone(),
            config.read().execution.max_slippage_pips,
            bus.clone(),
        ));
        let engine = ExecutionEngine::new(
            Arc::new(TradeBook::new()),
            router,
            risk,
            bridge,
            sink.clone(),
            bus,
            config,
        );
        (engine, sink)
    }

    #[tokio::test]
    async fn invalid_signal_is_rejected() {
        let (engine, _) = engine_with(None);
        let mut signal = valid_signal("EURUSD");
        signal.is_valid.is_valid = false;
        let outcome = engine.execute_trade(&signal, "mt5", "test").await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_type.as_deref(), Some("validation"));
        assert_eq!(engine.book.open_count(), 0);
    }

    #[tokio::test]
    async fn expired_signal_is_rejected() {
        let (engine, _) = engine_with(None);
        let mut signal = valid_signal("EURUSD");
        signal.expires_at = Some(Utc::now().timestamp_millis() - 1_000);
        let outcome = engine.execute_trade(&signal, "mt5", "test").await;
        assert!(!outcome.success);
        assert_eq!(engine.book.open_count(), 0);
    }

    #[tokio::test]
    async fn successful_execution_opens_trade_and_captures_slippage() {
        let (engine, sink) = engine_with(Some(Arc::new(FillRouter {
            fill_offset: 0.0001,
        })));
        let signal = valid_signal("EURUSD");
        let outcome = engine.execute_trade(&signal, "mt5", "realtime").await;
        assert!(outcome.success);
        assert_eq!(engine.book.open_count(), 1);

        let trade = &engine.book.open_trades()[0];
        assert_eq!(trade.broker, "mt5");
        assert!((trade.execution.slippage_pips - 1.0).abs() < 1e-9);
        assert!(!trade.execution.slippage_exceeded);
        assert_eq!(trade.execution.latency_ms, 12);
        assert!(trade.broker_order.is_some());

        let kinds = sink.audit_kinds();
        assert!(kinds.contains(&"execution.trade.accepted".to_string()));
        assert!(kinds.contains(&"execution.slippage".to_string()));
    }

    #[tokio::test]
    async fn broker_failure_rolls_back_completely() {
        let (engine, sink) = engine_with(Some(Arc::new(FailingRouter)));
        let signal = valid_signal("EURUSD");
        let now = Utc::now().timestamp_millis();
        let daily_before = engine.risk.daily_risk(now);

        let outcome = engine.execute_trade(&signal, "mt5", "test").await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_type.as_deref(), Some("execution"));
        assert_eq!(engine.book.open_count(), 0);
        assert!((engine.risk.daily_risk(now) - daily_before).abs() < 1e-12);

        // Audit order: accepted then broker_failed.
        let kinds = sink.audit_kinds();
        let accepted = kinds
            .iter()
            .position(|k| k == "execution.trade.accepted")
            .unwrap();
        let failed = kinds
            .iter()
            .position(|k| k == "execution.trade.broker_failed")
            .unwrap();
        assert!(accepted < failed);
    }

    #[tokio::test]
    async fn trade_id_reuse_is_idempotent() {
        let (engine, _) = engine_with(Some(Arc::new(FillRouter { fill_offset: 0.0 })));
        let signal = valid_signal("EURUSD");
        let first = engine
            .execute_trade_with_id(&signal, "mt5", "test", "fixed-id".to_string())
            .await;
        assert!(first.success);
        let second = engine
            .execute_trade_with_id(&signal, "mt5", "test", "fixed-id".to_string())
            .await;
        assert!(second.success);
        assert_eq!(second.trade_id.as_deref(), Some("fixed-id"));
        assert_eq!(engine.book.open_count(), 1);
    }

    #[tokio::test]
    async fn max_risk_per_symbol_is_enforced() {
        let (engine, _) = engine_with(Some(Arc::new(FillRouter { fill_offset: 0.0 })));
        let mut signal = valid_signal("EURUSD");
        signal.risk_management.as_mut().unwrap().risk_fraction = 0.015;
        assert!(engine.execute_trade(&signal, "mt5", "a").await.success);
        // Second 1.5% on the same pair would exceed the 2% symbol cap.
        let outcome = engine.execute_trade(&signal, "mt5", "b").await;
        assert!(!outcome.success);
        assert!(outcome.reason.unwrap().contains("symbol risk"));
        assert_eq!(engine.book.open_count(), 1);
    }

    #[tokio::test]
    async fn close_trade_computes_pnl_and_archives() {
        let (engine, sink) = engine_with(Some(Arc::new(FillRouter { fill_offset: 0.0 })));
        let signal = valid_signal("EURUSD");
        let outcome = engine.execute_trade(&signal, "mt5", "test").await;
        let trade_id = outcome.trade_id.unwrap();

        let closed = engine
            .close_trade(&trade_id, 1.0883, "take_profit", None)
            .await
            .unwrap();
        assert_eq!(closed.status, TradeStatus::Closed);
        // 33 pips * 0.10 lots * $10/pip = $33.
        assert!((closed.final_pnl.unwrap() - 33.0).abs() < 1e-6);
        assert_eq!(engine.book.open_count(), 0);
        assert_eq!(engine.book.recent_closed(5).len(), 1);
        assert_eq!(sink.closed_trades().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_cap_is_enforced() {
        let (engine, _) = engine_with(Some(Arc::new(FillRouter { fill_offset: 0.0 })));
        for pair in ["EURUSD", "GBPUSD", "USDJPY"] {
            assert!(engine.execute_trade(&valid_signal(pair), "mt5", "t").await.success);
        }
        let outcome = engine.execute_trade(&valid_signal("AUDUSD"), "mt5", "t").await;
        assert!(!outcome.success);
        assert!(outcome.reason.unwrap().contains("max concurrent"));
        assert_eq!(engine.book.open_count(), 3);
    }
}
