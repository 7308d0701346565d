// =============================================================================
// Trade Manager — per-broker auto-trading lifecycle
// =============================================================================
//
// Owns the scheduled scan loop, the debounced realtime execution path, the
// execution gate every candidate passes through, per-pair cooldowns, the
// smart-exit loop, and live trade contexts. The manager talks to the
// execution engine through its facade and never reaches into broker routing
// directly.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastBus, EngineEvent};
use crate::config::EngineConfig;
use crate::risk::TradeView;
use crate::execution::{ExecutionEngine, ExecutionOutcome, Trade};
use crate::gate::layers18_readiness;
use crate::signal::{AnalysisMode, GenerateOptions, RawSignal, SignalOrchestrator};
use crate::types::{DecisionState, Direction};

/// One buffered realtime candidate.
#[derive(Clone)]
struct PendingCandidate {
    signal: RawSignal,
    queued_at: i64,
}

#[derive(Default)]
struct ManagerState {
    enabled_brokers: HashSet<String>,
    /// (broker, pair) -> last scheduled-scan signal check, epoch ms.
    last_check: HashMap<(String, String), i64>,
    /// (broker, pair) -> last executed realtime trade, epoch ms.
    last_trade_at: HashMap<(String, String), i64>,
    /// trade id -> last smart-exit recheck, epoch ms.
    last_smart_exit_check: HashMap<String, i64>,
    loops_started: bool,
}

pub struct TradeManager {
    orchestrator: Arc<SignalOrchestrator>,
    engine: Arc<ExecutionEngine>,
    config: Arc<RwLock<EngineConfig>>,
    bus: Arc<BroadcastBus>,
    state: RwLock<ManagerState>,
    /// broker -> best pending candidate per pair.
    pending: Mutex<HashMap<String, HashMap<String, PendingCandidate>>>,
    /// Brokers with a debounce flush already scheduled.
    flush_scheduled: Mutex<HashSet<String>>,
}

impl TradeManager {
    pub fn new(
        orchestrator: Arc<SignalOrchestrator>,
        engine: Arc<ExecutionEngine>,
        config: Arc<RwLock<EngineConfig>>,
        bus: Arc<BroadcastBus>,
    ) -> Self {
        Self {
            orchestrator,
            engine,
            config,
            bus,
            state: RwLock::new(ManagerState::default()),
            pending: Mutex::new(HashMap::new()),
            flush_scheduled: Mutex::new(HashSet::new()),
        }
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Enable auto-trading for `broker`. Returns an error when the broker has
    /// no fresh agent session and `allow_disconnected` is not set.
    pub fn start_auto_trading(
        self: &Arc<Self>,
        broker: &str,
        allow_disconnected: bool,
    ) -> Result<(), String> {
        let now = Self::now_ms();
        let connected = self
            .engine
            .bridge()
            .sessions
            .is_connected(broker, now);
        if !connected && !allow_disconnected {
            return Err(format!("broker {broker} has no connected agent session"));
        }

        let start_loops = {
            let mut state = self.state.write();
            state.enabled_brokers.insert(broker.to_string());
            if state.loops_started {
                false
            } else {
                state.loops_started = true;
                true
            }
        };

        info!(broker = %broker, connected, "auto-trading enabled");

        // Initial signal check runs immediately.
        let manager = self.clone();
        tokio::spawn(async move {
            manager.check_for_new_signals().await;
        });

        if start_loops {
            let monitoring = self.clone();
            tokio::spawn(async move {
                monitoring.run_monitoring_loop().await;
            });
            let scanning = self.clone();
            tokio::spawn(async move {
                scanning.run_signal_generation_loop().await;
            });
        }
        Ok(())
    }

    /// Disable one broker, or all when `broker` is `None`.
    pub fn stop_auto_trading(&self, broker: Option<&str>) {
        let mut state = self.state.write();
        match broker {
            Some(broker) => {
                state.enabled_brokers.remove(broker);
                info!(broker = %broker, "auto-trading disabled");
            }
            None => {
                state.enabled_brokers.clear();
                info!("auto-trading disabled for all brokers");
            }
        }
    }

    pub fn enabled_brokers(&self) -> Vec<String> {
        let mut brokers: Vec<String> =
            self.state.read().enabled_brokers.iter().cloned().collect();
        brokers.sort();
        brokers
    }

    fn is_enabled(&self, broker: &str) -> bool {
        self.state.read().enabled_brokers.contains(broker)
    }

    /// Monitoring work continues while any broker is enabled or open trades
    /// remain; signal generation needs an enabled broker.
    fn monitoring_should_run(&self) -> bool {
        !self.state.read().enabled_brokers.is_empty() || self.engine.book.open_count() > 0
    }

    fn signal_generation_should_run(&self) -> bool {
        !self.state.read().enabled_brokers.is_empty()
    }

    async fn run_monitoring_loop(self: Arc<Self>) {
        let interval_ms = self.config.read().auto_trading.monitoring_interval_ms;
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(
            interval_ms.max(1_000) as u64,
        ));
        loop {
            ticker.tick().await;
            if !self.monitoring_should_run() {
                continue;
            }
            self.monitor_smart_exits().await;
            self.monitor_live_trade_contexts().await;
        }
    }

    async fn run_signal_generation_loop(self: Arc<Self>) {
        let interval_ms = self
            .config
            .read()
            .auto_trading
            .signal_generation_interval_ms;
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(
            interval_ms.max(5_000) as u64,
        ));
        loop {
            ticker.tick().await;
            if !self.signal_generation_should_run() {
                continue;
            }
            self.check_for_new_signals().await;
        }
    }

    // ── Scheduled scans ─────────────────────────────────────────────────

    /// Scan universe for `broker`: configured symbols plus, when enabled,
    /// the freshest dynamically discovered EA symbols.
    fn scan_universe(&self, broker: &str, now_ms: i64) -> Vec<String> {
        let config = self.config.read();
        let mut universe: Vec<String> = config.symbols.clone();
        if config.auto_trading.dynamic_universe_enabled {
            let dynamic = self.engine.bridge().symbols.list_known(
                broker,
                config.auto_trading.universe_max_age_ms,
                config.auto_trading.universe_max_symbols,
                now_ms,
            );
            universe.extend(dynamic);
        }
        let mut seen = HashSet::new();
        universe.retain(|s| seen.insert(s.clone()));
        universe
    }

    pub async fn check_for_new_signals(&self) {
        let now = Self::now_ms();
        let brokers = self.enabled_brokers();
        let config = self.config.read().clone();

        for broker in brokers {
            if !self
                .engine
                .bridge()
                .sessions
                .is_connected(&broker, now)
            {
                debug!(broker = %broker, "scan skipped: broker disconnected");
                continue;
            }

            let mut candidates: Vec<RawSignal> = Vec::new();
            for pair in self.scan_universe(&broker, now) {
                let key = (broker.clone(), pair.clone());
                {
                    let mut state = self.state.write();
                    let last = state.last_check.get(&key).copied().unwrap_or(0);
                    if now - last < config.auto_trading.signal_check_interval_ms {
                        continue;
                    }
                    state.last_check.insert(key, now);
                }

                let opts = GenerateOptions {
                    broker: Some(broker.clone()),
                    analysis_mode: AnalysisMode::Ea,
                    data_quality_ttl_ms: None,
                };
                let signal = self.orchestrator.generate_signal(&pair, &opts).await;
                match self.evaluate_execution_gate(&broker, &signal, "scan", None) {
                    Ok(()) => candidates.push(signal),
                    Err(reason) => {
                        debug!(broker = %broker, pair = %pair, reason = %reason, "scan candidate rejected");
                    }
                }
            }

            self.execute_ranked(&broker, candidates, "scan").await;
        }
    }

    /// Rank candidates and attempt up to the per-cycle limit.
    async fn execute_ranked(&self, broker: &str, mut candidates: Vec<RawSignal>, source: &str) {
        if candidates.is_empty() {
            return;
        }
        candidates.sort_by(|a, b| {
            b.decision_score()
                .partial_cmp(&a.decision_score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    b.strength
                        .partial_cmp(&a.strength)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        let limit = self.config.read().auto_trading.max_new_trades_per_cycle;
        let mut placed = 0usize;
        for signal in candidates {
            if placed >= limit {
                break;
            }
            // Conditions may have shifted since ranking.
            if let Err(reason) = self.evaluate_execution_gate(broker, &signal, source, None) {
                debug!(pair = %signal.pair, reason = %reason, "candidate dropped at execution time");
                continue;
            }
            let outcome = self.execute_candidate(broker, &signal, source).await;
            if outcome.success {
                placed += 1;
            }
        }
    }

    async fn execute_candidate(
        &self,
        broker: &str,
        signal: &RawSignal,
        source: &str,
    ) -> ExecutionOutcome {
        let outcome = self.engine.execute_trade(signal, broker, source).await;
        if outcome.success {
            self.state.write().last_trade_at.insert(
                (broker.to_string(), signal.pair.clone()),
                Self::now_ms(),
            );
            info!(
                broker = %broker,
                pair = %signal.pair,
                source = %source,
                trade_id = ?outcome.trade_id,
                "auto trade placed"
            );
        }
        outcome
    }

    // ── Execution gate ──────────────────────────────────────────────────

    /// Every candidate (scan or realtime) must pass this gate. Returns the
    /// rejection reason on failure.
    pub fn evaluate_execution_gate(
        &self,
        broker: &str,
        signal: &RawSignal,
        _source: &str,
        should_execute_hint: Option<bool>,
    ) -> Result<(), String> {
        let config = self.config.read();

        let pair_info = crate::pairs::lookup(&signal.pair);
        let class = pair_info.asset_class.to_string();
        if !config.ea.allow_all_symbols
            && !config
                .auto_trading
                .asset_classes
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&class))
        {
            return Err(format!("asset class {class} not enabled for auto-trading"));
        }

        if self.engine.book.has_open_for_pair(broker, &signal.pair) {
            return Err("Trade already open for pair".to_string());
        }

        let Some(decision) = signal.decision.as_ref() else {
            return Err("signal carries no decision".to_string());
        };
        if decision.state != DecisionState::Enter || !signal.is_valid.is_valid {
            if !(config.ea.allow_wait_monitor_execution
                && decision.state == DecisionState::WaitMonitor)
            {
                return Err(format!("decision state {} not executable", decision.state));
            }
        }

        if should_execute_hint == Some(false) {
            return Err("execution hint declined".to_string());
        }

        if signal.confidence < config.auto_trading.realtime_min_confidence {
            return Err(format!(
                "confidence {:.0} below minimum {:.0}",
                signal.confidence, config.auto_trading.realtime_min_confidence
            ));
        }
        if signal.strength < config.auto_trading.realtime_min_strength {
            return Err(format!(
                "strength {:.0} below minimum {:.0}",
                signal.strength, config.auto_trading.realtime_min_strength
            ));
        }

        if config.auto_trading.smart_strong {
            if signal.confidence < config.auto_trading.smart_min_confidence {
                return Err("smart-strong: confidence below floor".to_string());
            }
            if signal.strength < config.auto_trading.smart_min_strength {
                return Err("smart-strong: strength below floor".to_string());
            }
            if signal.decision_score() < config.auto_trading.smart_min_decision_score {
                return Err("smart-strong: decision score below floor".to_string());
            }
        }

        if config.auto_trading.realtime_require_layers18 {
            let readiness = layers18_readiness(
                &decision.confluence,
                config.ea.layers18_min_confluence,
            );
            if !readiness.ready {
                return Err(format!(
                    "layers18 not ready ({:.0} < {:.0})",
                    readiness.score, config.ea.layers18_min_confluence
                ));
            }
        }

        Ok(())
    }

    // ── Realtime path ───────────────────────────────────────────────────

    /// Debounced realtime enqueue. The best candidate per pair is retained;
    /// a flush is scheduled `realtime_execution_debounce_ms` after the first
    /// enqueue of a batch.
    pub fn enqueue_realtime_signal(self: &Arc<Self>, broker: &str, signal: RawSignal) {
        let now = Self::now_ms();
        let config = self.config.read().clone();

        if !config.auto_trading.enabled
            || !config.auto_trading.realtime_signal_execution_enabled
        {
            return;
        }
        if !self.is_enabled(broker) {
            return;
        }
        if !self.engine.bridge().sessions.is_connected(broker, now) {
            return;
        }
        if let Err(reason) = self.evaluate_execution_gate(broker, &signal, "realtime", None) {
            debug!(broker = %broker, pair = %signal.pair, reason = %reason, "realtime candidate rejected");
            return;
        }
        // Cooldown per (broker, pair).
        {
            let state = self.state.read();
            let key = (broker.to_string(), signal.pair.clone());
            if let Some(&last) = state.last_trade_at.get(&key) {
                if now - last < config.auto_trading.realtime_trade_cooldown_ms {
                    debug!(pair = %signal.pair, "realtime candidate in cooldown; skipped");
                    return;
                }
            }
        }

        // Retain the strongest candidate per pair.
        {
            let mut pending = self.pending.lock();
            let batch = pending.entry(broker.to_string()).or_default();
            let replace = batch
                .get(&signal.pair)
                .map(|existing| signal.decision_score() > existing.signal.decision_score())
                .unwrap_or(true);
            if replace {
                batch.insert(
                    signal.pair.clone(),
                    PendingCandidate {
                        signal,
                        queued_at: now,
                    },
                );
            }
        }

        // Schedule a flush unless one is already pending for this broker.
        let schedule = self.flush_scheduled.lock().insert(broker.to_string());
        if schedule {
            let manager = self.clone();
            let broker = broker.to_string();
            let debounce_ms = config.auto_trading.realtime_execution_debounce_ms.max(50);
            tokio::spawn(async move {
                tokio::time::sleep(tokio::time::Duration::from_millis(debounce_ms as u64)).await;
                manager.flush_realtime(&broker).await;
            });
        }
    }

    /// Flush the pending realtime batch for `broker`: re-rank and execute up
    /// to the per-cycle limit.
    pub async fn flush_realtime(&self, broker: &str) {
        self.flush_scheduled.lock().remove(broker);
        let batch: Vec<PendingCandidate> = {
            let mut pending = self.pending.lock();
            pending
                .remove(broker)
                .map(|m| m.into_values().collect())
                .unwrap_or_default()
        };
        if batch.is_empty() {
            return;
        }
        debug!(broker = %broker, count = batch.len(), "flushing realtime batch");
        let candidates: Vec<RawSignal> = batch.into_iter().map(|c| c.signal).collect();
        self.execute_ranked(broker, candidates, "realtime").await;
    }

    // ── Smart exits ─────────────────────────────────────────────────────

    /// Decide whether a freshly regenerated signal justifies closing `trade`
    /// in the opposite direction.
    fn smart_exit_applies(&self, trade: &Trade, signal: &RawSignal) -> bool {
        let config = self.config.read();
        if !config.auto_trading.smart_exit_enabled {
            return false;
        }
        let Some(decision) = signal.decision.as_ref() else {
            return false;
        };
        if signal.direction == Direction::Neutral || signal.direction == trade.direction {
            return false;
        }
        if decision.state != DecisionState::Enter {
            return false;
        }
        if signal.confidence < config.auto_trading.smart_exit_min_confidence
            || signal.strength < config.auto_trading.smart_exit_min_strength
            || signal.decision_score() < config.auto_trading.smart_exit_min_decision_score
        {
            return false;
        }
        let readiness =
            layers18_readiness(&decision.confluence, config.ea.layers18_min_confluence);
        readiness.ready
    }

    /// Per-trade smart-exit evaluation at the configured recheck cadence.
    pub async fn monitor_smart_exits(&self) {
        let now = Self::now_ms();
        let recheck_ms = self.config.read().auto_trading.smart_exit_recheck_ms;

        for trade in self.engine.book.open_trades() {
            {
                let mut state = self.state.write();
                let last = state
                    .last_smart_exit_check
                    .get(&trade.id)
                    .copied()
                    .unwrap_or(0);
                if now - last < recheck_ms {
                    continue;
                }
                state.last_smart_exit_check.insert(trade.id.clone(), now);
            }

            let opts = GenerateOptions {
                broker: Some(trade.broker.clone()),
                analysis_mode: AnalysisMode::Ea,
                data_quality_ttl_ms: None,
            };
            let signal = self.orchestrator.generate_signal(&trade.pair, &opts).await;

            if self.smart_exit_applies(&trade, &signal) {
                warn!(
                    trade_id = %trade.id,
                    pair = %trade.pair,
                    reverse_direction = %signal.direction,
                    "smart exit: strong reverse signal"
                );
                let origin = format!("{}@{}", signal.pair, signal.timestamp);
                self.engine
                    .close_trade(
                        &trade.id,
                        trade.current_price,
                        "smart_exit_reverse",
                        Some(origin),
                    )
                    .await;
            }
        }
    }

    // ── Live trade contexts ─────────────────────────────────────────────

    /// Publish a live context per open trade: progress, drift from entry
    /// conditions, and the latest readiness counts.
    pub async fn monitor_live_trade_contexts(&self) {
        let config = self.config.read().clone();
        for trade in self.engine.book.open_trades() {
            let quote = self
                .engine
                .bridge()
                .freshest_quote(&trade.broker, &trade.pair);
            let price = quote.as_ref().map(|q| q.mid()).unwrap_or(trade.current_price);

            let entry_drift_pips = {
                let info = crate::pairs::lookup(&trade.pair);
                info.to_pips(price - trade.entry_price) * trade.direction.sign()
            };

            let payload = serde_json::json!({
                "tradeId": trade.id,
                "pair": trade.pair,
                "direction": trade.direction,
                "entryPrice": trade.entry_price,
                "currentPrice": price,
                "entryDriftPips": entry_drift_pips,
                "progressToTarget": trade.progress_to_target(price),
                "currentPnl": trade.current_pnl,
                "movedToBreakeven": trade.moved_to_breakeven,
                "minConfluence": config.ea.layers18_min_confluence,
                "signal": trade.signal,
            });
            self.bus.publish(EngineEvent::TradeLiveContext {
                trade_id: trade.id.clone(),
                pair: trade.pair.clone(),
                payload,
            });
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{
        BridgeTechnicalAnalyzer, CalendarEconomicAnalyzer, HeadlineNewsAnalyzer,
        EconomicReport, NewsReport, TechnicalReport,
    };
    use crate::bridge::{MarketDataBridge, SessionConnect};
    use crate::execution::TradeBook;
    use crate::gate::DecisionGate;
    use crate::persistence::MemorySink;
    use crate::quality::QualityGuard;
    use crate::risk::RiskEngine;
    use crate::signal::{
        Entry, MarketDataComponent, RiskManagement, SignalComponents, StressTests,
        TrailingPlan, Validity, ExposureImpact,
    };
    use crate::types::{SignalStatus, VolatilityState};

    struct Harness {
        manager: Arc<TradeManager>,
        engine: Arc<ExecutionEngine>,
        bridge: Arc<MarketDataBridge>,
    }

    fn harness() -> Harness {
        let mut engine_config = EngineConfig::default();
        engine_config.auto_trading.enabled = true;
        engine_config.gate.enforce_trading_windows = false;
        // Constructed decisions in these tests carry a minimal confluence
        // payload, so readiness gating is exercised separately.
        engine_config.auto_trading.realtime_require_layers18 = false;
        let config = Arc::new(RwLock::new(engine_config));
        let bus = Arc::new(BroadcastBus::new());
        let bridge = Arc::new(MarketDataBridge::new(&config.read(), bus.clone()));
        bridge.sessions.register(
            "mt5",
            SessionConnect {
                account_number: "100".to_string(),
                account_mode: Default::default(),
                server: String::new(),
                currency: "USD".to_string(),
                equity: 10_000.0,
                balance: 10_000.0,
                ea: String::new(),
            },
            TradeManager::now_ms(),
        );

        let sink = Arc::new(MemorySink::new());
        let risk = Arc::new(RiskEngine::new(
            config.read().risk.clone(),
            config.read().execution.max_slippage_pips,
            bus.clone(),
        ));
        let book = Arc::new(TradeBook::new());
        let engine = Arc::new(ExecutionEngine::new(
            book.clone(),
            None,
            risk.clone(),
            bridge.clone(),
            sink.clone(),
            bus.clone(),
            config.clone(),
        ));

        let quality = Arc::new(QualityGuard::new(
            bridge.clone(),
            sink,
            config.read().quality.clone(),
        ));
        let orchestrator = Arc::new(SignalOrchestrator::new(
            bridge.clone(),
            quality,
            Arc::new(DecisionGate::new()),
            risk,
            Arc::new(CalendarEconomicAnalyzer::new(bridge.clone())),
            Arc::new(HeadlineNewsAnalyzer::new(bridge.clone())),
            Arc::new(BridgeTechnicalAnalyzer::new(bridge.clone())),
            book,
            config.clone(),
            bus.clone(),
        ));

        let manager = Arc::new(TradeManager::new(
            orchestrator,
            engine.clone(),
            config,
            bus,
        ));
        manager.state.write().enabled_brokers.insert("mt5".to_string());

        Harness {
            manager,
            engine,
            bridge,
        }
    }

    fn enter_signal(pair: &str, decision_score: f64) -> RawSignal {
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
        let mut signal = RawSignal {
            pair: pair.to_string(),
            timestamp: TradeManager::now_ms(),
            direction: Direction::Buy,
            strength: 58.0,
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
            expires_at: Some(TradeManager::now_ms() + 120_000),
            signal_status: SignalStatus::Active,
            reasoning: Vec::new(),
            trade_plan: String::new(),
            estimated_win_rate: 62.0,
        };
        signal.decision = Some(test_decision(decision_score, DecisionState::Enter));
        signal
    }

    fn test_decision(score: f64, state: DecisionState) -> crate::gate::Decision {
        crate::gate::Decision {
            state,
            blocked: false,
            category: "entry".to_string(),
            asset_class: crate::types::AssetClass::Forex,
            score,
            kill_switch: Vec::new(),
            confluence: crate::gate::Confluence {
                enabled: true,
                strict: false,
                passed: true,
                score: 80.0,
                min_score: 62.0,
                pass_count: 20,
                fail_count: 0,
                skip_count: 0,
                hard_fails: Vec::new(),
                layers: Vec::new(),
            },
            profile: crate::gate::profile::select(
                crate::types::AssetClass::Forex,
                crate::config::TradingProfile::Balanced,
            ),
            contributors: crate::gate::Contributors {
                direction: 1.0,
                strength: 0.8,
                probability: 0.8,
                confidence: 0.8,
                risk_reward: 0.6,
                spread_efficiency: 0.7,
                weighted_score01: 0.75,
            },
            context: serde_json::Value::Null,
            modifiers: crate::gate::Modifiers {
                news: 1.0,
                session: 1.0,
                data_quality: 0.95,
                momentum_boost: 1.0,
            },
            blockers: Vec::new(),
            missing: Vec::new(),
            what_would_change: Vec::new(),
        }
    }

    #[tokio::test]
    async fn realtime_flood_places_exactly_one_order() {
        let h = harness();
        // 20 strong candidates for the same pair in a burst.
        for i in 0..20 {
            h.manager
                .enqueue_realtime_signal("mt5", enter_signal("EURUSD", 60.0 + i as f64 * 0.1));
        }
        h.manager.flush_realtime("mt5").await;
        assert_eq!(h.engine.book.open_count(), 1);

        // Subsequent candidates are rejected: trade already open.
        let err = h
            .manager
            .evaluate_execution_gate("mt5", &enter_signal("EURUSD", 66.0), "realtime", None)
            .unwrap_err();
        assert_eq!(err, "Trade already open for pair");
    }

    #[tokio::test]
    async fn cooldown_blocks_immediate_reentry() {
        let h = harness();
        h.manager
            .enqueue_realtime_signal("mt5", enter_signal("EURUSD", 62.0));
        h.manager.flush_realtime("mt5").await;
        assert_eq!(h.engine.book.open_count(), 1);

        // Close the trade, then try again inside the cooldown window.
        let trade_id = h.engine.book.open_trades()[0].id.clone();
        h.engine
            .close_trade(&trade_id, 1.0860, "manual", None)
            .await
            .unwrap();
        h.manager
            .enqueue_realtime_signal("mt5", enter_signal("EURUSD", 62.0));
        h.manager.flush_realtime("mt5").await;
        assert_eq!(h.engine.book.open_count(), 0);
    }

    #[tokio::test]
    async fn gate_enforces_confidence_and_strength_floors() {
        let h = harness();
        let mut weak = enter_signal("EURUSD", 62.0);
        weak.confidence = 30.0;
        let err = h
            .manager
            .evaluate_execution_gate("mt5", &weak, "realtime", None)
            .unwrap_err();
        assert!(err.contains("confidence"));

        let mut soft = enter_signal("EURUSD", 62.0);
        soft.strength = 10.0;
        let err = h
            .manager
            .evaluate_execution_gate("mt5", &soft, "realtime", None)
            .unwrap_err();
        assert!(err.contains("strength"));
    }

    #[tokio::test]
    async fn gate_rejects_wait_monitor_and_hints() {
        let h = harness();
        let mut waiting = enter_signal("EURUSD", 62.0);
        waiting.decision = Some(test_decision(62.0, DecisionState::WaitMonitor));
        waiting.is_valid.is_valid = false;
        assert!(h
            .manager
            .evaluate_execution_gate("mt5", &waiting, "scan", None)
            .is_err());

        let good = enter_signal("EURUSD", 62.0);
        let err = h
            .manager
            .evaluate_execution_gate("mt5", &good, "scan", Some(false))
            .unwrap_err();
        assert!(err.contains("hint"));
    }

    #[tokio::test]
    async fn gate_filters_asset_classes() {
        let h = harness();
        let crypto = enter_signal("BTCUSD", 70.0);
        let err = h
            .manager
            .evaluate_execution_gate("mt5", &crypto, "scan", None)
            .unwrap_err();
        assert!(err.contains("asset class"));
    }

    #[tokio::test]
    async fn smart_strong_raises_floors() {
        let h = harness();
        h.manager.config.write().auto_trading.smart_strong = true;
        // Meets realtime floors but not smart-strong ones.
        let mut signal = enter_signal("EURUSD", 45.0);
        signal.confidence = 50.0;
        let err = h
            .manager
            .evaluate_execution_gate("mt5", &signal, "realtime", None)
            .unwrap_err();
        assert!(err.contains("smart-strong"));
    }

    #[tokio::test]
    async fn smart_exit_reverse_closes_opposite_trade() {
        let h = harness();
        // Open a BUY trade.
        h.manager
            .enqueue_realtime_signal("mt5", enter_signal("EURUSD", 62.0));
        h.manager.flush_realtime("mt5").await;
        let trade = h.engine.book.open_trades()[0].clone();

        // A strong reverse SELL signal qualifies for smart exit.
        let mut reverse = enter_signal("EURUSD", 66.0);
        reverse.direction = Direction::Sell;
        reverse.confidence = 68.0;
        reverse.strength = 55.0;
        assert!(h.manager.smart_exit_applies(&trade, &reverse));

        // Same-direction or weak signals do not.
        let same = enter_signal("EURUSD", 66.0);
        assert!(!h.manager.smart_exit_applies(&trade, &same));
        let mut weak = enter_signal("EURUSD", 66.0);
        weak.direction = Direction::Sell;
        weak.confidence = 40.0;
        assert!(!h.manager.smart_exit_applies(&trade, &weak));

        // Driving the close emits trade_closed with the origin signal.
        let mut rx = h.manager.bus.subscribe();
        h.engine
            .close_trade(
                &trade.id,
                trade.entry_price,
                "smart_exit_reverse",
                Some(format!("{}@{}", reverse.pair, reverse.timestamp)),
            )
            .await
            .unwrap();
        let mut saw_origin = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::TradeClosed {
                reason,
                origin_signal,
                ..
            } = event
            {
                assert_eq!(reason, "smart_exit_reverse");
                assert!(origin_signal.unwrap().starts_with("EURUSD@"));
                saw_origin = true;
            }
        }
        assert!(saw_origin);
    }

    #[tokio::test]
    async fn live_trade_context_is_published() {
        let h = harness();
        h.manager
            .enqueue_realtime_signal("mt5", enter_signal("EURUSD", 62.0));
        h.manager.flush_realtime("mt5").await;
        let mut rx = h.manager.bus.subscribe();
        h.manager.monitor_live_trade_contexts().await;
        let mut saw_context = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::TradeLiveContext { pair, payload, .. } = event {
                assert_eq!(pair, "EURUSD");
                assert!(payload.get("progressToTarget").is_some());
                saw_context = true;
            }
        }
        assert!(saw_context);
    }

    #[tokio::test]
    async fn scan_universe_merges_and_dedupes() {
        let h = harness();
        let now = TradeManager::now_ms();
        h.bridge
            .symbols
            .record_symbols("mt5", &["EURUSD".to_string(), "NZDCAD".to_string()], now);
        let universe = h.manager.scan_universe("mt5", now);
        // Configured five plus NZDCAD; EURUSD deduplicated.
        assert_eq!(
            universe.iter().filter(|s| s.as_str() == "EURUSD").count(),
            1
        );
        assert!(universe.contains(&"NZDCAD".to_string()));
    }

    #[tokio::test]
    async fn stop_auto_trading_disables_broker() {
        let h = harness();
        assert_eq!(h.manager.enabled_brokers(), vec!["mt5"]);
        h.manager.stop_auto_trading(Some("mt5"));
        assert!(h.manager.enabled_brokers().is_empty());
        // Realtime candidates are ignored once disabled.
        h.manager
            .enqueue_realtime_signal("mt5", enter_signal("EURUSD", 62.0));
        h.manager.flush_realtime("mt5").await;
        assert_eq!(h.engine.book.open_count(), 0);
    }
}
