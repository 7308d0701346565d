// =============================================================================
// Trade Supervisor — breakeven, trailing, smart exits, reconciliation
// =============================================================================
//
// Polled at the monitoring cadence. Each pass:
//   1. Refreshes the current price per trade (EA quote mid preferred).
//   2. Runs the smart supervisor (news / data-quality blackout exits).
//   3. Moves the stop to breakeven once enough of the target is travelled.
//   4. Activates and steps the trailing stop.
//   5. Syncs changed protection to the broker (throttled + deduplicated).
//   6. Detects SL/TP hits and closes.
//   7. Periodically runs broker reconciliation.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::bridge::MarketDataBridge;
use crate::quality::CircuitBreakerStore;
use crate::types::{Direction, Timeframe};

use super::{ExecutionEngine, ModifyPayload, Trade};

/// Minimum gap between protection syncs per trade.
const MODIFY_THROTTLE_FALLBACK_MS: i64 = 1_500;
/// Minimum gap between reconciliation passes.
const RECONCILE_MIN_GAP_MS: i64 = 60_000;

pub struct TradeSupervisor {
    engine: Arc<ExecutionEngine>,
    breakers: Option<Arc<CircuitBreakerStore>>,
    last_reconcile_at: parking_lot::Mutex<i64>,
}

impl TradeSupervisor {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self {
            engine,
            breakers: None,
            last_reconcile_at: parking_lot::Mutex::new(0),
        }
    }

    /// Attach the quality-guard breaker store so data-quality blackouts can
    /// drive protective exits.
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerStore>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    fn current_price(bridge: &MarketDataBridge, trade: &Trade) -> Option<f64> {
        if let Some(quote) = bridge.freshest_quote(&trade.broker, &trade.pair) {
            let mid = quote.mid();
            if mid > 0.0 {
                return Some(mid);
            }
        }
        // Fall back to the latest M1/M15 close.
        for tf in [Timeframe::M1, Timeframe::M15] {
            let bars = bridge.bars.recent(&trade.broker, &trade.pair, tf, 1);
            if let Some(bar) = bars.last() {
                if bar.close > 0.0 {
                    return Some(bar.close);
                }
            }
        }
        None
    }

    /// One supervision pass over every open trade.
    pub async fn manage_active_trades(&self) {
        let now_ms = Utc::now().timestamp_millis();
        let bridge = self.engine.bridge();
        let config = self.engine.config().read().clone();

        for trade in self.engine.book.open_trades() {
            let Some(price) = Self::current_price(&bridge, &trade) else {
                debug!(trade_id = %trade.id, "no current price; skipping supervision");
                continue;
            };

            let pnl = trade.pnl_at(price);
            self.engine.book.update(&trade.id, |t| {
                t.current_price = price;
                t.current_pnl = pnl;
            });

            // ── SL/TP hits ──────────────────────────────────────────────
            let effective_sl = self
                .engine
                .book
                .get(&trade.id)
                .map(|t| t.stop_loss)
                .unwrap_or(trade.stop_loss);
            let sl_hit = match trade.direction {
                Direction::Buy => price <= effective_sl,
                Direction::Sell => price >= effective_sl,
                Direction::Neutral => false,
            };
            let tp_hit = match trade.direction {
                Direction::Buy => price >= trade.take_profit,
                Direction::Sell => price <= trade.take_profit,
                Direction::Neutral => false,
            };
            if sl_hit {
                self.engine
                    .close_trade(&trade.id, price, "stop_loss", None)
                    .await;
                continue;
            }
            if tp_hit {
                self.engine
                    .close_trade(&trade.id, price, "take_profit", None)
                    .await;
                continue;
            }

            // ── Smart supervisor ────────────────────────────────────────
            if config.execution.smart_trade_supervisor_enabled {
                if let Some(action) = self.smart_supervise(&bridge, &trade, price, now_ms, &config)
                {
                    match action {
                        SmartAction::Exit(reason) => {
                            self.engine
                                .close_trade(&trade.id, price, &reason, None)
                                .await;
                            continue;
                        }
                        SmartAction::Breakeven => {
                            self.move_to_breakeven(&trade, now_ms, &config).await;
                        }
                    }
                }
            }

            // ── Breakeven ───────────────────────────────────────────────
            let progress = trade.progress_to_target(price);
            if !trade.moved_to_breakeven
                && progress >= trade.trailing_stop.breakeven_at_fraction
            {
                self.move_to_breakeven(&trade, now_ms, &config).await;
            }

            // ── Trailing ────────────────────────────────────────────────
            if trade.trailing_stop.enabled
                && progress >= trade.trailing_stop.activation_at_fraction
            {
                let candidate = match trade.direction {
                    Direction::Buy => price - trade.trailing_stop.trailing_distance,
                    Direction::Sell => price + trade.trailing_stop.trailing_distance,
                    Direction::Neutral => continue,
                };
                let current_sl = self
                    .engine
                    .book
                    .get(&trade.id)
                    .map(|t| t.stop_loss)
                    .unwrap_or(trade.stop_loss);
                let improvement = match trade.direction {
                    Direction::Buy => candidate - current_sl,
                    _ => current_sl - candidate,
                };
                if improvement >= trade.trailing_stop.step_distance {
                    self.engine.book.update(&trade.id, |t| {
                        t.stop_loss = candidate;
                    });
                    debug!(
                        trade_id = %trade.id,
                        new_sl = candidate,
                        "trailing stop advanced"
                    );
                    self.sync_broker_protection(&trade.id, now_ms, &config).await;
                }
            }
        }

        self.maybe_reconcile(now_ms, &config).await;
    }

    async fn move_to_breakeven(
        &self,
        trade: &Trade,
        now_ms: i64,
        config: &crate::config::EngineConfig,
    ) {
        let already = self
            .engine
            .book
            .get(&trade.id)
            .map(|t| t.moved_to_breakeven)
            .unwrap_or(true);
        if already {
            return;
        }
        self.engine.book.update(&trade.id, |t| {
            t.stop_loss = t.entry_price;
            t.moved_to_breakeven = true;
        });
        info!(trade_id = %trade.id, pair = %trade.pair, "stop moved to breakeven");
        self.sync_broker_protection(&trade.id, now_ms, config).await;
    }

    /// Push a changed stop to the broker, throttled and de-duplicated.
    async fn sync_broker_protection(
        &self,
        trade_id: &str,
        now_ms: i64,
        config: &crate::config::EngineConfig,
    ) {
        let Some(router) = self.engine.router() else {
            return;
        };
        let Some(trade) = self.engine.book.get(trade_id) else {
            return;
        };

        let throttle = config
            .execution
            .broker_modify_throttle_ms
            .max(MODIFY_THROTTLE_FALLBACK_MS);
        if now_ms - trade.last_broker_modify_at < throttle {
            return;
        }
        if trade.last_broker_stop_loss_sent == Some(trade.stop_loss) {
            return;
        }

        let payload = ModifyPayload {
            broker: trade.broker.clone(),
            symbol: trade.pair.clone(),
            trade_id: trade_id.to_string(),
            stop_loss: Some(trade.stop_loss),
            take_profit: Some(trade.take_profit),
        };
        match router.modify_position(payload).await {
            Ok(()) => {
                self.engine.book.update(trade_id, |t| {
                    t.last_broker_modify_at = now_ms;
                    t.last_broker_stop_loss_sent = Some(t.stop_loss);
                });
            }
            Err(err) => {
                // Recorded but the trade stays active; retried next pass.
                warn!(trade_id = %trade_id, error = %err, "broker protection sync failed");
            }
        }
    }

    fn smart_supervise(
        &self,
        bridge: &MarketDataBridge,
        trade: &Trade,
        price: f64,
        now_ms: i64,
        config: &crate::config::EngineConfig,
    ) -> Option<SmartAction> {
        let info = crate::pairs::lookup(&trade.pair);
        let profit_pct = if trade.entry_price > 0.0 {
            (price - trade.entry_price) / trade.entry_price * 100.0 * trade.direction.sign()
        } else {
            0.0
        };

        // News blackout: a high-impact event inside the smart-exit window.
        let window_ms = config.execution.smart_exit_news_minutes * 60_000;
        let news_imminent = !bridge
            .snapshots
            .upcoming_events(
                &trade.broker,
                &info.base,
                &info.quote,
                now_ms,
                window_ms,
                config.gate.news_blackout_impact_threshold,
            )
            .is_empty();
        if news_imminent {
            return if profit_pct >= config.execution.smart_exit_min_profit_pct {
                Some(SmartAction::Exit("smart_exit_news".to_string()))
            } else {
                Some(SmartAction::Breakeven)
            };
        }

        // Data-quality blackout: an active circuit breaker on the pair.
        if let Some(breakers) = &self.breakers {
            if breakers.active(&trade.pair, now_ms).is_some() {
                return if profit_pct >= config.execution.smart_exit_min_profit_pct {
                    Some(SmartAction::Exit("smart_exit_data_quality".to_string()))
                } else {
                    Some(SmartAction::Breakeven)
                };
            }
        }

        None
    }

    async fn maybe_reconcile(&self, now_ms: i64, config: &crate::config::EngineConfig) {
        let due = {
            let mut last = self.last_reconcile_at.lock();
            let gap = config.execution.reconcile_interval_ms.max(RECONCILE_MIN_GAP_MS);
            if now_ms - *last < gap {
                false
            } else {
                *last = now_ms;
                true
            }
        };
        if !due {
            return;
        }
        let Some(router) = self.engine.router() else {
            return;
        };

        let brokers: std::collections::HashSet<String> = self
            .engine
            .book
            .open_trades()
            .iter()
            .map(|t| t.broker.clone())
            .collect();
        for broker in brokers {
            match router.run_reconciliation(&broker).await {
                Ok(summary) => {
                    *self.engine.last_reconcile_ok.write() = Some(now_ms);
                    *self.engine.last_reconcile_error.write() = None;
                    debug!(
                        broker = %broker,
                        matched = summary.positions_matched,
                        orphans = summary.orphans,
                        "reconciliation pass complete"
                    );
                }
                Err(err) => {
                    *self.engine.last_reconcile_error.write() = Some(err.to_string());
                    warn!(broker = %broker, error = %err, "reconciliation failed");
                }
            }
        }
    }
}

enum SmartAction {
    Exit(String),
    Breakeven,
}

/// Run the supervision loop forever. Spawned once at engine startup; the
/// cadence never blocks on a previous iteration because each pass awaits its
/// own broker calls inline.
pub async fn run_supervision_loop(supervisor: Arc<TradeSupervisor>, interval_ms: i64) {
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(
        interval_ms.max(1_000) as u64,
    ));
    info!(interval_ms, "trade supervisor started");
    loop {
        ticker.tick().await;
        supervisor.manage_active_trades().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastBus;
    use crate::config::EngineConfig;
    use crate::execution::{ExecutionEngine, TradeBook};
    use crate::persistence::MemorySink;
    use crate::risk::{RiskEngine, TradeView};
    use crate::signal::TrailingPlan;
    use parking_lot::RwLock;

    fn open_trade(pair: &str, entry: f64, sl: f64, tp: f64) -> Trade {
        Trade {
            id: uuid::Uuid::new_v4().to_string(),
            pair: pair.to_string(),
            direction: Direction::Buy,
            entry_price: entry,
            stop_loss: sl,
            take_profit: tp,
            position_size: 0.1,
            risk_fraction: 0.01,
            guardrails: serde_json::Value::Null,
            open_time: 0,
            status: super::super::TradeStatus::Open,
            trailing_stop: TrailingPlan {
                enabled: true,
                breakeven_at_fraction: 0.5,
                activation_at_fraction: 0.6,
                activation_level: entry + (tp - entry) * 0.6,
                trailing_distance: 0.0008,
                step_distance: 0.0002,
            },
            signal: Default::default(),
            broker: "mt5".to_string(),
            broker_order: None,
            broker_route: None,
            execution: Default::default(),
            moved_to_breakeven: false,
            last_broker_modify_at: 0,
            last_broker_stop_loss_sent: None,
            manual_close_acknowledged: false,
            current_price: entry,
            current_pnl: 0.0,
            close_price: None,
            close_time: None,
            close_reason: None,
            final_pnl: None,
        }
    }

    fn supervisor_with_quote(price: f64, trade: Trade) -> (Arc<TradeSupervisor>, Arc<ExecutionEngine>) {
        let config = Arc::new(RwLock::new(EngineConfig::default()));
        let bus = Arc::new(BroadcastBus::new());
        let bridge = Arc::new(MarketDataBridge::new(&config.read(), bus.clone()));
        let now = Utc::now().timestamp_millis();
        bridge
            .record_quotes(
                "mt5",
                vec![crate::bridge::Quote {
                    broker: String::new(),
                    symbol: trade.pair.clone(),
                    bid: price - 0.00005,
                    ask: price + 0.00005,
                    last: None,
                    digits: 5,
                    point: 0.00001,
                    spread_points: 10.0,
                    volume: None,
                    liquidity_hint: None,
                    timestamp: now,
                    received_at: now,
                }],
                now,
            )
            .unwrap();

        let risk = Arc::new(RiskEngine::new(
            config.read().risk.clone(),
            2.0,
            bus.clone(),
        ));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::new(TradeBook::new()),
            None,
            risk,
            bridge,
            Arc::new(MemorySink::new()),
            bus,
            config,
        ));
        engine.book.insert(trade);
        (Arc::new(TradeSupervisor::new(engine.clone())), engine)
    }

    #[tokio::test]
    async fn stop_loss_hit_closes_trade() {
        let trade = open_trade("EURUSD", 1.0850, 1.0835, 1.0895);
        let (supervisor, engine) = supervisor_with_quote(1.0830, trade);
        supervisor.manage_active_trades().await;
        assert_eq!(engine.book.open_count(), 0);
        let closed = &engine.book.recent_closed(1)[0];
        assert_eq!(closed.close_reason.as_deref(), Some("stop_loss"));
        assert!(closed.final_pnl.unwrap() < 0.0);
    }

    #[tokio::test]
    async fn take_profit_hit_closes_trade() {
        let trade = open_trade("EURUSD", 1.0850, 1.0835, 1.0895);
        let (supervisor, engine) = supervisor_with_quote(1.0899, trade);
        supervisor.manage_active_trades().await;
        assert_eq!(engine.book.open_count(), 0);
        let closed = &engine.book.recent_closed(1)[0];
        assert_eq!(closed.close_reason.as_deref(), Some("take_profit"));
        assert!(closed.final_pnl.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn breakeven_moves_after_half_target() {
        let trade = open_trade("EURUSD", 1.0850, 1.0835, 1.0890);
        let id = trade.id.clone();
        // 55% of the way to target.
        let (supervisor, engine) = supervisor_with_quote(1.0872, trade);
        supervisor.manage_active_trades().await;
        let updated = engine.book.get(&id).unwrap();
        assert!(updated.moved_to_breakeven);
        assert!((updated.stop_loss - 1.0850).abs() < 1e-9);
        assert_eq!(engine.book.open_count(), 1);
    }

    #[tokio::test]
    async fn trailing_advances_past_activation() {
        let trade = open_trade("EURUSD", 1.0850, 1.0835, 1.0890);
        let id = trade.id.clone();
        // 80% of the way to target: trailing active.
        let (supervisor, engine) = supervisor_with_quote(1.0882, trade);
        supervisor.manage_active_trades().await;
        let updated = engine.book.get(&id).unwrap();
        // SL trails price - trailing_distance, well above breakeven.
        assert!(updated.stop_loss > 1.0850);
        assert!((updated.stop_loss - (1.0882 - 0.0008)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn quiet_market_leaves_trade_untouched() {
        let trade = open_trade("EURUSD", 1.0850, 1.0835, 1.0890);
        let id = trade.id.clone();
        let (supervisor, engine) = supervisor_with_quote(1.0855, trade);
        supervisor.manage_active_trades().await;
        let updated = engine.book.get(&id).unwrap();
        assert!(!updated.moved_to_breakeven);
        assert!((updated.stop_loss - 1.0835).abs() < 1e-9);
        assert!(updated.current_pnl > 0.0);
    }

    #[tokio::test]
    async fn news_blackout_exits_profitable_trade() {
        let trade = open_trade("EURUSD", 1.0850, 1.0835, 1.0999);
        // Deep in profit (~0.5%) but far from both SL and TP.
        let (supervisor, engine) = supervisor_with_quote(1.0905, trade);
        let now = Utc::now().timestamp_millis();
        engine.bridge().snapshots.record_news(
            "mt5",
            vec![crate::bridge::NewsEvent {
                id: String::new(),
                title: "FOMC".to_string(),
                currencies: vec!["USD".to_string()],
                impact: 5,
                scheduled_at: Some(now + 10 * 60_000),
                published_at: now,
                relevance: 1.0,
            }],
        );
        supervisor.manage_active_trades().await;
        assert_eq!(engine.book.open_count(), 0);
        let closed = &engine.book.recent_closed(1)[0];
        assert_eq!(closed.close_reason.as_deref(), Some("smart_exit_news"));
    }
}
