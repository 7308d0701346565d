// =============================================================================
// Orchestration Coordinator — generate_signal
// =============================================================================
//
// Builds a signal for one pair by composing the analyzers (or the EA-only /
// EA-hybrid paths), assessing data quality, sizing risk, running the decision
// gate, and stamping the validity lifecycle. Each step produces a new signal
// state; the final object is the one broadcast and persisted.
//
// Any thrown condition is classified and a neutral fallback signal is
// returned with the classified message in `is_valid.reason`.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::analyzers::{
    analyze_candles, BridgeTechnicalAnalyzer, CandleReport, EconomicAnalyzer, EconomicReport,
    NewsAnalyzer, NewsReport, TechnicalReport,
};
use crate::bridge::MarketDataBridge;
use crate::broadcast::{BroadcastBus, EngineEvent};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::gate::{DecisionGate, GateInputs};
use crate::pairs::PairInfo;
use crate::quality::{QualityGuard, QualityReport};
use crate::risk::{RiskEngine, TradeView};
use crate::types::{DecisionState, Direction, Timeframe, VolatilityState};

use super::validity::stamp_validity;
use super::{
    EaQuoteInfo, Entry, MarketDataComponent, RawSignal, SignalComponents, SpreadVerdict,
    TrailingPlan, Validity,
};

/// Which analysis path to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    #[default]
    Full,
    /// EA bars/snapshot only; macro analyzers skipped.
    Ea,
    /// EA market data plus full macro and news analysis.
    EaHybrid,
}

impl AnalysisMode {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "ea" => Self::Ea,
            "ea_hybrid" => Self::EaHybrid,
            _ => Self::Full,
        }
    }

    pub fn ea_sourced(&self) -> bool {
        matches!(self, Self::Ea | Self::EaHybrid)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub broker: Option<String>,
    pub analysis_mode: AnalysisMode,
    pub data_quality_ttl_ms: Option<i64>,
}

pub struct SignalOrchestrator {
    bridge: Arc<MarketDataBridge>,
    quality: Arc<QualityGuard>,
    gate: Arc<DecisionGate>,
    risk: Arc<RiskEngine>,
    economic: Arc<dyn EconomicAnalyzer>,
    news: Arc<dyn NewsAnalyzer>,
    technical: Arc<BridgeTechnicalAnalyzer>,
    trades: Arc<dyn TradeView>,
    config: Arc<RwLock<EngineConfig>>,
    bus: Arc<BroadcastBus>,
}

impl SignalOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bridge: Arc<MarketDataBridge>,
        quality: Arc<QualityGuard>,
        gate: Arc<DecisionGate>,
        risk: Arc<RiskEngine>,
        economic: Arc<dyn EconomicAnalyzer>,
        news: Arc<dyn NewsAnalyzer>,
        technical: Arc<BridgeTechnicalAnalyzer>,
        trades: Arc<dyn TradeView>,
        config: Arc<RwLock<EngineConfig>>,
        bus: Arc<BroadcastBus>,
    ) -> Self {
        Self {
            bridge,
            quality,
            gate,
            risk,
            economic,
            news,
            technical,
            trades,
            config,
            bus,
        }
    }

    /// Generate a signal for `pair`. Never fails: error paths produce a
    /// neutral fallback signal carrying the classified reason.
    pub async fn generate_signal(&self, pair: &str, opts: &GenerateOptions) -> RawSignal {
        let now_ms = Utc::now().timestamp_millis();
        match self.try_generate(pair, opts, now_ms).await {
            Ok(signal) => {
                self.bus.publish(EngineEvent::SignalPublished {
                    broker: opts.broker.clone().unwrap_or_default(),
                    pair: signal.pair.clone(),
                    state: signal
                        .decision
                        .as_ref()
                        .map(|d| d.state.to_string())
                        .unwrap_or_default(),
                    score: signal.decision_score(),
                });
                signal
            }
            Err(err) => {
                warn!(pair = %pair, error = %err, class = err.class(), "signal generation failed");
                self.neutral_fallback(pair, &err, now_ms)
            }
        }
    }

    async fn try_generate(
        &self,
        pair: &str,
        opts: &GenerateOptions,
        now_ms: i64,
    ) -> Result<RawSignal, EngineError> {
        let pair_info = crate::pairs::lookup(pair);
        let config = self.config.read().clone();
        let broker = opts
            .broker
            .clone()
            .unwrap_or_else(|| "mt5".to_string());

        // 1. External market context: freshest quote (any broker fallback).
        let quote = self.bridge.freshest_quote(&broker, &pair_info.pair);
        let snapshot = self.bridge.snapshots.latest(&broker, &pair_info.pair);

        // 2. Analysis paths.
        let (economic, news, technical) = match opts.analysis_mode {
            AnalysisMode::Ea => {
                let technical = self.technical_or_scaffold(&broker, &pair_info, &quote, now_ms);
                (EconomicReport::neutral(), NewsReport::neutral(), technical)
            }
            AnalysisMode::EaHybrid => {
                let technical = self.technical_or_scaffold(&broker, &pair_info, &quote, now_ms);
                let (economic, news) = tokio::join!(
                    self.economic.analyze(&broker, &pair_info, now_ms),
                    self.news.analyze(&broker, &pair_info, now_ms),
                );
                (
                    economic.unwrap_or_else(|_| EconomicReport::neutral()),
                    news.unwrap_or_else(|_| NewsReport::neutral()),
                    technical,
                )
            }
            AnalysisMode::Full => {
                let (economic, news, technical) = tokio::join!(
                    self.economic.analyze(&broker, &pair_info, now_ms),
                    self.news.analyze(&broker, &pair_info, now_ms),
                    self.technical.analyze_boxed(&broker, &pair_info, now_ms),
                );
                // Analyzer failures degrade to neutral placeholders; the
                // corresponding gate layers fall to SKIP/FAIL downstream.
                (
                    economic.unwrap_or_else(|_| EconomicReport::neutral()),
                    news.unwrap_or_else(|_| NewsReport::neutral()),
                    technical.unwrap_or_else(|_| {
                        TechnicalReport::neutral_scaffold(
                            quote.as_ref().map(|q| q.mid()).unwrap_or(0.0),
                        )
                    }),
                )
            }
        };

        // Candle analysis over the M15 window.
        let m15_bars =
            self.bridge
                .bars
                .recent_closed(&broker, &pair_info.pair, Timeframe::M15, 80);
        let candles = if m15_bars.len() >= 8 {
            Some(analyze_candles(&m15_bars))
        } else {
            None
        };

        // 3. Market price.
        let market_price = if technical.latest_price > 0.0 {
            technical.latest_price
        } else {
            quote.as_ref().map(|q| q.mid()).unwrap_or(0.0)
        };
        if market_price <= 0.0 {
            return Err(EngineError::Provider(format!(
                "no market price available for {pair}"
            )));
        }

        // 4. Data quality.
        let quality = if opts.analysis_mode.ea_sourced() {
            let tag = match opts.analysis_mode {
                AnalysisMode::Ea => "mode_ea",
                _ => "mode_ea_hybrid",
            };
            self.quality.synthetic_report(&pair_info.pair, tag, now_ms)
        } else {
            self.quality.assess(
                &broker,
                &pair_info,
                config.ea.allow_synthetic_data && technical.synthetic,
                opts.data_quality_ttl_ms,
                now_ms,
            )
        };

        // 5. Combine into the raw signal.
        let mut signal = self.combine(
            &pair_info,
            &config,
            economic,
            news,
            technical,
            candles.clone(),
            market_price,
            now_ms,
        );

        // 6. EA quote details and spread classification.
        let spread_pips = quote.as_ref().map(|q| q.spread_pips(pair_info.pip_size));
        if let Some(q) = &quote {
            let spread = q.spread_pips(pair_info.pip_size);
            signal.components.market_data = MarketDataComponent {
                spread_pips: Some(spread),
                spread_status: Some(if spread > config.gate.max_spread_pips {
                    SpreadVerdict::Critical
                } else if spread > config.gate.max_spread_pips * 0.7 {
                    SpreadVerdict::Elevated
                } else {
                    SpreadVerdict::Normal
                }),
                ea_quote: Some(EaQuoteInfo {
                    broker: q.broker.clone(),
                    bid: q.bid,
                    ask: q.ask,
                    mid: q.mid(),
                    age_ms: q.age_ms(now_ms),
                }),
            };
        }

        // 7. Risk sizing, then the decision gate.
        let open_trades = self.trades.open_summaries();
        let account_balance = self
            .bridge
            .sessions
            .latest_session(&broker)
            .map(|s| if s.equity > 0.0 { s.equity } else { s.balance })
            .filter(|b| *b > 0.0)
            .unwrap_or(10_000.0);
        if signal.direction.is_tradeable() && signal.entry.is_some() {
            let rm = self.risk.calculate_risk_management(
                &signal,
                &pair_info,
                account_balance,
                &open_trades,
                now_ms,
            );
            signal.risk_management = Some(rm);
        }

        let upcoming_events = self.bridge.snapshots.upcoming_events(
            &broker,
            &pair_info.base,
            &pair_info.quote,
            now_ms,
            8 * 3_600_000,
            1,
        );
        let last_high_impact_release_ms = self
            .bridge
            .snapshots
            .news(&broker)
            .iter()
            .filter(|e| e.impact >= config.gate.news_blackout_impact_threshold)
            .filter_map(|e| e.scheduled_at)
            .filter(|&at| at <= now_ms)
            .max();

        let correlation_blocked = self
            .risk
            .command_snapshot()
            .map(|snapshot| snapshot.correlation.blocked);

        let validation = {
            let inputs = GateInputs {
                signal: &signal,
                pair: &pair_info,
                config: &config,
                profile: crate::gate::profile::select(
                    pair_info.asset_class,
                    config.gate.profile,
                ),
                quality: &quality,
                snapshot: snapshot.as_ref(),
                quote_age_ms: quote.as_ref().map(|q| q.age_ms(now_ms)),
                spread_pips,
                open_trade_count: self.trades.open_count(),
                upcoming_events: &upcoming_events,
                last_high_impact_release_ms,
                m15_bars: &m15_bars,
                candles: candles.as_ref(),
                velocity: self.bridge.quotes.velocity(&broker, &pair_info.pair, 60_000),
                spread_expansion: self
                    .bridge
                    .quotes
                    .spread_expansion(&broker, &pair_info.pair),
                liquidity_hint: quote.as_ref().and_then(|q| q.liquidity_hint),
                correlation_blocked,
                ea_only: opts.analysis_mode == AnalysisMode::Ea,
                now_ms,
            };
            self.gate.validate(&inputs)
        };

        signal.is_valid = Validity {
            is_valid: validation.is_valid,
            reason: validation.reason.clone(),
        };
        let state = validation.decision.state;
        let blocked = validation.decision.blocked;
        signal.push_reason(validation.reason.clone());
        signal.decision = Some(validation.decision);

        if blocked {
            signal.coerce_neutral("blocked by decision gate");
        }

        // 8. Secondary filters: either may downgrade ENTER, never upgrade.
        let mut state = state;
        if state == DecisionState::Enter {
            if let Some(downgrade_reason) = self.secondary_filters(&signal, &quality, &m15_bars) {
                state = DecisionState::WaitMonitor;
                if let Some(decision) = signal.decision.as_mut() {
                    decision.state = DecisionState::WaitMonitor;
                    decision.category = "secondary_filter".to_string();
                }
                signal.is_valid.is_valid = false;
                signal.push_reason(downgrade_reason);
            }
        }

        // 9. Validity lifecycle.
        let primary = if opts.analysis_mode == AnalysisMode::Ea {
            Timeframe::M15
        } else {
            Timeframe::H1
        };
        let stamp = stamp_validity(
            &config.validity,
            primary,
            Some(state),
            signal.direction,
            signal.is_valid.is_valid,
            now_ms,
        );
        signal.expires_at = Some(stamp.expires_at);
        signal.signal_status = stamp.status;

        debug!(
            pair = %pair_info.pair,
            state = %state,
            status = %signal.signal_status,
            expires_in_ms = stamp.ttl_ms,
            "signal generated"
        );

        Ok(signal)
    }

    fn technical_or_scaffold(
        &self,
        broker: &str,
        pair: &PairInfo,
        quote: &Option<crate::bridge::Quote>,
        now_ms: i64,
    ) -> TechnicalReport {
        match self.technical.build_report(broker, pair, now_ms) {
            Ok(report) => report,
            Err(_) => {
                let price = quote.as_ref().map(|q| q.mid()).unwrap_or(0.0);
                TechnicalReport::neutral_scaffold(price)
            }
        }
    }

    /// Fold the analyzer reports into direction/strength/confidence and an
    /// entry plan.
    #[allow(clippy::too_many_arguments)]
    fn combine(
        &self,
        pair: &PairInfo,
        config: &EngineConfig,
        economic: EconomicReport,
        news: NewsReport,
        technical: TechnicalReport,
        candles: Option<CandleReport>,
        market_price: f64,
        now_ms: i64,
    ) -> RawSignal {
        let direction = technical.direction;

        let candle_momentum = candles.as_ref().map(|c| c.momentum).unwrap_or(0.0);
        let mut strength =
            (technical.score.abs() * 0.8 + candle_momentum.abs() * 20.0).clamp(0.0, 100.0);

        let mut confidence = 40.0f64;
        if let Some(c) = &candles {
            if c.direction_vote == direction && direction.is_tradeable() {
                confidence += 15.0;
            }
        }
        if direction.is_tradeable() {
            let dir_sign = direction.sign();
            if news.sentiment * dir_sign > 0.1 {
                confidence += 10.0;
            }
            if economic.bias == direction {
                confidence += 10.0;
            }
            if technical.score.abs() > 35.0 {
                confidence += 10.0;
            }
        }
        confidence = confidence.clamp(0.0, 100.0);

        let entry = if direction.is_tradeable() && technical.atr > 0.0 && market_price > 0.0 {
            Some(self.build_entry(pair, config, &technical, direction, market_price))
        } else {
            None
        };

        if !direction.is_tradeable() {
            strength = 0.0;
        }
        let final_score = if direction.is_tradeable() {
            (strength * 0.45 + confidence * 0.55).clamp(0.0, 100.0)
        } else {
            0.0
        };
        let estimated_win_rate = (45.0 + confidence * 0.2 + strength * 0.1).clamp(0.0, 100.0);

        let trade_plan = match &entry {
            Some(e) => format!(
                "{direction} {pair} @ {:.prec$} SL {:.prec$} TP {:.prec$} (RR {:.2})",
                e.price,
                e.stop_loss,
                e.take_profit,
                e.risk_reward,
                pair = pair.pair,
                prec = pair.price_precision as usize,
            ),
            None => format!("No trade plan for {}", pair.pair),
        };

        let mut signal = RawSignal {
            pair: pair.pair.clone(),
            timestamp: now_ms,
            direction,
            strength,
            confidence,
            final_score,
            components: SignalComponents {
                economic,
                news,
                technical,
                candles,
                market_data: MarketDataComponent::default(),
            },
            entry,
            risk_management: None,
            is_valid: Validity {
                is_valid: false,
                reason: String::new(),
            },
            decision: None,
            expires_at: None,
            signal_status: crate::types::SignalStatus::Pending,
            reasoning: Vec::new(),
            trade_plan,
            estimated_win_rate,
        };
        signal.push_reason(format!(
            "technical score {:+.0}, candle momentum {:+.2}",
            signal.components.technical.score, candle_momentum
        ));
        signal
    }

    fn build_entry(
        &self,
        pair: &PairInfo,
        config: &EngineConfig,
        technical: &TechnicalReport,
        direction: Direction,
        price: f64,
    ) -> Entry {
        // Stop distance widens with the volatility state; target keeps a
        // fixed reward multiple over the stop.
        let stop_multiple = match technical.volatility_state {
            VolatilityState::Calm => 1.3,
            VolatilityState::Normal => 1.5,
            VolatilityState::Volatile => 1.8,
            VolatilityState::Extreme => 2.2,
        };
        let rr_target = if pair.asset_class == crate::types::AssetClass::Crypto {
            2.4
        } else {
            2.2
        };
        let take_profit_multiple = stop_multiple * rr_target;

        let stop_distance = technical.atr * stop_multiple;
        let tp_distance = technical.atr * take_profit_multiple;

        let (stop_loss, take_profit) = match direction {
            Direction::Buy => (price - stop_distance, price + tp_distance),
            _ => (price + stop_distance, price - tp_distance),
        };

        let tp_pips = pair.to_pips(tp_distance);
        let activation_at_fraction = 0.6;
        let activation_level = match direction {
            Direction::Buy => price + tp_distance * activation_at_fraction,
            _ => price - tp_distance * activation_at_fraction,
        };

        Entry {
            price,
            direction,
            stop_loss,
            take_profit,
            atr: technical.atr,
            risk_reward: rr_target,
            stop_multiple,
            take_profit_multiple,
            volatility_state: technical.volatility_state,
            stop_loss_pips: pair.to_pips(stop_distance),
            take_profit_pips: tp_pips,
            trailing_stop: TrailingPlan {
                enabled: config.ea.dynamic_trailing_enabled,
                breakeven_at_fraction: 0.5,
                activation_at_fraction,
                activation_level,
                trailing_distance: technical.atr * 0.9,
                step_distance: technical.atr * 0.25,
            },
        }
    }

    /// Live backtest validator + advanced signal filter. Returns a downgrade
    /// reason when either demands caution.
    fn secondary_filters(
        &self,
        signal: &RawSignal,
        quality: &QualityReport,
        m15_bars: &[crate::bridge::Bar],
    ) -> Option<String> {
        // Backtest validator: directional persistence over the recent window
        // must not contradict the signal outright.
        if m15_bars.len() >= 20 && signal.direction.is_tradeable() {
            let tail = &m15_bars[m15_bars.len() - 20..];
            let with_dir = tail
                .iter()
                .filter(|b| match signal.direction {
                    Direction::Buy => b.close > b.open,
                    Direction::Sell => b.close < b.open,
                    Direction::Neutral => false,
                })
                .count() as f64
                / tail.len() as f64;
            if with_dir < 0.30 {
                return Some(format!(
                    "backtest validator: only {:.0}% of recent bars support {}",
                    with_dir * 100.0,
                    signal.direction
                ));
            }
        }

        // Advanced filter: the quality guard's confidence floor binds.
        if let Some(floor) = quality.confidence_floor {
            if signal.confidence < floor {
                return Some(format!(
                    "advanced filter: confidence {:.0} below quality floor {floor:.0}",
                    signal.confidence
                ));
            }
        }

        None
    }

    /// Neutral fallback signal for failed generations.
    pub fn neutral_fallback(&self, pair: &str, err: &EngineError, now_ms: i64) -> RawSignal {
        let pair_info = crate::pairs::lookup(pair);
        let config = self.config.read();
        let stamp = stamp_validity(
            &config.validity,
            Timeframe::H1,
            None,
            Direction::Neutral,
            false,
            now_ms,
        );
        RawSignal {
            pair: pair_info.pair,
            timestamp: now_ms,
            direction: Direction::Neutral,
            strength: 0.0,
            confidence: 0.0,
            final_score: 0.0,
            components: SignalComponents {
                economic: EconomicReport::neutral(),
                news: NewsReport::neutral(),
                technical: TechnicalReport::neutral_scaffold(0.0),
                candles: None,
                market_data: MarketDataComponent::default(),
            },
            entry: None,
            risk_management: None,
            is_valid: Validity {
                is_valid: false,
                reason: format!("{}: {err}", err.class()),
            },
            decision: None,
            expires_at: Some(stamp.expires_at),
            signal_status: crate::types::SignalStatus::Neutral,
            reasoning: vec![format!("fallback: {err}")],
            trade_plan: String::new(),
            estimated_win_rate: 0.0,
        }
    }
}

// `TechnicalAnalyzer::analyze` via the concrete type, kept monomorphic for
// the EA path which also needs `build_report` directly.
impl BridgeTechnicalAnalyzer {
    async fn analyze_boxed(
        &self,
        broker: &str,
        pair: &PairInfo,
        now_ms: i64,
    ) -> Result<TechnicalReport, EngineError> {
        self.build_report(broker, pair, now_ms)
    }
}
