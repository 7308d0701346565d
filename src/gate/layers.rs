// =============================================================================
// Confluence layer table
// =============================================================================
//
// The ordered, declarative layer list driving both the confluence score and
// the decision rationale. Each layer maps validated gate inputs to
// {status, reason, metrics}; layers never throw and never mutate. Adding or
// removing a layer is a data change here, not a control-flow edit in the
// gate.
//
// Layer id prefixes:
//   htf_   — higher-timeframe context     (advisory in advisory mode)
//   smart_ — behavioral/execution filters (advisory in advisory mode)
//   smc_   — liquidity/structure zones    (advisory in advisory mode)
// Everything else always counts.
// =============================================================================

use serde::Serialize;
use serde_json::json;

use crate::types::{Direction, LayerStatus, Timeframe};

use super::profile::dynamic_rr_floor;
use super::GateInputs;

/// Number of leading table entries forming the L1..L18 readiness set.
pub const READINESS_COUNT: usize = 18;

/// Result of evaluating one layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerResult {
    pub id: &'static str,
    pub label: &'static str,
    pub category: &'static str,
    pub weight: f64,
    pub status: LayerStatus,
    pub reason: String,
    pub metrics: serde_json::Value,
}

pub struct LayerOutcome {
    pub status: LayerStatus,
    pub reason: String,
    pub metrics: serde_json::Value,
}

fn pass(reason: impl Into<String>, metrics: serde_json::Value) -> LayerOutcome {
    LayerOutcome {
        status: LayerStatus::Pass,
        reason: reason.into(),
        metrics,
    }
}

fn fail(reason: impl Into<String>, metrics: serde_json::Value) -> LayerOutcome {
    LayerOutcome {
        status: LayerStatus::Fail,
        reason: reason.into(),
        metrics,
    }
}

fn skip(reason: impl Into<String>) -> LayerOutcome {
    LayerOutcome {
        status: LayerStatus::Skip,
        reason: reason.into(),
        metrics: serde_json::Value::Null,
    }
}

/// One entry of the declarative table.
pub struct Layer {
    pub id: &'static str,
    pub label: &'static str,
    pub weight: f64,
    pub category: &'static str,
    /// FAIL downgrades ENTER to WAIT_MONITOR regardless of score.
    pub hard_fail: bool,
    /// FAIL joins the strict-mode kill-switch union.
    pub kill_switch: bool,
    pub eval: fn(&GateInputs) -> LayerOutcome,
}

/// Whether FAILs on this layer are advisory (treated as SKIP for scoring in
/// advisory mode).
pub fn is_advisory(id: &str) -> bool {
    id.starts_with("smart_") || id.starts_with("smc_") || id.starts_with("htf_")
}

// =============================================================================
// Evaluators
// =============================================================================

fn tf_alignment(inputs: &GateInputs, tf: Timeframe) -> LayerOutcome {
    let dir = inputs.signal.direction;
    if !dir.is_tradeable() {
        return skip("neutral signal");
    }
    match inputs.tf_direction(tf) {
        Some(htf) if htf == dir => pass(
            format!("{tf} aligned with {dir}"),
            json!({ "timeframe": tf.to_string(), "direction": htf }),
        ),
        Some(htf) => fail(
            format!("{tf} direction {htf} opposes {dir}"),
            json!({ "timeframe": tf.to_string(), "direction": htf }),
        ),
        None => skip(format!("no {tf} direction available")),
    }
}

fn eval_htf_h4(inputs: &GateInputs) -> LayerOutcome {
    tf_alignment(inputs, Timeframe::H4)
}

fn eval_htf_d1(inputs: &GateInputs) -> LayerOutcome {
    tf_alignment(inputs, Timeframe::D1)
}

fn eval_htf_w1(inputs: &GateInputs) -> LayerOutcome {
    tf_alignment(inputs, Timeframe::W1)
}

fn eval_d1_rsi_lock(inputs: &GateInputs) -> LayerOutcome {
    let Some(rsi) = inputs.rsi(Timeframe::D1) else {
        return skip("no D1 RSI");
    };
    match inputs.signal.direction {
        Direction::Buy if rsi > 72.0 => {
            fail(format!("D1 RSI {rsi:.1} locked overbought"), json!({ "rsi": rsi }))
        }
        Direction::Sell if rsi < 28.0 => {
            fail(format!("D1 RSI {rsi:.1} locked oversold"), json!({ "rsi": rsi }))
        }
        Direction::Neutral => skip("neutral signal"),
        _ => pass(format!("D1 RSI {rsi:.1} unlocked"), json!({ "rsi": rsi })),
    }
}

fn eval_d1_macd_lock(inputs: &GateInputs) -> LayerOutcome {
    let Some(hist) = inputs.macd_hist(Timeframe::D1) else {
        return skip("no D1 MACD");
    };
    let eps = inputs.config.gate.macd_flat_eps;
    if hist.abs() <= eps {
        return skip(format!("D1 MACD flat ({hist:+.6})"));
    }
    let aligned = hist.signum() == inputs.signal.direction.sign().signum()
        && inputs.signal.direction.is_tradeable();
    if aligned {
        pass(format!("D1 MACD {hist:+.6} aligned"), json!({ "histogram": hist }))
    } else if inputs.signal.direction.is_tradeable() {
        fail(format!("D1 MACD {hist:+.6} opposes"), json!({ "histogram": hist }))
    } else {
        skip("neutral signal")
    }
}

fn eval_htf_rsi_rule(inputs: &GateInputs) -> LayerOutcome {
    let h4 = inputs.rsi(Timeframe::H4);
    let d1 = inputs.rsi(Timeframe::D1);
    if h4.is_none() && d1.is_none() {
        return skip("no HTF RSI");
    }
    let hot = |rsi: Option<f64>| rsi.map(|r| r > 70.0).unwrap_or(false);
    let cold = |rsi: Option<f64>| rsi.map(|r| r < 30.0).unwrap_or(false);
    match inputs.signal.direction {
        Direction::Buy if hot(h4) || hot(d1) => fail(
            "BUY with H4/D1 RSI above 70",
            json!({ "h4": h4, "d1": d1 }),
        ),
        Direction::Sell if cold(h4) || cold(d1) => fail(
            "SELL with H4/D1 RSI below 30",
            json!({ "h4": h4, "d1": d1 }),
        ),
        Direction::Neutral => skip("neutral signal"),
        _ => pass("HTF RSI headroom", json!({ "h4": h4, "d1": d1 })),
    }
}

fn location_layer(position: Option<f64>, dir: Direction, upper: f64, lower: f64, scope: &str) -> LayerOutcome {
    let Some(position) = position else {
        return skip(format!("no {scope} range"));
    };
    match dir {
        Direction::Buy if position > upper => fail(
            format!("BUY at {position:.2} of {scope} range (chasing)"),
            json!({ "position": position, "limit": upper }),
        ),
        Direction::Sell if position < lower => fail(
            format!("SELL at {position:.2} of {scope} range (chasing)"),
            json!({ "position": position, "limit": lower }),
        ),
        Direction::Neutral => skip("neutral signal"),
        _ => pass(
            format!("{scope} location {position:.2} acceptable"),
            json!({ "position": position }),
        ),
    }
}

fn eval_day_location(inputs: &GateInputs) -> LayerOutcome {
    location_layer(inputs.day_position(), inputs.signal.direction, 0.72, 0.28, "day")
}

fn eval_week_location(inputs: &GateInputs) -> LayerOutcome {
    location_layer(inputs.week_position(), inputs.signal.direction, 0.80, 0.20, "week")
}

fn eval_pivot_avoidance(inputs: &GateInputs) -> LayerOutcome {
    let (Some(pivots), price) = (inputs.pivots(), inputs.price()) else {
        return skip("no pivot levels");
    };
    let atr = inputs.signal.components.technical.atr;
    if atr <= 0.0 || price <= 0.0 {
        return skip("no ATR for pivot distance");
    }
    let distance = pivots.nearest_distance(price);
    if distance < atr * 0.25 {
        fail(
            format!("entry {distance:.5} from pivot (< 0.25 ATR)"),
            json!({ "distance": distance, "atr": atr }),
        )
    } else {
        pass("clear of pivot levels", json!({ "distance": distance, "atr": atr }))
    }
}

fn eval_decisive_candle(inputs: &GateInputs) -> LayerOutcome {
    let Some(candles) = inputs.candles else {
        return skip("no candle analysis");
    };
    if candles.decisive {
        pass(
            format!("decisive candle (body {:.0}%)", candles.latest_body_fraction * 100.0),
            json!({ "bodyFraction": candles.latest_body_fraction }),
        )
    } else {
        fail(
            format!("indecisive candle (body {:.0}%)", candles.latest_body_fraction * 100.0),
            json!({ "bodyFraction": candles.latest_body_fraction }),
        )
    }
}

fn eval_session_authority(inputs: &GateInputs) -> LayerOutcome {
    use crate::types::AssetClass;
    if inputs.pair.asset_class == AssetClass::Crypto {
        return skip("24/7 instrument");
    }
    if !inputs.config.gate.enforce_trading_windows && !inputs.config.ea.session_strict {
        return skip("session windows not enforced");
    }
    if inputs.in_trading_window() {
        pass(
            format!("inside session window (hour {})", inputs.utc_hour()),
            json!({ "hour": inputs.utc_hour() }),
        )
    } else {
        fail(
            format!("outside session windows (hour {})", inputs.utc_hour()),
            json!({ "hour": inputs.utc_hour() }),
        )
    }
}

fn eval_failure_cost(inputs: &GateInputs) -> LayerOutcome {
    let Some(entry) = inputs.signal.entry.as_ref() else {
        return skip("no entry plan");
    };
    let atr_pips = inputs.atr_pips();
    if atr_pips <= 0.0 {
        return skip("no ATR");
    }
    let ratio = entry.stop_loss_pips / atr_pips;
    let max = inputs.config.gate.max_sl_atr_ratio;
    if ratio <= max {
        pass(format!("SL/ATR {ratio:.2} within {max:.2}"), json!({ "ratio": ratio }))
    } else {
        fail(format!("SL/ATR {ratio:.2} exceeds {max:.2}"), json!({ "ratio": ratio }))
    }
}

fn eval_dynamic_rr_floor(inputs: &GateInputs) -> LayerOutcome {
    let Some(entry) = inputs.signal.entry.as_ref() else {
        return skip("no entry plan");
    };
    let floor = dynamic_rr_floor(
        &inputs.profile,
        inputs.pair.asset_class,
        inputs.signal.estimated_win_rate,
    );
    if entry.risk_reward >= floor {
        pass(
            format!("RR {:.2} above floor {floor:.2}", entry.risk_reward),
            json!({ "riskReward": entry.risk_reward, "floor": floor }),
        )
    } else {
        fail(
            format!("RR {:.2} below floor {floor:.2}", entry.risk_reward),
            json!({ "riskReward": entry.risk_reward, "floor": floor }),
        )
    }
}

fn eval_event_governor(inputs: &GateInputs) -> LayerOutcome {
    let gate = &inputs.config.gate;
    let pre_ms = gate.event_governor_pre_minutes * 60_000;
    let post_ms = gate.event_governor_post_minutes * 60_000;
    let threshold = gate.event_governor_impact_threshold;

    let offending = inputs.upcoming_events.iter().find(|e| {
        e.impact >= threshold
            && e.scheduled_at
                .map(|at| {
                    let delta = at - inputs.now_ms;
                    (-post_ms..=pre_ms).contains(&delta)
                })
                .unwrap_or(false)
    });
    match offending {
        Some(event) => fail(
            format!("event blackout: {}", event.title),
            json!({ "impact": event.impact, "scheduledAt": event.scheduled_at }),
        ),
        None => pass("no governed event in window", serde_json::Value::Null),
    }
}

/// Post-news realized regime: choppy when flips >= 4 and the realized range
/// reaches a quarter of the ATR floor.
fn eval_post_news_regime(inputs: &GateInputs) -> LayerOutcome {
    let window_ms = inputs.config.gate.post_news_regime_window_minutes * 60_000;
    let Some(release_ms) = inputs.last_high_impact_release_ms else {
        return skip("no recent high-impact release");
    };
    if inputs.now_ms - release_ms > window_ms {
        return skip("outside post-news window");
    }

    let since: Vec<_> = inputs
        .m15_bars
        .iter()
        .filter(|b| b.time >= release_ms)
        .collect();
    if since.len() < 2 {
        return skip("insufficient post-news bars");
    }

    let mut flips = 0u32;
    let mut last_sign = 0i8;
    for bar in &since {
        let sign = if bar.close > bar.open {
            1
        } else if bar.close < bar.open {
            -1
        } else {
            0
        };
        if sign != 0 && last_sign != 0 && sign != last_sign {
            flips += 1;
        }
        if sign != 0 {
            last_sign = sign;
        }
    }

    let high = since.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = since.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let range_pips = inputs.pair.to_pips(high - low);
    let atr_floor = inputs.atr_pips();

    let regime = if flips >= 4 && range_pips >= atr_floor * 0.25 {
        "choppy"
    } else if range_pips >= atr_floor * 1.2 && flips <= 2 {
        "expansion"
    } else {
        "mean_reversion"
    };
    let metrics = json!({ "flips": flips, "rangePips": range_pips, "regime": regime });

    if regime == "choppy" {
        fail(format!("post-news regime choppy ({flips} flips)"), metrics)
    } else {
        pass(format!("post-news regime {regime}"), metrics)
    }
}

fn eval_data_completeness(inputs: &GateInputs) -> LayerOutcome {
    let calendar = !inputs.upcoming_events.is_empty()
        || inputs.signal.components.economic.upcoming_events > 0;
    let headlines = inputs.signal.components.news.headline_count > 0;
    let technical = !inputs.signal.components.technical.synthetic;
    let quality = !inputs.quality.timeframe_reports.is_empty();

    let sources = [calendar, headlines, technical, quality]
        .iter()
        .filter(|&&b| b)
        .count();
    let metrics = json!({
        "calendar": calendar, "headlines": headlines,
        "technical": technical, "quality": quality,
    });
    if sources >= 2 {
        pass(format!("{sources}/4 context sources present"), metrics)
    } else {
        fail(format!("only {sources}/4 context sources present"), metrics)
    }
}

fn eval_correlation_guard(inputs: &GateInputs) -> LayerOutcome {
    match inputs.correlation_blocked {
        Some(true) => fail(
            "correlation cluster at capacity",
            serde_json::Value::Null,
        ),
        Some(false) => pass("correlation clusters stable", serde_json::Value::Null),
        None => skip("no correlation snapshot"),
    }
}

fn eval_liquidity_execution(inputs: &GateInputs) -> LayerOutcome {
    if let Some(hint) = inputs.liquidity_hint {
        if hint < 0.25 {
            return fail(format!("thin book (hint {hint:.2})"), json!({ "hint": hint }));
        }
    }
    if let Some(spread) = inputs.spread_pips {
        let limit = inputs.config.gate.max_spread_pips;
        if spread > limit * 0.9 {
            return fail(
                format!("spread {spread:.2} near limit {limit:.2}"),
                json!({ "spreadPips": spread }),
            );
        }
    }
    pass("liquidity and spread workable", serde_json::Value::Null)
}

/// Composite slippage risk: thin liquidity, near-limit spread, chaotic
/// volatility, price velocity, and news proximity each contribute.
fn eval_slippage_risk(inputs: &GateInputs) -> LayerOutcome {
    let mut risk = 0.0f64;

    if let Some(hint) = inputs.liquidity_hint {
        if hint < 0.4 {
            risk += 25.0;
        }
    }
    if let (Some(spread), limit) = (inputs.spread_pips, inputs.config.gate.max_spread_pips) {
        if spread > limit * 0.75 {
            risk += 20.0;
        }
    }
    if matches!(
        inputs.signal.components.technical.volatility_state,
        crate::types::VolatilityState::Extreme
    ) {
        risk += 25.0;
    }
    if let Some(velocity) = inputs.velocity {
        let atr = inputs.signal.components.technical.atr;
        // Velocity above one ATR per minute reads as a disorderly tape.
        if atr > 0.0 && velocity * 60.0 > atr {
            risk += 20.0;
        }
    }
    if !inputs.upcoming_events.is_empty() {
        risk += 10.0;
    }

    let metrics = json!({ "riskScore": risk });
    if risk >= 60.0 {
        fail(format!("slippage risk {risk:.0}/100"), metrics)
    } else {
        pass(format!("slippage risk {risk:.0}/100"), metrics)
    }
}

fn eval_quote_integrity(inputs: &GateInputs) -> LayerOutcome {
    let Some(age) = inputs.quote_age_ms else {
        return fail("no quote available", serde_json::Value::Null);
    };
    if age > 60_000 {
        return fail(format!("quote stale ({age} ms)"), json!({ "ageMs": age }));
    }
    if let Some(expansion) = inputs.spread_expansion {
        if expansion > 3.0 {
            return fail(
                format!("spread expanded {expansion:.1}x vs average"),
                json!({ "expansion": expansion }),
            );
        }
    }
    pass("quote fresh and coherent", json!({ "ageMs": age }))
}

fn eval_distribution_filter(inputs: &GateInputs) -> LayerOutcome {
    let Some(position) = inputs.day_position() else {
        return skip("no day range");
    };
    let rsi = inputs.rsi(Timeframe::H1).unwrap_or(50.0);
    match inputs.signal.direction {
        Direction::Buy if position > 0.85 && rsi >= 70.0 => fail(
            "buying into distribution (top of range, hot RSI)",
            json!({ "position": position, "rsi": rsi }),
        ),
        Direction::Sell if position < 0.15 && rsi <= 30.0 => fail(
            "selling into accumulation (bottom of range, cold RSI)",
            json!({ "position": position, "rsi": rsi }),
        ),
        Direction::Neutral => skip("neutral signal"),
        _ => pass("no distribution pattern", json!({ "position": position })),
    }
}

fn eval_false_continuation(inputs: &GateInputs) -> LayerOutcome {
    let Some(candles) = inputs.candles else {
        return skip("no candle analysis");
    };
    let rsi = inputs.rsi(Timeframe::H1);
    let opposing_extreme = match inputs.signal.direction {
        Direction::Buy => rsi.map(|r| r >= 78.0).unwrap_or(false),
        Direction::Sell => rsi.map(|r| r <= 22.0).unwrap_or(false),
        Direction::Neutral => false,
    };
    let trending = candles.structure_score >= 0.5;
    let weak_follow = candles.follow_through < 0.45;

    if trending && weak_follow && opposing_extreme {
        fail(
            "trend continuation unsupported (weak follow-through + opposing extreme)",
            json!({
                "structure": candles.structure_score,
                "followThrough": candles.follow_through,
            }),
        )
    } else {
        pass(
            "no false-continuation pattern",
            json!({ "followThrough": candles.follow_through }),
        )
    }
}

fn eval_execution_edge(inputs: &GateInputs) -> LayerOutcome {
    let Some(entry) = inputs.signal.entry.as_ref() else {
        return skip("no entry plan");
    };
    let p = (inputs.signal.estimated_win_rate / 100.0).clamp(0.01, 0.99);
    let expectancy = p * entry.risk_reward - (1.0 - p);
    let metrics = json!({ "expectancy": expectancy, "p": p, "rr": entry.risk_reward });
    if expectancy > 0.05 {
        pass(format!("expectancy {expectancy:+.2}R"), metrics)
    } else {
        fail(format!("expectancy {expectancy:+.2}R too thin"), metrics)
    }
}

fn eval_structure_cleanliness(inputs: &GateInputs) -> LayerOutcome {
    let Some(candles) = inputs.candles else {
        return skip("no candle analysis");
    };
    let metrics = json!({ "structure": candles.structure_score });
    if candles.structure_score >= 0.45 {
        pass(
            format!("structure {:.2} clean", candles.structure_score),
            metrics,
        )
    } else {
        fail(
            format!("structure {:.2} messy", candles.structure_score),
            metrics,
        )
    }
}

fn eval_volatility_tradeability(inputs: &GateInputs) -> LayerOutcome {
    let tech = &inputs.signal.components.technical;
    if tech.atr_pips <= 0.0 {
        return skip("no ATR");
    }
    let metrics = json!({ "state": tech.volatility_state.to_string(), "atrPips": tech.atr_pips });
    if matches!(tech.volatility_state, crate::types::VolatilityState::Extreme) {
        fail("extreme volatility untradeable", metrics)
    } else {
        pass(format!("volatility {} tradeable", tech.volatility_state), metrics)
    }
}

fn eval_volume_confirmation(inputs: &GateInputs) -> LayerOutcome {
    let volumes: Vec<f64> = inputs
        .m15_bars
        .iter()
        .filter_map(|b| b.volume)
        .collect();
    if volumes.len() < 10 {
        return skip("insufficient volume data");
    }
    let latest = *volumes.last().expect("checked non-empty");
    let avg: f64 = volumes[..volumes.len() - 1].iter().sum::<f64>()
        / (volumes.len() - 1) as f64;
    let metrics = json!({ "latest": latest, "average": avg });
    if avg > 0.0 && latest >= 1.3 * avg {
        pass(format!("volume spike {:.1}x", latest / avg), metrics)
    } else {
        fail("no volume confirmation", metrics)
    }
}

fn eval_liquidity_sweep(inputs: &GateInputs) -> LayerOutcome {
    let bars = inputs.m15_bars;
    if bars.len() < 12 {
        return skip("insufficient bars for sweep detection");
    }
    let buffer = inputs
        .pair
        .from_pips(inputs.config.gate.sweep_accept_buffer_pips);
    let (history, tail) = bars.split_at(bars.len() - 3);
    let follow_ok = inputs
        .candles
        .map(|c| c.follow_through >= 0.55)
        .unwrap_or(false);

    let outcome = match inputs.signal.direction {
        Direction::Buy => {
            let prior_low = history.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            let swept = tail.iter().any(|b| b.low < prior_low);
            let accepted = tail.last().map(|b| b.close > prior_low + buffer).unwrap_or(false);
            (swept && accepted, prior_low)
        }
        Direction::Sell => {
            let prior_high = history.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let swept = tail.iter().any(|b| b.high > prior_high);
            let accepted = tail.last().map(|b| b.close < prior_high - buffer).unwrap_or(false);
            (swept && accepted, prior_high)
        }
        Direction::Neutral => return skip("neutral signal"),
    };

    let metrics = json!({ "level": outcome.1, "followThrough": follow_ok });
    if outcome.0 && follow_ok {
        pass("liquidity sweep with acceptance", metrics)
    } else {
        fail("no accepted liquidity sweep", metrics)
    }
}

fn eval_order_block_fvg(inputs: &GateInputs) -> LayerOutcome {
    let bars = inputs.m15_bars;
    if bars.len() < 20 {
        return skip("insufficient bars for zone detection");
    }
    let price = inputs.price();
    let atr = inputs.signal.components.technical.atr;
    if price <= 0.0 || atr <= 0.0 {
        return skip("no price/ATR for zones");
    }

    // Fair value gap: three-bar displacement leaving an unfilled window.
    let mut in_zone = false;
    for w in bars.windows(3) {
        let (bullish_gap, zone_low, zone_high) = if w[0].high < w[2].low {
            (true, w[0].high, w[2].low)
        } else if w[0].low > w[2].high {
            (false, w[2].high, w[0].low)
        } else {
            continue;
        };
        let matches_direction = match inputs.signal.direction {
            Direction::Buy => bullish_gap,
            Direction::Sell => !bullish_gap,
            Direction::Neutral => false,
        };
        if matches_direction && price >= zone_low - atr && price <= zone_high + atr {
            in_zone = true;
            break;
        }
    }

    if in_zone {
        pass("entry inside order-block/FVG zone", serde_json::Value::Null)
    } else {
        fail("entry outside any directional zone", serde_json::Value::Null)
    }
}

fn eval_liquidity_event(inputs: &GateInputs) -> LayerOutcome {
    // Requires at least one structural liquidity event backing the entry.
    let sweep = eval_liquidity_sweep(inputs);
    let zone = eval_order_block_fvg(inputs);
    match (sweep.status, zone.status) {
        (LayerStatus::Pass, _) | (_, LayerStatus::Pass) => {
            pass("liquidity event present", serde_json::Value::Null)
        }
        (LayerStatus::Skip, LayerStatus::Skip) => skip("no structure data"),
        _ => fail("no liquidity event behind entry", serde_json::Value::Null),
    }
}

fn eval_discount_premium(inputs: &GateInputs) -> LayerOutcome {
    let Some(position) = inputs.day_position() else {
        return skip("no day range");
    };
    let metrics = json!({ "position": position });
    match inputs.signal.direction {
        Direction::Buy if position <= 0.55 => {
            pass(format!("buying discount ({position:.2})"), metrics)
        }
        Direction::Sell if position >= 0.45 => {
            pass(format!("selling premium ({position:.2})"), metrics)
        }
        Direction::Neutral => skip("neutral signal"),
        _ => fail(format!("wrong side of equilibrium ({position:.2})"), metrics),
    }
}

fn eval_monthly_location(inputs: &GateInputs) -> LayerOutcome {
    location_layer(
        inputs.month_position(),
        inputs.signal.direction,
        0.80,
        0.20,
        "month",
    )
}

fn eval_signal_ttl(inputs: &GateInputs) -> LayerOutcome {
    let ttl_ms = inputs.config.setup_ttl_minutes(inputs.pair.asset_class) * 60_000;
    let age = inputs.now_ms - inputs.signal.timestamp;
    let metrics = json!({ "ageMs": age, "ttlMs": ttl_ms });
    if age <= ttl_ms {
        pass(format!("setup {age} ms old within ttl"), metrics)
    } else {
        fail(format!("setup expired ({age} ms > {ttl_ms} ms)"), metrics)
    }
}

fn eval_htf_narrative(inputs: &GateInputs) -> LayerOutcome {
    let d1 = inputs.tf_direction(Timeframe::D1);
    let h4 = inputs.tf_direction(Timeframe::H4);
    let momentum = inputs.candles.map(|c| c.momentum).unwrap_or(0.0);
    let dir = inputs.signal.direction;
    if !dir.is_tradeable() {
        return skip("neutral signal");
    }
    let metrics = json!({ "d1": d1, "h4": h4, "momentum": momentum });

    match (d1, h4) {
        (Some(d), Some(h)) if d == dir && h == dir => {
            pass("continuation narrative", metrics)
        }
        (Some(d), Some(h)) if d == dir && h != dir && momentum * dir.sign() >= 0.0 => {
            pass("pullback narrative", metrics)
        }
        (Some(d), _) if d != dir && momentum * dir.sign() > 0.6 => {
            fail("late counter-trend push (distribution narrative)", metrics)
        }
        _ => skip("narrative unclear"),
    }
}

fn eval_phase_timing(inputs: &GateInputs) -> LayerOutcome {
    let Some(candles) = inputs.candles else {
        return skip("no candle analysis");
    };
    let position = inputs.day_position().unwrap_or(0.5);
    let stretched = candles.momentum.abs() > 0.85;
    let chasing = match inputs.signal.direction {
        Direction::Buy => position > 0.90,
        Direction::Sell => position < 0.10,
        Direction::Neutral => false,
    };
    let metrics = json!({ "momentum": candles.momentum, "position": position });
    if stretched && chasing {
        fail("move already extended (anti-FOMO)", metrics)
    } else {
        pass("phase timing acceptable", metrics)
    }
}

fn eval_next_liquidity_pool(inputs: &GateInputs) -> LayerOutcome {
    let (Some(entry), Some(range)) = (inputs.signal.entry.as_ref(), inputs.day_range()) else {
        return skip("no entry or day range");
    };
    let pool = match entry.direction {
        Direction::Buy => range.high,
        Direction::Sell => range.low,
        Direction::Neutral => return skip("neutral signal"),
    };
    let signed_distance = (pool - entry.price) * entry.direction.sign();
    if signed_distance <= 0.0 {
        // Already beyond the pool; the target runs into open space.
        return pass("price beyond nearest pool", json!({ "poolDistancePips": 0.0 }));
    }
    let pool_distance_pips = inputs.pair.to_pips(signed_distance);
    let ratio = entry.take_profit_pips / pool_distance_pips;
    let min = inputs.config.gate.min_tp_fraction_to_liquidity;
    let metrics = json!({ "ratio": ratio, "poolDistancePips": pool_distance_pips });
    if ratio >= min {
        pass(format!("TP reaches {ratio:.2} of pool distance"), metrics)
    } else {
        fail(format!("TP only {ratio:.2} of pool distance"), metrics)
    }
}

fn eval_breakout_confirmation(inputs: &GateInputs) -> LayerOutcome {
    let Some(candles) = inputs.candles else {
        return skip("no candle analysis");
    };
    let Some(range) = inputs.day_range() else {
        return skip("no day range");
    };
    let price = inputs.price();
    let decisive = candles.decisive;

    let broke_out = match inputs.signal.direction {
        Direction::Buy => price > range.high,
        Direction::Sell => price < range.low,
        Direction::Neutral => false,
    };
    let in_zone = matches!(eval_discount_premium(inputs).status, LayerStatus::Pass);

    if broke_out && decisive {
        // `needs: true` marks that this PASS overrides location layers.
        pass(
            "confirmed breakout entry trigger",
            json!({ "needs": true, "price": price }),
        )
    } else if in_zone && decisive {
        pass(
            "decisive candle inside value zone",
            json!({ "needs": false }),
        )
    } else {
        fail("no qualified entry trigger", json!({ "needs": false }))
    }
}

fn eval_market_psychology(inputs: &GateInputs) -> LayerOutcome {
    let momentum = inputs.candles.map(|c| c.momentum).unwrap_or(0.0);
    let follow = inputs.candles.map(|c| c.follow_through).unwrap_or(0.5);
    let directed = momentum * inputs.signal.direction.sign();
    let score = 50.0 + directed * 25.0 + follow * 25.0 + (inputs.quality.score - 50.0) * 0.2;
    let metrics = json!({ "score": score });
    if score >= 60.0 {
        pass(format!("psychology score {score:.0}"), metrics)
    } else {
        fail(format!("psychology score {score:.0} below 60"), metrics)
    }
}

/// Placeholder: resolved against the full result set by the gate after all
/// layers run (a curated set of layers must not be FAIL).
fn eval_cross_layer_conflicts(_inputs: &GateInputs) -> LayerOutcome {
    skip("resolved post-evaluation")
}

fn eval_signal_validation(inputs: &GateInputs) -> LayerOutcome {
    let signal = inputs.signal;
    let mut score = 100.0f64;
    let mut faults: Vec<&str> = Vec::new();

    if signal.direction.is_tradeable()
        && signal.components.technical.direction.is_tradeable()
        && signal.components.technical.direction != signal.direction
    {
        score -= 15.0;
        faults.push("technical direction conflict");
    }
    if let Some(candles) = inputs.candles {
        if candles.direction_vote.is_tradeable()
            && signal.direction.is_tradeable()
            && candles.direction_vote != signal.direction
        {
            score -= 15.0;
            faults.push("candle vote conflict");
        }
    }
    if !(0.0..=100.0).contains(&signal.strength) || !(0.0..=100.0).contains(&signal.confidence) {
        score -= 25.0;
        faults.push("component out of range");
    }
    if let Some(entry) = &signal.entry {
        let geometry_ok = match entry.direction {
            Direction::Buy => entry.stop_loss < entry.price && entry.take_profit > entry.price,
            Direction::Sell => entry.stop_loss > entry.price && entry.take_profit < entry.price,
            Direction::Neutral => false,
        };
        if !geometry_ok {
            score -= 25.0;
            faults.push("entry geometry inverted");
        }
    }

    let metrics = json!({ "score": score, "faults": faults });
    if score >= 90.0 {
        pass(format!("validation score {score:.0}"), metrics)
    } else {
        fail(format!("validation score {score:.0} below 90"), metrics)
    }
}

fn eval_context_awareness(inputs: &GateInputs) -> LayerOutcome {
    let sources = [
        inputs.quote_age_ms.is_some(),
        inputs.snapshot.is_some(),
        !inputs.upcoming_events.is_empty()
            || inputs.signal.components.news.headline_count > 0,
        !inputs.quality.timeframe_reports.is_empty(),
        inputs.candles.is_some(),
        !inputs.m15_bars.is_empty(),
    ];
    let present = sources.iter().filter(|&&b| b).count();
    let score = present as f64 / sources.len() as f64 * 100.0;
    let metrics = json!({ "score": score, "present": present });
    if score >= 70.0 {
        pass(format!("context {score:.0}%"), metrics)
    } else {
        fail(format!("context {score:.0}% below 70%"), metrics)
    }
}

fn eval_killer_question(inputs: &GateInputs) -> LayerOutcome {
    let mut score = 100.0f64;
    let mut deductions: Vec<&str> = Vec::new();

    if let Some(entry) = &inputs.signal.entry {
        if entry.risk_reward < inputs.profile.min_risk_reward {
            score -= 20.0;
            deductions.push("risk/reward below profile floor");
        }
    } else {
        score -= 30.0;
        deductions.push("no entry plan");
    }
    if inputs.signal.confidence < inputs.profile.min_confidence {
        score -= 20.0;
        deductions.push("confidence below profile floor");
    }
    if inputs.quality.status != crate::quality::QualityStatus::Healthy {
        score -= 10.0;
        deductions.push("degraded data quality");
    }
    if !inputs.upcoming_events.is_empty() {
        score -= 10.0;
        deductions.push("events on the calendar");
    }

    let metrics = json!({ "score": score, "deductions": deductions });
    if score >= 90.0 {
        pass(format!("killer question {score:.0}"), metrics)
    } else {
        fail(format!("killer question {score:.0} below 90"), metrics)
    }
}

fn eval_data_quality_soft(inputs: &GateInputs) -> LayerOutcome {
    let metrics = json!({ "score": inputs.quality.score });
    if inputs.quality.score >= 60.0 {
        pass(format!("quality score {:.0}", inputs.quality.score), metrics)
    } else {
        fail(format!("quality score {:.0} below 60", inputs.quality.score), metrics)
    }
}

// =============================================================================
// The table
// =============================================================================

/// Fixed evaluation order. The first [`READINESS_COUNT`] entries are the
/// L1..L18 readiness set used by the realtime execution gate.
pub static LAYERS: &[Layer] = &[
    Layer { id: "htf_h4_alignment", label: "H4 trend alignment", weight: 1.2, category: "htf", hard_fail: false, kill_switch: false, eval: eval_htf_h4 },
    Layer { id: "htf_d1_alignment", label: "D1 trend alignment", weight: 1.2, category: "htf", hard_fail: false, kill_switch: false, eval: eval_htf_d1 },
    Layer { id: "htf_d1_rsi_lock", label: "D1 RSI lock", weight: 1.0, category: "htf", hard_fail: false, kill_switch: false, eval: eval_d1_rsi_lock },
    Layer { id: "htf_d1_macd_lock", label: "D1 MACD lock", weight: 1.0, category: "htf", hard_fail: false, kill_switch: false, eval: eval_d1_macd_lock },
    Layer { id: "htf_rsi_rule", label: "HTF RSI exhaustion rule", weight: 1.2, category: "htf", hard_fail: true, kill_switch: false, eval: eval_htf_rsi_rule },
    Layer { id: "price_location_day", label: "Day-range location", weight: 1.0, category: "location", hard_fail: false, kill_switch: false, eval: eval_day_location },
    Layer { id: "price_location_week", label: "Week-range location", weight: 0.8, category: "location", hard_fail: false, kill_switch: false, eval: eval_week_location },
    Layer { id: "pivot_avoidance", label: "Pivot avoidance", weight: 0.8, category: "location", hard_fail: false, kill_switch: false, eval: eval_pivot_avoidance },
    Layer { id: "decisive_candle", label: "Decisive candle", weight: 1.0, category: "candle", hard_fail: false, kill_switch: false, eval: eval_decisive_candle },
    Layer { id: "session_authority", label: "Session authority", weight: 1.2, category: "session", hard_fail: false, kill_switch: true, eval: eval_session_authority },
    Layer { id: "failure_cost", label: "Failure cost (SL/ATR)", weight: 1.5, category: "execution", hard_fail: true, kill_switch: true, eval: eval_failure_cost },
    Layer { id: "dynamic_rr_floor", label: "Dynamic RR floor", weight: 1.5, category: "execution", hard_fail: true, kill_switch: false, eval: eval_dynamic_rr_floor },
    Layer { id: "event_risk_governor", label: "Event risk governor", weight: 1.5, category: "news", hard_fail: true, kill_switch: true, eval: eval_event_governor },
    Layer { id: "post_news_regime", label: "Post-news regime", weight: 1.2, category: "news", hard_fail: false, kill_switch: true, eval: eval_post_news_regime },
    Layer { id: "data_completeness", label: "Data completeness", weight: 1.0, category: "data", hard_fail: false, kill_switch: true, eval: eval_data_completeness },
    Layer { id: "quote_integrity", label: "Quote integrity", weight: 1.2, category: "data", hard_fail: false, kill_switch: true, eval: eval_quote_integrity },
    Layer { id: "liquidity_execution", label: "Liquidity & execution risk", weight: 1.2, category: "execution", hard_fail: false, kill_switch: true, eval: eval_liquidity_execution },
    Layer { id: "smart_slippage_risk", label: "Slippage risk", weight: 1.0, category: "execution", hard_fail: false, kill_switch: true, eval: eval_slippage_risk },
    // --- end of L1..L18 readiness set ---
    Layer { id: "intermarket_correlation", label: "Correlation stability guard", weight: 0.8, category: "risk", hard_fail: false, kill_switch: false, eval: eval_correlation_guard },
    Layer { id: "smart_distribution_filter", label: "Distribution filter", weight: 0.8, category: "smart", hard_fail: false, kill_switch: false, eval: eval_distribution_filter },
    Layer { id: "smart_false_continuation", label: "False continuation detector", weight: 0.8, category: "smart", hard_fail: false, kill_switch: false, eval: eval_false_continuation },
    Layer { id: "execution_edge", label: "Execution edge (expectancy)", weight: 1.5, category: "execution", hard_fail: true, kill_switch: false, eval: eval_execution_edge },
    Layer { id: "smart_structure_cleanliness", label: "Structure cleanliness", weight: 0.8, category: "smart", hard_fail: false, kill_switch: false, eval: eval_structure_cleanliness },
    Layer { id: "volatility_tradeability", label: "Volatility tradeability", weight: 1.0, category: "volatility", hard_fail: false, kill_switch: false, eval: eval_volatility_tradeability },
    Layer { id: "smart_volume_confirmation", label: "Volume confirmation", weight: 0.8, category: "smart", hard_fail: false, kill_switch: false, eval: eval_volume_confirmation },
    Layer { id: "smc_liquidity_sweep", label: "Liquidity sweep + acceptance", weight: 0.8, category: "smc", hard_fail: false, kill_switch: false, eval: eval_liquidity_sweep },
    Layer { id: "smc_order_block_fvg", label: "Order block & FVG zone", weight: 0.8, category: "smc", hard_fail: false, kill_switch: false, eval: eval_order_block_fvg },
    Layer { id: "smc_liquidity_event", label: "Liquidity event requirement", weight: 0.8, category: "smc", hard_fail: false, kill_switch: false, eval: eval_liquidity_event },
    Layer { id: "smc_discount_premium", label: "Discount/premium zone", weight: 0.8, category: "smc", hard_fail: false, kill_switch: false, eval: eval_discount_premium },
    Layer { id: "monthly_location", label: "Monthly location", weight: 0.8, category: "location", hard_fail: false, kill_switch: false, eval: eval_monthly_location },
    Layer { id: "signal_ttl", label: "Setup TTL", weight: 1.2, category: "lifecycle", hard_fail: true, kill_switch: true, eval: eval_signal_ttl },
    Layer { id: "htf_narrative", label: "HTF narrative", weight: 1.0, category: "htf", hard_fail: false, kill_switch: false, eval: eval_htf_narrative },
    Layer { id: "smart_phase_timing", label: "Phase timing (anti-FOMO)", weight: 0.8, category: "smart", hard_fail: false, kill_switch: false, eval: eval_phase_timing },
    Layer { id: "next_liquidity_pool", label: "Next liquidity pool", weight: 1.0, category: "location", hard_fail: false, kill_switch: false, eval: eval_next_liquidity_pool },
    Layer { id: "smart_breakout_confirmation", label: "Entry trigger authority", weight: 1.2, category: "trigger", hard_fail: false, kill_switch: false, eval: eval_breakout_confirmation },
    Layer { id: "market_psychology", label: "Market psychology", weight: 0.8, category: "psychology", hard_fail: false, kill_switch: false, eval: eval_market_psychology },
    Layer { id: "cross_layer_conflicts", label: "Cross-layer conflicts", weight: 1.0, category: "meta", hard_fail: true, kill_switch: false, eval: eval_cross_layer_conflicts },
    Layer { id: "signal_validation", label: "Signal validation", weight: 1.0, category: "meta", hard_fail: false, kill_switch: false, eval: eval_signal_validation },
    Layer { id: "context_awareness", label: "Context awareness", weight: 0.8, category: "meta", hard_fail: false, kill_switch: false, eval: eval_context_awareness },
    Layer { id: "killer_question", label: "Killer question", weight: 1.0, category: "meta", hard_fail: false, kill_switch: false, eval: eval_killer_question },
    Layer { id: "data_quality_soft", label: "Data quality (soft)", weight: 0.8, category: "data", hard_fail: false, kill_switch: false, eval: eval_data_quality_soft },
];

/// Ids whose FAIL participates in the strict-mode kill-switch union.
pub fn kill_switch_ids() -> Vec<&'static str> {
    LAYERS
        .iter()
        .filter(|l| l.kill_switch)
        .map(|l| l.id)
        .collect()
}

/// Curated set checked by the cross-layer conflict layer.
pub const CONFLICT_SET: &[&str] = &[
    "event_risk_governor",
    "quote_integrity",
    "failure_cost",
    "dynamic_rr_floor",
    "signal_ttl",
];

/// Location layers a confirmed breakout may override.
pub const BREAKOUT_OVERRIDABLE: &[&str] = &[
    "price_location_day",
    "monthly_location",
    "smc_discount_premium",
];
