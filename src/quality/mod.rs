// =============================================================================
// Data Quality Guard
// =============================================================================
//
// Per-pair, multi-timeframe quality scoring with spread and weekend-gap
// assessment, feeding a per-pair circuit breaker with auto-reenable. The
// scoring core is a pure function over its inputs: two assessments over
// identical inputs produce identical reports except for `assessedAt`.

pub mod breaker;

pub use breaker::{
    BreakerContext, BreakerEntry, BreakerReason, CircuitBreakerStore, HealthyStreak,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, TimeZone, Utc, Weekday};
use serde::Serialize;
use tracing::debug;

use crate::bridge::{Bar, MarketDataBridge};
use crate::config::QualityConfig;
use crate::pairs::{PairCategory, PairInfo};
use crate::persistence::{AuditEvent, PersistenceSink};
use crate::types::Timeframe;

// =============================================================================
// Report types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Proceed,
    Caution,
    Block,
    Monitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadStatus {
    Normal,
    Elevated,
    Critical,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GapSeverity {
    None,
    Minor,
    Elevated,
    Critical,
}

/// Spread observation fed into the assessment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadSample {
    pub pips: f64,
    pub provider: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadAssessment {
    pub status: SpreadStatus,
    pub pips: f64,
    pub provider: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekendGapAssessment {
    pub severity: GapSeverity,
    pub max_pips: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeframeReport {
    pub timeframe: Timeframe,
    pub score: f64,
    pub bars: usize,
    pub spikes: u32,
    pub gaps: u32,
    pub misaligned: u32,
    pub stale: bool,
    pub sanity_ok: bool,
    pub weekend_gap_pips: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub pair: String,
    pub assessed_at: i64,
    pub score: f64,
    pub status: QualityStatus,
    pub recommendation: Recommendation,
    pub issues: Vec<String>,
    pub timeframe_reports: HashMap<Timeframe, TimeframeReport>,
    pub spread: SpreadAssessment,
    pub weekend_gap: WeekendGapAssessment,
    pub synthetic_relaxed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthetic_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_floor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<BreakerEntry>,
}

impl QualityReport {
    /// Whether the decision gate should treat data quality as acceptable.
    pub fn acceptable(&self) -> bool {
        self.recommendation != Recommendation::Block && self.circuit_breaker.is_none()
    }
}

// =============================================================================
// Threshold tables
// =============================================================================

/// Percent move per bar that counts as a spike, by timeframe.
fn spike_threshold_pct(tf: Timeframe) -> f64 {
    match tf {
        Timeframe::M1 => 2.4,
        Timeframe::M5 => 2.0,
        Timeframe::M15 => 1.7,
        Timeframe::M30 => 1.5,
        Timeframe::H1 => 1.2,
        Timeframe::H4 => 0.9,
        Timeframe::D1 | Timeframe::W1 => 0.6,
    }
}

/// (warn, block) spread thresholds in pips by pair category.
fn spread_thresholds(category: PairCategory) -> (f64, f64) {
    match category {
        PairCategory::Majors => (1.5, 2.8),
        PairCategory::Yen => (1.8, 3.2),
        PairCategory::Minors => (2.2, 4.0),
        PairCategory::Crosses => (2.6, 4.5),
    }
}

fn weekend_gap_severity(max_pips: f64) -> GapSeverity {
    if max_pips <= 0.0 {
        GapSeverity::None
    } else if max_pips < 8.0 {
        GapSeverity::Minor
    } else if max_pips < 20.0 {
        GapSeverity::Elevated
    } else {
        GapSeverity::Critical
    }
}

/// True when the gap between two bar open times matches a weekend pattern
/// (Friday/Saturday into Sunday/Monday, UTC).
fn is_weekend_pattern(prev_ms: i64, next_ms: i64) -> bool {
    let prev = Utc.timestamp_millis_opt(prev_ms).single();
    let next = Utc.timestamp_millis_opt(next_ms).single();
    match (prev, next) {
        (Some(prev), Some(next)) => {
            let prev_day = prev.weekday();
            let next_day = next.weekday();
            matches!(prev_day, Weekday::Fri | Weekday::Sat)
                && matches!(next_day, Weekday::Sun | Weekday::Mon)
        }
        _ => false,
    }
}

// =============================================================================
// Pure assessment core
// =============================================================================

struct TimeframeEval {
    report: TimeframeReport,
    issues: Vec<String>,
}

fn evaluate_timeframe(
    pair: &PairInfo,
    tf: Timeframe,
    bars: &[Bar],
    relax: bool,
    now_ms: i64,
) -> TimeframeEval {
    let mut issues = Vec::new();

    if bars.len() < 20 {
        issues.push(format!("insufficient_bars_{tf}"));
        return TimeframeEval {
            report: TimeframeReport {
                timeframe: tf,
                score: 45.0,
                bars: bars.len(),
                spikes: 0,
                gaps: 0,
                misaligned: 0,
                stale: true,
                sanity_ok: true,
                weekend_gap_pips: 0.0,
            },
            issues,
        };
    }

    let expected = tf.interval_ms() as f64;
    let spike_threshold = spike_threshold_pct(tf);

    let mut spikes = 0u32;
    let mut gaps = 0u32;
    let mut misaligned = 0u32;
    let mut weekend_gap_pips = 0.0f64;

    for w in bars.windows(2) {
        let dt = (w[1].time - w[0].time) as f64;

        if dt >= 6.0 * expected && is_weekend_pattern(w[0].time, w[1].time) {
            let gap = pair.to_pips(w[1].close - w[0].close);
            weekend_gap_pips = weekend_gap_pips.max(gap);
        } else if dt > 1.75 * expected {
            gaps += 1;
        } else if (dt - expected).abs() > 0.2 * expected {
            misaligned += 1;
        }

        if w[0].close > 0.0 {
            let move_pct = ((w[1].close / w[0].close) - 1.0).abs() * 100.0;
            if move_pct > spike_threshold {
                spikes += 1;
            }
        }
    }

    let latest = bars.last().expect("bars checked non-empty");
    let stale = (now_ms - latest.time) as f64 > 3.0 * expected;

    let sanity_ok = bars.iter().all(|b| {
        b.open.is_finite()
            && b.close.is_finite()
            && b.high.is_finite()
            && b.low.is_finite()
            && b.low > 0.0
            && b.high >= b.low
    });

    // Penalty schedule; relaxation softens structural penalties for
    // synthetic or EA-seeded histories.
    let gap_factor = if relax { 0.35 } else { 1.0 };
    let misalign_factor = if relax { 0.3 } else { 1.0 };
    let stale_penalty = if relax { 8.0 } else { 20.0 };

    let mut score = 100.0;
    score -= (spikes as f64 * 7.0).min(35.0);
    score -= (gaps as f64 * 8.0).min(40.0) * gap_factor;
    score -= (misaligned as f64 * 3.0).min(15.0) * misalign_factor;
    if stale {
        score -= stale_penalty;
    }
    if !sanity_ok {
        score -= 15.0;
    }
    score = score.clamp(0.0, 100.0);

    if spikes > 0 {
        issues.push(format!("spikes_{tf}"));
    }
    if gaps > 0 {
        issues.push(format!("gaps_{tf}"));
    }
    if misaligned > 0 {
        issues.push(format!("misaligned_{tf}"));
    }
    if stale {
        issues.push(format!("stale_{tf}"));
    }
    if !sanity_ok {
        issues.push(format!("price_sanity_{tf}"));
    }

    TimeframeEval {
        report: TimeframeReport {
            timeframe: tf,
            score,
            bars: bars.len(),
            spikes,
            gaps,
            misaligned,
            stale,
            sanity_ok,
            weekend_gap_pips,
        },
        issues,
    }
}

fn confidence_floor(spread: SpreadStatus, gap: GapSeverity, status: QualityStatus) -> Option<f64> {
    let mut floors = Vec::new();
    match spread {
        SpreadStatus::Critical => floors.push(65.0),
        SpreadStatus::Elevated => floors.push(62.0),
        _ => {}
    }
    match gap {
        GapSeverity::Critical => floors.push(55.0),
        GapSeverity::Elevated => floors.push(60.0),
        GapSeverity::Minor => floors.push(52.0),
        GapSeverity::None => {}
    }
    if floors.is_empty() && status != QualityStatus::Healthy {
        floors.push(50.0);
    }
    floors.into_iter().fold(None, |acc: Option<f64>, f| {
        Some(acc.map_or(f, |a| a.min(f)))
    })
}

/// Assess `pair` from raw inputs. Deterministic: identical inputs produce
/// identical reports except for `assessed_at` (which is `now_ms` here).
pub fn assess_pair(
    pair: &PairInfo,
    bars_by_tf: &HashMap<Timeframe, Vec<Bar>>,
    spread: Option<SpreadSample>,
    relax_synthetic: bool,
    now_ms: i64,
) -> QualityReport {
    let mut issues = Vec::new();
    let mut timeframe_reports = HashMap::new();
    let mut max_weekend_gap = 0.0f64;

    let mut timeframes: Vec<Timeframe> = bars_by_tf.keys().copied().collect();
    timeframes.sort();

    let mut score_sum = 0.0;
    for tf in &timeframes {
        let bars = bars_by_tf.get(tf).map(Vec::as_slice).unwrap_or(&[]);
        let eval = evaluate_timeframe(pair, *tf, bars, relax_synthetic, now_ms);
        max_weekend_gap = max_weekend_gap.max(eval.report.weekend_gap_pips);
        score_sum += eval.report.score;
        issues.extend(eval.issues);
        timeframe_reports.insert(*tf, eval.report);
    }
    let mut score = if timeframes.is_empty() {
        0.0
    } else {
        score_sum / timeframes.len() as f64
    };

    // Spread assessment.
    let (warn, block) = spread_thresholds(pair.category());
    let spread_assessment = match &spread {
        Some(sample) => {
            let status = if sample.pips >= block {
                SpreadStatus::Critical
            } else if sample.pips >= warn {
                SpreadStatus::Elevated
            } else {
                SpreadStatus::Normal
            };
            SpreadAssessment {
                status,
                pips: sample.pips,
                provider: sample.provider.clone(),
                timestamp: sample.timestamp,
            }
        }
        None => SpreadAssessment {
            status: SpreadStatus::Unknown,
            pips: 0.0,
            provider: String::new(),
            timestamp: 0,
        },
    };
    match spread_assessment.status {
        SpreadStatus::Elevated => {
            score -= 8.0;
            issues.push("spread_elevated".to_string());
        }
        SpreadStatus::Critical => {
            score -= 18.0;
            issues.push("spread_critical".to_string());
        }
        _ => {}
    }

    if relax_synthetic {
        score += 8.0;
    }
    score = score.clamp(0.0, 100.0);

    let gap_severity = weekend_gap_severity(max_weekend_gap);
    if gap_severity == GapSeverity::Critical {
        issues.push("weekend_gap_critical".to_string());
    }

    let status = if gap_severity == GapSeverity::Critical && !relax_synthetic {
        QualityStatus::Critical
    } else if score >= 80.0 {
        QualityStatus::Healthy
    } else if score >= 60.0 {
        QualityStatus::Degraded
    } else {
        QualityStatus::Critical
    };

    let mut recommendation = match status {
        QualityStatus::Healthy => Recommendation::Proceed,
        QualityStatus::Degraded => {
            if score >= 70.0 {
                Recommendation::Monitor
            } else {
                Recommendation::Caution
            }
        }
        QualityStatus::Critical => Recommendation::Block,
    };

    // Synthetic relaxation never blocks unless the spread itself is critical.
    if relax_synthetic
        && recommendation == Recommendation::Block
        && spread_assessment.status != SpreadStatus::Critical
    {
        recommendation = Recommendation::Caution;
    }

    let floor = confidence_floor(spread_assessment.status, gap_severity, status);

    QualityReport {
        pair: pair.pair.clone(),
        assessed_at: now_ms,
        score,
        status,
        recommendation,
        issues,
        timeframe_reports,
        spread: spread_assessment,
        weekend_gap: WeekendGapAssessment {
            severity: gap_severity,
            max_pips: max_weekend_gap,
        },
        synthetic_relaxed: relax_synthetic,
        synthetic_context: None,
        confidence_floor: floor,
        circuit_breaker: None,
    }
}

// =============================================================================
// Guard — bridge-backed assessor with breaker integration and caching
// =============================================================================

pub struct QualityGuard {
    bridge: Arc<MarketDataBridge>,
    pub breakers: Arc<CircuitBreakerStore>,
    sink: Arc<dyn PersistenceSink>,
    config: QualityConfig,
    cache: parking_lot::RwLock<HashMap<String, QualityReport>>,
}

/// Timeframes assessed by default.
pub const DEFAULT_TIMEFRAMES: [Timeframe; 3] = [Timeframe::M15, Timeframe::H1, Timeframe::H4];

impl QualityGuard {
    pub fn new(
        bridge: Arc<MarketDataBridge>,
        sink: Arc<dyn PersistenceSink>,
        config: QualityConfig,
    ) -> Self {
        Self {
            bridge,
            breakers: Arc::new(CircuitBreakerStore::new()),
            sink,
            config,
            cache: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Assess `pair` on `broker`, honoring the freshness TTL cache, and run
    /// breaker activation / auto-reenable side effects.
    pub fn assess(
        &self,
        broker: &str,
        pair_info: &PairInfo,
        relax_synthetic: bool,
        ttl_ms: Option<i64>,
        now_ms: i64,
    ) -> QualityReport {
        let ttl = ttl_ms.unwrap_or(self.config.freshness_ttl_ms);
        if let Some(cached) = self.cache.read().get(&pair_info.pair) {
            if now_ms - cached.assessed_at <= ttl && cached.synthetic_relaxed == relax_synthetic {
                let mut report = cached.clone();
                report.circuit_breaker = self.breakers.active(&pair_info.pair, now_ms);
                return report;
            }
        }

        let mut bars_by_tf = HashMap::new();
        for tf in DEFAULT_TIMEFRAMES {
            let bars =
                self.bridge
                    .bars
                    .recent_closed(broker, &pair_info.pair, tf, self.config.bars_per_timeframe);
            bars_by_tf.insert(tf, bars);
        }

        let spread = self
            .bridge
            .freshest_quote(broker, &pair_info.pair)
            .map(|q| SpreadSample {
                pips: q.spread_pips(pair_info.pip_size),
                provider: q.broker.clone(),
                timestamp: q.received_at,
            });

        let mut report = assess_pair(pair_info, &bars_by_tf, spread, relax_synthetic, now_ms);
        self.apply_breaker_policy(&mut report, now_ms);

        self.sink.record_quality_metric(
            &pair_info.pair,
            serde_json::to_value(&report).unwrap_or(serde_json::Value::Null),
        );
        self.cache
            .write()
            .insert(pair_info.pair.clone(), report.clone());
        report
    }

    /// Breaker activation, streak tracking, and auto-reenable for a freshly
    /// computed report. Factored out so tests can drive it with synthetic
    /// reports.
    pub fn apply_breaker_policy(&self, report: &mut QualityReport, now_ms: i64) {
        let pair = report.pair.clone();

        let healthy = report.status == QualityStatus::Healthy;
        let streak = self.breakers.record_assessment(&pair, healthy, now_ms);

        if self.config.auto_reenable && healthy {
            let reenabled = self.breakers.try_auto_reenable(
                &pair,
                report.score,
                streak,
                self.config.auto_reenable_min_score,
                self.config.auto_reenable_min_healthy_count,
                self.config.auto_reenable_window_ms,
                now_ms,
            );
            if reenabled {
                self.sink.record_audit(
                    AuditEvent::new(
                        "data_quality.auto_reenable",
                        serde_json::json!({ "score": report.score }),
                    )
                    .with_pair(pair.clone()),
                );
            }
        }

        if !report.synthetic_relaxed {
            let spread_critical = report.spread.status == SpreadStatus::Critical;
            let gap_critical = report.weekend_gap.severity == GapSeverity::Critical;
            let quality_critical =
                report.status == QualityStatus::Critical && report.score < 55.0;

            if (quality_critical || spread_critical || gap_critical)
                && self.breakers.active(&pair, now_ms).is_none()
            {
                let reason = if spread_critical {
                    BreakerReason::WideSpread
                } else if gap_critical {
                    BreakerReason::WeekendGap
                } else {
                    BreakerReason::QualityScore
                };
                let entry = self.breakers.activate(
                    &pair,
                    reason,
                    BreakerContext {
                        score: report.score,
                        spread_pips: report.spread.pips,
                        weekend_gap_pips: report.weekend_gap.max_pips,
                    },
                    self.config.breaker_duration_ms,
                    now_ms,
                );
                self.sink.record_audit(
                    AuditEvent::new(
                        "data_quality.circuit_breaker.activated",
                        serde_json::json!({
                            "reason": reason.to_string(),
                            "score": report.score,
                            "spreadPips": report.spread.pips,
                            "weekendGapPips": report.weekend_gap.max_pips,
                        }),
                    )
                    .with_pair(pair.clone()),
                );
                report.circuit_breaker = Some(entry);
            } else {
                report.circuit_breaker = self.breakers.active(&pair, now_ms);
            }
        } else {
            report.circuit_breaker = self.breakers.active(&pair, now_ms);
        }

        debug!(
            pair = %pair,
            score = report.score,
            status = ?report.status,
            recommendation = ?report.recommendation,
            breaker = report.circuit_breaker.is_some(),
            "quality assessment complete"
        );
    }

    /// Synthetic healthy report injected on the EA-only and EA-hybrid paths.
    pub fn synthetic_report(&self, pair: &str, mode_tag: &str, now_ms: i64) -> QualityReport {
        QualityReport {
            pair: pair.to_string(),
            assessed_at: now_ms,
            score: 88.0,
            status: QualityStatus::Healthy,
            recommendation: Recommendation::Proceed,
            issues: vec!["ea_bridge_source".to_string(), mode_tag.to_string()],
            timeframe_reports: HashMap::new(),
            spread: SpreadAssessment {
                status: SpreadStatus::Unknown,
                pips: 0.0,
                provider: "ea_bridge".to_string(),
                timestamp: now_ms,
            },
            weekend_gap: WeekendGapAssessment {
                severity: GapSeverity::None,
                max_pips: 0.0,
            },
            synthetic_relaxed: true,
            synthetic_context: Some(mode_tag.to_string()),
            confidence_floor: None,
            circuit_breaker: self.breakers.active(pair, now_ms),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs;
    use crate::types::Timeframe;

    /// Friday 2024-03-01 20:00 UTC, epoch millis.
    const FRIDAY_20_UTC: i64 = 1_709_323_200_000;

    fn clean_bars(tf: Timeframe, count: usize, start_ms: i64, close: f64) -> Vec<Bar> {
        let step = tf.interval_ms();
        (0..count)
            .map(|i| Bar {
                broker: "mt5".to_string(),
                symbol: "EURUSD".to_string(),
                timeframe: tf,
                open: close,
                high: close + 0.0005,
                low: close - 0.0005,
                close,
                volume: Some(100.0),
                time: start_ms + i as i64 * step,
                closed: true,
            })
            .collect()
    }

    fn inputs_for(
        tf: Timeframe,
        bars: Vec<Bar>,
    ) -> HashMap<Timeframe, Vec<Bar>> {
        let mut map = HashMap::new();
        map.insert(tf, bars);
        map
    }

    #[test]
    fn clean_history_is_healthy() {
        let pair = pairs::lookup("EURUSD");
        let start = 0i64;
        let bars = clean_bars(Timeframe::H1, 100, start, 1.085);
        let now = start + 100 * Timeframe::H1.interval_ms();
        let report = assess_pair(&pair, &inputs_for(Timeframe::H1, bars), None, false, now);
        assert_eq!(report.status, QualityStatus::Healthy);
        assert_eq!(report.recommendation, Recommendation::Proceed);
        assert!(report.score >= 90.0);
    }

    #[test]
    fn weekend_gap_critical_on_metals_scenario() {
        // XAUUSD with a 48h Friday->Sunday gap and a 22-pip close jump.
        let pair = pairs::lookup("XAUUSD");
        let step = Timeframe::H1.interval_ms();
        let mut bars: Vec<Bar> = (0..30)
            .map(|i| Bar {
                broker: "mt5".to_string(),
                symbol: "XAUUSD".to_string(),
                timeframe: Timeframe::H1,
                open: 2030.0,
                high: 2031.0,
                low: 2029.0,
                close: 2030.0,
                volume: None,
                time: FRIDAY_20_UTC - (30 - i) * step,
                closed: true,
            })
            .collect();
        // Sunday reopen 48h later, close jumped 2.2 price units = 22 pips.
        let reopen = FRIDAY_20_UTC + 48 * 3_600_000;
        bars.push(Bar {
            broker: "mt5".to_string(),
            symbol: "XAUUSD".to_string(),
            timeframe: Timeframe::H1,
            open: 2032.0,
            high: 2033.0,
            low: 2031.0,
            close: 2032.2,
            volume: None,
            time: reopen,
            closed: true,
        });

        let report = assess_pair(
            &pair,
            &inputs_for(Timeframe::H1, bars),
            None,
            false,
            reopen + step,
        );
        assert_eq!(report.weekend_gap.severity, GapSeverity::Critical);
        assert!(report.weekend_gap.max_pips >= 20.0);
        assert_eq!(report.status, QualityStatus::Critical);
    }

    #[test]
    fn relaxed_assessment_never_blocks_without_critical_spread() {
        let pair = pairs::lookup("EURUSD");
        // Garbage history: tiny, stale, gap-ridden.
        let bars = clean_bars(Timeframe::H1, 25, 0, 1.085);
        let now = 100 * Timeframe::H1.interval_ms();
        let spread = SpreadSample {
            pips: 1.0,
            provider: "mt5".to_string(),
            timestamp: now,
        };
        let report = assess_pair(
            &pair,
            &inputs_for(Timeframe::H1, bars),
            Some(spread),
            true,
            now,
        );
        assert_ne!(report.recommendation, Recommendation::Block);
    }

    #[test]
    fn critical_spread_blocks_even_when_relaxed() {
        let pair = pairs::lookup("EURUSD");
        let bars = clean_bars(Timeframe::H1, 25, 0, 1.085);
        let now = 100 * Timeframe::H1.interval_ms();
        let spread = SpreadSample {
            pips: 5.0,
            provider: "mt5".to_string(),
            timestamp: now,
        };
        let report = assess_pair(
            &pair,
            &inputs_for(Timeframe::H1, bars),
            Some(spread),
            true,
            now,
        );
        assert_eq!(report.spread.status, SpreadStatus::Critical);
        // Block is only reachable here if score collapsed; either way the
        // relaxation exemption must not apply with a critical spread.
        if report.status == QualityStatus::Critical {
            assert_eq!(report.recommendation, Recommendation::Block);
        }
    }

    #[test]
    fn spike_penalty_reduces_score() {
        let pair = pairs::lookup("EURUSD");
        let mut bars = clean_bars(Timeframe::M15, 50, 0, 1.085);
        // Inject three 3% spikes.
        for idx in [10usize, 20, 30] {
            bars[idx].close = bars[idx - 1].close * 1.03;
        }
        let now = 50 * Timeframe::M15.interval_ms();
        let report = assess_pair(&pair, &inputs_for(Timeframe::M15, bars), None, false, now);
        let tf_report = &report.timeframe_reports[&Timeframe::M15];
        assert!(tf_report.spikes >= 3);
        assert!(tf_report.score < 90.0);
    }

    #[test]
    fn assessment_is_deterministic_modulo_timestamp() {
        let pair = pairs::lookup("EURUSD");
        let bars = clean_bars(Timeframe::H1, 60, 0, 1.085);
        let inputs = inputs_for(Timeframe::H1, bars);
        let now = 60 * Timeframe::H1.interval_ms();
        let a = assess_pair(&pair, &inputs, None, false, now);
        let b = assess_pair(&pair, &inputs, None, false, now);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn confidence_floor_matrix() {
        assert_eq!(
            confidence_floor(SpreadStatus::Critical, GapSeverity::None, QualityStatus::Degraded),
            Some(65.0)
        );
        assert_eq!(
            confidence_floor(SpreadStatus::Elevated, GapSeverity::None, QualityStatus::Degraded),
            Some(62.0)
        );
        assert_eq!(
            confidence_floor(SpreadStatus::Normal, GapSeverity::Critical, QualityStatus::Critical),
            Some(55.0)
        );
        assert_eq!(
            confidence_floor(SpreadStatus::Normal, GapSeverity::Elevated, QualityStatus::Degraded),
            Some(60.0)
        );
        assert_eq!(
            confidence_floor(SpreadStatus::Normal, GapSeverity::Minor, QualityStatus::Degraded),
            Some(52.0)
        );
        assert_eq!(
            confidence_floor(SpreadStatus::Normal, GapSeverity::None, QualityStatus::Degraded),
            Some(50.0)
        );
        assert_eq!(
            confidence_floor(SpreadStatus::Normal, GapSeverity::None, QualityStatus::Healthy),
            None
        );
        // Lowest applicable floor wins.
        assert_eq!(
            confidence_floor(SpreadStatus::Critical, GapSeverity::Minor, QualityStatus::Critical),
            Some(52.0)
        );
    }
}
