// =============================================================================
// Engine Configuration — typed snapshot with env overlay and atomic save
// =============================================================================
//
// Central configuration hub for the Meridian trading engine. Every tunable
// parameter lives here so that the engine can be reconfigured at runtime
// without a restart.
//
// Load order: JSON file -> `apply_env()` overlay of the recognized
// environment variables. Persistence uses an atomic tmp + rename pattern to
// prevent corruption on crash. All fields carry `#[serde(default)]` so that
// adding new fields never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{AccountMode, TradingMode};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "EURUSD".to_string(),
        "GBPUSD".to_string(),
        "USDJPY".to_string(),
        "AUDUSD".to_string(),
        "XAUUSD".to_string(),
    ]
}

fn default_min_signal_strength() -> f64 {
    35.0
}
fn default_risk_per_trade() -> f64 {
    0.01
}
fn default_max_daily_risk() -> f64 {
    0.04
}
fn default_max_concurrent_trades() -> usize {
    3
}
fn default_max_kelly() -> f64 {
    0.02
}
fn default_min_kelly() -> f64 {
    0.0025
}
fn default_vol_calm() -> f64 {
    1.15
}
fn default_vol_normal() -> f64 {
    1.0
}
fn default_vol_volatile() -> f64 {
    0.72
}
fn default_vol_extreme() -> f64 {
    0.55
}
fn default_same_pair_penalty() -> f64 {
    0.35
}
fn default_shared_currency_penalty() -> f64 {
    0.65
}
fn default_max_exposure_per_currency() -> f64 {
    0.06
}
fn default_correlation_threshold() -> f64 {
    0.80
}
fn default_max_cluster_size() -> usize {
    3
}
fn default_var_confidence() -> f64 {
    0.95
}
fn default_var_lookback() -> usize {
    100
}
fn default_var_min_samples() -> usize {
    20
}
fn default_var_max_loss_pct() -> f64 {
    4.0
}
fn default_volatility_cooldown_ms() -> i64 {
    120_000
}

fn default_news_blackout_minutes() -> i64 {
    30
}
fn default_news_impact_threshold() -> u8 {
    3
}
fn default_trading_windows_london() -> Vec<(u32, u32)> {
    // UTC hours: London morning and London/NY overlap.
    vec![(7, 11), (12, 16)]
}
fn default_max_spread_to_atr() -> f64 {
    0.22
}
fn default_max_spread_to_tp() -> f64 {
    0.12
}
fn default_max_sl_atr_ratio() -> f64 {
    1.8
}
fn default_bars_min_m15() -> usize {
    60
}
fn default_bars_min_h1() -> usize {
    20
}
fn default_bars_max_age_m15_ms() -> i64 {
    45 * 60_000
}
fn default_bars_max_age_h1_ms() -> i64 {
    3 * 3_600_000
}
fn default_max_spread_pips() -> f64 {
    2.4
}
fn default_fx_atr_pips_min() -> f64 {
    3.0
}
fn default_fx_atr_pips_max() -> f64 {
    300.0
}
fn default_crypto_atr_pct_spike() -> f64 {
    2.2
}
fn default_cfd_max_spread_relative() -> f64 {
    0.0008
}
fn default_sweep_accept_buffer_pips() -> f64 {
    1.2
}
fn default_post_news_window_minutes() -> i64 {
    45
}
fn default_setup_ttl_fx_minutes() -> i64 {
    25
}
fn default_setup_ttl_crypto_minutes() -> i64 {
    45
}
fn default_min_tp_fraction_to_liquidity() -> f64 {
    0.45
}
fn default_divergence_opposing_min_conf() -> f64 {
    0.55
}
fn default_macd_flat_eps() -> f64 {
    0.000004
}

fn default_validity_multiplier() -> f64 {
    1.0
}
fn default_min_validity_ms() -> i64 {
    30_000
}
fn default_max_validity_ms() -> i64 {
    86_400_000
}
fn default_confluence_min_score() -> f64 {
    62.0
}

fn default_ea_min_confidence() -> f64 {
    45.0
}
fn default_ea_min_strength() -> f64 {
    35.0
}
fn default_layers18_min_confluence() -> f64 {
    30.0
}
fn default_scan_interval_ms() -> i64 {
    15_000
}
fn default_scan_batch_size() -> usize {
    180
}
fn default_scan_symbol_max_age_ms() -> i64 {
    30 * 60_000
}
fn default_scan_symbols_max() -> usize {
    600
}

fn default_realtime_min_confidence() -> f64 {
    45.0
}
fn default_realtime_min_strength() -> f64 {
    35.0
}
fn default_smart_min_confidence() -> f64 {
    55.0
}
fn default_smart_min_strength() -> f64 {
    45.0
}
fn default_smart_min_decision_score() -> f64 {
    50.0
}
fn default_smart_exit_min_confidence() -> f64 {
    60.0
}
fn default_smart_exit_min_strength() -> f64 {
    50.0
}
fn default_smart_exit_min_decision_score() -> f64 {
    60.0
}
fn default_smart_exit_recheck_ms() -> i64 {
    30_000
}
fn default_max_new_trades_per_cycle() -> usize {
    1
}
fn default_realtime_debounce_ms() -> i64 {
    500
}
fn default_realtime_cooldown_ms() -> i64 {
    180_000
}
fn default_signal_check_interval_ms() -> i64 {
    15 * 60_000
}
fn default_monitoring_interval_ms() -> i64 {
    10_000
}
fn default_signal_generation_interval_ms() -> i64 {
    5 * 60_000
}
fn default_universe_max_age_ms() -> i64 {
    20 * 60_000
}
fn default_universe_max_symbols() -> usize {
    24
}
fn default_auto_asset_classes() -> Vec<String> {
    vec!["forex".to_string(), "metals".to_string()]
}

fn default_auto_reenable_min_score() -> f64 {
    78.0
}
fn default_auto_reenable_min_healthy() -> u32 {
    2
}
fn default_auto_reenable_window_ms() -> i64 {
    240_000
}
fn default_breaker_duration_ms() -> i64 {
    600_000
}
fn default_quality_ttl_ms() -> i64 {
    300_000
}
fn default_quality_bars() -> usize {
    240
}

fn default_max_slippage_pips() -> f64 {
    2.0
}
fn default_max_risk_per_symbol() -> f64 {
    0.02
}
fn default_smart_exit_min_profit_pct() -> f64 {
    0.35
}
fn default_smart_exit_news_minutes() -> i64 {
    20
}
fn default_modify_throttle_ms() -> i64 {
    1_500
}
fn default_reconcile_interval_ms() -> i64 {
    60_000
}
fn default_broker_deadline_ms() -> i64 {
    8_000
}

fn default_quote_retention_minutes() -> i64 {
    30
}
fn default_quote_max_points() -> usize {
    2_400
}

fn default_event_governor_pre_minutes() -> i64 {
    20
}
fn default_event_governor_post_minutes() -> i64 {
    15
}

// =============================================================================
// Environment / profile enums
// =============================================================================

/// Deployment environment; drives the strict/advisory confluence matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Development,
    Test,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Development
    }
}

impl Environment {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Gate profile selector; lowers contributor floors progressively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingProfile {
    Balanced,
    Aggressive,
    SmartStrong,
}

impl Default for TradingProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

impl TradingProfile {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "aggressive" => Self::Aggressive,
            "smart_strong" | "smartstrong" => Self::SmartStrong,
            _ => Self::Balanced,
        }
    }
}

// =============================================================================
// Config sections
// =============================================================================

/// Portfolio risk limits and sizing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,
    #[serde(default = "default_max_daily_risk")]
    pub max_daily_risk: f64,
    #[serde(default = "default_max_concurrent_trades")]
    pub max_concurrent_trades: usize,
    #[serde(default = "default_max_kelly")]
    pub max_kelly_fraction: f64,
    #[serde(default = "default_min_kelly")]
    pub min_kelly_fraction: f64,
    #[serde(default = "default_vol_calm")]
    pub vol_multiplier_calm: f64,
    #[serde(default = "default_vol_normal")]
    pub vol_multiplier_normal: f64,
    #[serde(default = "default_vol_volatile")]
    pub vol_multiplier_volatile: f64,
    #[serde(default = "default_vol_extreme")]
    pub vol_multiplier_extreme: f64,
    #[serde(default = "default_same_pair_penalty")]
    pub correlation_penalty_same_pair: f64,
    #[serde(default = "default_shared_currency_penalty")]
    pub correlation_penalty_shared_currency: f64,
    #[serde(default = "default_max_exposure_per_currency")]
    pub max_exposure_per_currency: f64,
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
    #[serde(default = "default_max_cluster_size")]
    pub max_cluster_size: usize,
    /// Explicit pairwise correlations (`"EURUSD:GBPUSD" -> 0.85`); unlisted
    /// pairs fall back to the shared-currency heuristic.
    #[serde(default)]
    pub explicit_correlations: std::collections::HashMap<String, f64>,
    #[serde(default = "default_var_confidence")]
    pub var_confidence: f64,
    #[serde(default = "default_var_lookback")]
    pub var_lookback: usize,
    #[serde(default = "default_var_min_samples")]
    pub var_min_samples: usize,
    #[serde(default = "default_var_max_loss_pct")]
    pub var_max_loss_pct: f64,
    #[serde(default = "default_volatility_cooldown_ms")]
    pub volatility_cooldown_ms: i64,
    #[serde(default = "default_max_risk_per_symbol")]
    pub max_risk_per_symbol: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("RiskConfig defaults")
    }
}

/// Hard-gate thresholds for the decision gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_min_signal_strength")]
    pub min_signal_strength: f64,
    #[serde(default = "default_news_blackout_minutes")]
    pub news_blackout_minutes: i64,
    #[serde(default = "default_news_impact_threshold")]
    pub news_blackout_impact_threshold: u8,
    #[serde(default = "default_true")]
    pub enforce_trading_windows: bool,
    #[serde(default = "default_trading_windows_london")]
    pub trading_windows_london: Vec<(u32, u32)>,
    #[serde(default = "default_true")]
    pub enforce_spread_to_atr_hard: bool,
    #[serde(default = "default_max_spread_to_atr")]
    pub max_spread_to_atr_hard: f64,
    #[serde(default = "default_max_spread_to_tp")]
    pub max_spread_to_tp_hard: f64,
    #[serde(default = "default_max_sl_atr_ratio")]
    pub max_sl_atr_ratio: f64,
    #[serde(default = "default_true")]
    pub require_bars_coverage: bool,
    #[serde(default = "default_bars_min_m15")]
    pub bars_min_m15: usize,
    #[serde(default = "default_bars_min_h1")]
    pub bars_min_h1: usize,
    #[serde(default = "default_bars_max_age_m15_ms")]
    pub bars_max_age_m15_ms: i64,
    #[serde(default = "default_bars_max_age_h1_ms")]
    pub bars_max_age_h1_ms: i64,
    #[serde(default = "default_true")]
    pub require_htf_direction: bool,
    #[serde(default = "default_max_spread_pips")]
    pub max_spread_pips: f64,
    #[serde(default = "default_true")]
    pub enforce_fx_atr_range: bool,
    #[serde(default = "default_fx_atr_pips_min")]
    pub fx_atr_pips_min: f64,
    #[serde(default = "default_fx_atr_pips_max")]
    pub fx_atr_pips_max: f64,
    #[serde(default = "default_crypto_atr_pct_spike")]
    pub crypto_atr_pct_spike: f64,
    #[serde(default = "default_cfd_max_spread_relative")]
    pub cfd_max_spread_relative: f64,
    #[serde(default = "default_sweep_accept_buffer_pips")]
    pub sweep_accept_buffer_pips: f64,
    #[serde(default = "default_post_news_window_minutes")]
    pub post_news_regime_window_minutes: i64,
    #[serde(default = "default_event_governor_pre_minutes")]
    pub event_governor_pre_minutes: i64,
    #[serde(default = "default_event_governor_post_minutes")]
    pub event_governor_post_minutes: i64,
    #[serde(default = "default_news_impact_threshold")]
    pub event_governor_impact_threshold: u8,
    #[serde(default = "default_setup_ttl_fx_minutes")]
    pub setup_ttl_fx_minutes: i64,
    #[serde(default = "default_setup_ttl_crypto_minutes")]
    pub setup_ttl_crypto_minutes: i64,
    #[serde(default = "default_min_tp_fraction_to_liquidity")]
    pub min_tp_fraction_to_liquidity: f64,
    #[serde(default = "default_divergence_opposing_min_conf")]
    pub divergence_opposing_min_conf: f64,
    #[serde(default = "default_macd_flat_eps")]
    pub macd_flat_eps: f64,
    #[serde(default = "default_true")]
    pub confluence_enabled: bool,
    #[serde(default = "default_confluence_min_score")]
    pub confluence_min_score: f64,
    /// When set, forces advisory handling of smart_*/smc_*/htf_* FAILs even
    /// in strict mode.
    #[serde(default)]
    pub confluence_advisory_smart_fails: Option<bool>,
    /// When set, forces the strict checklist regardless of environment.
    #[serde(default)]
    pub strict_smart_checklist: Option<bool>,
    #[serde(default)]
    pub hard_min_confidence: Option<f64>,
    #[serde(default)]
    pub hard_min_strength: Option<f64>,
    #[serde(default)]
    pub profile: TradingProfile,
}

impl Default for GateConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("GateConfig defaults")
    }
}

/// Trade Manager behavior (scheduled scans + realtime path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTradingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub realtime_signal_execution_enabled: bool,
    #[serde(default = "default_realtime_min_confidence")]
    pub realtime_min_confidence: f64,
    #[serde(default = "default_realtime_min_strength")]
    pub realtime_min_strength: f64,
    #[serde(default = "default_true")]
    pub realtime_require_layers18: bool,
    #[serde(default)]
    pub smart_strong: bool,
    #[serde(default = "default_smart_min_confidence")]
    pub smart_min_confidence: f64,
    #[serde(default = "default_smart_min_strength")]
    pub smart_min_strength: f64,
    #[serde(default = "default_smart_min_decision_score")]
    pub smart_min_decision_score: f64,
    #[serde(default = "default_true")]
    pub smart_exit_enabled: bool,
    #[serde(default = "default_smart_exit_min_confidence")]
    pub smart_exit_min_confidence: f64,
    #[serde(default = "default_smart_exit_min_strength")]
    pub smart_exit_min_strength: f64,
    #[serde(default = "default_smart_exit_min_decision_score")]
    pub smart_exit_min_decision_score: f64,
    #[serde(default = "default_smart_exit_recheck_ms")]
    pub smart_exit_recheck_ms: i64,
    #[serde(default = "default_true")]
    pub dynamic_universe_enabled: bool,
    #[serde(default = "default_universe_max_age_ms")]
    pub universe_max_age_ms: i64,
    #[serde(default = "default_universe_max_symbols")]
    pub universe_max_symbols: usize,
    #[serde(default = "default_max_new_trades_per_cycle")]
    pub max_new_trades_per_cycle: usize,
    #[serde(default = "default_realtime_debounce_ms")]
    pub realtime_execution_debounce_ms: i64,
    #[serde(default = "default_realtime_cooldown_ms")]
    pub realtime_trade_cooldown_ms: i64,
    #[serde(default = "default_signal_check_interval_ms")]
    pub signal_check_interval_ms: i64,
    #[serde(default = "default_monitoring_interval_ms")]
    pub monitoring_interval_ms: i64,
    #[serde(default = "default_signal_generation_interval_ms")]
    pub signal_generation_interval_ms: i64,
    /// Asset classes eligible for auto-trading.
    #[serde(default = "default_auto_asset_classes")]
    pub asset_classes: Vec<String>,
}

impl Default for AutoTradingConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("AutoTradingConfig defaults")
    }
}

/// Data quality guard policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_true")]
    pub auto_reenable: bool,
    #[serde(default = "default_auto_reenable_min_score")]
    pub auto_reenable_min_score: f64,
    #[serde(default = "default_auto_reenable_min_healthy")]
    pub auto_reenable_min_healthy_count: u32,
    #[serde(default = "default_auto_reenable_window_ms")]
    pub auto_reenable_window_ms: i64,
    #[serde(default = "default_breaker_duration_ms")]
    pub breaker_duration_ms: i64,
    #[serde(default = "default_quality_ttl_ms")]
    pub freshness_ttl_ms: i64,
    #[serde(default = "default_quality_bars")]
    pub bars_per_timeframe: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("QualityConfig defaults")
    }
}

/// Execution engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_slippage_pips")]
    pub max_slippage_pips: f64,
    #[serde(default = "default_true")]
    pub smart_trade_supervisor_enabled: bool,
    #[serde(default = "default_smart_exit_min_profit_pct")]
    pub smart_exit_min_profit_pct: f64,
    #[serde(default = "default_smart_exit_news_minutes")]
    pub smart_exit_news_minutes: i64,
    #[serde(default = "default_modify_throttle_ms")]
    pub broker_modify_throttle_ms: i64,
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: i64,
    #[serde(default = "default_broker_deadline_ms")]
    pub broker_deadline_ms: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("ExecutionConfig defaults")
    }
}

/// Signal validity lifecycle bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidityConfig {
    #[serde(default = "default_validity_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_min_validity_ms")]
    pub min_ttl_ms: i64,
    #[serde(default = "default_max_validity_ms")]
    pub max_ttl_ms: i64,
}

impl Default for ValidityConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("ValidityConfig defaults")
    }
}

/// EA bridge behavior (agent-facing policy + background scans).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EaConfig {
    #[serde(default)]
    pub ea_only_mode: bool,
    #[serde(default = "default_ea_min_confidence")]
    pub signal_min_confidence: f64,
    #[serde(default = "default_ea_min_strength")]
    pub signal_min_strength: f64,
    #[serde(default = "default_layers18_min_confluence")]
    pub layers18_min_confluence: f64,
    #[serde(default)]
    pub allow_wait_monitor_execution: bool,
    #[serde(default = "default_true")]
    pub dynamic_trailing_enabled: bool,
    #[serde(default)]
    pub partial_close_enabled: bool,
    #[serde(default)]
    pub session_strict: bool,
    #[serde(default = "default_true")]
    pub background_signals: bool,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: i64,
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
    #[serde(default = "default_scan_symbol_max_age_ms")]
    pub scan_symbol_max_age_ms: i64,
    #[serde(default = "default_scan_symbols_max")]
    pub scan_symbols_max: usize,
    #[serde(default)]
    pub scan_allow_all_symbols: bool,
    #[serde(default)]
    pub allow_all_symbols: bool,
    #[serde(default)]
    pub require_realtime_data: bool,
    #[serde(default = "default_true")]
    pub allow_synthetic_data: bool,
}

impl Default for EaConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("EaConfig defaults")
    }
}

/// Quote telemetry retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_quote_retention_minutes")]
    pub quote_retention_minutes: i64,
    #[serde(default = "default_quote_max_points")]
    pub quote_max_points: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("TelemetryConfig defaults")
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level runtime configuration for the Meridian engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub account_mode: AccountMode,
    #[serde(default)]
    pub environment: Environment,

    /// Configured scan universe (union with dynamic EA symbols when enabled).
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub auto_trading: AutoTradingConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub validity: ValidityConfig,
    #[serde(default)]
    pub ea: EaConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("EngineConfig defaults")
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;
        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            trading_mode = %config.trading_mode,
            "engine config loaded"
        );
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Overlay the recognized environment variables on top of the file
    /// config. Unset or unparsable variables leave the field untouched.
    pub fn apply_env(&mut self) {
        fn env_f64(key: &str) -> Option<f64> {
            std::env::var(key).ok()?.trim().parse().ok()
        }
        fn env_i64(key: &str) -> Option<i64> {
            std::env::var(key).ok()?.trim().parse().ok()
        }
        fn env_usize(key: &str) -> Option<usize> {
            std::env::var(key).ok()?.trim().parse().ok()
        }
        fn env_bool(key: &str) -> Option<bool> {
            match std::env::var(key).ok()?.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        }

        if let Ok(env) = std::env::var("ENGINE_ENV") {
            self.environment = Environment::parse(&env);
        }

        // --- Signal validity -------------------------------------------------
        if let Some(v) = env_f64("SIGNAL_VALIDITY_MULTIPLIER") {
            self.validity.multiplier = v;
        }
        if let Some(v) = env_i64("SIGNAL_MIN_VALIDITY_MS") {
            self.validity.min_ttl_ms = v;
        }
        if let Some(v) = env_i64("SIGNAL_MAX_VALIDITY_MS") {
            self.validity.max_ttl_ms = v;
        }

        // --- Gate ------------------------------------------------------------
        if let Some(v) = env_f64("SIGNAL_HARD_MIN_CONFIDENCE") {
            self.gate.hard_min_confidence = Some(v);
        }
        if let Some(v) = env_f64("SIGNAL_HARD_MIN_STRENGTH") {
            self.gate.hard_min_strength = Some(v);
        }
        if let Some(v) = env_f64("SIGNAL_CONFLUENCE_MIN_SCORE") {
            self.gate.confluence_min_score = v;
        }
        if let Some(v) = env_bool("SIGNAL_CONFLUENCE_ENABLED") {
            self.gate.confluence_enabled = v;
        }
        if let Some(v) = env_bool("SIGNAL_CONFLUENCE_ADVISORY_SMART_FAILS") {
            self.gate.confluence_advisory_smart_fails = Some(v);
        }
        if let Some(v) = env_bool("EA_STRICT_SMART_CHECKLIST") {
            self.gate.strict_smart_checklist = Some(v);
        }
        if let Some(v) = env_f64("FX_ATR_PIPS_MIN") {
            self.gate.fx_atr_pips_min = v;
        }
        if let Some(v) = env_f64("FX_ATR_PIPS_MAX") {
            self.gate.fx_atr_pips_max = v;
        }
        if let Some(v) = env_f64("CRYPTO_ATR_PCT_SPIKE") {
            self.gate.crypto_atr_pct_spike = v;
        }
        if let Some(v) = env_f64("CFD_MAX_SPREAD_RELATIVE") {
            self.gate.cfd_max_spread_relative = v;
        }
        if let Some(v) = env_f64("SWEEP_ACCEPT_BUFFER_PIPS") {
            self.gate.sweep_accept_buffer_pips = v;
        }
        if let Some(v) = env_i64("POST_NEWS_REGIME_WINDOW_MINUTES") {
            self.gate.post_news_regime_window_minutes = v;
        }
        if let Some(v) = env_i64("EVENT_GOVERNOR_PRE_MINUTES") {
            self.gate.event_governor_pre_minutes = v;
        }
        if let Some(v) = env_i64("EVENT_GOVERNOR_POST_MINUTES") {
            self.gate.event_governor_post_minutes = v;
        }
        if let Some(v) = env_i64("EVENT_GOVERNOR_IMPACT_THRESHOLD") {
            self.gate.event_governor_impact_threshold = v.clamp(1, 5) as u8;
        }
        if let Some(v) = env_i64("SIGNAL_SETUP_TTL_MINUTES") {
            self.gate.setup_ttl_fx_minutes = v;
        }
        if let Some(v) = env_f64("SIGNAL_MAX_SL_ATR_RATIO") {
            self.gate.max_sl_atr_ratio = v;
        }
        if let Some(v) = env_f64("SIGNAL_MIN_TP_FRACTION_TO_LIQUIDITY") {
            self.gate.min_tp_fraction_to_liquidity = v;
        }
        if let Some(v) = env_f64("SIGNAL_DIVERGENCE_OPPOSING_MIN_CONF") {
            self.gate.divergence_opposing_min_conf = v;
        }
        if let Some(v) = env_f64("SIGNAL_MACD_FLAT_EPS") {
            self.gate.macd_flat_eps = v;
        }
        if let Ok(profile) = std::env::var("AUTO_TRADING_PROFILE") {
            self.gate.profile = TradingProfile::parse(&profile);
        }

        // --- EA bridge -------------------------------------------------------
        if let Some(v) = env_bool("EA_ONLY_MODE") {
            self.ea.ea_only_mode = v;
        }
        if let Some(v) = env_f64("EA_SIGNAL_MIN_CONFIDENCE") {
            self.ea.signal_min_confidence = v;
        }
        if let Some(v) = env_f64("EA_SIGNAL_MIN_STRENGTH") {
            self.ea.signal_min_strength = v;
        }
        if let Some(v) = env_f64("EA_SIGNAL_LAYERS18_MIN_CONFLUENCE") {
            self.ea.layers18_min_confluence = v;
        }
        if let Some(v) = env_bool("EA_SIGNAL_ALLOW_WAIT_MONITOR") {
            self.ea.allow_wait_monitor_execution = v;
        }
        if let Some(v) = env_bool("EA_DYNAMIC_TRAILING_ENABLED") {
            self.ea.dynamic_trailing_enabled = v;
        }
        if let Some(v) = env_bool("EA_PARTIAL_CLOSE_ENABLED") {
            self.ea.partial_close_enabled = v;
        }
        if let Some(v) = env_bool("EA_SESSION_STRICT") {
            self.ea.session_strict = v;
        }
        if let Some(v) = env_bool("EA_BACKGROUND_SIGNALS") {
            self.ea.background_signals = v;
        }
        if let Some(v) = env_i64("EA_SCAN_INTERVAL_MS") {
            self.ea.scan_interval_ms = v;
        }
        if let Some(v) = env_usize("EA_SCAN_BATCH_SIZE") {
            self.ea.scan_batch_size = v;
        }
        if let Some(v) = env_i64("EA_SCAN_SYMBOL_MAX_AGE_MS") {
            self.ea.scan_symbol_max_age_ms = v;
        }
        if let Some(v) = env_usize("EA_SCAN_SYMBOLS_MAX") {
            self.ea.scan_symbols_max = v;
        }
        if let Some(v) = env_bool("EA_SCAN_ALLOW_ALL_SYMBOLS") {
            self.ea.scan_allow_all_symbols = v;
        }
        if let Some(v) = env_bool("ALLOW_ALL_SYMBOLS") {
            self.ea.allow_all_symbols = v;
        }
        if let Some(v) = env_bool("REQUIRE_REALTIME_DATA") {
            self.ea.require_realtime_data = v;
        }
        if let Some(v) = env_bool("ALLOW_SYNTHETIC_DATA") {
            self.ea.allow_synthetic_data = v;
        }

        // --- Auto trading ----------------------------------------------------
        if let Some(v) = env_bool("AUTO_TRADING_ENABLED") {
            self.auto_trading.enabled = v;
        }
        if let Some(v) = env_bool("AUTO_TRADING_REALTIME_EXECUTION") {
            self.auto_trading.realtime_signal_execution_enabled = v;
        }
        if let Some(v) = env_f64("AUTO_TRADING_REALTIME_MIN_CONFIDENCE") {
            self.auto_trading.realtime_min_confidence = v;
        }
        if let Some(v) = env_f64("AUTO_TRADING_REALTIME_MIN_STRENGTH") {
            self.auto_trading.realtime_min_strength = v;
        }
        if let Some(v) = env_bool("AUTO_TRADING_REALTIME_REQUIRE_LAYERS18") {
            self.auto_trading.realtime_require_layers18 = v;
        }
        if let Some(v) = env_bool("AUTO_TRADING_SMART_STRONG") {
            self.auto_trading.smart_strong = v;
        }
        if let Some(v) = env_i64("AUTO_TRADING_REALTIME_DEBOUNCE_MS") {
            self.auto_trading.realtime_execution_debounce_ms = v;
        }
        if let Some(v) = env_i64("AUTO_TRADING_REALTIME_COOLDOWN_MS") {
            self.auto_trading.realtime_trade_cooldown_ms = v;
        }
        if let Some(v) = env_usize("AUTO_TRADING_MAX_NEW_TRADES_PER_CYCLE") {
            self.auto_trading.max_new_trades_per_cycle = v;
        }

        // --- Telemetry & supervision ----------------------------------------
        if let Some(v) = env_i64("QUOTE_TELEMETRY_RETENTION_MINUTES") {
            self.telemetry.quote_retention_minutes = v;
        }
        if let Some(v) = env_usize("QUOTE_TELEMETRY_MAX_POINTS") {
            self.telemetry.quote_max_points = v;
        }
        if let Some(v) = env_bool("SMART_TRADE_SUPERVISOR_ENABLED") {
            self.execution.smart_trade_supervisor_enabled = v;
        }
        if let Some(v) = env_f64("SMART_EXIT_MIN_PROFIT_PCT") {
            self.execution.smart_exit_min_profit_pct = v;
        }
        if let Some(v) = env_i64("SMART_EXIT_NEWS_MINUTES") {
            self.execution.smart_exit_news_minutes = v;
        }
    }

    /// Resolved strict-checklist flag: explicit override wins, otherwise
    /// strict only in production EA-only deployments.
    pub fn strict_confluence(&self) -> bool {
        if let Some(explicit) = self.gate.strict_smart_checklist {
            return explicit;
        }
        if self.gate.confluence_advisory_smart_fails == Some(true) {
            return false;
        }
        self.environment == Environment::Production && self.ea.ea_only_mode
    }

    /// Setup TTL for a signal on `asset_class`, in minutes.
    pub fn setup_ttl_minutes(&self, asset_class: crate::types::AssetClass) -> i64 {
        match asset_class {
            crate::types::AssetClass::Crypto => self.gate.setup_ttl_crypto_minutes,
            _ => self.gate.setup_ttl_fx_minutes,
        }
    }
}

// =============================================================================
// Server policy payload (returned by heartbeat / agent-config / signal APIs)
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPolicy {
    pub authority: PolicyAuthority,
    pub gates: PolicyGates,
    pub execution: PolicyExecution,
    pub trade_management: PolicyTradeManagement,
    pub runtime: PolicyRuntime,
    pub auto_trading: PolicyAutoTrading,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAuthority {
    pub decision: &'static str,
    pub execution: &'static str,
    pub management: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyGates {
    pub news_blackout_minutes: i64,
    pub news_blackout_impact_threshold: u8,
    pub enforce_trading_windows: bool,
    pub trading_windows_london: Vec<(u32, u32)>,
    pub enforce_spread_to_atr_hard: bool,
    pub max_spread_to_atr_hard: f64,
    pub max_spread_to_tp_hard: f64,
    pub require_bars_coverage: bool,
    pub bars_min_m15: usize,
    pub bars_min_h1: usize,
    pub bars_max_age_m15_ms: i64,
    pub bars_max_age_h1_ms: i64,
    pub require_htf_direction: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyExecution {
    pub requires_enter_state: bool,
    pub min_confidence: f64,
    pub min_strength: f64,
    pub require_layers18: bool,
    pub allow_wait_monitor_execution: bool,
    pub asset_classes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTradeManagement {
    pub dynamic_trailing_enabled: bool,
    pub partial_close_enabled: bool,
    pub session_strict: bool,
    pub news_guard: bool,
    pub liquidity_guard: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRuntime {
    pub require_realtime_data: bool,
    pub allow_synthetic_data: bool,
    pub allow_all_symbols: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAutoTrading {
    pub enabled: bool,
    pub realtime_signal_execution_enabled: bool,
    pub max_new_trades_per_cycle: usize,
}

impl EngineConfig {
    /// Build the policy payload that agents poll on heartbeat.
    pub fn server_policy(&self) -> ServerPolicy {
        ServerPolicy {
            authority: PolicyAuthority {
                decision: "server",
                execution: "server",
                management: "server",
            },
            gates: PolicyGates {
                news_blackout_minutes: self.gate.news_blackout_minutes,
                news_blackout_impact_threshold: self.gate.news_blackout_impact_threshold,
                enforce_trading_windows: self.gate.enforce_trading_windows,
                trading_windows_london: self.gate.trading_windows_london.clone(),
                enforce_spread_to_atr_hard: self.gate.enforce_spread_to_atr_hard,
                max_spread_to_atr_hard: self.gate.max_spread_to_atr_hard,
                max_spread_to_tp_hard: self.gate.max_spread_to_tp_hard,
                require_bars_coverage: self.gate.require_bars_coverage,
                bars_min_m15: self.gate.bars_min_m15,
                bars_min_h1: self.gate.bars_min_h1,
                bars_max_age_m15_ms: self.gate.bars_max_age_m15_ms,
                bars_max_age_h1_ms: self.gate.bars_max_age_h1_ms,
                require_htf_direction: self.gate.require_htf_direction,
            },
            execution: PolicyExecution {
                requires_enter_state: !self.ea.allow_wait_monitor_execution,
                min_confidence: self.ea.signal_min_confidence,
                min_strength: self.ea.signal_min_strength,
                require_layers18: self.auto_trading.realtime_require_layers18,
                allow_wait_monitor_execution: self.ea.allow_wait_monitor_execution,
                asset_classes: self.auto_trading.asset_classes.clone(),
            },
            trade_management: PolicyTradeManagement {
                dynamic_trailing_enabled: self.ea.dynamic_trailing_enabled,
                partial_close_enabled: self.ea.partial_close_enabled,
                session_strict: self.ea.session_strict,
                news_guard: self.execution.smart_trade_supervisor_enabled,
                liquidity_guard: self.execution.smart_trade_supervisor_enabled,
            },
            runtime: PolicyRuntime {
                require_realtime_data: self.ea.require_realtime_data,
                allow_synthetic_data: self.ea.allow_synthetic_data,
                allow_all_symbols: self.ea.allow_all_symbols,
            },
            auto_trading: PolicyAutoTrading {
                enabled: self.auto_trading.enabled,
                realtime_signal_execution_enabled: self
                    .auto_trading
                    .realtime_signal_execution_enabled,
                max_new_trades_per_cycle: self.auto_trading.max_new_trades_per_cycle,
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.risk.max_concurrent_trades, 3);
        assert!((cfg.gate.max_spread_pips - 2.4).abs() < f64::EPSILON);
        assert!((cfg.gate.confluence_min_score - 62.0).abs() < f64::EPSILON);
        assert_eq!(cfg.auto_trading.max_new_trades_per_cycle, 1);
        assert_eq!(cfg.auto_trading.realtime_trade_cooldown_ms, 180_000);
        assert_eq!(cfg.quality.auto_reenable_min_healthy_count, 2);
        assert_eq!(cfg.telemetry.quote_max_points, 2_400);
        assert_eq!(cfg.ea.scan_batch_size, 180);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert!((cfg.gate.fx_atr_pips_min - 3.0).abs() < f64::EPSILON);
        assert!(cfg.gate.confluence_enabled);
        assert_eq!(cfg.validity.min_ttl_ms, 30_000);
        assert_eq!(cfg.validity.max_ttl_ms, 86_400_000);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Live", "symbols": ["EURUSD"],
                        "risk": { "max_concurrent_trades": 5 } }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert_eq!(cfg.symbols, vec!["EURUSD"]);
        assert_eq!(cfg.risk.max_concurrent_trades, 5);
        assert!((cfg.risk.risk_per_trade - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(
            cfg.risk.max_concurrent_trades,
            cfg2.risk.max_concurrent_trades
        );
        assert_eq!(cfg.trading_mode, cfg2.trading_mode);
    }

    #[test]
    fn strict_confluence_matrix() {
        let mut cfg = EngineConfig::default();
        assert!(!cfg.strict_confluence());

        cfg.environment = Environment::Production;
        cfg.ea.ea_only_mode = true;
        assert!(cfg.strict_confluence());

        cfg.gate.confluence_advisory_smart_fails = Some(true);
        assert!(!cfg.strict_confluence());

        cfg.gate.strict_smart_checklist = Some(true);
        assert!(cfg.strict_confluence());
    }

    #[test]
    fn setup_ttl_depends_on_asset_class() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.setup_ttl_minutes(crate::types::AssetClass::Forex), 25);
        assert_eq!(cfg.setup_ttl_minutes(crate::types::AssetClass::Crypto), 45);
    }

    #[test]
    fn server_policy_reflects_config() {
        let mut cfg = EngineConfig::default();
        cfg.auto_trading.enabled = true;
        let policy = cfg.server_policy();
        assert!(policy.auto_trading.enabled);
        assert_eq!(policy.gates.bars_min_m15, 60);
        assert!(policy.execution.requires_enter_state);
    }
}
