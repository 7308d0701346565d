// =============================================================================
// Meridian FX Nexus — Main Entry Point
// =============================================================================
//
// The engine starts in Demo + Paused mode for safety. Trading must be
// explicitly resumed via the control API after the EA agents connect.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analyzers;
mod api;
mod app_state;
mod bridge;
mod broadcast;
mod config;
mod errors;
mod execution;
mod gate;
mod indicators;
mod pairs;
mod persistence;
mod quality;
mod realtime;
mod risk;
mod signal;
mod trade_manager;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::EngineContext;
use crate::config::EngineConfig;
use crate::types::{AccountMode, TradingMode};

const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian FX Nexus — Starting Up                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = EngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });
    config.apply_env();

    // SAFETY: Force Demo + Paused on startup.
    config.trading_mode = TradingMode::Paused;
    config.account_mode = AccountMode::Demo;

    // Override the scan universe from env if available.
    if let Ok(pairs) = std::env::var("MERIDIAN_SYMBOLS") {
        config.symbols = pairs
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if std::env::var("MERIDIAN_API_KEY").unwrap_or_default().is_empty() {
        warn!("MERIDIAN_API_KEY is not set — API authentication is disabled");
    }

    info!(symbols = ?config.symbols, "Configured scan universe");
    info!(
        trading_mode = %config.trading_mode,
        account_mode = %config.account_mode,
        environment = ?config.environment,
        ea_only = config.ea.ea_only_mode,
        "Engine starting in SAFE mode (Demo + Paused)"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let ctx = EngineContext::build(config);

    // ── 3. Quote broadcast flush loop (coalesced batches) ────────────────
    tokio::spawn(crate::broadcast::run_quote_flush_loop(ctx.bus.clone()));

    // ── 4. Start the API server ──────────────────────────────────────────
    let bind_addr =
        std::env::var("MERIDIAN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    {
        let api_ctx = ctx.clone();
        let bind_addr = bind_addr.clone();
        tokio::spawn(async move {
            let app = api::rest::router(api_ctx);
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .expect("Failed to bind API server");
            info!(addr = %bind_addr, "API server listening");
            axum::serve(listener, app)
                .await
                .expect("API server failed");
        });
    }

    // ── 5. Trade supervision loop ────────────────────────────────────────
    {
        let supervisor = ctx.supervisor.clone();
        let interval_ms = ctx.config.read().auto_trading.monitoring_interval_ms;
        tokio::spawn(crate::execution::supervisor::run_supervision_loop(
            supervisor,
            interval_ms,
        ));
    }

    // ── 6. Realtime runner: event loop, revalidation, background scan ────
    tokio::spawn(ctx.runner.clone().run_event_loop());
    tokio::spawn(ctx.runner.clone().run_revalidation_loop());
    if ctx.config.read().ea.background_signals {
        tokio::spawn(ctx.runner.clone().run_background_scan());
    }

    // ── 7. Auto-trading (when pre-enabled via env/config) ────────────────
    if ctx.config.read().auto_trading.enabled {
        for broker in ["mt4", "mt5"] {
            if let Err(reason) = ctx.trade_manager.start_auto_trading(broker, true) {
                warn!(broker, reason = %reason, "auto-trading not started");
            }
        }
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = ctx.config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save engine config on shutdown");
    }

    info!("Meridian FX Nexus shut down complete.");
    Ok(())
}
