// =============================================================================
// REST API — broker bridge endpoints (Axum 0.7)
// =============================================================================
//
// Agents and dashboard clients use these; paths are stable. Write endpoints
// and non-public read endpoints require the `x-api-key` header. Rate
// limiting and role gating live in the outer deployment, not here.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::ApiKey;
use crate::app_state::EngineContext;
use crate::bridge::{Bar, MarketDataBridge, MarketSnapshot, NewsEvent, Quote, SnapshotRequest};
use crate::errors::EngineError;
use crate::signal::{AnalysisMode, GenerateOptions};
use crate::types::{Timeframe, TradingMode};

// =============================================================================
// Router construction
// =============================================================================

pub fn router(ctx: Arc<EngineContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Session lifecycle ───────────────────────────────────────
        .route("/broker/bridge/:broker/session/connect", post(session_connect))
        .route("/broker/bridge/:broker/session/disconnect", post(session_disconnect))
        .route("/broker/bridge/:broker/agent/heartbeat", post(agent_heartbeat))
        .route("/broker/bridge/:broker/agent/transaction", post(agent_transaction))
        .route("/broker/bridge/:broker/agent/manage", post(agent_manage))
        .route("/broker/bridge/:broker/agent/commands", get(agent_commands))
        .route("/broker/bridge/:broker/agent/config", get(agent_config))
        // ── Market ingestion ────────────────────────────────────────
        .route("/broker/bridge/:broker/market/quotes", post(ingest_quotes).get(read_quotes))
        .route("/broker/bridge/:broker/market/bars", post(ingest_bars).get(read_bars))
        .route("/broker/bridge/:broker/market/candles", get(read_candles))
        .route("/broker/bridge/:broker/market/snapshot", post(ingest_snapshot).get(read_snapshot))
        .route("/broker/bridge/:broker/market/snapshot/request", post(request_snapshot))
        .route("/broker/bridge/:broker/market/news", post(ingest_news).get(read_news))
        .route("/broker/bridge/:broker/market/symbols", post(ingest_symbols).get(read_symbols))
        .route(
            "/broker/bridge/:broker/market/active-symbols",
            post(set_active_symbols).get(read_active_symbols),
        )
        .route("/broker/bridge/:broker/market/candle-analysis", get(read_candle_analysis))
        // ── Signals ─────────────────────────────────────────────────
        .route("/broker/bridge/:broker/signal/get", get(signal_get))
        .route("/broker/bridge/:broker/analysis/get", get(analysis_get))
        // ── Diagnostics ─────────────────────────────────────────────
        .route("/broker/bridge/status", get(bridge_status))
        .route("/broker/bridge/statistics", get(bridge_statistics))
        .route("/broker/bridge/sessions", get(bridge_sessions))
        // ── Control ─────────────────────────────────────────────────
        .route("/broker/bridge/control/auto-trading/start", post(auto_trading_start))
        .route("/broker/bridge/control/auto-trading/stop", post(auto_trading_stop))
        .route("/broker/bridge/control/pause", post(control_pause))
        .route("/broker/bridge/control/resume", post(control_resume))
        .route("/broker/bridge/control/kill", post(control_kill))
        .route("/broker/bridge/config", get(read_config))
        // ── WebSocket feed ──────────────────────────────────────────
        .route("/broker/bridge/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(ctx)
}

fn validation_error(err: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": err.to_string(), "class": err.class() })),
    )
}

// =============================================================================
// Session lifecycle
// =============================================================================

async fn session_connect(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Json(connect): Json<crate::bridge::SessionConnect>,
) -> impl IntoResponse {
    let now = MarketDataBridge::now_ms();
    let session_id = ctx.bridge.sessions.register(&broker, connect, now);
    ctx.increment_version();
    let policy = ctx.config.read().server_policy();
    Json(json!({ "sessionId": session_id, "serverPolicy": policy }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisconnectBody {
    account_number: String,
}

async fn session_disconnect(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Json(body): Json<DisconnectBody>,
) -> impl IntoResponse {
    let removed = ctx.bridge.sessions.disconnect(&broker, &body.account_number);
    ctx.increment_version();
    Json(json!({ "removed": removed }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatBody {
    account_number: String,
    #[serde(default)]
    equity: Option<f64>,
    #[serde(default)]
    balance: Option<f64>,
}

async fn agent_heartbeat(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Json(body): Json<HeartbeatBody>,
) -> impl IntoResponse {
    let now = MarketDataBridge::now_ms();
    let known = ctx.bridge.sessions.heartbeat(
        &broker,
        &body.account_number,
        body.equity,
        body.balance,
        now,
    );
    let policy = ctx.config.read().server_policy();
    Json(json!({ "ok": known, "serverPolicy": policy }))
}

// =============================================================================
// Agent transaction reports & command polling
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReport {
    trade_id: String,
    /// "fill" or "close".
    kind: String,
    price: f64,
    #[serde(default)]
    latency_ms: Option<i64>,
}

async fn agent_transaction(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(_broker): Path<String>,
    Json(report): Json<TransactionReport>,
) -> impl IntoResponse {
    match report.kind.as_str() {
        "fill" => {
            let config = ctx.config.read().clone();
            let updated = ctx.execution.book.update(&report.trade_id, |trade| {
                let info = crate::pairs::lookup(&trade.pair);
                let slippage = info.to_pips(report.price - trade.execution.requested_price);
                trade.execution.filled_price = report.price;
                trade.execution.slippage_pips = slippage;
                trade.execution.slippage_exceeded =
                    slippage.abs() > config.execution.max_slippage_pips;
                if let Some(latency) = report.latency_ms {
                    trade.execution.latency_ms = latency;
                }
            });
            ctx.increment_version();
            Json(json!({ "ok": updated })).into_response()
        }
        "close" => {
            // Agent already closed on the venue: acknowledge locally so the
            // close path skips the broker round-trip.
            ctx.execution.book.update(&report.trade_id, |trade| {
                trade.manual_close_acknowledged = true;
            });
            let closed = ctx
                .execution
                .close_trade(&report.trade_id, report.price, "agent_close", None)
                .await;
            ctx.increment_version();
            Json(json!({ "ok": closed.is_some() })).into_response()
        }
        other => validation_error(EngineError::Validation(format!(
            "unknown transaction kind {other:?}"
        )))
        .into_response(),
    }
}

#[derive(Deserialize)]
struct CommandsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn agent_manage(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
) -> impl IntoResponse {
    let commands = ctx.bridge.commands.drain_management(&broker, 20);
    let snapshot_requests = ctx.bridge.commands.consume_snapshot_requests(&broker);
    Json(json!({ "commands": commands, "snapshotRequests": snapshot_requests }))
}

async fn agent_commands(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Query(query): Query<CommandsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let commands = ctx.bridge.commands.drain_management(&broker, limit);
    Json(json!({ "commands": commands }))
}

async fn agent_config(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
) -> impl IntoResponse {
    let policy = ctx.config.read().server_policy();
    let session = ctx.bridge.sessions.latest_session(&broker);
    Json(json!({ "serverPolicy": policy, "session": session }))
}

// =============================================================================
// Market ingestion
// =============================================================================

#[derive(Deserialize)]
struct QuoteBatch {
    quotes: Vec<Quote>,
}

async fn ingest_quotes(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Json(batch): Json<QuoteBatch>,
) -> impl IntoResponse {
    let now = MarketDataBridge::now_ms();
    match ctx.bridge.record_quotes(&broker, batch.quotes, now) {
        Ok(accepted) => Json(json!({ "accepted": accepted })).into_response(),
        Err(err) => validation_error(err).into_response(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BarBatch {
    symbol: String,
    timeframe: Timeframe,
    bars: Vec<Bar>,
}

async fn ingest_bars(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Json(batch): Json<BarBatch>,
) -> impl IntoResponse {
    match ctx
        .bridge
        .record_bars(&broker, &batch.symbol, batch.timeframe, batch.bars)
    {
        Ok(accepted) => Json(json!({ "accepted": accepted })).into_response(),
        Err(err) => validation_error(err).into_response(),
    }
}

async fn ingest_snapshot(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Json(snapshot): Json<MarketSnapshot>,
) -> impl IntoResponse {
    let now = MarketDataBridge::now_ms();
    match ctx.bridge.record_snapshot(&broker, snapshot, now) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(err) => validation_error(err).into_response(),
    }
}

#[derive(Deserialize)]
struct NewsBatch {
    events: Vec<NewsEvent>,
}

async fn ingest_news(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Json(batch): Json<NewsBatch>,
) -> impl IntoResponse {
    match ctx.bridge.record_news(&broker, batch.events) {
        Ok(accepted) => Json(json!({ "accepted": accepted })).into_response(),
        Err(err) => validation_error(err).into_response(),
    }
}

#[derive(Deserialize)]
struct SymbolsBody {
    symbols: Vec<String>,
}

async fn ingest_symbols(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Json(body): Json<SymbolsBody>,
) -> impl IntoResponse {
    let now = MarketDataBridge::now_ms();
    match ctx.bridge.record_symbols(&broker, body.symbols, now) {
        Ok(accepted) => Json(json!({ "accepted": accepted })).into_response(),
        Err(err) => validation_error(err).into_response(),
    }
}

async fn set_active_symbols(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Json(body): Json<SymbolsBody>,
) -> impl IntoResponse {
    let now = MarketDataBridge::now_ms();
    ctx.bridge.symbols.set_active(&broker, &body.symbols, now);
    ctx.runner.ingest_symbols(&broker, &body.symbols);
    Json(json!({ "active": body.symbols.len() }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRequestBody {
    symbol: String,
    #[serde(default)]
    timeframes: Vec<String>,
}

async fn request_snapshot(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Json(body): Json<SnapshotRequestBody>,
) -> impl IntoResponse {
    ctx.bridge.commands.request_snapshot(
        &broker,
        SnapshotRequest {
            symbol: body.symbol,
            timeframes: body.timeframes,
            requested_at: chrono::Utc::now().to_rfc3339(),
        },
    );
    Json(json!({ "queued": true }))
}

// =============================================================================
// Market read APIs
// =============================================================================

#[derive(Deserialize)]
struct SymbolQuery {
    #[serde(default)]
    symbol: Option<String>,
}

async fn read_quotes(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Query(query): Query<SymbolQuery>,
) -> impl IntoResponse {
    match query.symbol {
        Some(symbol) => Json(json!({ "quote": ctx.bridge.quotes.latest(&broker, &symbol) })),
        None => Json(json!({ "symbols": ctx.bridge.quotes.symbols(&broker) })),
    }
}

#[derive(Deserialize)]
struct BarsQuery {
    symbol: String,
    timeframe: String,
    #[serde(default)]
    count: Option<usize>,
}

async fn read_bars(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Query(query): Query<BarsQuery>,
) -> impl IntoResponse {
    let Some(timeframe) = Timeframe::parse(&query.timeframe) else {
        return validation_error(EngineError::Validation(format!(
            "unknown timeframe {:?}",
            query.timeframe
        )))
        .into_response();
    };
    let count = query.count.unwrap_or(120).min(500);
    // Stored ascending; newest-first at the API boundary.
    let mut bars = ctx.bridge.bars.recent(&broker, &query.symbol, timeframe, count);
    bars.reverse();
    Json(json!({ "bars": bars })).into_response()
}

async fn read_candles(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Query(query): Query<BarsQuery>,
) -> impl IntoResponse {
    let Some(timeframe) = Timeframe::parse(&query.timeframe) else {
        return validation_error(EngineError::Validation(format!(
            "unknown timeframe {:?}",
            query.timeframe
        )))
        .into_response();
    };
    let count = query.count.unwrap_or(120).min(500);
    let mut bars = ctx
        .bridge
        .bars
        .recent_closed(&broker, &query.symbol, timeframe, count);
    bars.reverse();
    Json(json!({ "candles": bars })).into_response()
}

async fn read_snapshot(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Query(query): Query<SymbolQuery>,
) -> impl IntoResponse {
    let Some(symbol) = query.symbol else {
        return validation_error(EngineError::Validation("symbol required".into()))
            .into_response();
    };
    Json(json!({ "snapshot": ctx.bridge.snapshots.latest(&broker, &symbol) })).into_response()
}

async fn read_news(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
) -> impl IntoResponse {
    Json(json!({ "events": ctx.bridge.snapshots.news(&broker) }))
}

async fn read_symbols(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
) -> impl IntoResponse {
    Json(json!({ "symbols": ctx.bridge.symbols.registered_symbols(&broker) }))
}

async fn read_active_symbols(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
) -> impl IntoResponse {
    let now = MarketDataBridge::now_ms();
    Json(json!({ "symbols": ctx.bridge.symbols.active_symbols(&broker, now) }))
}

async fn read_candle_analysis(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Query(query): Query<SymbolQuery>,
) -> impl IntoResponse {
    let Some(symbol) = query.symbol else {
        return validation_error(EngineError::Validation("symbol required".into()))
            .into_response();
    };
    let bars = ctx
        .bridge
        .bars
        .recent_closed(&broker, &symbol, Timeframe::M15, 80);
    Json(json!({ "analysis": crate::analyzers::analyze_candles(&bars) })).into_response()
}

// =============================================================================
// Signal endpoints
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalQuery {
    pair: String,
    #[serde(default)]
    auto_execute: Option<bool>,
    #[serde(default)]
    analysis_mode: Option<String>,
}

/// Signal for execution (EA-only path). With `autoExecute=true` the trade
/// manager gate runs and the payload carries the execution outcome.
async fn signal_get(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Query(query): Query<SignalQuery>,
) -> impl IntoResponse {
    let opts = GenerateOptions {
        broker: Some(broker.clone()),
        analysis_mode: AnalysisMode::Ea,
        data_quality_ttl_ms: None,
    };
    let signal = ctx.orchestrator.generate_signal(&query.pair, &opts).await;
    ctx.push_decision(
        &signal.pair,
        &signal
            .decision
            .as_ref()
            .map(|d| d.state.to_string())
            .unwrap_or_default(),
        signal.decision_score(),
    );

    let auto_execute = query.auto_execute.unwrap_or(false)
        && ctx.config.read().auto_trading.enabled
        && ctx.config.read().trading_mode == TradingMode::Live;

    if auto_execute {
        let execution = match ctx
            .trade_manager
            .evaluate_execution_gate(&broker, &signal, "signal_get", None)
        {
            Ok(()) => ctx.execution.execute_trade(&signal, &broker, "signal_get").await,
            Err(reason) => crate::execution::ExecutionOutcome {
                success: false,
                trade_id: None,
                reason: Some(reason),
                error_type: Some("validation".to_string()),
            },
        };
        return Json(json!({ "signal": signal, "execution": execution })).into_response();
    }

    Json(json!({ "signal": signal })).into_response()
}

/// Analysis snapshot: returns the signal even when it is not trade-valid.
async fn analysis_get(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Path(broker): Path<String>,
    Query(query): Query<SignalQuery>,
) -> impl IntoResponse {
    let mode = query
        .analysis_mode
        .as_deref()
        .map(AnalysisMode::parse)
        .unwrap_or(AnalysisMode::Ea);
    let opts = GenerateOptions {
        broker: Some(broker),
        analysis_mode: mode,
        data_quality_ttl_ms: None,
    };
    let signal = ctx.orchestrator.generate_signal(&query.pair, &opts).await;
    Json(json!({ "signal": signal }))
}

// =============================================================================
// Diagnostics
// =============================================================================

async fn bridge_status(State(ctx): State<Arc<EngineContext>>) -> impl IntoResponse {
    Json(ctx.build_status())
}

async fn bridge_statistics(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
) -> impl IntoResponse {
    let now = MarketDataBridge::now_ms();
    let brokers: std::collections::HashSet<String> = ctx
        .bridge
        .sessions
        .all_sessions()
        .into_iter()
        .map(|s| s.broker)
        .collect();
    let per_broker: serde_json::Map<String, serde_json::Value> = brokers
        .into_iter()
        .map(|b| {
            let stats = ctx.bridge.statistics(&b, now);
            (b, stats)
        })
        .collect();
    Json(json!({
        "brokers": per_broker,
        "pendingRealtime": ctx.runner.pending_count(),
        "stagedQuotes": ctx.bus.staged_quote_count(),
    }))
}

async fn bridge_sessions(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
) -> impl IntoResponse {
    Json(json!({ "sessions": ctx.bridge.sessions.all_sessions() }))
}

// =============================================================================
// Control
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutoTradingStartBody {
    broker: String,
    #[serde(default)]
    allow_disconnected: bool,
}

async fn auto_trading_start(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Json(body): Json<AutoTradingStartBody>,
) -> impl IntoResponse {
    match ctx
        .trade_manager
        .start_auto_trading(&body.broker, body.allow_disconnected)
    {
        Ok(()) => {
            ctx.config.write().auto_trading.enabled = true;
            ctx.increment_version();
            Json(json!({ "ok": true, "brokers": ctx.trade_manager.enabled_brokers() }))
                .into_response()
        }
        Err(reason) => validation_error(EngineError::Validation(reason)).into_response(),
    }
}

#[derive(Deserialize)]
struct AutoTradingStopBody {
    #[serde(default)]
    broker: Option<String>,
}

async fn auto_trading_stop(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
    Json(body): Json<AutoTradingStopBody>,
) -> impl IntoResponse {
    ctx.trade_manager.stop_auto_trading(body.broker.as_deref());
    ctx.increment_version();
    Json(json!({ "ok": true, "brokers": ctx.trade_manager.enabled_brokers() }))
}

async fn control_pause(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
) -> impl IntoResponse {
    ctx.config.write().trading_mode = TradingMode::Paused;
    ctx.increment_version();
    info!("trading paused via API");
    Json(json!({ "tradingMode": "Paused" }))
}

async fn control_resume(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
) -> impl IntoResponse {
    ctx.config.write().trading_mode = TradingMode::Live;
    ctx.increment_version();
    info!("trading resumed via API");
    Json(json!({ "tradingMode": "Live" }))
}

async fn control_kill(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
) -> impl IntoResponse {
    ctx.config.write().trading_mode = TradingMode::Killed;
    ctx.trade_manager.stop_auto_trading(None);
    ctx.increment_version();
    info!("kill switch engaged via API");
    Json(json!({ "tradingMode": "Killed" }))
}

async fn read_config(
    _auth: ApiKey,
    State(ctx): State<Arc<EngineContext>>,
) -> impl IntoResponse {
    let config = ctx.config.read();
    Json(json!({
        "tradingMode": config.trading_mode.to_string(),
        "accountMode": config.account_mode.to_string(),
        "symbols": config.symbols,
        "autoTrading": config.auto_trading,
        "serverPolicy": config.server_policy(),
    }))
}
