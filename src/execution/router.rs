// =============================================================================
// Broker Router — order transport abstraction
// =============================================================================
//
// Two implementations:
//   * QueueRouter — the EA-bridge path. Orders, modifies, and closes are
//     enqueued as management commands the agent drains over HTTP; fills are
//     acknowledged optimistically at the requested price and corrected when
//     the agent reports the transaction.
//   * HttpRouter — a signed REST gateway client with a hard per-request
//     deadline. A timeout surfaces as an error so the order path can roll
//     back exactly as on rejection.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::bridge::{CommandKind, ManagementCommand, MarketDataBridge};
use crate::types::Direction;

type HmacSha256 = Hmac<Sha256>;

/// Order payload handed to a router. `idempotency_key` always equals the
/// trade id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub broker: String,
    pub symbol: String,
    pub pair: String,
    pub direction: Direction,
    pub side: String,
    pub volume: f64,
    pub price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub comment: String,
    pub trade_id: String,
    pub idempotency_key: String,
    pub source: String,
    pub time_in_force: String,
}

/// Fill acknowledgement from a router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: String,
    pub filled_price: f64,
    pub latency_ms: i64,
    /// Route label for diagnostics (queue vs gateway id).
    pub route: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyPayload {
    pub broker: String,
    pub symbol: String,
    pub trade_id: String,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePayload {
    pub broker: String,
    pub symbol: String,
    pub trade_id: String,
    pub volume: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub positions_matched: u32,
    pub orphans: u32,
    pub checked_at: i64,
}

/// Transport seam. All calls honor an overall deadline; on timeout the order
/// path rolls back exactly as on error.
#[async_trait]
pub trait BrokerRouter: Send + Sync {
    async fn place_order(&self, payload: OrderPayload) -> Result<OrderAck>;
    async fn modify_position(&self, payload: ModifyPayload) -> Result<()>;
    async fn close_position(&self, payload: ClosePayload) -> Result<()>;
    async fn run_reconciliation(&self, broker: &str) -> Result<ReconcileSummary>;
    fn route_id(&self) -> &'static str;

    /// Connector identifiers served by this route.
    fn connector_ids(&self) -> Vec<String> {
        vec![self.route_id().to_string()]
    }

    /// Diagnostics payload for the status endpoint.
    fn status(&self) -> serde_json::Value {
        serde_json::json!({ "route": self.route_id(), "connectors": self.connector_ids() })
    }
}

// =============================================================================
// Market rules
// =============================================================================

/// Minimum order volume accepted by the venues we route to.
pub const MIN_VOLUME: f64 = 0.01;

/// Venue-level sanity validation applied before any router sees the order.
pub fn validate_order(payload: &OrderPayload) -> Result<(), String> {
    if payload.volume < MIN_VOLUME {
        return Err(format!(
            "volume {} below venue minimum {MIN_VOLUME}",
            payload.volume
        ));
    }
    if payload.price <= 0.0 {
        return Err("non-positive order price".to_string());
    }
    if !payload.direction.is_tradeable() {
        return Err("neutral direction".to_string());
    }
    let protective_ok = match payload.direction {
        Direction::Buy => payload.stop_loss < payload.price && payload.take_profit > payload.price,
        Direction::Sell => payload.stop_loss > payload.price && payload.take_profit < payload.price,
        Direction::Neutral => false,
    };
    if !protective_ok {
        return Err("protective levels on wrong side of price".to_string());
    }
    Ok(())
}

// =============================================================================
// QueueRouter
// =============================================================================

pub struct QueueRouter {
    bridge: Arc<MarketDataBridge>,
}

impl QueueRouter {
    pub fn new(bridge: Arc<MarketDataBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl BrokerRouter for QueueRouter {
    async fn place_order(&self, payload: OrderPayload) -> Result<OrderAck> {
        // The agent must be reachable; a dead session would strand the
        // command in the queue past the signal's useful life.
        let now_ms = MarketDataBridge::now_ms();
        if !self.bridge.sessions.is_connected(&payload.broker, now_ms) {
            anyhow::bail!("broker {} has no connected agent session", payload.broker);
        }

        let mut command = ManagementCommand::new(
            CommandKind::OpenOrder,
            payload.symbol.clone(),
            payload.trade_id.clone(),
        );
        command.direction = Some(payload.side.clone());
        command.volume = Some(payload.volume);
        command.price = Some(payload.price);
        command.stop_loss = Some(payload.stop_loss);
        command.take_profit = Some(payload.take_profit);
        command.comment = Some(payload.comment.clone());

        self.bridge
            .commands
            .enqueue_management(&payload.broker, vec![command]);

        info!(
            broker = %payload.broker,
            symbol = %payload.symbol,
            trade_id = %payload.trade_id,
            "order queued for agent"
        );

        // Optimistic acknowledgement at the requested price; the agent's
        // transaction report corrects the fill later.
        Ok(OrderAck {
            order_id: payload.trade_id.clone(),
            filled_price: payload.price,
            latency_ms: 0,
            route: "queue".to_string(),
        })
    }

    async fn modify_position(&self, payload: ModifyPayload) -> Result<()> {
        let mut command = ManagementCommand::new(
            CommandKind::ModifyProtection,
            payload.symbol.clone(),
            payload.trade_id.clone(),
        );
        command.stop_loss = payload.stop_loss;
        command.take_profit = payload.take_profit;
        self.bridge
            .commands
            .enqueue_management(&payload.broker, vec![command]);
        debug!(trade_id = %payload.trade_id, "protection modify queued");
        Ok(())
    }

    async fn close_position(&self, payload: ClosePayload) -> Result<()> {
        let mut command = ManagementCommand::new(
            CommandKind::ClosePosition,
            payload.symbol.clone(),
            payload.trade_id.clone(),
        );
        command.volume = payload.volume;
        command.comment = Some(payload.reason.clone());
        self.bridge
            .commands
            .enqueue_management(&payload.broker, vec![command]);
        info!(trade_id = %payload.trade_id, reason = %payload.reason, "close queued");
        Ok(())
    }

    async fn run_reconciliation(&self, broker: &str) -> Result<ReconcileSummary> {
        let now_ms = MarketDataBridge::now_ms();
        if !self.bridge.sessions.is_connected(broker, now_ms) {
            anyhow::bail!("broker {broker} disconnected; reconciliation skipped");
        }
        Ok(ReconcileSummary {
            positions_matched: 0,
            orphans: 0,
            checked_at: now_ms,
        })
    }

    fn route_id(&self) -> &'static str {
        "queue"
    }
}

// =============================================================================
// HttpRouter
// =============================================================================

/// Signed REST gateway client. The secret never appears in logs or query
/// strings; requests carry an HMAC-SHA256 signature header over the JSON
/// body.
pub struct HttpRouter {
    base_url: String,
    api_key: String,
    secret: String,
    client: reqwest::Client,
}

impl HttpRouter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
        deadline_ms: i64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(deadline_ms.max(1_000) as u64))
            .build()
            .expect("failed to build reqwest client");
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            secret: secret.into(),
            client,
        }
    }

    fn sign(&self, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn post_signed<T: Serialize>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<serde_json::Value> {
        let body = serde_json::to_string(payload).context("serialising router payload")?;
        let signature = self.sign(&body);
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-signature", signature)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;

        let status = resp.status();
        let value: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("parsing {path} response"))?;
        if !status.is_success() {
            anyhow::bail!("gateway {path} returned {status}: {value}");
        }
        Ok(value)
    }
}

#[async_trait]
impl BrokerRouter for HttpRouter {
    async fn place_order(&self, payload: OrderPayload) -> Result<OrderAck> {
        let started = std::time::Instant::now();
        let value = self.post_signed("/orders", &payload).await?;
        let order_id = value
            .get("orderId")
            .and_then(|v| v.as_str())
            .unwrap_or(&payload.trade_id)
            .to_string();
        let filled_price = value
            .get("filledPrice")
            .and_then(|v| v.as_f64())
            .unwrap_or(payload.price);
        Ok(OrderAck {
            order_id,
            filled_price,
            latency_ms: started.elapsed().as_millis() as i64,
            route: "gateway".to_string(),
        })
    }

    async fn modify_position(&self, payload: ModifyPayload) -> Result<()> {
        self.post_signed("/positions/modify", &payload).await?;
        Ok(())
    }

    async fn close_position(&self, payload: ClosePayload) -> Result<()> {
        self.post_signed("/positions/close", &payload).await?;
        Ok(())
    }

    async fn run_reconciliation(&self, broker: &str) -> Result<ReconcileSummary> {
        let value = self
            .post_signed("/reconcile", &serde_json::json!({ "broker": broker }))
            .await?;
        let summary = ReconcileSummary {
            positions_matched: value
                .get("matched")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            orphans: value.get("orphans").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            checked_at: chrono::Utc::now().timestamp_millis(),
        };
        if summary.orphans > 0 {
            warn!(broker = %broker, orphans = summary.orphans, "reconciliation found orphans");
        }
        Ok(summary)
    }

    fn route_id(&self) -> &'static str {
        "gateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastBus;
    use crate::config::EngineConfig;

    fn payload() -> OrderPayload {
        OrderPayload {
            broker: "mt5".to_string(),
            symbol: "EURUSD".to_string(),
            pair: "EURUSD".to_string(),
            direction: Direction::Buy,
            side: "BUY".to_string(),
            volume: 0.1,
            price: 1.0850,
            take_profit: 1.0900,
            stop_loss: 1.0820,
            comment: "meridian".to_string(),
            trade_id: "t-1".to_string(),
            idempotency_key: "t-1".to_string(),
            source: "auto".to_string(),
            time_in_force: "GTC".to_string(),
        }
    }

    #[test]
    fn market_rules_reject_bad_orders() {
        assert!(validate_order(&payload()).is_ok());

        let mut thin = payload();
        thin.volume = 0.001;
        assert!(validate_order(&thin).is_err());

        let mut inverted = payload();
        inverted.stop_loss = 1.0900;
        inverted.take_profit = 1.0820;
        assert!(validate_order(&inverted).is_err());

        let mut neutral = payload();
        neutral.direction = Direction::Neutral;
        assert!(validate_order(&neutral).is_err());
    }

    #[tokio::test]
    async fn queue_router_requires_connected_session() {
        let bridge = Arc::new(MarketDataBridge::new(
            &EngineConfig::default(),
            Arc::new(BroadcastBus::new()),
        ));
        let router = QueueRouter::new(bridge.clone());
        let err = router.place_order(payload()).await.unwrap_err();
        assert!(err.to_string().contains("no connected agent"));
        assert_eq!(bridge.commands.management_depth("mt5"), 0);
    }

    #[tokio::test]
    async fn queue_router_enqueues_open_command() {
        let bridge = Arc::new(MarketDataBridge::new(
            &EngineConfig::default(),
            Arc::new(BroadcastBus::new()),
        ));
        bridge.sessions.register(
            "mt5",
            crate::bridge::SessionConnect {
                account_number: "1".to_string(),
                account_mode: Default::default(),
                server: String::new(),
                currency: String::new(),
                equity: 10_000.0,
                balance: 10_000.0,
                ea: String::new(),
            },
            MarketDataBridge::now_ms(),
        );
        let router = QueueRouter::new(bridge.clone());
        let ack = router.place_order(payload()).await.unwrap();
        assert_eq!(ack.order_id, "t-1");
        assert_eq!(ack.route, "queue");
        let drained = bridge.commands.drain_management("mt5", 10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind, CommandKind::OpenOrder);
        assert_eq!(drained[0].trade_id, "t-1");
    }

    #[test]
    fn http_router_signature_is_stable() {
        let router = HttpRouter::new("http://gateway", "key", "secret", 5_000);
        let a = router.sign("{\"x\":1}");
        let b = router.sign("{\"x\":1}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(router.sign("{\"x\":2}"), a);
    }
}
