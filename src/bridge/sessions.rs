// =============================================================================
// Session Registry — broker-agent connection lifecycle
// =============================================================================
//
// Sessions are keyed by (broker, accountNumber). Heartbeats refresh
// `last_heartbeat`; a session older than the heartbeat timeout is treated as
// disconnected for scheduling decisions but is only evicted by an explicit
// disconnect or a prune pass.
// =============================================================================

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::AccountMode;

/// Heartbeat staleness after which a session counts as disconnected.
pub const HEARTBEAT_TIMEOUT_MS: i64 = 2 * 60_000;

/// A connected broker-agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub broker: String,
    pub account_number: String,
    #[serde(default)]
    pub account_mode: AccountMode,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub equity: f64,
    #[serde(default)]
    pub balance: f64,
    /// Epoch millis of the last heartbeat.
    pub last_heartbeat: i64,
    /// EA build/version string reported by the agent.
    #[serde(default)]
    pub ea: String,
}

/// Connect payload pushed by the agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConnect {
    pub account_number: String,
    #[serde(default)]
    pub account_mode: AccountMode,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub equity: f64,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub ea: String,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<(String, String), Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Upsert a session on connect. Returns the session id.
    pub fn register(&self, broker: &str, connect: SessionConnect, now_ms: i64) -> String {
        let key = (broker.to_string(), connect.account_number.clone());
        let mut sessions = self.sessions.write();

        let id = sessions
            .get(&key)
            .map(|s| s.id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let session = Session {
            id: id.clone(),
            broker: broker.to_string(),
            account_number: connect.account_number,
            account_mode: connect.account_mode,
            server: connect.server,
            currency: connect.currency,
            equity: connect.equity,
            balance: connect.balance,
            last_heartbeat: now_ms,
            ea: connect.ea,
        };

        info!(
            broker = %broker,
            account = %session.account_number,
            mode = %session.account_mode,
            "session registered"
        );
        sessions.insert(key, session);
        id
    }

    /// Refresh heartbeat (and optional equity/balance). Returns false when no
    /// session exists for the key.
    pub fn heartbeat(
        &self,
        broker: &str,
        account_number: &str,
        equity: Option<f64>,
        balance: Option<f64>,
        now_ms: i64,
    ) -> bool {
        let key = (broker.to_string(), account_number.to_string());
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&key) {
            Some(session) => {
                session.last_heartbeat = now_ms;
                if let Some(eq) = equity {
                    session.equity = eq;
                }
                if let Some(bal) = balance {
                    session.balance = bal;
                }
                true
            }
            None => false,
        }
    }

    pub fn disconnect(&self, broker: &str, account_number: &str) -> bool {
        let key = (broker.to_string(), account_number.to_string());
        let removed = self.sessions.write().remove(&key).is_some();
        if removed {
            info!(broker = %broker, account = %account_number, "session disconnected");
        }
        removed
    }

    /// Whether any session for `broker` has a fresh heartbeat.
    pub fn is_connected(&self, broker: &str, now_ms: i64) -> bool {
        self.sessions
            .read()
            .values()
            .any(|s| s.broker == broker && now_ms - s.last_heartbeat <= HEARTBEAT_TIMEOUT_MS)
    }

    /// Most recently heartbeated session for `broker`.
    pub fn latest_session(&self, broker: &str) -> Option<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.broker == broker)
            .max_by_key(|s| s.last_heartbeat)
            .cloned()
    }

    pub fn all_sessions(&self) -> Vec<Session> {
        self.sessions.read().values().cloned().collect()
    }

    /// Evict sessions whose heartbeat is stale beyond `max_age_ms`.
    pub fn prune(&self, max_age_ms: i64, now_ms: i64) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| now_ms - s.last_heartbeat <= max_age_ms);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "stale sessions pruned");
        }
        evicted
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(account: &str) -> SessionConnect {
        SessionConnect {
            account_number: account.to_string(),
            account_mode: AccountMode::Demo,
            server: "Demo-1".to_string(),
            currency: "USD".to_string(),
            equity: 10_000.0,
            balance: 10_000.0,
            ea: "ea-2.1".to_string(),
        }
    }

    #[test]
    fn register_and_heartbeat() {
        let registry = SessionRegistry::new();
        registry.register("mt5", connect("100"), 1_000);
        assert!(registry.is_connected("mt5", 2_000));
        assert!(registry.heartbeat("mt5", "100", Some(10_100.0), None, 5_000));
        let session = registry.latest_session("mt5").unwrap();
        assert_eq!(session.last_heartbeat, 5_000);
        assert!((session.equity - 10_100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reregister_keeps_session_id() {
        let registry = SessionRegistry::new();
        let first = registry.register("mt5", connect("100"), 1_000);
        let second = registry.register("mt5", connect("100"), 2_000);
        assert_eq!(first, second);
    }

    #[test]
    fn stale_heartbeat_counts_as_disconnected() {
        let registry = SessionRegistry::new();
        registry.register("mt5", connect("100"), 0);
        assert!(registry.is_connected("mt5", HEARTBEAT_TIMEOUT_MS));
        assert!(!registry.is_connected("mt5", HEARTBEAT_TIMEOUT_MS + 1));
    }

    #[test]
    fn disconnect_removes_session() {
        let registry = SessionRegistry::new();
        registry.register("mt4", connect("7"), 0);
        assert!(registry.disconnect("mt4", "7"));
        assert!(!registry.is_connected("mt4", 1));
        assert!(!registry.disconnect("mt4", "7"));
    }

    #[test]
    fn prune_evicts_old_sessions() {
        let registry = SessionRegistry::new();
        registry.register("mt5", connect("1"), 0);
        registry.register("mt5", connect("2"), 9_000);
        assert_eq!(registry.prune(5_000, 10_000), 1);
        assert_eq!(registry.all_sessions().len(), 1);
    }
}
