// =============================================================================
// Command Queues — per-broker FIFOs polled by the EA agents
// =============================================================================
//
// Trade management actions (open/modify/close/partial-close) are queued here
// and drained destructively by the agent on its poll cadence. Snapshot
// requests form a separate single-consumer queue.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Management action kinds the agents understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    OpenOrder,
    ModifyProtection,
    ClosePosition,
    PartialClose,
}

/// One queued management command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementCommand {
    pub id: String,
    pub kind: CommandKind,
    pub symbol: String,
    /// Trade id this command refers to; doubles as the broker idempotency key.
    pub trade_id: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub comment: Option<String>,
    pub queued_at: String,
}

impl ManagementCommand {
    pub fn new(kind: CommandKind, symbol: impl Into<String>, trade_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            symbol: symbol.into(),
            trade_id: trade_id.into(),
            direction: None,
            volume: None,
            price: None,
            stop_loss: None,
            take_profit: None,
            comment: None,
            queued_at: Utc::now().to_rfc3339(),
        }
    }
}

/// A dashboard-initiated request for a fresh market snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    pub symbol: String,
    #[serde(default)]
    pub timeframes: Vec<String>,
    pub requested_at: String,
}

/// Hard cap per broker queue; the oldest command is shed under pressure.
const MAX_QUEUE_DEPTH: usize = 500;

pub struct CommandQueues {
    management: RwLock<HashMap<String, VecDeque<ManagementCommand>>>,
    snapshot_requests: RwLock<HashMap<String, VecDeque<SnapshotRequest>>>,
}

impl CommandQueues {
    pub fn new() -> Self {
        Self {
            management: RwLock::new(HashMap::new()),
            snapshot_requests: RwLock::new(HashMap::new()),
        }
    }

    pub fn enqueue_management(&self, broker: &str, commands: Vec<ManagementCommand>) {
        let mut queues = self.management.write();
        let queue = queues.entry(broker.to_string()).or_default();
        for command in commands {
            queue.push_back(command);
        }
        while queue.len() > MAX_QUEUE_DEPTH {
            queue.pop_front();
        }
    }

    /// Destructive drain of up to `limit` commands, FIFO order.
    pub fn drain_management(&self, broker: &str, limit: usize) -> Vec<ManagementCommand> {
        let mut queues = self.management.write();
        let Some(queue) = queues.get_mut(broker) else {
            return Vec::new();
        };
        let take = limit.min(queue.len());
        queue.drain(..take).collect()
    }

    pub fn management_depth(&self, broker: &str) -> usize {
        self.management
            .read()
            .get(broker)
            .map_or(0, VecDeque::len)
    }

    pub fn request_snapshot(&self, broker: &str, request: SnapshotRequest) {
        let mut queues = self.snapshot_requests.write();
        let queue = queues.entry(broker.to_string()).or_default();
        queue.push_back(request);
        while queue.len() > MAX_QUEUE_DEPTH {
            queue.pop_front();
        }
    }

    /// Single-consumer destructive drain of all pending snapshot requests.
    pub fn consume_snapshot_requests(&self, broker: &str) -> Vec<SnapshotRequest> {
        let mut queues = self.snapshot_requests.write();
        queues
            .get_mut(broker)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }
}

impl Default for CommandQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(symbol: &str) -> ManagementCommand {
        ManagementCommand::new(CommandKind::ModifyProtection, symbol, "t-1")
    }

    #[test]
    fn drain_is_fifo_and_destructive() {
        let queues = CommandQueues::new();
        queues.enqueue_management("mt5", vec![cmd("EURUSD"), cmd("GBPUSD"), cmd("USDJPY")]);

        let first = queues.drain_management("mt5", 2);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].symbol, "EURUSD");
        assert_eq!(first[1].symbol, "GBPUSD");

        let second = queues.drain_management("mt5", 20);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].symbol, "USDJPY");
        assert_eq!(queues.management_depth("mt5"), 0);
    }

    #[test]
    fn queue_sheds_oldest_under_pressure() {
        let queues = CommandQueues::new();
        for i in 0..(MAX_QUEUE_DEPTH + 10) {
            queues.enqueue_management("mt5", vec![cmd(&format!("S{i}"))]);
        }
        assert_eq!(queues.management_depth("mt5"), MAX_QUEUE_DEPTH);
        let drained = queues.drain_management("mt5", 1);
        assert_eq!(drained[0].symbol, "S10");
    }

    #[test]
    fn snapshot_requests_are_consumed_once() {
        let queues = CommandQueues::new();
        queues.request_snapshot(
            "mt5",
            SnapshotRequest {
                symbol: "EURUSD".to_string(),
                timeframes: vec!["M15".to_string()],
                requested_at: Utc::now().to_rfc3339(),
            },
        );
        assert_eq!(queues.consume_snapshot_requests("mt5").len(), 1);
        assert!(queues.consume_snapshot_requests("mt5").is_empty());
    }

    #[test]
    fn brokers_have_independent_queues() {
        let queues = CommandQueues::new();
        queues.enqueue_management("mt4", vec![cmd("EURUSD")]);
        assert!(queues.drain_management("mt5", 10).is_empty());
        assert_eq!(queues.management_depth("mt4"), 1);
    }
}
