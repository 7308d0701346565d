// =============================================================================
// Persistence Adapter — opaque-schema sink for durable engine records
// =============================================================================
//
// The core never talks to a storage backend directly. Everything durable
// (trade history, data-quality metrics, audit events, rejection audit) flows
// through the `PersistenceSink` trait; the default in-memory sink keeps
// bounded rings so the process stays useful without any backend configured.
// =============================================================================

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

/// A single durable audit record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Dotted event kind, e.g. `execution.trade.accepted`,
    /// `data_quality.circuit_breaker.activated`.
    pub kind: String,
    pub pair: Option<String>,
    pub broker: Option<String>,
    pub detail: Value,
    pub at: String,
}

impl AuditEvent {
    pub fn new(kind: impl Into<String>, detail: Value) -> Self {
        Self {
            kind: kind.into(),
            pair: None,
            broker: None,
            detail,
            at: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_pair(mut self, pair: impl Into<String>) -> Self {
        self.pair = Some(pair.into());
        self
    }

    pub fn with_broker(mut self, broker: impl Into<String>) -> Self {
        self.broker = Some(broker.into());
        self
    }
}

/// Storage seam. Implementations must be cheap and non-blocking; slow
/// backends should buffer internally.
pub trait PersistenceSink: Send + Sync {
    fn record_audit(&self, event: AuditEvent);
    fn record_quality_metric(&self, pair: &str, report: Value);
    fn record_trade_closed(&self, trade: Value);
    fn record_rejection(&self, pair: &str, primary_reason: &str, detail: Value);
}

// =============================================================================
// In-memory sink
// =============================================================================

const MAX_AUDIT: usize = 500;
const MAX_QUALITY: usize = 200;
const MAX_TRADES: usize = 1_000;
const MAX_REJECTIONS: usize = 200;

/// Bounded in-memory sink, also used by tests to assert on audit order.
pub struct MemorySink {
    audit: RwLock<VecDeque<AuditEvent>>,
    quality: RwLock<VecDeque<(String, Value)>>,
    trades: RwLock<VecDeque<Value>>,
    rejections: RwLock<VecDeque<(String, String, Value)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            audit: RwLock::new(VecDeque::new()),
            quality: RwLock::new(VecDeque::new()),
            trades: RwLock::new(VecDeque::new()),
            rejections: RwLock::new(VecDeque::new()),
        }
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.read().iter().cloned().collect()
    }

    pub fn audit_kinds(&self) -> Vec<String> {
        self.audit.read().iter().map(|e| e.kind.clone()).collect()
    }

    pub fn closed_trades(&self) -> Vec<Value> {
        self.trades.read().iter().cloned().collect()
    }

    pub fn rejection_count(&self) -> usize {
        self.rejections.read().len()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded<T>(ring: &RwLock<VecDeque<T>>, item: T, cap: usize) {
    let mut guard = ring.write();
    guard.push_back(item);
    while guard.len() > cap {
        guard.pop_front();
    }
}

impl PersistenceSink for MemorySink {
    fn record_audit(&self, event: AuditEvent) {
        push_bounded(&self.audit, event, MAX_AUDIT);
    }

    fn record_quality_metric(&self, pair: &str, report: Value) {
        push_bounded(&self.quality, (pair.to_string(), report), MAX_QUALITY);
    }

    fn record_trade_closed(&self, trade: Value) {
        push_bounded(&self.trades, trade, MAX_TRADES);
    }

    fn record_rejection(&self, pair: &str, primary_reason: &str, detail: Value) {
        push_bounded(
            &self.rejections,
            (pair.to_string(), primary_reason.to_string(), detail),
            MAX_REJECTIONS,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_preserves_order() {
        let sink = MemorySink::new();
        sink.record_audit(AuditEvent::new("execution.trade.accepted", Value::Null));
        sink.record_audit(AuditEvent::new("execution.trade.broker_failed", Value::Null));
        assert_eq!(
            sink.audit_kinds(),
            vec!["execution.trade.accepted", "execution.trade.broker_failed"]
        );
    }

    #[test]
    fn audit_ring_is_bounded() {
        let sink = MemorySink::new();
        for i in 0..(MAX_AUDIT + 50) {
            sink.record_audit(AuditEvent::new(format!("e{i}"), Value::Null));
        }
        let kinds = sink.audit_kinds();
        assert_eq!(kinds.len(), MAX_AUDIT);
        assert_eq!(kinds[0], "e50");
    }

    #[test]
    fn rejections_are_counted() {
        let sink = MemorySink::new();
        sink.record_rejection("EURUSD", "confluence", Value::Null);
        assert_eq!(sink.rejection_count(), 1);
    }
}
