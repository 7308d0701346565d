// =============================================================================
// Symbol Directory — broker symbol universe and active-symbol TTL claims
// =============================================================================
//
// Agents periodically push their full symbol list; the directory tracks the
// last-seen time per symbol so the background scanner can work on the
// freshest slice. Dashboards and agents "touch" symbols to keep them hot;
// expired claims are evicted lazily on read.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

/// Default TTL for an active-symbol claim.
pub const DEFAULT_ACTIVE_TTL_MS: i64 = 12 * 60_000;

/// A known symbol with its last-seen timestamp.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownSymbol {
    pub symbol: String,
    pub last_seen: i64,
}

pub struct SymbolDirectory {
    known: RwLock<HashMap<String, HashMap<String, i64>>>,
    active: RwLock<HashMap<String, HashMap<String, i64>>>,
    active_ttl_ms: i64,
}

impl SymbolDirectory {
    pub fn new(active_ttl_ms: i64) -> Self {
        Self {
            known: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            active_ttl_ms,
        }
    }

    // ── Known-symbol universe ───────────────────────────────────────────

    /// Record symbols observed on `broker`, stamping `now_ms` as last-seen.
    pub fn record_symbols(&self, broker: &str, symbols: &[String], now_ms: i64) {
        let mut known = self.known.write();
        let table = known.entry(broker.to_string()).or_default();
        for symbol in symbols {
            table.insert(symbol.clone(), now_ms);
        }
    }

    pub fn registered_symbols(&self, broker: &str) -> Vec<KnownSymbol> {
        let mut list: Vec<KnownSymbol> = self
            .known
            .read()
            .get(broker)
            .map(|table| {
                table
                    .iter()
                    .map(|(symbol, &last_seen)| KnownSymbol {
                        symbol: symbol.clone(),
                        last_seen,
                    })
                    .collect()
            })
            .unwrap_or_default();
        list.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        list
    }

    /// The freshest slice of the universe: symbols seen within `max_age_ms`,
    /// newest first, capped at `max`.
    pub fn list_known(&self, broker: &str, max_age_ms: i64, max: usize, now_ms: i64) -> Vec<String> {
        let mut fresh: Vec<(String, i64)> = self
            .known
            .read()
            .get(broker)
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, &seen)| now_ms - seen <= max_age_ms)
                    .map(|(symbol, &seen)| (symbol.clone(), seen))
                    .collect()
            })
            .unwrap_or_default();
        // Newest first; symbol name as the stable tie-break.
        fresh.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        fresh.into_iter().take(max).map(|(s, _)| s).collect()
    }

    // ── Active-symbol TTL claims ────────────────────────────────────────

    /// Replace the active set for `broker`.
    pub fn set_active(&self, broker: &str, symbols: &[String], now_ms: i64) {
        let expires_at = now_ms + self.active_ttl_ms;
        let mut active = self.active.write();
        let table = active.entry(broker.to_string()).or_default();
        table.clear();
        for symbol in symbols {
            table.insert(symbol.clone(), expires_at);
        }
    }

    /// Extend (or create) a single claim.
    pub fn touch_active(&self, broker: &str, symbol: &str, now_ms: i64) {
        self.active
            .write()
            .entry(broker.to_string())
            .or_default()
            .insert(symbol.to_string(), now_ms + self.active_ttl_ms);
    }

    /// Live claims; expired entries are evicted on this read.
    pub fn active_symbols(&self, broker: &str, now_ms: i64) -> Vec<String> {
        let mut active = self.active.write();
        let Some(table) = active.get_mut(broker) else {
            return Vec::new();
        };
        table.retain(|_, &mut expires_at| expires_at > now_ms);
        let mut symbols: Vec<String> = table.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

impl Default for SymbolDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVE_TTL_MS)
    }
}
