// =============================================================================
// Correlation clusters over the open-trade pair set
// =============================================================================
//
// Pairwise correlations come from explicit configuration when available and
// otherwise from a shared-currency heuristic. Pairs correlated at or above
// the threshold form clusters; a cluster reaching the maximum size blocks
// further correlated entries.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;

use crate::pairs;

/// Heuristic correlation when the pairs share a currency leg.
const SHARED_CURRENCY_CORRELATION: f64 = 0.68;
/// Heuristic correlation for unrelated pairs.
const BASELINE_CORRELATION: f64 = 0.20;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairCorrelation {
    pub pair_a: String,
    pub pair_b: String,
    pub correlation: f64,
    pub above_threshold: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLoad {
    pub members: Vec<String>,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationSnapshot {
    pub enabled: bool,
    pub threshold: f64,
    pub max_cluster: usize,
    pub correlations: Vec<PairCorrelation>,
    pub cluster_load: Vec<ClusterLoad>,
    pub blocked: bool,
}

/// Resolve the correlation for a pair of instruments.
pub fn pair_correlation(
    explicit: &HashMap<String, f64>,
    pair_a: &str,
    pair_b: &str,
) -> f64 {
    let forward = format!("{pair_a}:{pair_b}");
    let reverse = format!("{pair_b}:{pair_a}");
    if let Some(&value) = explicit.get(&forward).or_else(|| explicit.get(&reverse)) {
        return value.clamp(-1.0, 1.0);
    }

    let a = pairs::lookup(pair_a);
    let b = pairs::lookup(pair_b);
    let shares_leg = a.base == b.base
        || a.base == b.quote
        || a.quote == b.base
        || (a.quote == b.quote && !a.quote.is_empty());
    if shares_leg {
        SHARED_CURRENCY_CORRELATION
    } else {
        BASELINE_CORRELATION
    }
}

/// Build the correlation snapshot for the open-trade pair universe.
pub fn build_snapshot(
    open_pairs: &[String],
    explicit: &HashMap<String, f64>,
    threshold: f64,
    max_cluster: usize,
) -> CorrelationSnapshot {
    // Deterministic ordering regardless of insertion order.
    let mut sorted_pairs: Vec<String> = open_pairs.to_vec();
    sorted_pairs.sort();
    sorted_pairs.dedup();

    let mut correlations = Vec::new();
    for i in 0..sorted_pairs.len() {
        for j in (i + 1)..sorted_pairs.len() {
            let value = pair_correlation(explicit, &sorted_pairs[i], &sorted_pairs[j]);
            correlations.push(PairCorrelation {
                pair_a: sorted_pairs[i].clone(),
                pair_b: sorted_pairs[j].clone(),
                correlation: value,
                above_threshold: value >= threshold,
            });
        }
    }

    // Union-find over above-threshold edges.
    let index: HashMap<&str, usize> = sorted_pairs
        .iter()
        .enumerate()
        .map(|(i, p)| (p.as_str(), i))
        .collect();
    let mut parent: Vec<usize> = (0..sorted_pairs.len()).collect();

    fn find(parent: &mut Vec<usize>, x: usize) -> usize {
        if parent[x] != x {
            let root = find(parent, parent[x]);
            parent[x] = root;
        }
        parent[x]
    }

    for edge in correlations.iter().filter(|c| c.above_threshold) {
        let a = index[edge.pair_a.as_str()];
        let b = index[edge.pair_b.as_str()];
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        if ra != rb {
            parent[ra] = rb;
        }
    }

    let mut clusters: HashMap<usize, Vec<String>> = HashMap::new();
    for (i, pair) in sorted_pairs.iter().enumerate() {
        let root = find(&mut parent, i);
        clusters.entry(root).or_default().push(pair.clone());
    }

    let mut cluster_load: Vec<ClusterLoad> = clusters
        .into_values()
        .filter(|members| members.len() > 1)
        .map(|mut members| {
            members.sort();
            ClusterLoad {
                size: members.len(),
                members,
            }
        })
        .collect();
    cluster_load.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.members.cmp(&b.members)));

    let blocked = cluster_load.iter().any(|c| c.size >= max_cluster);

    CorrelationSnapshot {
        enabled: true,
        threshold,
        max_cluster,
        correlations,
        cluster_load,
        blocked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs_of(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn explicit_correlation_wins() {
        let mut explicit = HashMap::new();
        explicit.insert("EURUSD:GBPUSD".to_string(), 0.92);
        assert!((pair_correlation(&explicit, "GBPUSD", "EURUSD") - 0.92).abs() < 1e-9);
    }

    #[test]
    fn shared_currency_heuristic() {
        let explicit = HashMap::new();
        assert!(
            (pair_correlation(&explicit, "EURUSD", "GBPUSD") - SHARED_CURRENCY_CORRELATION).abs()
                < 1e-9
        );
        assert!(
            (pair_correlation(&explicit, "EURGBP", "AUDJPY") - BASELINE_CORRELATION).abs() < 1e-9
        );
    }

    #[test]
    fn heuristic_pairs_do_not_cluster_at_default_threshold() {
        let snapshot = build_snapshot(
            &pairs_of(&["EURUSD", "GBPUSD", "AUDUSD"]),
            &HashMap::new(),
            0.80,
            3,
        );
        assert!(!snapshot.blocked);
        assert!(snapshot.cluster_load.is_empty());
    }

    #[test]
    fn explicit_cluster_blocks_at_max_size() {
        let mut explicit = HashMap::new();
        explicit.insert("EURUSD:GBPUSD".to_string(), 0.9);
        explicit.insert("GBPUSD:AUDUSD".to_string(), 0.85);
        let snapshot = build_snapshot(
            &pairs_of(&["EURUSD", "GBPUSD", "AUDUSD"]),
            &explicit,
            0.80,
            3,
        );
        assert_eq!(snapshot.cluster_load.len(), 1);
        assert_eq!(snapshot.cluster_load[0].size, 3);
        assert!(snapshot.blocked);
    }

    #[test]
    fn snapshot_is_deterministic_over_input_order() {
        let mut explicit = HashMap::new();
        explicit.insert("EURUSD:GBPUSD".to_string(), 0.9);
        let a = build_snapshot(&pairs_of(&["GBPUSD", "EURUSD"]), &explicit, 0.8, 3);
        let b = build_snapshot(&pairs_of(&["EURUSD", "GBPUSD"]), &explicit, 0.8, 3);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn duplicate_pairs_are_collapsed() {
        let snapshot = build_snapshot(
            &pairs_of(&["EURUSD", "EURUSD"]),
            &HashMap::new(),
            0.8,
            3,
        );
        assert!(snapshot.correlations.is_empty());
    }
}
