// =============================================================================
// Pair Catalog — static instrument metadata
// =============================================================================
//
// Immutable for the process lifetime. Pairs not present in the seed table are
// classified by inference (quote currency, metal/crypto prefixes) so that
// dynamically discovered EA symbols still get sane pip sizes.
// =============================================================================

use serde::Serialize;

use crate::types::AssetClass;

/// Spread-threshold bucket used by the data quality guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PairCategory {
    Majors,
    Yen,
    Minors,
    Crosses,
}

/// Static metadata for a single instrument.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairInfo {
    pub pair: String,
    pub base: String,
    pub quote: String,
    pub asset_class: AssetClass,
    pub pip_size: f64,
    pub price_precision: u32,
    /// Baseline ATR-style volatility in pips, used when real data is synthetic.
    pub synthetic_volatility: f64,
}

impl PairInfo {
    /// Convert an absolute price distance into pips.
    pub fn to_pips(&self, distance: f64) -> f64 {
        if self.pip_size > 0.0 {
            distance.abs() / self.pip_size
        } else {
            0.0
        }
    }

    /// Convert pips into an absolute price distance.
    pub fn from_pips(&self, pips: f64) -> f64 {
        pips * self.pip_size
    }

    pub fn category(&self) -> PairCategory {
        category_of(&self.pair, self.asset_class)
    }
}

const MAJORS: &[&str] = &["EURUSD", "GBPUSD", "AUDUSD", "NZDUSD", "USDCAD", "USDCHF"];

struct SeedEntry {
    pair: &'static str,
    asset_class: AssetClass,
    pip_size: f64,
    precision: u32,
    synthetic_volatility: f64,
}

const SEED: &[SeedEntry] = &[
    SeedEntry { pair: "EURUSD", asset_class: AssetClass::Forex, pip_size: 0.0001, precision: 5, synthetic_volatility: 9.0 },
    SeedEntry { pair: "GBPUSD", asset_class: AssetClass::Forex, pip_size: 0.0001, precision: 5, synthetic_volatility: 12.0 },
    SeedEntry { pair: "AUDUSD", asset_class: AssetClass::Forex, pip_size: 0.0001, precision: 5, synthetic_volatility: 8.0 },
    SeedEntry { pair: "NZDUSD", asset_class: AssetClass::Forex, pip_size: 0.0001, precision: 5, synthetic_volatility: 8.0 },
    SeedEntry { pair: "USDCAD", asset_class: AssetClass::Forex, pip_size: 0.0001, precision: 5, synthetic_volatility: 9.0 },
    SeedEntry { pair: "USDCHF", asset_class: AssetClass::Forex, pip_size: 0.0001, precision: 5, synthetic_volatility: 8.0 },
    SeedEntry { pair: "USDJPY", asset_class: AssetClass::Forex, pip_size: 0.01, precision: 3, synthetic_volatility: 10.0 },
    SeedEntry { pair: "EURJPY", asset_class: AssetClass::Forex, pip_size: 0.01, precision: 3, synthetic_volatility: 12.0 },
    SeedEntry { pair: "GBPJPY", asset_class: AssetClass::Forex, pip_size: 0.01, precision: 3, synthetic_volatility: 15.0 },
    SeedEntry { pair: "AUDJPY", asset_class: AssetClass::Forex, pip_size: 0.01, precision: 3, synthetic_volatility: 11.0 },
    SeedEntry { pair: "EURGBP", asset_class: AssetClass::Forex, pip_size: 0.0001, precision: 5, synthetic_volatility: 6.0 },
    SeedEntry { pair: "EURAUD", asset_class: AssetClass::Forex, pip_size: 0.0001, precision: 5, synthetic_volatility: 12.0 },
    SeedEntry { pair: "GBPAUD", asset_class: AssetClass::Forex, pip_size: 0.0001, precision: 5, synthetic_volatility: 14.0 },
    SeedEntry { pair: "XAUUSD", asset_class: AssetClass::Metals, pip_size: 0.1, precision: 2, synthetic_volatility: 35.0 },
    SeedEntry { pair: "XAGUSD", asset_class: AssetClass::Metals, pip_size: 0.01, precision: 3, synthetic_volatility: 28.0 },
    SeedEntry { pair: "BTCUSD", asset_class: AssetClass::Crypto, pip_size: 1.0, precision: 2, synthetic_volatility: 450.0 },
    SeedEntry { pair: "ETHUSD", asset_class: AssetClass::Crypto, pip_size: 0.1, precision: 2, synthetic_volatility: 60.0 },
    SeedEntry { pair: "US30", asset_class: AssetClass::Cfd, pip_size: 1.0, precision: 1, synthetic_volatility: 80.0 },
    SeedEntry { pair: "NAS100", asset_class: AssetClass::Cfd, pip_size: 1.0, precision: 1, synthetic_volatility: 60.0 },
];

/// Look up (or infer) the catalog entry for `pair`.
pub fn lookup(pair: &str) -> PairInfo {
    let symbol = normalize(pair);

    if let Some(seed) = SEED.iter().find(|s| s.pair == symbol) {
        let (base, quote) = split_currencies(&symbol, seed.asset_class);
        return PairInfo {
            pair: symbol,
            base,
            quote,
            asset_class: seed.asset_class,
            pip_size: seed.pip_size,
            price_precision: seed.precision,
            synthetic_volatility: seed.synthetic_volatility,
        };
    }

    // Inference path for unseeded symbols.
    let asset_class = infer_asset_class(&symbol);
    let pip_size = infer_pip_size(&symbol, asset_class);
    let (base, quote) = split_currencies(&symbol, asset_class);
    let precision = if pip_size >= 1.0 {
        2
    } else if pip_size >= 0.01 {
        3
    } else {
        5
    };

    PairInfo {
        pair: symbol,
        base,
        quote,
        asset_class,
        pip_size,
        price_precision: precision,
        synthetic_volatility: match asset_class {
            AssetClass::Crypto => 120.0,
            AssetClass::Metals => 30.0,
            AssetClass::Cfd => 60.0,
            _ => 10.0,
        },
    }
}

/// Strip broker suffixes (`EURUSD.m`, `EURUSD#`) and uppercase.
pub fn normalize(pair: &str) -> String {
    pair.trim()
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .split(['.', '#'])
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

pub fn category_of(pair: &str, asset_class: AssetClass) -> PairCategory {
    let symbol = normalize(pair);
    if !matches!(asset_class, AssetClass::Forex) {
        // Non-FX instruments share the widest bucket.
        return PairCategory::Crosses;
    }
    if MAJORS.contains(&symbol.as_str()) {
        PairCategory::Majors
    } else if symbol.ends_with("JPY") {
        PairCategory::Yen
    } else if symbol.contains("USD") {
        PairCategory::Minors
    } else {
        PairCategory::Crosses
    }
}

fn infer_asset_class(symbol: &str) -> AssetClass {
    if symbol.starts_with("XAU") || symbol.starts_with("XAG") || symbol.starts_with("XPT") {
        AssetClass::Metals
    } else if symbol.starts_with("BTC")
        || symbol.starts_with("ETH")
        || symbol.starts_with("SOL")
        || symbol.starts_with("XRP")
        || symbol.ends_with("USDT")
    {
        AssetClass::Crypto
    } else if symbol.len() == 6 && symbol.chars().all(|c| c.is_ascii_alphabetic()) {
        AssetClass::Forex
    } else {
        AssetClass::Cfd
    }
}

fn infer_pip_size(symbol: &str, asset_class: AssetClass) -> f64 {
    match asset_class {
        AssetClass::Forex => {
            if symbol.ends_with("JPY") {
                0.01
            } else {
                0.0001
            }
        }
        AssetClass::Metals => 0.1,
        AssetClass::Crypto => 1.0,
        AssetClass::Cfd | AssetClass::Other => 1.0,
    }
}

fn split_currencies(symbol: &str, asset_class: AssetClass) -> (String, String) {
    if symbol.len() >= 6 && matches!(asset_class, AssetClass::Forex | AssetClass::Metals) {
        (symbol[..3].to_string(), symbol[3..6].to_string())
    } else if symbol.ends_with("USDT") && symbol.len() > 4 {
        (symbol[..symbol.len() - 4].to_string(), "USDT".to_string())
    } else if symbol.ends_with("USD") && symbol.len() > 3 {
        (symbol[..symbol.len() - 3].to_string(), "USD".to_string())
    } else {
        (symbol.to_string(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_pair_metadata() {
        let info = lookup("EURUSD");
        assert_eq!(info.asset_class, AssetClass::Forex);
        assert_eq!(info.pip_size, 0.0001);
        assert_eq!(info.base, "EUR");
        assert_eq!(info.quote, "USD");
        assert_eq!(info.category(), PairCategory::Majors);
    }

    #[test]
    fn yen_pair_uses_two_decimal_pips() {
        let info = lookup("GBPJPY");
        assert_eq!(info.pip_size, 0.01);
        assert_eq!(info.category(), PairCategory::Yen);
    }

    #[test]
    fn gold_is_metals() {
        let info = lookup("XAUUSD");
        assert_eq!(info.asset_class, AssetClass::Metals);
        assert_eq!(info.to_pips(2.2), 22.0);
    }

    #[test]
    fn unknown_crypto_is_inferred() {
        let info = lookup("SOLUSD");
        assert_eq!(info.asset_class, AssetClass::Crypto);
        assert_eq!(info.quote, "USD");
    }

    #[test]
    fn broker_suffixes_are_stripped() {
        assert_eq!(normalize("eurusd.m"), "EURUSD");
        assert_eq!(normalize("XAUUSD#"), "XAUUSD");
    }

    #[test]
    fn pip_conversions_roundtrip() {
        let info = lookup("EURUSD");
        let pips = info.to_pips(info.from_pips(12.5));
        assert!((pips - 12.5).abs() < 1e-9);
    }
}
