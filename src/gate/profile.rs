// =============================================================================
// Gate profiles — contributor floors by asset class and trading profile
// =============================================================================
//
// A profile sets the minimum bar each contributor is normalized against and
// the score needed for ENTER. Aggressive and smart_strong lower the floors
// progressively; smart_strong compensates with stricter execution gates in
// the trade manager.
// =============================================================================

use serde::Serialize;

use crate::config::TradingProfile;
use crate::types::AssetClass;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateProfile {
    pub name: &'static str,
    /// Soft score required for ENTER.
    pub enter_score: f64,
    pub min_strength: f64,
    pub min_confidence: f64,
    /// Estimated win-rate floor, percent.
    pub min_probability: f64,
    pub min_risk_reward: f64,
    /// Referenced by `missing`/`whatWouldChange` hints only; the momentum
    /// modifier stays multiplicative.
    pub min_momentum_for_enter: f64,
}

const BALANCED_FX: GateProfile = GateProfile {
    name: "balanced",
    enter_score: 58.0,
    min_strength: 35.0,
    min_confidence: 45.0,
    min_probability: 48.0,
    min_risk_reward: 1.6,
    min_momentum_for_enter: -0.05,
};

const AGGRESSIVE_FX: GateProfile = GateProfile {
    name: "aggressive",
    enter_score: 52.0,
    min_strength: 30.0,
    min_confidence: 40.0,
    min_probability: 45.0,
    min_risk_reward: 1.4,
    min_momentum_for_enter: -0.10,
};

const SMART_STRONG_FX: GateProfile = GateProfile {
    name: "smart_strong",
    enter_score: 62.0,
    min_strength: 45.0,
    min_confidence: 55.0,
    min_probability: 52.0,
    min_risk_reward: 1.8,
    min_momentum_for_enter: 0.0,
};

/// Select the profile for an asset class under the configured mode. Crypto
/// raises the RR floor; metals nudge the probability floor.
pub fn select(asset_class: AssetClass, mode: TradingProfile) -> GateProfile {
    let mut profile = match mode {
        TradingProfile::Balanced => BALANCED_FX,
        TradingProfile::Aggressive => AGGRESSIVE_FX,
        TradingProfile::SmartStrong => SMART_STRONG_FX,
    };

    match asset_class {
        AssetClass::Crypto => {
            profile.min_risk_reward = profile.min_risk_reward.max(2.0);
            profile.enter_score += 2.0;
        }
        AssetClass::Metals => {
            profile.min_probability += 2.0;
        }
        _ => {}
    }

    profile
}

/// Dynamic RR floor: the larger of the crypto/FX base floor, the profile
/// floor, and the breakeven-implied floor `(1-p)/p + 0.4`.
pub fn dynamic_rr_floor(profile: &GateProfile, asset_class: AssetClass, win_rate_pct: f64) -> f64 {
    let base: f64 = if asset_class == AssetClass::Crypto {
        2.0
    } else {
        1.6
    };
    let p = (win_rate_pct / 100.0).clamp(0.05, 0.95);
    let breakeven_floor = (1.0 - p) / p + 0.4;
    base.max(profile.min_risk_reward).max(breakeven_floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_lower_floors_progressively() {
        let balanced = select(AssetClass::Forex, TradingProfile::Balanced);
        let aggressive = select(AssetClass::Forex, TradingProfile::Aggressive);
        assert!(aggressive.enter_score < balanced.enter_score);
        assert!(aggressive.min_confidence < balanced.min_confidence);
    }

    #[test]
    fn smart_strong_raises_the_bar() {
        let smart = select(AssetClass::Forex, TradingProfile::SmartStrong);
        let balanced = select(AssetClass::Forex, TradingProfile::Balanced);
        assert!(smart.enter_score > balanced.enter_score);
        assert!(smart.min_strength > balanced.min_strength);
    }

    #[test]
    fn crypto_floors_rr_at_two() {
        let profile = select(AssetClass::Crypto, TradingProfile::Aggressive);
        assert!(profile.min_risk_reward >= 2.0);
    }

    #[test]
    fn rr_floor_tracks_win_rate() {
        let profile = select(AssetClass::Forex, TradingProfile::Balanced);
        // p = 0.5 -> breakeven floor 1.4; profile floor 1.6 wins.
        assert!((dynamic_rr_floor(&profile, AssetClass::Forex, 50.0) - 1.6).abs() < 1e-9);
        // p = 0.35 -> breakeven floor ~2.257 dominates.
        let floor = dynamic_rr_floor(&profile, AssetClass::Forex, 35.0);
        assert!(floor > 2.2 && floor < 2.3);
        // Crypto never below 2.0.
        assert!(dynamic_rr_floor(&profile, AssetClass::Crypto, 60.0) >= 2.0);
    }
}
