// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators consumed by the
// technical analyzer and the decision gate. Every public function returns
// `Option<T>` or an empty series so callers are forced to handle
// insufficient-data and numerical-edge-case scenarios.

pub mod atr;
pub mod ema;
pub mod macd;
pub mod rsi;
