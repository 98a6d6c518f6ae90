// Strategy Runtime - simulated trading driven by indicator events
// A factory turns EA names into strategy objects; each running instance
// subscribes to its indicator topic and feeds signals to the trade manager

pub mod green_arrow;
pub mod instance;
pub mod macd;
pub mod runtime;
pub mod trade;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::types::Timeframe;

use self::trade::TradeSide;

pub use green_arrow::GreenArrowStrategy;
pub use instance::{InstanceStatus, StrategyInstance};
pub use macd::MacdStrategy;
pub use runtime::{EaConfig, RuntimeError, StrategyRuntime, UserInfo};
pub use trade::{Account, Position, TradeError, TradeManager, TradeRequest};

/// Trade intent produced by a strategy from one indicator event.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub timeframe: String,
    pub side: TradeSide,
    pub price: f64,
    pub stop_loss: f64,
    pub trend: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("unsupported EA type: {0}")]
    UnknownEa(String),
    #[error("invalid indicator payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

/// Capability set every EA kind implements. New kinds are added by extending
/// the factory below.
pub trait Strategy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Bus topic this strategy consumes for a given instrument.
    fn indicator_channel(&self, symbol: &str, timeframe: Timeframe) -> String;

    /// Translate one indicator payload into a trade intent, or nothing.
    fn process_indicator(&self, payload: &str) -> Result<Option<Signal>, StrategyError>;

    /// Risk-based position sizing, clamped to [0.01, 10.0] lots and rounded
    /// to two decimals. Minimum size when the stop distance is zero.
    fn calculate_lots(&self, balance: f64, risk_percent: f64, entry: f64, stop: f64) -> f64 {
        let risk_amount = balance * risk_percent / 100.0;
        let points_risk = (entry - stop).abs();
        if points_risk == 0.0 {
            return 0.01;
        }

        let point_value = 10.0; // XAUUSD: one lot moves $10 per point
        let lots = (risk_amount / (points_risk * point_value)).clamp(0.01, 10.0);
        round_lots(lots)
    }

    fn validate_params(&self, _params: &serde_json::Value) -> Result<(), StrategyError> {
        Ok(())
    }
}

/// Round to two decimals, half away from zero.
pub(crate) fn round_lots(lots: f64) -> f64 {
    ((lots * 100.0 + 0.5).floor()) / 100.0
}

/// Instantiate the strategy for an EA name. Recognized aliases are
/// enumerated per kind.
pub fn create_strategy(
    ea_name: &str,
    params: &serde_json::Value,
) -> Result<Box<dyn Strategy>, StrategyError> {
    match ea_name {
        "GreenArrow" | "Green Arrow EA" => Ok(Box::new(GreenArrowStrategy::from_params(params)?)),
        "MACD" | "MACD EA" => Ok(Box::new(MacdStrategy::from_params(params))),
        other => Err(StrategyError::UnknownEa(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullStrategy;

    impl Strategy for NullStrategy {
        fn name(&self) -> &str {
            "null"
        }
        fn indicator_channel(&self, symbol: &str, timeframe: Timeframe) -> String {
            format!("indicator:{}:{}:null", symbol, timeframe)
        }
        fn process_indicator(&self, _payload: &str) -> Result<Option<Signal>, StrategyError> {
            Ok(None)
        }
    }

    #[test]
    fn test_lots_from_risk() {
        let s = NullStrategy;
        // 10_000 * 1% = 100 risked over a 10-point stop at $10/point
        assert_eq!(s.calculate_lots(10_000.0, 1.0, 2650.0, 2640.0), 1.0);
    }

    #[test]
    fn test_lots_clamped_to_bounds() {
        let s = NullStrategy;
        // tiny risk rounds up to the floor
        assert_eq!(s.calculate_lots(100.0, 0.1, 2650.0, 2500.0), 0.01);
        // huge balance caps at the ceiling
        assert_eq!(s.calculate_lots(10_000_000.0, 5.0, 2650.0, 2649.0), 10.0);
    }

    #[test]
    fn test_zero_stop_distance_uses_minimum() {
        let s = NullStrategy;
        assert_eq!(s.calculate_lots(10_000.0, 1.0, 2650.0, 2650.0), 0.01);
    }

    #[test]
    fn test_round_lots() {
        assert_eq!(round_lots(0.014), 0.01);
        assert_eq!(round_lots(0.015), 0.02);
        assert_eq!(round_lots(2.499), 2.5);
    }

    #[test]
    fn test_factory_aliases() {
        let params = serde_json::json!({});
        assert_eq!(create_strategy("GreenArrow", &params).unwrap().name(), "GreenArrow");
        assert_eq!(
            create_strategy("Green Arrow EA", &params).unwrap().name(),
            "GreenArrow"
        );
        assert_eq!(create_strategy("MACD", &params).unwrap().name(), "MACD");
        assert_eq!(create_strategy("MACD EA", &params).unwrap().name(), "MACD");
    }

    #[test]
    fn test_factory_rejects_unknown_names() {
        let err = create_strategy("Sniper", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, StrategyError::UnknownEa(_)));
    }
}
