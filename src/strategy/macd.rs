// MACD EA - factory-registered skeleton
// Subscribes to the MACD indicator topic; signal mapping is not implemented
// yet, so every sample is observed and discarded

use serde_json::Value;
use tracing::debug;

use crate::core::types::{indicator_topic, Timeframe};

use super::{Signal, Strategy, StrategyError};

#[derive(Debug)]
pub struct MacdStrategy {
    fast_period: u32,
    slow_period: u32,
    signal_period: u32,
}

impl MacdStrategy {
    pub fn from_params(params: &Value) -> Self {
        let mut strategy = Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        };

        if let Some(overrides) = params.get("indicator_params") {
            if let Some(fast) = overrides.get("fast_period").and_then(Value::as_u64) {
                strategy.fast_period = fast as u32;
            }
            if let Some(slow) = overrides.get("slow_period").and_then(Value::as_u64) {
                strategy.slow_period = slow as u32;
            }
            if let Some(signal) = overrides.get("signal_period").and_then(Value::as_u64) {
                strategy.signal_period = signal as u32;
            }
        }

        strategy
    }

    pub fn periods(&self) -> (u32, u32, u32) {
        (self.fast_period, self.slow_period, self.signal_period)
    }
}

impl Strategy for MacdStrategy {
    fn name(&self) -> &str {
        "MACD"
    }

    fn indicator_channel(&self, symbol: &str, timeframe: Timeframe) -> String {
        indicator_topic(symbol, timeframe.as_str(), "macd")
    }

    fn process_indicator(&self, payload: &str) -> Result<Option<Signal>, StrategyError> {
        // TODO: map MACD crossovers to signals once the hub publishes them
        debug!(bytes = payload.len(), "MACD sample received, no mapping yet");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_periods() {
        let strategy = MacdStrategy::from_params(&serde_json::json!({}));
        assert_eq!(strategy.periods(), (12, 26, 9));
    }

    #[test]
    fn test_period_overrides() {
        let strategy = MacdStrategy::from_params(&serde_json::json!({
            "indicator_params": {"fast_period": 8, "slow_period": 21, "signal_period": 5}
        }));
        assert_eq!(strategy.periods(), (8, 21, 5));
    }

    #[test]
    fn test_no_signals_are_produced() {
        let strategy = MacdStrategy::from_params(&serde_json::json!({}));
        assert!(strategy.process_indicator("{}").unwrap().is_none());
        assert_eq!(
            strategy.indicator_channel("XAUUSD", Timeframe::H1),
            "indicator:XAUUSD:H1:macd"
        );
    }
}
