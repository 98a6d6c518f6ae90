// Green Arrow EA - trend-following translation of indicator samples
// Trades only fresh signals: trend +1 buys at the up signal, -1 mirrors

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::core::types::{indicator_topic, Timeframe};
use crate::indicators::green_arrow::{GreenArrowParams, GreenArrowSample};
use crate::indicators::GREEN_ARROW;

use super::trade::TradeSide;
use super::{Signal, Strategy, StrategyError};

#[derive(Debug)]
pub struct GreenArrowStrategy {
    params: GreenArrowParams,
}

impl GreenArrowStrategy {
    /// Parse optional `indicator_params` overrides from the EA config.
    pub fn from_params(params: &Value) -> Result<Self, StrategyError> {
        let mut indicator_params = GreenArrowParams::default();

        if let Some(overrides) = params.get("indicator_params") {
            if let Some(length) = overrides.get("length").and_then(Value::as_u64) {
                indicator_params.length = length as usize;
            }
            if let Some(deviation) = overrides.get("deviation").and_then(Value::as_i64) {
                indicator_params.deviation = deviation as i32;
            }
            if let Some(money_risk) = overrides.get("money_risk").and_then(Value::as_f64) {
                indicator_params.money_risk = money_risk;
            }
            if let Some(signal) = overrides.get("signal").and_then(Value::as_i64) {
                indicator_params.signal = signal as i32;
            }
            if let Some(line) = overrides.get("line").and_then(Value::as_i64) {
                indicator_params.line = line as i32;
            }
        }

        let strategy = Self {
            params: indicator_params,
        };
        strategy.validate_params(params)?;
        Ok(strategy)
    }

    pub fn indicator_params(&self) -> GreenArrowParams {
        self.params
    }
}

impl Strategy for GreenArrowStrategy {
    fn name(&self) -> &str {
        "GreenArrow"
    }

    fn indicator_channel(&self, symbol: &str, timeframe: Timeframe) -> String {
        indicator_topic(symbol, timeframe.as_str(), GREEN_ARROW)
    }

    fn process_indicator(&self, payload: &str) -> Result<Option<Signal>, StrategyError> {
        let sample: GreenArrowSample = serde_json::from_str(payload)?;

        // only fresh transitions are tradeable
        if !sample.is_signal {
            return Ok(None);
        }

        if sample.trend == 1 && sample.up_signal > 0.0 {
            return Ok(Some(Signal {
                symbol: String::new(),
                timeframe: String::new(),
                side: TradeSide::Buy,
                price: sample.up_signal,
                stop_loss: sample.up_stop,
                trend: sample.trend,
                timestamp: Utc::now(),
            }));
        }
        if sample.trend == -1 && sample.down_signal > 0.0 {
            return Ok(Some(Signal {
                symbol: String::new(),
                timeframe: String::new(),
                side: TradeSide::Sell,
                price: sample.down_signal,
                stop_loss: sample.down_stop,
                trend: sample.trend,
                timestamp: Utc::now(),
            }));
        }

        debug!(trend = sample.trend, "Fresh sample without tradeable side");
        Ok(None)
    }

    fn validate_params(&self, _params: &Value) -> Result<(), StrategyError> {
        if self.params.length == 0 {
            return Err(StrategyError::InvalidParams("length must be positive".to_string()));
        }
        if self.params.money_risk <= 0.0 {
            return Err(StrategyError::InvalidParams("money_risk must be positive".to_string()));
        }
        Ok(())
    }
}
