// Symbol Aggregator - one bar state machine per timeframe for a single symbol

use std::sync::Arc;

use crate::core::bus::MessageBus;
use crate::core::types::{Tick, Timeframe};

use super::timeframe::{TimeframeAggregator, TimeframeStats};

/// Owns the full timeframe set for one symbol. A single worker drives it, so
/// ordering within the symbol is preserved.
pub struct SymbolAggregator {
    symbol: String,
    timeframes: Vec<TimeframeAggregator>,
}

impl SymbolAggregator {
    pub fn new(symbol: &str, bus: Arc<MessageBus>) -> Self {
        let timeframes = Timeframe::ALL
            .iter()
            .map(|tf| TimeframeAggregator::new(symbol, *tf, bus.clone()))
            .collect();
        Self {
            symbol: symbol.to_string(),
            timeframes,
        }
    }

    pub fn process_tick(&self, tick: &Tick) {
        for tf in &self.timeframes {
            tf.process_tick(tick);
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn stats(&self) -> Vec<(Timeframe, TimeframeStats)> {
        Timeframe::ALL
            .iter()
            .copied()
            .zip(self.timeframes.iter().map(|tf| tf.stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_tick_reaches_every_timeframe() {
        let bus = Arc::new(MessageBus::new());
        let mut rx = bus.subscribe("kline:EURUSD:*");
        let agg = SymbolAggregator::new("EURUSD", bus);

        agg.process_tick(&Tick {
            symbol: "EURUSD".to_string(),
            price: 1.0842,
            volume: 1,
            timestamp: Utc.with_ymd_and_hms(2025, 11, 24, 10, 0, 15).unwrap(),
        });

        let mut topics = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            topics.push(msg.topic);
        }
        assert_eq!(topics.len(), Timeframe::ALL.len());
        assert!(topics.contains(&"kline:EURUSD:M1".to_string()));
        assert!(topics.contains(&"kline:EURUSD:D1".to_string()));
    }
}
