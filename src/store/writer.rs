// Bar Writer - persists closed bars from the bus into the time-series store
// UPDATE events are skipped; CLOSE events are written idempotently so replays
// against a warm feed cannot duplicate rows

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::bus::{BusMessage, MessageBus};
use crate::core::types::{BarEvent, BarStatus};
use crate::store::timeseries::TimeseriesStore;

/// Snapshot of writer counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterStats {
    pub events_seen: u64,
    pub bars_written: u64,
    pub duplicates_skipped: u64,
    pub write_failures: u64,
    pub parse_failures: u64,
}

pub struct BarWriter {
    bus: Arc<MessageBus>,
    store: Arc<TimeseriesStore>,
    stats: RwLock<WriterStats>,
}

impl BarWriter {
    pub fn new(bus: Arc<MessageBus>, store: Arc<TimeseriesStore>) -> Self {
        Self {
            bus,
            store,
            stats: RwLock::new(WriterStats::default()),
        }
    }

    /// Sequential consumer loop; terminates when the bus drops the channel.
    pub async fn run(&self) {
        let mut rx = self.bus.subscribe("kline:*:*");
        info!("Bar writer started, subscribed to kline:*:*");

        while let Some(msg) = rx.recv().await {
            self.process_message(msg).await;
        }

        info!("Bar writer stopping, bus channel closed");
    }

    async fn process_message(&self, msg: BusMessage) {
        self.stats.write().events_seen += 1;

        let event = match decode_event(&msg.payload) {
            Some(event) => event,
            None => {
                self.stats.write().parse_failures += 1;
                warn!(topic = %msg.topic, "Failed to parse bar event payload");
                return;
            }
        };

        // Only finalized bars are persisted
        if event.status != BarStatus::Close {
            return;
        }

        match self.store.insert_bar(&event.candle).await {
            Ok(0) => {
                self.stats.write().duplicates_skipped += 1;
                debug!(
                    symbol = %event.candle.symbol,
                    timeframe = %event.candle.timeframe,
                    start_time = %event.candle.start_time,
                    "Bar already persisted, skipped"
                );
            }
            Ok(_) => {
                self.stats.write().bars_written += 1;
                debug!(
                    symbol = %event.candle.symbol,
                    timeframe = %event.candle.timeframe,
                    start_time = %event.candle.start_time,
                    "Bar persisted"
                );
            }
            Err(e) => {
                self.stats.write().write_failures += 1;
                error!(
                    symbol = %event.candle.symbol,
                    timeframe = %event.candle.timeframe,
                    error = %e,
                    "Failed to persist bar"
                );
            }
        }
    }

    pub fn stats(&self) -> WriterStats {
        *self.stats.read()
    }
}

/// Decode a bus payload into a bar event; `None` for malformed payloads.
pub fn decode_event(payload: &str) -> Option<BarEvent> {
    serde_json::from_str(payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Candle, Timeframe};
    use chrono::{TimeZone, Utc};

    fn close_event_json() -> String {
        let event = BarEvent {
            status: BarStatus::Close,
            candle: Candle {
                symbol: "XAUUSD".to_string(),
                timeframe: Timeframe::M1,
                start_time: Utc.with_ymd_and_hms(2025, 11, 24, 10, 0, 0).unwrap(),
                open: 2650.0,
                high: 2655.0,
                low: 2650.0,
                close: 2655.0,
                volume: 2,
            },
        };
        serde_json::to_string(&event).unwrap()
    }

    #[test]
    fn test_decode_event_roundtrip() {
        let event = decode_event(&close_event_json()).unwrap();
        assert_eq!(event.status, BarStatus::Close);
        assert_eq!(event.candle.symbol, "XAUUSD");
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert!(decode_event("not json").is_none());
        assert!(decode_event(r#"{"status":"NOPE","candle":{}}"#).is_none());
    }

    #[test]
    fn test_update_events_are_not_persistable() {
        let json = close_event_json().replace("CLOSE", "UPDATE");
        let event = decode_event(&json).unwrap();
        assert_eq!(event.status, BarStatus::Update);
    }
}
