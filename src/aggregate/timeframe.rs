// Timeframe Aggregator - per-(symbol, timeframe) bar state machine
// Emits UPDATE on every mutation and exactly one CLOSE per bar, gap-filling
// missed windows with flat zero-volume bars

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::core::bus::MessageBus;
use crate::core::types::{kline_topic, BarEvent, BarStatus, Candle, Tick, Timeframe};

/// Single-bar state machine for one (symbol, timeframe). The current bar is
/// guarded by its own mutex so a symbol worker may parallelize across
/// timeframes; emission never blocks aggregation.
pub struct TimeframeAggregator {
    symbol: String,
    timeframe: Timeframe,
    topic: String,
    current: Mutex<Option<Candle>>,
    bus: Arc<MessageBus>,
    stats: Mutex<TimeframeStats>,
}

/// Snapshot of per-state-machine counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeframeStats {
    pub ticks_processed: u64,
    pub bars_closed: u64,
    pub gap_fills: u64,
    pub out_of_order: u64,
}

impl TimeframeAggregator {
    pub fn new(symbol: &str, timeframe: Timeframe, bus: Arc<MessageBus>) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            topic: kline_topic(symbol, timeframe),
            current: Mutex::new(None),
            bus,
            stats: Mutex::new(TimeframeStats::default()),
        }
    }

    pub fn process_tick(&self, tick: &Tick) {
        let window_start = self.timeframe.truncate(tick.timestamp);
        let mut current = self.current.lock();
        self.stats.lock().ticks_processed += 1;

        let candle = match current.as_mut() {
            None => {
                let candle =
                    Candle::open_from_tick(&self.symbol, self.timeframe, window_start, tick);
                self.publish(BarStatus::Update, &candle);
                *current = Some(candle);
                return;
            }
            Some(candle) => candle,
        };

        if window_start == candle.start_time {
            candle.high = candle.high.max(tick.price);
            candle.low = candle.low.min(tick.price);
            candle.close = tick.price;
            candle.volume += tick.volume;
            self.publish(BarStatus::Update, candle);
            return;
        }

        if window_start > candle.start_time {
            let period = self.timeframe.period_secs();
            let missed = (window_start.timestamp() - candle.start_time.timestamp()) / period;
            if missed > 1 {
                warn!(
                    symbol = %self.symbol,
                    timeframe = %self.timeframe,
                    missed = missed - 1,
                    from = %candle.start_time.format("%H:%M:%S"),
                    to = %window_start.format("%H:%M:%S"),
                    "Time gap detected, filling missed bars"
                );
                self.fill_missing_bars(candle, missed - 1);
            }

            self.publish(BarStatus::Close, candle);
            self.stats.lock().bars_closed += 1;

            let fresh = Candle::open_from_tick(&self.symbol, self.timeframe, window_start, tick);
            self.publish(BarStatus::Update, &fresh);
            *current = Some(fresh);
            return;
        }

        // window_start < candle.start_time: out-of-order tick
        self.stats.lock().out_of_order += 1;
        warn!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            tick_window = %window_start.format("%H:%M:%S"),
            current_window = %candle.start_time.format("%H:%M:%S"),
            "Out-of-order tick, ignoring"
        );
    }

    /// Synthesize `count` flat bars after the current one, each opened and
    /// closed at the prior close with zero volume, each a stand-alone CLOSE.
    fn fill_missing_bars(&self, current: &Candle, count: i64) {
        let last_close = current.close;
        let period = chrono::Duration::seconds(self.timeframe.period_secs());
        let mut start = current.start_time;

        for _ in 0..count {
            start += period;
            let filler = Candle {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe,
                start_time: start,
                open: last_close,
                high: last_close,
                low: last_close,
                close: last_close,
                volume: 0,
            };
            self.publish(BarStatus::Close, &filler);
            let mut stats = self.stats.lock();
            stats.gap_fills += 1;
            stats.bars_closed += 1;
            debug!(
                symbol = %self.symbol,
                timeframe = %self.timeframe,
                start = %start.format("%H:%M:%S"),
                "Filled missing bar"
            );
        }
    }

    fn publish(&self, status: BarStatus, candle: &Candle) {
        let event = BarEvent {
            status,
            candle: candle.clone(),
        };
        match serde_json::to_string(&event) {
            Ok(payload) => self.bus.publish(&self.topic, payload),
            Err(e) => error!(topic = %self.topic, error = %e, "Failed to encode bar event"),
        }
    }

    pub fn current_bar(&self) -> Option<Candle> {
        self.current.lock().clone()
    }

    pub fn stats(&self) -> TimeframeStats {
        *self.stats.lock()
    }
}
