// Candle Buffers - per-(symbol, timeframe) sliding windows of recent bars
// Lazily created, warmed from the time-series store, validated on every write

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::types::BufferedBar;
use crate::store::timeseries::TimeseriesStore;

// ============================================================================
// CandleBuffer
// ============================================================================

/// Fixed-size sliding window of bars, oldest first.
pub struct CandleBuffer {
    bars: Vec<BufferedBar>,
    max_size: usize,
}

impl CandleBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            bars: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Append a finalized bar, evicting the oldest once full.
    pub fn append(&mut self, bar: BufferedBar) {
        self.bars.push(bar);
        if self.bars.len() > self.max_size {
            self.bars.remove(0);
        }
    }

    /// Replace the in-progress tail; appends when empty.
    pub fn replace_last(&mut self, bar: BufferedBar) {
        match self.bars.last_mut() {
            Some(last) => *last = bar,
            None => self.bars.push(bar),
        }
    }

    /// Defensive copy; callers may mutate the result freely.
    pub fn snapshot(&self) -> Vec<BufferedBar> {
        self.bars.clone()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

// ============================================================================
// BufferManager
// ============================================================================

/// Snapshot of buffer-manager counters.
#[derive(Debug, Clone, Default)]
pub struct BufferManagerStats {
    pub buffers: usize,
    pub rejected_bars: u64,
    pub warmup_rows_loaded: u64,
    pub warmup_rows_skipped: u64,
}

/// Owns every live buffer, keyed `"{symbol}:{timeframe}"`. Creation warms the
/// buffer from the store before it is first served; the map lock is only held
/// around lookup/insert.
pub struct BufferManager {
    buffers: RwLock<HashMap<String, Arc<RwLock<CandleBuffer>>>>,
    store: Option<Arc<TimeseriesStore>>,
    max_size: usize,
    stats: RwLock<BufferManagerStats>,
}

impl BufferManager {
    pub fn new(store: Option<Arc<TimeseriesStore>>, max_size: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            store,
            max_size: max_size.max(1),
            stats: RwLock::new(BufferManagerStats::default()),
        }
    }

    /// Apply one live bar event. Invalid bars are rejected without touching
    /// state; CLOSE appends, UPDATE replaces the tail.
    pub async fn apply(&self, key: &str, bar: BufferedBar, is_new: bool) {
        if !bar.is_valid_ohlc() {
            self.stats.write().rejected_bars += 1;
            warn!(
                key = key,
                open = bar.open,
                high = bar.high,
                low = bar.low,
                close = bar.close,
                "Rejecting invalid bar"
            );
            return;
        }

        let buffer = self.get_or_create(key).await;
        let mut guard = buffer.write();
        if is_new {
            guard.append(bar);
        } else {
            guard.replace_last(bar);
        }
    }

    /// Current contents for a key, oldest to newest. Unknown keys yield an
    /// empty vector without creating a buffer.
    pub async fn snapshot(&self, key: &str) -> Vec<BufferedBar> {
        let buffer = { self.buffers.read().get(key).cloned() };
        match buffer {
            Some(buffer) => buffer.read().snapshot(),
            None => Vec::new(),
        }
    }

    /// Lookup or create-and-warm the buffer for a key. Warmup happens after
    /// the map lock is released so slow reads cannot stall other keys.
    pub async fn get_or_create(&self, key: &str) -> Arc<RwLock<CandleBuffer>> {
        if let Some(buffer) = self.buffers.read().get(key) {
            return buffer.clone();
        }

        let buffer = {
            let mut buffers = self.buffers.write();
            if let Some(buffer) = buffers.get(key) {
                return buffer.clone();
            }
            info!(key = key, "Creating buffer");
            let buffer = Arc::new(RwLock::new(CandleBuffer::new(self.max_size)));
            buffers.insert(key.to_string(), buffer.clone());
            buffer
        };

        if self.store.is_some() {
            self.warm_from_store(key, &buffer).await;
        }
        buffer
    }

    async fn warm_from_store(&self, key: &str, buffer: &Arc<RwLock<CandleBuffer>>) {
        let store = match &self.store {
            Some(store) => store,
            None => return,
        };

        let (symbol, timeframe) = match split_key(key) {
            Some(parts) => parts,
            None => {
                warn!(key = key, "Invalid buffer key, skipping warmup");
                return;
            }
        };
        let timeframe = match timeframe.parse() {
            Ok(tf) => tf,
            Err(_) => {
                warn!(key = key, "Unknown timeframe in buffer key, skipping warmup");
                return;
            }
        };

        let rows = match store.recent_bars(&symbol, timeframe, self.max_size as i64).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to load buffer history");
                return;
            }
        };

        let mut loaded: u64 = 0;
        let mut skipped: u64 = 0;
        {
            let mut guard = buffer.write();
            let mut last_time = None;
            for bar in rows {
                if !bar.is_valid_ohlc() {
                    skipped += 1;
                    warn!(key = key, time = %bar.time, "Skipping invalid bar from store");
                    continue;
                }
                if let Some(last) = last_time {
                    if bar.time <= last {
                        skipped += 1;
                        warn!(key = key, time = %bar.time, "Skipping out-of-order bar from store");
                        continue;
                    }
                }
                last_time = Some(bar.time);
                guard.append(bar);
                loaded += 1;
            }
        }

        let mut stats = self.stats.write();
        stats.warmup_rows_loaded += loaded;
        stats.warmup_rows_skipped += skipped;
        debug!(key = key, loaded = loaded, skipped = skipped, "Buffer warmed from store");
    }

    pub fn stats(&self) -> BufferManagerStats {
        let mut stats = self.stats.read().clone();
        stats.buffers = self.buffers.read().len();
        stats
    }
}

fn split_key(key: &str) -> Option<(String, String)> {
    let (symbol, timeframe) = key.split_once(':')?;
    if symbol.is_empty() || timeframe.is_empty() || timeframe.contains(':') {
        return None;
    }
    Some((symbol.to_string(), timeframe.to_string()))
}
