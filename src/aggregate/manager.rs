// Aggregator Manager - routes parsed ticks to per-symbol workers
// One bounded queue + one consumer task per symbol, created on first sight.
// Backpressure: try-send, bounded wait, then drop with per-symbol accounting.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::bus::MessageBus;
use crate::core::types::Tick;

use super::symbol::SymbolAggregator;

const WORKER_LOG_INTERVAL: Duration = Duration::from_secs(10);
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Snapshot of manager-level counters.
#[derive(Debug, Clone, Default)]
pub struct AggregatorStats {
    pub active_symbols: usize,
    pub dropped_ticks: HashMap<String, u64>,
}

pub struct AggregatorManager {
    bus: Arc<MessageBus>,
    queue_capacity: usize,
    send_timeout: Duration,
    channels: RwLock<HashMap<String, mpsc::Sender<Tick>>>,
    dropped: Mutex<HashMap<String, u64>>,
}

impl AggregatorManager {
    pub fn new(bus: Arc<MessageBus>, queue_capacity: usize, send_timeout_ms: u64) -> Self {
        Self {
            bus,
            queue_capacity: queue_capacity.max(1),
            send_timeout: Duration::from_millis(send_timeout_ms),
            channels: RwLock::new(HashMap::new()),
            dropped: Mutex::new(HashMap::new()),
        }
    }

    /// Route one tick to its symbol worker. Never blocks longer than the
    /// bounded wait; on timeout the tick is dropped and counted.
    pub async fn handle_tick(&self, tick: Tick) {
        let tx = self.channel_for(&tick.symbol);
        let symbol = tick.symbol.clone();

        match tx.try_send(tick) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(symbol = %symbol, "Worker channel closed, dropping tick");
                self.count_drop(&symbol);
                return;
            }
            Err(mpsc::error::TrySendError::Full(tick)) => {
                let depth = self.queue_capacity - tx.capacity();
                warn!(
                    symbol = %symbol,
                    queue = depth,
                    capacity = self.queue_capacity,
                    "Worker queue busy, waiting"
                );
                if tx.send_timeout(tick, self.send_timeout).await.is_err() {
                    self.count_drop(&symbol);
                    let total = *self.dropped.lock().get(&symbol).unwrap_or(&0);
                    warn!(
                        symbol = %symbol,
                        total_dropped = total,
                        "Dropped tick, worker may be stuck"
                    );
                }
            }
        }
    }

    fn channel_for(&self, symbol: &str) -> mpsc::Sender<Tick> {
        if let Some(tx) = self.channels.read().get(symbol) {
            return tx.clone();
        }

        let mut channels = self.channels.write();
        if let Some(tx) = channels.get(symbol) {
            return tx.clone();
        }

        info!(symbol = symbol, "Creating worker for new symbol");
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let aggregator = SymbolAggregator::new(symbol, self.bus.clone());
        let capacity = self.queue_capacity;
        tokio::spawn(run_worker(aggregator, rx, capacity));
        channels.insert(symbol.to_string(), tx.clone());
        tx
    }

    fn count_drop(&self, symbol: &str) {
        *self.dropped.lock().entry(symbol.to_string()).or_insert(0) += 1;
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            active_symbols: self.channels.read().len(),
            dropped_ticks: self.dropped.lock().clone(),
        }
    }

    /// Periodic report: dropped-tick tallies plus any queue over 20% capacity.
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MONITOR_INTERVAL);
            interval.tick().await; // skip the immediate first tick
            loop {
                interval.tick().await;

                {
                    let dropped = manager.dropped.lock();
                    for (symbol, count) in dropped.iter().filter(|(_, c)| **c > 0) {
                        warn!(symbol = %symbol, dropped = count, "Dropped tick tally");
                    }
                }

                let channels = manager.channels.read();
                info!(symbols = channels.len(), "Active symbol workers");
                for (symbol, tx) in channels.iter() {
                    let depth = manager.queue_capacity - tx.capacity();
                    if depth * 5 > manager.queue_capacity {
                        warn!(
                            symbol = %symbol,
                            queue = depth,
                            capacity = manager.queue_capacity,
                            "Queue depth over 20% of capacity"
                        );
                    }
                }
            }
        })
    }
}

/// Per-symbol consumer loop: single reader preserves ordering within the
/// symbol. Logs throughput every 10 s.
async fn run_worker(aggregator: SymbolAggregator, mut rx: mpsc::Receiver<Tick>, capacity: usize) {
    info!(symbol = aggregator.symbol(), "Worker started");
    let mut processed: u64 = 0;
    let mut last_log = Instant::now();

    while let Some(tick) = rx.recv().await {
        aggregator.process_tick(&tick);
        processed += 1;

        if last_log.elapsed() >= WORKER_LOG_INTERVAL {
            let depth = rx.len();
            info!(
                symbol = aggregator.symbol(),
                processed = processed,
                queue = depth,
                capacity = capacity,
                "Worker throughput"
            );
            processed = 0;
            last_log = Instant::now();
        }
    }

    info!(symbol = aggregator.symbol(), "Worker stopped, channel closed");
}
