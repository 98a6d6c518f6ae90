// Hub - WebSocket fan-out of bar snapshots and indicator republish
// Maintains the subscription multimap, drives the buffer manager off the bus,
// and broadcasts a full-buffer snapshot on every bar event

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::bus::{BusMessage, MessageBus};
use crate::core::types::{indicator_topic, BarEvent, BarStatus, BufferedBar};
use crate::indicators::green_arrow::{calculate, GreenArrowParams};
use crate::indicators::GREEN_ARROW;

use super::buffer::BufferManager;

pub type ClientId = u64;

// ============================================================================
// Wire formats
// ============================================================================

/// Control frame sent by clients.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub timeframe: String,
}

impl ClientMessage {
    /// `kline:{symbol}:{timeframe}`, or an error when either part is missing.
    pub fn channel_name(&self) -> Result<String, String> {
        if self.symbol.is_empty() || self.timeframe.is_empty() {
            return Err("symbol and timeframe are required".to_string());
        }
        Ok(format!("kline:{}:{}", self.symbol, self.timeframe))
    }
}

/// Full-buffer message pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub symbol: String,
    pub timeframe: String,
    pub data: Vec<BufferedBar>,
}

/// Legacy bar-event shape still accepted on the bus alongside the
/// aggregator's `{status, candle}` format.
#[derive(Debug, Clone, Deserialize)]
struct LegacyKlineMessage {
    symbol: String,
    timeframe: String,
    candle: BufferedBar,
    is_new: bool,
}

// ============================================================================
// Hub
// ============================================================================

struct ClientEntry {
    tx: mpsc::Sender<String>,
    channels: HashSet<String>,
}

/// Snapshot of hub counters.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub clients: usize,
    pub channels: usize,
    pub aggregator_frames: u64,
    pub legacy_frames: u64,
    pub unparseable_frames: u64,
    pub dropped_sends: u64,
    pub snapshots_sent: u64,
}

pub struct Hub {
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
    subscriptions: RwLock<HashMap<String, HashMap<ClientId, mpsc::Sender<String>>>>,
    buffers: Arc<BufferManager>,
    bus: Arc<MessageBus>,
    indicator_params: RwLock<GreenArrowParams>,
    next_client_id: AtomicU64,
    stats: RwLock<HubStats>,
}

impl Hub {
    pub fn new(buffers: Arc<BufferManager>, bus: Arc<MessageBus>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            buffers,
            bus,
            indicator_params: RwLock::new(GreenArrowParams::default()),
            next_client_id: AtomicU64::new(1),
            stats: RwLock::new(HubStats::default()),
        }
    }

    // ------------------------------------------------------------------
    // Client lifecycle
    // ------------------------------------------------------------------

    pub fn register(&self, tx: mpsc::Sender<String>) -> ClientId {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.clients.write().insert(
            id,
            ClientEntry {
                tx,
                channels: HashSet::new(),
            },
        );
        info!(client = id, "Client registered");
        id
    }

    /// Remove the client and every subscription it held.
    pub fn unregister(&self, id: ClientId) {
        let entry = self.clients.write().remove(&id);
        if let Some(entry) = entry {
            let mut subscriptions = self.subscriptions.write();
            for channel in &entry.channels {
                if let Some(clients) = subscriptions.get_mut(channel) {
                    clients.remove(&id);
                    if clients.is_empty() {
                        subscriptions.remove(channel);
                    }
                }
            }
            info!(client = id, "Client unregistered");
        }
    }

    /// Add the client to a channel, then send it one snapshot outside the
    /// subscription lock so a slow client cannot stall the fan-out path.
    pub fn subscribe(self: &Arc<Self>, id: ClientId, channel: &str) {
        let tx = {
            let mut clients = self.clients.write();
            let entry = match clients.get_mut(&id) {
                Some(entry) => entry,
                None => return,
            };
            entry.channels.insert(channel.to_string());
            entry.tx.clone()
        };
        {
            let mut subscriptions = self.subscriptions.write();
            subscriptions
                .entry(channel.to_string())
                .or_default()
                .insert(id, tx);
        }
        info!(client = id, channel = channel, "Client subscribed");

        let hub = Arc::clone(self);
        let channel = channel.to_string();
        tokio::spawn(async move {
            hub.send_snapshot(id, &channel).await;
        });
    }

    pub fn unsubscribe(&self, id: ClientId, channel: &str) {
        if let Some(entry) = self.clients.write().get_mut(&id) {
            entry.channels.remove(channel);
        }
        let mut subscriptions = self.subscriptions.write();
        if let Some(clients) = subscriptions.get_mut(channel) {
            clients.remove(&id);
            if clients.is_empty() {
                subscriptions.remove(channel);
            }
        }
        info!(client = id, channel = channel, "Client unsubscribed");
    }

    /// Apply a control frame from a client's reader.
    pub fn handle_control(self: &Arc<Self>, id: ClientId, raw: &str) {
        let msg: ClientMessage = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(client = id, error = %e, "Failed to parse client frame");
                return;
            }
        };
        let channel = match msg.channel_name() {
            Ok(channel) => channel,
            Err(e) => {
                warn!(client = id, error = %e, "Invalid client frame");
                return;
            }
        };
        match msg.action.as_str() {
            "subscribe" => self.subscribe(id, &channel),
            "unsubscribe" => self.unsubscribe(id, &channel),
            other => warn!(client = id, action = other, "Unknown client action"),
        }
    }

    // ------------------------------------------------------------------
    // Bar-event dispatch
    // ------------------------------------------------------------------

    /// Consume bar events off the bus until it closes.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.bus.subscribe("kline:*:*");
        info!("Hub dispatch loop started, subscribed to kline:*:*");
        while let Some(msg) = rx.recv().await {
            self.handle_bar_message(msg).await;
        }
        info!("Hub dispatch loop stopped, bus channel closed");
    }

    pub async fn handle_bar_message(&self, msg: BusMessage) {
        let (symbol, timeframe, bar, is_new) = match self.parse_bar_payload(&msg.payload) {
            Some(parts) => parts,
            None => {
                self.stats.write().unparseable_frames += 1;
                warn!(topic = %msg.topic, "Failed to parse bar payload");
                return;
            }
        };

        let key = format!("{}:{}", symbol, timeframe);
        self.buffers.apply(&key, bar, is_new).await;

        let bars = self.buffers.snapshot(&key).await;
        if bars.is_empty() {
            debug!(key = %key, "No bars buffered, nothing to broadcast");
            return;
        }

        let snapshot = SnapshotMessage {
            message_type: "snapshot".to_string(),
            symbol: symbol.clone(),
            timeframe: timeframe.clone(),
            data: bars.clone(),
        };
        match serde_json::to_string(&snapshot) {
            Ok(payload) => self.broadcast(&msg.topic, &payload),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode snapshot");
                return;
            }
        }

        self.republish_indicator(&symbol, &timeframe, &bars);
    }

    /// Accepts the aggregator's `{status, candle}` shape first, then the
    /// legacy `{symbol, timeframe, candle, is_new}` shape. Both paths are
    /// counted so live traffic can show whether the legacy one still occurs.
    fn parse_bar_payload(&self, payload: &str) -> Option<(String, String, BufferedBar, bool)> {
        if let Ok(event) = serde_json::from_str::<BarEvent>(payload) {
            self.stats.write().aggregator_frames += 1;
            let is_new = event.status == BarStatus::Close;
            let bar = BufferedBar::from(&event.candle);
            return Some((
                event.candle.symbol,
                event.candle.timeframe.as_str().to_string(),
                bar,
                is_new,
            ));
        }
        if let Ok(legacy) = serde_json::from_str::<LegacyKlineMessage>(payload) {
            self.stats.write().legacy_frames += 1;
            return Some((legacy.symbol, legacy.timeframe, legacy.candle, legacy.is_new));
        }
        None
    }

    /// Non-blocking send to every subscriber of the channel; identical
    /// payload for all, drop-on-full per client.
    fn broadcast(&self, channel: &str, payload: &str) {
        let subscriptions = self.subscriptions.read();
        let clients = match subscriptions.get(channel) {
            Some(clients) => clients,
            None => return,
        };
        for (id, tx) in clients {
            if tx.try_send(payload.to_string()).is_err() {
                self.stats.write().dropped_sends += 1;
                warn!(client = id, channel = channel, "Client queue full, dropping message");
            }
        }
    }

    fn republish_indicator(&self, symbol: &str, timeframe: &str, bars: &[BufferedBar]) {
        let params = *self.indicator_params.read();
        let samples = calculate(bars, &params);
        let last = match samples.last() {
            Some(last) => last,
            None => return,
        };
        match serde_json::to_string(last) {
            Ok(payload) => {
                let topic = indicator_topic(symbol, timeframe, GREEN_ARROW);
                self.bus.publish(&topic, payload);
            }
            Err(e) => warn!(error = %e, "Failed to encode indicator sample"),
        }
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// One snapshot for a freshly subscribed client. Empty buffers send
    /// nothing; the client will receive the first live snapshot instead.
    async fn send_snapshot(&self, id: ClientId, channel: &str) {
        let key = match channel_to_key(channel) {
            Some(key) => key,
            None => {
                warn!(channel = channel, "Invalid channel format");
                return;
            }
        };

        let bars = self.buffers.snapshot(&key.key).await;
        if bars.is_empty() {
            debug!(key = %key.key, "No bars buffered, skipping subscribe snapshot");
            return;
        }

        let snapshot = SnapshotMessage {
            message_type: "snapshot".to_string(),
            symbol: key.symbol,
            timeframe: key.timeframe,
            data: bars,
        };
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode snapshot");
                return;
            }
        };

        let tx = { self.clients.read().get(&id).map(|entry| entry.tx.clone()) };
        if let Some(tx) = tx {
            if tx.try_send(payload).is_ok() {
                self.stats.write().snapshots_sent += 1;
                debug!(client = id, channel = channel, "Subscribe snapshot sent");
            } else {
                self.stats.write().dropped_sends += 1;
                warn!(client = id, "Client queue full, dropping subscribe snapshot");
            }
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn update_indicator_params(&self, params: GreenArrowParams) {
        *self.indicator_params.write() = params;
        info!(?params, "Indicator params updated");
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscriptions
            .read()
            .get(channel)
            .map(|clients| clients.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> HubStats {
        let mut stats = self.stats.read().clone();
        stats.clients = self.clients.read().len();
        stats.channels = self.subscriptions.read().len();
        stats
    }
}

struct ChannelKey {
    key: String,
    symbol: String,
    timeframe: String,
}

/// `kline:{symbol}:{timeframe}` -> buffer key parts.
fn channel_to_key(channel: &str) -> Option<ChannelKey> {
    let mut parts = channel.split(':');
    if parts.next()? != "kline" {
        return None;
    }
    let symbol = parts.next()?;
    let timeframe = parts.next()?;
    if symbol.is_empty() || timeframe.is_empty() || parts.next().is_some() {
        return None;
    }
    Some(ChannelKey {
        key: format!("{}:{}", symbol, timeframe),
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
    })
}
