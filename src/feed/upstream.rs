// Upstream Feed - WebSocket client for the raw quote stream
// Client-initiated connection; on any failure, reconnect after a fixed
// backoff, forever

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{error, info, warn};

use crate::aggregate::AggregatorManager;
use crate::feed::parser::parse_message;

/// Snapshot of feed counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedStats {
    pub connects: u64,
    pub frames_received: u64,
    pub ticks_parsed: u64,
    pub parse_failures: u64,
}

pub struct UpstreamFeed {
    url: String,
    reconnect_interval: Duration,
    manager: Arc<AggregatorManager>,
    stats: RwLock<FeedStats>,
}

impl UpstreamFeed {
    pub fn new(url: &str, reconnect_interval_secs: u64, manager: Arc<AggregatorManager>) -> Self {
        Self {
            url: url.to_string(),
            reconnect_interval: Duration::from_secs(reconnect_interval_secs),
            manager,
            stats: RwLock::new(FeedStats::default()),
        }
    }

    /// Connect-read-reconnect loop. Never returns.
    pub async fn run(&self) {
        loop {
            info!(url = %self.url, "Connecting to upstream WebSocket");

            match connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!("Connected to upstream WebSocket");
                    self.stats.write().connects += 1;
                    self.read_until_disconnect(ws_stream).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to upstream");
                }
            }

            warn!(
                delay_secs = self.reconnect_interval.as_secs(),
                "Upstream connection lost, reconnecting"
            );
            tokio::time::sleep(self.reconnect_interval).await;
        }
    }

    async fn read_until_disconnect(&self, ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        let (mut write, mut read) = ws_stream.split();

        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    self.stats.write().frames_received += 1;
                    self.handle_frame(&text).await;
                }
                Ok(Message::Ping(data)) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(_)) => {
                    info!("Upstream closed the connection");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Upstream read error, connection lost");
                    return;
                }
            }
        }

        info!("Upstream stream ended");
    }

    async fn handle_frame(&self, payload: &str) {
        match parse_message(payload) {
            Ok(Some(tick)) => {
                self.stats.write().ticks_parsed += 1;
                self.manager.handle_tick(tick).await;
            }
            Ok(None) => {} // not a quote frame
            Err(e) => {
                self.stats.write().parse_failures += 1;
                warn!(error = %e, "Failed to parse upstream frame");
            }
        }
    }

    pub fn stats(&self) -> FeedStats {
        *self.stats.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bus::MessageBus;
    use crate::core::types::BarEvent;

    #[tokio::test]
    async fn test_quote_frame_flows_into_aggregation() {
        let bus = Arc::new(MessageBus::new());
        let mut rx = bus.subscribe("kline:XAUUSD:M1");
        let manager = Arc::new(AggregatorManager::new(bus, 100, 500));
        let feed = UpstreamFeed::new("ws://unused", 5, manager);

        let frame = r#"{"Id":6,"Type":"Quote","Data":{"Args":{"Symbol":"XAUUSD.raw","Bid":2650.5,"Ask":2650.8,"Time":"2025-11-24T10:00:15","High":0,"Low":0,"Spread":0.3},"Id":1,"Login":0,"PlatformId":2}}"#;
        feed.handle_frame(frame).await;

        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("aggregator should publish")
            .expect("bus open");
        let event: BarEvent = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(event.candle.symbol, "XAUUSD");
        assert_eq!(event.candle.open, 2650.5);

        let stats = feed.stats();
        assert_eq!(stats.ticks_parsed, 1);
        assert_eq!(stats.parse_failures, 0);
    }

    #[tokio::test]
    async fn test_bad_frames_are_counted_not_fatal() {
        let bus = Arc::new(MessageBus::new());
        let manager = Arc::new(AggregatorManager::new(bus, 100, 500));
        let feed = UpstreamFeed::new("ws://unused", 5, manager);

        feed.handle_frame("garbage").await;
        feed.handle_frame(r#"{"Type":"Heartbeat"}"#).await;

        let stats = feed.stats();
        assert_eq!(stats.parse_failures, 1);
        assert_eq!(stats.ticks_parsed, 0);
    }
}
