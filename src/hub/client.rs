// Client Session - read/write pumps for one WebSocket connection
// Reader parses subscription control frames; writer drains the bounded
// outbound queue and keeps the connection alive with pings

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::protocol::{Message, WebSocketConfig},
};
use tracing::{debug, error, info, warn};

use super::hub::Hub;

/// Keepalive and framing limits for client connections.
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub ping_period: Duration,
    pub pong_timeout: Duration,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    pub max_message_size: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            ping_period: Duration::from_secs(54),
            pong_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            queue_capacity: 256,
            max_message_size: 1_024,
        }
    }
}

/// Upgrade and serve one connection until either pump fails. Registration is
/// cleaned up on every exit path.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<Hub>,
    settings: ClientSettings,
) {
    let config = WebSocketConfig {
        max_message_size: Some(settings.max_message_size),
        max_frame_size: Some(settings.max_message_size),
        ..WebSocketConfig::default()
    };

    let ws_stream = match accept_async_with_config(stream, Some(config)).await {
        Ok(ws) => ws,
        Err(e) => {
            error!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    debug!(peer = %peer, "WebSocket handshake completed");

    let (tx, mut rx) = mpsc::channel::<String>(settings.queue_capacity);
    let id = hub.register(tx);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Writer pump: outbound queue plus periodic pings, both under the write
    // deadline.
    let write_timeout = settings.write_timeout;
    let ping_period = settings.ping_period;
    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_period);
        ping.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let payload = match outbound {
                        Some(payload) => payload,
                        None => {
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break;
                        }
                    };
                    let send = ws_sender.send(Message::Text(payload));
                    match tokio::time::timeout(write_timeout, send).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(error = %e, "Client write failed");
                            break;
                        }
                        Err(_) => {
                            warn!("Client write timed out");
                            break;
                        }
                    }
                }
                _ = ping.tick() => {
                    let send = ws_sender.send(Message::Ping(Vec::new()));
                    match tokio::time::timeout(write_timeout, send).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
            }
        }
    });

    // Reader pump: control frames, with the read deadline extended by any
    // inbound traffic (pongs included).
    let reader_hub = Arc::clone(&hub);
    let pong_timeout = settings.pong_timeout;
    let mut recv_task = tokio::spawn(async move {
        loop {
            let frame = match tokio::time::timeout(pong_timeout, ws_receiver.next()).await {
                Ok(frame) => frame,
                Err(_) => {
                    warn!(peer = %peer, "Client read deadline exceeded");
                    break;
                }
            };
            match frame {
                Some(Ok(Message::Text(text))) => reader_hub.handle_control(id, &text),
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                    // keepalive traffic extends the deadline by looping
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(peer = %peer, "Client closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(peer = %peer, error = %e, "Client read error");
                    break;
                }
                None => break,
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(id);
    info!(peer = %peer, client = id, "Client connection closed");
}
