// WebSocket Server - accepts client connections for the hub

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::client::{handle_connection, ClientSettings};
use super::hub::Hub;

pub struct WsServer {
    addr: String,
    hub: Arc<Hub>,
    settings: ClientSettings,
}

impl WsServer {
    pub fn new(addr: &str, hub: Arc<Hub>, settings: ClientSettings) -> Self {
        Self {
            addr: addr.to_string(),
            hub,
            settings,
        }
    }

    /// Bind and accept forever. A bind failure is returned to the caller,
    /// which treats it as fatal at startup.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!(addr = %self.addr, "WebSocket server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "New WebSocket connection");
                    let hub = Arc::clone(&self.hub);
                    let settings = self.settings;
                    tokio::spawn(async move {
                        handle_connection(stream, peer, hub, settings).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}
