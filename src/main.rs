// Tickflow service binary
// Wires the full pipeline: upstream feed -> aggregator -> bus -> writer,
// hub (WebSocket fan-out + indicators) and strategy runtime

use std::sync::Arc;
use tracing::{error, info};

use tickflow::core::{setup_logging, Config, MessageBus};
use tickflow::hub::{BufferManager, ClientSettings, Hub, WsServer};
use tickflow::store::{BarWriter, TimeseriesStore};
use tickflow::strategy::StrategyRuntime;
use tickflow::{AggregatorManager, UpstreamFeed};

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    setup_logging(&config.log_level, config.log_json);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }
    info!(
        upstream = %config.upstream_ws_url,
        listen = %config.ws_listen_addr,
        buffer_size = config.buffer_max_size,
        "Starting tickflow"
    );

    // Stores are required at startup; an unreachable store is fatal.
    let store = match TimeseriesStore::connect(&config.database_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Could not connect to time-series store");
            std::process::exit(1);
        }
    };
    info!("Connected to time-series store");

    let bus = Arc::new(MessageBus::with_capacity(config.bus_queue_capacity));

    // Durable writer for closed bars
    let writer = Arc::new(BarWriter::new(bus.clone(), store.clone()));
    {
        let writer = writer.clone();
        tokio::spawn(async move { writer.run().await });
    }

    // Hub: buffers, dispatch loop, WebSocket endpoint
    let buffers = Arc::new(BufferManager::new(Some(store), config.buffer_max_size));
    let hub = Arc::new(Hub::new(buffers, bus.clone()));
    tokio::spawn(hub.clone().run());

    let settings = ClientSettings {
        ping_period: std::time::Duration::from_secs(config.ping_period_secs),
        pong_timeout: std::time::Duration::from_secs(config.pong_timeout_secs),
        write_timeout: std::time::Duration::from_secs(config.write_timeout_secs),
        queue_capacity: config.client_queue_capacity,
        ..ClientSettings::default()
    };
    let server = WsServer::new(&config.ws_listen_addr, hub.clone(), settings);
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "WebSocket server failed");
            std::process::exit(1);
        }
    });

    // Aggregation and upstream ingestion
    let manager = Arc::new(AggregatorManager::new(
        bus.clone(),
        config.tick_queue_capacity,
        config.tick_send_timeout_ms,
    ));
    let _monitor = manager.spawn_monitor();

    let feed = UpstreamFeed::new(
        &config.upstream_ws_url,
        config.reconnect_interval_secs,
        manager,
    );
    tokio::spawn(async move { feed.run().await });

    // Strategy runtime, driven by outer control surfaces
    let _runtime = Arc::new(StrategyRuntime::new(bus));

    info!("Tickflow pipeline running");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, exiting"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
