// Tickflow - real-time market-data pipeline
//
// Ticks from an upstream feed are aggregated into multi-timeframe candles,
// fanned out over an in-process message bus to a durable writer, a WebSocket
// hub with sliding-window buffers and indicator republish, and a strategy
// runtime simulating trades against a margin ledger.

pub mod aggregate;
pub mod core;
pub mod feed;
pub mod hub;
pub mod indicators;
pub mod store;
pub mod strategy;

// Re-export the main component surface
pub use crate::core::{
    setup_logging, BusMessage, Config, MessageBus, Tick, Timeframe,
};
pub use aggregate::AggregatorManager;
pub use feed::UpstreamFeed;
pub use hub::{BufferManager, Hub, WsServer};
pub use store::{BarWriter, TimeseriesStore};
pub use strategy::{StrategyRuntime, TradeManager};
