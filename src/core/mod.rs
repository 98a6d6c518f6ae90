// Core Module - Foundational types, config, logging, message bus

pub mod bus;
pub mod config;
pub mod logger;
pub mod types;

// Re-export commonly used items for convenience
pub use bus::{BusMessage, BusStats, MessageBus};
pub use config::{Config, ConfigError};
pub use logger::setup_logging;
pub use types::{
    indicator_topic, kline_topic, BarEvent, BarStatus, BufferedBar, Candle, Tick, Timeframe,
};
