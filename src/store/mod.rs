// Store - durable persistence of closed bars

pub mod timeseries;
pub mod writer;

pub use timeseries::{StoreError, TimeseriesStore};
pub use writer::{BarWriter, WriterStats};
