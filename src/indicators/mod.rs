// Indicators - deterministic computations over bar windows

pub mod bollinger;
pub mod green_arrow;

pub use bollinger::{band_series, BollingerBands};
pub use green_arrow::{GreenArrowParams, GreenArrowSample, EMPTY_VALUE};

/// Name component of indicator topics published by the hub.
pub const GREEN_ARROW: &str = "green_arrow";
