// Core Type Definitions for the Tickflow Pipeline
// Ticks, candles, timeframes and the bar-event wire format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Timeframe
// ============================================================================

/// Fixed candle periods supported by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Every timeframe a symbol worker aggregates, in ascending period order.
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn period_secs(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
        }
    }

    /// Truncate a timestamp down to the start of its window.
    pub fn truncate(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let secs = t.timestamp();
        let start = secs - secs.rem_euclid(self.period_secs());
        DateTime::from_timestamp(start, 0).unwrap_or(t)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            _ => Err(format!("unknown timeframe: '{}'", s)),
        }
    }
}

// ============================================================================
// Tick
// ============================================================================

/// Canonical tick: normalized symbol, bid-as-price, unit volume, UTC seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub volume: i64,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tick({} {} @ {})",
            self.symbol,
            self.price,
            self.timestamp.format("%H:%M:%S")
        )
    }
}

// ============================================================================
// Candle
// ============================================================================

/// OHLCV bar keyed by (symbol, timeframe, start_time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Candle {
    /// Open a fresh bar from the first tick of a window.
    pub fn open_from_tick(
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        tick: &Tick,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            start_time: start,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
        }
    }

    /// `low <= min(open, close) <= max(open, close) <= high` and volume >= 0.
    pub fn is_valid_ohlc(&self) -> bool {
        ohlc_valid(self.open, self.high, self.low, self.close) && self.volume >= 0
    }
}

pub(crate) fn ohlc_valid(open: f64, high: f64, low: f64, close: f64) -> bool {
    if high < low {
        return false;
    }
    if high < open || high < close {
        return false;
    }
    if low > open || low > close {
        return false;
    }
    true
}

// ============================================================================
// Bar Events
// ============================================================================

/// Lifecycle phase carried on the bus with every bar emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarStatus {
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "CLOSE")]
    Close,
}

impl fmt::Display for BarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarStatus::Update => write!(f, "UPDATE"),
            BarStatus::Close => write!(f, "CLOSE"),
        }
    }
}

/// Unit published on `kline:{symbol}:{timeframe}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarEvent {
    pub status: BarStatus,
    pub candle: Candle,
}

impl BarEvent {
    pub fn topic(&self) -> String {
        kline_topic(&self.candle.symbol, self.candle.timeframe)
    }
}

/// `kline:{symbol}:{timeframe}`
pub fn kline_topic(symbol: &str, timeframe: Timeframe) -> String {
    format!("kline:{}:{}", symbol, timeframe)
}

/// `indicator:{symbol}:{timeframe}:{indicator}`
pub fn indicator_topic(symbol: &str, timeframe: &str, indicator: &str) -> String {
    format!("indicator:{}:{}:{}", symbol, timeframe, indicator)
}

// ============================================================================
// Hub-side bar
// ============================================================================

/// Bar as buffered and served to WebSocket subscribers. The wire name of the
/// window start is `time`, matching the snapshot schema.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferedBar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl BufferedBar {
    pub fn is_valid_ohlc(&self) -> bool {
        ohlc_valid(self.open, self.high, self.low, self.close) && self.volume >= 0
    }
}

impl From<&Candle> for BufferedBar {
    fn from(candle: &Candle) -> Self {
        Self {
            time: candle.start_time,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
        }
    }
}
