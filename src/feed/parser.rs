// Tick Parser - decodes upstream quote frames into canonical ticks
// Non-quote frames are dropped silently; malformed quotes are dropped with a warning

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::core::types::Tick;

/// Fixed upstream time layout, interpreted as UTC.
const TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S";

// ============================================================================
// Raw upstream frame
// ============================================================================

/// Complete upstream frame shape. Only `Symbol`, `Bid` and `Time` are
/// consumed; the rest is decoded so malformed frames fail loudly.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamFrame {
    #[serde(rename = "Id", default)]
    pub id: i64,
    #[serde(rename = "Type", default)]
    pub frame_type: String,
    #[serde(rename = "Data", default)]
    pub data: UpstreamData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamData {
    #[serde(rename = "Args", default)]
    pub args: QuoteArgs,
    #[serde(rename = "Id", default)]
    pub id: i64,
    #[serde(rename = "Login", default)]
    pub login: i64,
    #[serde(rename = "PlatformId", default)]
    pub platform_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteArgs {
    #[serde(rename = "Symbol", default)]
    pub symbol: String,
    #[serde(rename = "Bid", default)]
    pub bid: f64,
    #[serde(rename = "Ask", default)]
    pub ask: f64,
    #[serde(rename = "Time", default)]
    pub time: String,
    #[serde(rename = "High", default)]
    pub high: f64,
    #[serde(rename = "Low", default)]
    pub low: f64,
    #[serde(rename = "Spread", default)]
    pub spread: f64,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid time format: '{0}'")]
    InvalidTime(String),
    #[error("quote frame is missing a symbol")]
    MissingSymbol,
}

// ============================================================================
// Parsing
// ============================================================================

/// Decode one upstream message. `Ok(None)` means the frame is not a quote and
/// should be skipped without noise; `Err` frames are dropped with a warning by
/// the caller.
pub fn parse_message(payload: &str) -> Result<Option<Tick>, ParseError> {
    let frame: UpstreamFrame = serde_json::from_str(payload)?;
    if frame.frame_type != "Quote" {
        return Ok(None);
    }
    parse_quote(&frame.data.args).map(Some)
}

fn parse_quote(args: &QuoteArgs) -> Result<Tick, ParseError> {
    if args.symbol.is_empty() {
        return Err(ParseError::MissingSymbol);
    }

    let naive = NaiveDateTime::parse_from_str(&args.time, TIME_LAYOUT)
        .map_err(|_| ParseError::InvalidTime(args.time.clone()))?;
    let timestamp: DateTime<Utc> = naive.and_utc();

    Ok(Tick {
        symbol: normalize_symbol(&args.symbol),
        price: args.bid,
        volume: 1,
        timestamp,
    })
}

/// Upstream symbols carry broker suffixes (`XAUUSD.raw`); keep everything up
/// to the first `.`.
pub fn normalize_symbol(symbol: &str) -> String {
    match symbol.split_once('.') {
        Some((head, _)) => head.to_string(),
        None => symbol.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_frame(symbol: &str, bid: f64, time: &str) -> String {
        format!(
            r#"{{"Id":6,"Type":"Quote","Data":{{"Args":{{"Symbol":"{symbol}","Bid":{bid},"Ask":{ask},"Time":"{time}","High":0,"Low":0,"Spread":0.3}},"Id":1,"Login":0,"PlatformId":2}}}}"#,
            symbol = symbol,
            bid = bid,
            ask = bid + 0.3,
            time = time,
        )
    }

    #[test]
    fn test_parse_quote_frame() {
        let tick = parse_message(&quote_frame("XAUUSD", 2650.55, "2025-11-24T19:45:19"))
            .unwrap()
            .unwrap();
        assert_eq!(tick.symbol, "XAUUSD");
        assert_eq!(tick.price, 2650.55);
        assert_eq!(tick.volume, 1);
        assert_eq!(tick.timestamp.to_rfc3339(), "2025-11-24T19:45:19+00:00");
    }

    #[test]
    fn test_symbol_suffix_is_truncated() {
        let tick = parse_message(&quote_frame("XAUUSD.raw", 2650.0, "2025-11-24T19:45:19"))
            .unwrap()
            .unwrap();
        assert_eq!(tick.symbol, "XAUUSD");

        // only the first '.' splits
        assert_eq!(normalize_symbol("EURUSD.a.b"), "EURUSD");
        assert_eq!(normalize_symbol("EURUSD"), "EURUSD");
    }

    #[test]
    fn test_non_quote_frame_is_skipped() {
        let payload = r#"{"Id":1,"Type":"Heartbeat","Data":{}}"#;
        assert!(parse_message(payload).unwrap().is_none());
    }

    #[test]
    fn test_invalid_time_is_an_error() {
        let err = parse_message(&quote_frame("XAUUSD", 2650.0, "19:45:19")).unwrap_err();
        assert!(matches!(err, ParseError::InvalidTime(_)));
    }

    #[test]
    fn test_missing_symbol_is_an_error() {
        let err = parse_message(&quote_frame("", 2650.0, "2025-11-24T19:45:19")).unwrap_err();
        assert!(matches!(err, ParseError::MissingSymbol));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(
            parse_message("not json"),
            Err(ParseError::InvalidJson(_))
        ));
    }
}
