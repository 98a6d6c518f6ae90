// Feed - upstream connectivity and tick decoding

pub mod parser;
pub mod upstream;

pub use parser::{normalize_symbol, parse_message, ParseError};
pub use upstream::{FeedStats, UpstreamFeed};
