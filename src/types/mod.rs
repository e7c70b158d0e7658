//! Wire and domain types for the HitBTC WebSocket API.
//!
//! - [`messages`] - Inbound notifications/responses and outbound requests
//! - [`market`] - Tickers, symbol metadata and balances
//! - [`order`] - Order reports and order request parameters

pub mod market;
pub mod messages;
pub mod order;

pub use market::{Balance, SymbolInfo, Ticker};
pub use messages::{InboundMessage, Request};
pub use order::{Order, OrderSide, TimeInForce};

use crate::error::Error;

/// Price of a level, parsed from the venue's decimal text
pub type Price = f64;

/// Resting size at a level; zero in a diff means "remove the level"
pub type Size = f64;

/// Per-symbol book sequence number
pub type Sequence = u64;

/// Timestamp in milliseconds since Unix epoch
pub type TimestampMs = u64;

/// Parse a decimal string field
///
/// Rejects text that is not a finite, non-negative number. A bad price must
/// never silently become a zero-priced level.
pub fn parse_decimal(field: &'static str, value: &str) -> Result<f64, Error> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(Error::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

/// Parse a decimal string field that may be negative, such as a fee rate
pub fn parse_signed_decimal(field: &'static str, value: &str) -> Result<f64, Error> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(Error::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

/// Current wall-clock time in milliseconds
pub fn now_ms() -> TimestampMs {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as TimestampMs)
        .unwrap_or(0)
}
