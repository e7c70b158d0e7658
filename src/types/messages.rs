//! WebSocket message types.
//!
//! Inbound frames are JSON-RPC style: notifications carry a `method` and
//! `params`, responses carry the `id` of the request they answer plus either
//! `result` or `error`. [`classify`] turns a raw frame into an
//! [`InboundMessage`]; anything that fails to decode, including a decimal
//! that does not parse, is reported as an error so the caller can drop the
//! whole message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::market::{TickerParams, Ticker};
use super::order::{CancelParams, CancelReplaceParams, NewOrderParams, Order, OrderParams};
use super::{now_ms, parse_decimal, Sequence};
use crate::error::Error;
use crate::orderbook::{BookItem, Orderbook};

/// Outbound request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    /// Authenticate the connection
    Login,
    /// Subscribe to order book snapshot + diffs for a symbol
    SubscribeOrderbook,
    /// Subscribe to best bid/ask for a symbol
    SubscribeTicker,
    /// Subscribe to our order reports
    SubscribeReports,
    /// Fetch symbol metadata
    GetSymbols,
    /// Fetch trading balances
    GetTradingBalance,
    /// Fetch active orders
    GetOrders,
    /// Place an order
    NewOrder,
    /// Replace an order
    CancelReplaceOrder,
    /// Cancel an order
    CancelOrder,
}

impl Method {
    /// Whether requests with this method are recorded for replay on reconnect
    pub fn is_subscription(self) -> bool {
        matches!(
            self,
            Method::SubscribeOrderbook | Method::SubscribeTicker | Method::SubscribeReports
        )
    }
}

/// Parameters of the `login` request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginParams {
    /// Signature algorithm, always `HS256`
    pub algo: &'static str,
    /// API key
    #[serde(rename = "pKey")]
    pub p_key: String,
    /// Random nonce that was signed
    pub nonce: String,
    /// Hex HMAC-SHA256 of the nonce
    pub signature: String,
}

/// Request parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Params {
    /// `{}`
    Empty {},
    /// `{"symbol": ...}`
    Symbol {
        /// Symbol
        symbol: String,
    },
    /// Login
    Login(LoginParams),
    /// New order
    NewOrder(NewOrderParams),
    /// Cancel/replace
    CancelReplace(CancelReplaceParams),
    /// Cancel
    Cancel(CancelParams),
}

/// Outbound request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Correlation id
    pub id: String,
    /// Method
    pub method: Method,
    /// Parameters
    pub params: Params,
}

/// Generate a fresh correlation id (32 hex chars)
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl Request {
    /// Build a request with a fresh id
    pub fn new(method: Method, params: Params) -> Self {
        Self {
            id: new_request_id(),
            method,
            params,
        }
    }

    /// `login`
    pub fn login(params: LoginParams) -> Self {
        Self::new(Method::Login, Params::Login(params))
    }

    /// `subscribeOrderbook`
    pub fn subscribe_orderbook(symbol: impl Into<String>) -> Self {
        Self::new(
            Method::SubscribeOrderbook,
            Params::Symbol {
                symbol: symbol.into(),
            },
        )
    }

    /// `subscribeTicker`
    pub fn subscribe_ticker(symbol: impl Into<String>) -> Self {
        Self::new(
            Method::SubscribeTicker,
            Params::Symbol {
                symbol: symbol.into(),
            },
        )
    }

    /// `subscribeReports`
    pub fn subscribe_reports() -> Self {
        Self::new(Method::SubscribeReports, Params::Empty {})
    }

    /// `getSymbols`
    pub fn get_symbols() -> Self {
        Self::new(Method::GetSymbols, Params::Empty {})
    }

    /// `getTradingBalance`
    pub fn get_trading_balance() -> Self {
        Self::new(Method::GetTradingBalance, Params::Empty {})
    }

    /// `getOrders`
    pub fn get_orders() -> Self {
        Self::new(Method::GetOrders, Params::Empty {})
    }

    /// `newOrder`
    pub fn new_order(params: NewOrderParams) -> Self {
        Self::new(Method::NewOrder, Params::NewOrder(params))
    }

    /// `cancelReplaceOrder`
    pub fn cancel_replace_order(params: CancelReplaceParams) -> Self {
        Self::new(Method::CancelReplaceOrder, Params::CancelReplace(params))
    }

    /// `cancelOrder`
    pub fn cancel_order(params: CancelParams) -> Self {
        Self::new(Method::CancelOrder, Params::Cancel(params))
    }

    /// Same request under a new correlation id
    #[must_use]
    pub fn with_fresh_id(&self) -> Self {
        Self {
            id: new_request_id(),
            method: self.method,
            params: self.params.clone(),
        }
    }

    /// Same method and parameters, ignoring the id
    pub fn same_target(&self, other: &Request) -> bool {
        self.method == other.method && self.params == other.params
    }

    /// Serialize to a JSON frame
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One `{price, size}` level on the wire
#[derive(Debug, Clone, Deserialize)]
pub struct LevelParams {
    /// Price as decimal text
    pub price: String,
    /// Size as decimal text
    pub size: String,
}

impl LevelParams {
    fn parse(&self) -> Result<BookItem, Error> {
        Ok(BookItem::new(
            parse_decimal("price", &self.price)?,
            parse_decimal("size", &self.size)?,
        ))
    }
}

/// `snapshotOrderbook` / `updateOrderbook` parameters
#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookParams {
    /// Symbol
    pub symbol: String,
    /// Book sequence number
    pub sequence: Sequence,
    /// Ask levels
    #[serde(default)]
    pub ask: Vec<LevelParams>,
    /// Bid levels
    #[serde(default)]
    pub bid: Vec<LevelParams>,
}

impl OrderbookParams {
    fn parse_levels(levels: &[LevelParams]) -> Result<Vec<BookItem>, Error> {
        levels.iter().map(LevelParams::parse).collect()
    }

    /// Parse as an authoritative snapshot bounded to `max_depth` levels per side
    pub fn to_snapshot(&self, max_depth: usize) -> Result<Orderbook, Error> {
        Ok(Orderbook::snapshot(
            self.sequence,
            now_ms(),
            Self::parse_levels(&self.ask)?,
            Self::parse_levels(&self.bid)?,
            max_depth,
        ))
    }

    /// Parse as a diff; every level is kept in arrival order
    pub fn to_diff(&self) -> Result<Orderbook, Error> {
        Ok(Orderbook::diff(
            self.sequence,
            now_ms(),
            Self::parse_levels(&self.ask)?,
            Self::parse_levels(&self.bid)?,
        ))
    }
}

/// Error object of a failed request
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    /// Venue error code
    pub code: i64,
    /// Short message
    pub message: String,
    /// Longer description, if any
    #[serde(default)]
    pub description: Option<String>,
}

impl From<ErrorBody> for Error {
    fn from(body: ErrorBody) -> Self {
        let message = match body.description {
            Some(d) if !d.is_empty() => format!("{}: {}", body.message, d),
            _ => body.message,
        };
        Error::Api {
            code: body.code,
            message,
        }
    }
}

/// Response to one of our requests
#[derive(Debug, Clone)]
pub struct Response {
    /// Id of the request being answered
    pub id: String,
    /// `result` or `error`
    pub outcome: Result<Value, ErrorBody>,
}

/// A classified inbound frame
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Full book for a symbol
    Snapshot {
        /// Symbol
        symbol: String,
        /// Book truncated to the configured depth
        book: Orderbook,
    },
    /// Incremental book update for a symbol
    Diff {
        /// Symbol
        symbol: String,
        /// Levels to upsert or remove, stamped with the sequence
        book: Orderbook,
    },
    /// Best bid/ask update
    Ticker {
        /// Symbol
        symbol: String,
        /// Parsed ticker
        ticker: Ticker,
    },
    /// Order execution report
    Report(Order),
    /// Correlated response
    Response(Response),
    /// Notification with a method we do not handle
    Other(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

fn params_of<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    params: Option<Value>,
) -> Result<T, Error> {
    let params = params.ok_or_else(|| Error::Malformed {
        kind,
        reason: "missing params".to_string(),
    })?;
    Ok(serde_json::from_value(params)?)
}

/// Classify a raw text frame
///
/// Snapshots are bounded to `max_depth` levels per side.
pub fn classify(text: &str, max_depth: usize) -> Result<InboundMessage, Error> {
    let envelope: Envelope = serde_json::from_str(text)?;

    if let Some(method) = envelope.method {
        return match method.as_str() {
            "snapshotOrderbook" => {
                let params: OrderbookParams = params_of("snapshotOrderbook", envelope.params)?;
                let book = params.to_snapshot(max_depth)?;
                Ok(InboundMessage::Snapshot {
                    symbol: params.symbol,
                    book,
                })
            }
            "updateOrderbook" => {
                let params: OrderbookParams = params_of("updateOrderbook", envelope.params)?;
                let book = params.to_diff()?;
                Ok(InboundMessage::Diff {
                    symbol: params.symbol,
                    book,
                })
            }
            "ticker" => {
                let params: TickerParams = params_of("ticker", envelope.params)?;
                let ticker = params.parse()?;
                Ok(InboundMessage::Ticker {
                    symbol: params.symbol,
                    ticker,
                })
            }
            "report" => {
                let params: OrderParams = params_of("report", envelope.params)?;
                Ok(InboundMessage::Report(params.parse()?))
            }
            _ => Ok(InboundMessage::Other(method)),
        };
    }

    let id = match envelope.id {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(Error::Malformed {
                kind: "response",
                reason: "neither method nor id".to_string(),
            })
        }
    };
    let outcome = match envelope.error {
        Some(error) => Err(error),
        None => Ok(envelope.result.unwrap_or(Value::Null)),
    };
    Ok(InboundMessage::Response(Response { id, outcome }))
}
