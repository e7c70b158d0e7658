//! Order-related types.
//!
//! Order reports arrive as `report` notifications and as the result of
//! `getOrders`; order placement parameters are serialized into outbound
//! requests.

use serde::{Deserialize, Serialize};

use super::{parse_decimal, parse_signed_decimal};
use crate::error::Error;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy the base currency
    Buy,
    /// Sell the base currency
    Sell,
}

/// Time in force for a limit order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled
    #[serde(rename = "GTC")]
    Gtc,
    /// Immediate or cancel
    #[serde(rename = "IOC")]
    Ioc,
    /// Fill or kill
    #[serde(rename = "FOK")]
    Fok,
}

/// Last known state of one of our orders
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// Symbol
    pub symbol: String,
    /// Client order id
    pub client_order_id: String,
    /// Side as reported (`buy` / `sell`)
    pub side: String,
    /// Status as reported (`new`, `partiallyFilled`, `filled`, ...)
    pub status: String,
    /// Order type as reported
    pub order_type: String,
    /// Order quantity
    pub quantity: f64,
    /// Limit price
    pub price: f64,
    /// Cumulative executed quantity
    pub cum_quantity: f64,
    /// Quantity of the last trade
    pub trade_quantity: f64,
    /// Price of the last trade
    pub trade_price: f64,
    /// Fee of the last trade
    pub trade_fee: f64,
}

impl Order {
    /// Placeholder returned for an order we have no report for
    pub fn unknown(client_order_id: impl Into<String>) -> Self {
        Self {
            symbol: String::new(),
            client_order_id: client_order_id.into(),
            side: String::new(),
            status: "unknown".to_string(),
            order_type: String::new(),
            quantity: 0.0,
            price: 0.0,
            cum_quantity: 0.0,
            trade_quantity: 0.0,
            trade_price: 0.0,
            trade_fee: 0.0,
        }
    }

    /// Whether a report has been seen for this order
    pub fn is_known(&self) -> bool {
        self.status != "unknown"
    }
}

/// Order report as sent by the venue
///
/// Trade fields are only present on execution reports.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderParams {
    /// Symbol
    pub symbol: String,
    /// Client order id
    pub client_order_id: String,
    /// Side
    pub side: String,
    /// Status
    pub status: String,
    /// Order type
    #[serde(rename = "type")]
    pub order_type: String,
    /// Quantity
    pub quantity: String,
    /// Price
    #[serde(default)]
    pub price: Option<String>,
    /// Cumulative quantity
    pub cum_quantity: String,
    /// Last trade quantity
    #[serde(default)]
    pub trade_quantity: Option<String>,
    /// Last trade price
    #[serde(default)]
    pub trade_price: Option<String>,
    /// Last trade fee
    #[serde(default)]
    pub trade_fee: Option<String>,
}

impl OrderParams {
    /// Parse into an [`Order`]
    pub fn parse(&self) -> Result<Order, Error> {
        let opt = |field: &'static str, v: &Option<String>| -> Result<f64, Error> {
            match v.as_deref() {
                None | Some("") => Ok(0.0),
                Some(s) => parse_decimal(field, s),
            }
        };
        let trade_fee = match self.trade_fee.as_deref() {
            None | Some("") => 0.0,
            Some(s) => parse_signed_decimal("tradeFee", s)?,
        };
        Ok(Order {
            symbol: self.symbol.clone(),
            client_order_id: self.client_order_id.clone(),
            side: self.side.clone(),
            status: self.status.clone(),
            order_type: self.order_type.clone(),
            quantity: parse_decimal("quantity", &self.quantity)?,
            price: opt("price", &self.price)?,
            cum_quantity: parse_decimal("cumQuantity", &self.cum_quantity)?,
            trade_quantity: opt("tradeQuantity", &self.trade_quantity)?,
            trade_price: opt("tradePrice", &self.trade_price)?,
            trade_fee,
        })
    }
}

/// Parameters of a `newOrder` request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderParams {
    /// Client order id
    pub client_order_id: String,
    /// Symbol
    pub symbol: String,
    /// Side
    pub side: OrderSide,
    /// Always `limit`
    #[serde(rename = "type")]
    pub order_type: &'static str,
    /// Time in force
    pub time_in_force: TimeInForce,
    /// Quantity as decimal text
    pub quantity: String,
    /// Price as decimal text
    pub price: String,
}

/// Parameters of a `cancelReplaceOrder` request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReplaceParams {
    /// Order being replaced
    pub client_order_id: String,
    /// Client order id of the replacement
    #[serde(rename = "requestClientId")]
    pub request_client_id: String,
    /// New quantity as decimal text
    pub quantity: String,
    /// New price as decimal text
    pub price: String,
}

/// Parameters of a `cancelOrder` request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    /// Order to cancel
    pub client_order_id: String,
}

/// Format a decimal for the wire
pub fn format_decimal(value: f64) -> String {
    format!("{:.12}", value)
}

/// Round `value` toward zero to a whole number of `step`s
///
/// Used to fit prices to a symbol's tick size and quantities to its
/// quantity increment. A step that is not positive leaves `value` as is.
pub fn truncate_to_step(value: f64, step: f64) -> f64 {
    if step.is_nan() || step <= 0.0 {
        return value;
    }
    // Absorb representation error such as 0.3 / 0.1 = 2.9999999999999996
    let steps = (value / step + value.signum() * 1e-9).trunc();
    steps * step
}
