//! Market data types: tickers, symbol metadata and balances.
//!
//! Each domain type has a matching `*Params` wire struct holding the venue's
//! decimal strings; conversion parses them and fails on malformed numbers.

use serde::Deserialize;

use super::{now_ms, parse_decimal, parse_signed_decimal, Price, TimestampMs};
use crate::error::Error;

/// Best bid/ask for a symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ticker {
    /// Best ask, if the venue reported one
    pub ask: Option<Price>,
    /// Best bid, if the venue reported one
    pub bid: Option<Price>,
    /// Local receive time
    pub timestamp: TimestampMs,
}

/// `ticker` notification parameters
#[derive(Debug, Clone, Deserialize)]
pub struct TickerParams {
    /// Symbol
    pub symbol: String,
    /// Best ask price
    pub ask: Option<String>,
    /// Best bid price
    pub bid: Option<String>,
}

impl TickerParams {
    /// Parse into a [`Ticker`]
    pub fn parse(&self) -> Result<Ticker, Error> {
        Ok(Ticker {
            ask: parse_optional("ask", self.ask.as_deref())?,
            bid: parse_optional("bid", self.bid.as_deref())?,
            timestamp: now_ms(),
        })
    }
}

fn parse_optional(field: &'static str, value: Option<&str>) -> Result<Option<f64>, Error> {
    match value {
        None | Some("") => Ok(None),
        Some(v) => parse_decimal(field, v).map(Some),
    }
}

/// Static trading metadata for a symbol
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInfo {
    /// Symbol id, e.g. `ETHBTC`
    pub id: String,
    /// Base currency
    pub base_currency: String,
    /// Quote currency
    pub quote_currency: String,
    /// Minimum quantity step
    pub quantity_increment: f64,
    /// Minimum price step
    pub tick_size: f64,
    /// Taker fee rate
    pub take_liquidity_rate: f64,
    /// Maker fee rate
    pub provide_liquidity_rate: f64,
    /// Currency fees are charged in
    pub fee_currency: String,
}

/// One entry of a `getSymbols` result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolParams {
    /// Symbol id
    pub id: String,
    /// Base currency
    pub base_currency: String,
    /// Quote currency
    pub quote_currency: String,
    /// Quantity increment
    pub quantity_increment: String,
    /// Tick size
    pub tick_size: String,
    /// Taker fee rate
    pub take_liquidity_rate: String,
    /// Maker fee rate
    pub provide_liquidity_rate: String,
    /// Fee currency
    pub fee_currency: String,
}

impl SymbolParams {
    /// Parse into a [`SymbolInfo`]
    pub fn parse(&self) -> Result<SymbolInfo, Error> {
        Ok(SymbolInfo {
            id: self.id.clone(),
            base_currency: self.base_currency.clone(),
            quote_currency: self.quote_currency.clone(),
            quantity_increment: parse_decimal("quantityIncrement", &self.quantity_increment)?,
            tick_size: parse_decimal("tickSize", &self.tick_size)?,
            take_liquidity_rate: parse_signed_decimal(
                "takeLiquidityRate",
                &self.take_liquidity_rate,
            )?,
            provide_liquidity_rate: parse_signed_decimal(
                "provideLiquidityRate",
                &self.provide_liquidity_rate,
            )?,
            fee_currency: self.fee_currency.clone(),
        })
    }
}

/// Trading balance for one currency
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Balance {
    /// Free to trade
    pub available: f64,
    /// Locked in open orders
    pub reserved: f64,
}

/// One entry of a `getTradingBalance` result
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceParams {
    /// Currency code
    pub currency: String,
    /// Available amount
    pub available: String,
    /// Reserved amount
    pub reserved: String,
}

impl BalanceParams {
    /// Parse into a [`Balance`]
    pub fn parse(&self) -> Result<Balance, Error> {
        Ok(Balance {
            available: parse_decimal("available", &self.available)?,
            reserved: parse_decimal("reserved", &self.reserved)?,
        })
    }
}
