//! Exchange gateway abstraction.
//!
//! A closed set of venues, a capability trait for market orders and balance
//! lookup, and the factory that opens authenticated gateways. Venue names
//! resolve through the `ExchangeId` enum, never by reflective lookup; an
//! unknown name is a typed parse error.

mod binance;
mod bybit;

pub use binance::BinanceGateway;
pub use bybit::BybitGateway;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ExchangeCredentials;

/// The venues the engine can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Bybit,
    Kraken,
    Kucoin,
    Okx,
    Bingx,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 6] = [
        ExchangeId::Binance,
        ExchangeId::Bybit,
        ExchangeId::Kraken,
        ExchangeId::Kucoin,
        ExchangeId::Okx,
        ExchangeId::Bingx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Kraken => "kraken",
            ExchangeId::Kucoin => "kucoin",
            ExchangeId::Okx => "okx",
            ExchangeId::Bingx => "bingx",
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Venue name that is not part of the supported set.
#[derive(Debug, Error)]
#[error("unknown exchange: {0}")]
pub struct UnknownExchange(pub String);

impl FromStr for ExchangeId {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExchangeId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownExchange(s.to_string()))
    }
}

/// Result of a filled market order.
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub order_id: String,
    /// Average fill price in quote units
    pub price: Decimal,
    /// Filled quantity in base units
    pub amount: Decimal,
}

/// Failure from gateway construction or an exchange call. Propagates to the
/// caller as a value; exchange trouble never crashes the scheduler.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0} live trading is not supported")]
    Unsupported(ExchangeId),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{exchange} rejected the request: {message}")]
    Rejected {
        exchange: ExchangeId,
        message: String,
    },

    #[error("unexpected {exchange} response: {detail}")]
    InvalidResponse {
        exchange: ExchangeId,
        detail: String,
    },

    #[error("symbol {0} is not in BASE/QUOTE form")]
    InvalidSymbol(String),
}

/// One authenticated connection to an exchange account.
///
/// A gateway is owned exclusively by a single execution for its lifetime and
/// must be closed on every exit path.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    /// Place a market buy and report its fill.
    async fn market_buy(&self, symbol: &str, amount: Decimal) -> Result<OrderFill, GatewayError>;

    /// Place a market sell and report its fill.
    async fn market_sell(&self, symbol: &str, amount: Decimal) -> Result<OrderFill, GatewayError>;

    /// Free balance of one asset on this account. Absent assets report zero.
    async fn balance(&self, asset: &str) -> Result<Decimal, GatewayError>;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), GatewayError>;
}

/// Opens gateways on demand. The seam dry runs and tests replace.
#[async_trait]
pub trait GatewayProvider: Send + Sync {
    async fn connect(
        &self,
        exchange: ExchangeId,
        credentials: &ExchangeCredentials,
    ) -> Result<Box<dyn ExchangeGateway>, GatewayError>;
}

/// Factory over the closed venue set. Venues without a live order
/// implementation construct to a typed error instead of a stub gateway.
pub struct LiveGatewayProvider;

#[async_trait]
impl GatewayProvider for LiveGatewayProvider {
    async fn connect(
        &self,
        exchange: ExchangeId,
        credentials: &ExchangeCredentials,
    ) -> Result<Box<dyn ExchangeGateway>, GatewayError> {
        match exchange {
            ExchangeId::Binance => Ok(Box::new(BinanceGateway::connect(credentials)?)),
            ExchangeId::Bybit => Ok(Box::new(BybitGateway::connect(credentials)?)),
            other => Err(GatewayError::Unsupported(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> ExchangeCredentials {
        ExchangeCredentials {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            passphrase: None,
        }
    }

    #[test]
    fn parses_known_names_case_insensitively() {
        assert_eq!("binance".parse::<ExchangeId>().unwrap(), ExchangeId::Binance);
        assert_eq!("Kraken".parse::<ExchangeId>().unwrap(), ExchangeId::Kraken);
        assert_eq!(" OKX ".parse::<ExchangeId>().unwrap(), ExchangeId::Okx);
    }

    #[test]
    fn unknown_name_is_a_typed_error() {
        let err = "hyperliquid".parse::<ExchangeId>().unwrap_err();
        assert_eq!(err.to_string(), "unknown exchange: hyperliquid");
    }

    #[test]
    fn display_round_trips_through_parse() {
        for id in ExchangeId::ALL {
            assert_eq!(id.to_string().parse::<ExchangeId>().unwrap(), id);
        }
    }

    #[tokio::test]
    async fn venues_without_live_support_refuse_to_connect() {
        for id in [ExchangeId::Kraken, ExchangeId::Kucoin, ExchangeId::Okx, ExchangeId::Bingx] {
            let err = LiveGatewayProvider
                .connect(id, &credentials())
                .await
                .err()
                .expect("must not connect");
            assert!(matches!(err, GatewayError::Unsupported(e) if e == id));
        }
    }
}
