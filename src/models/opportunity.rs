//! Opportunity model: a detected cross-exchange price discrepancy.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange::ExchangeId;

/// A price discrepancy for one symbol across two exchanges, supplied by the
/// external discovery feed. Ephemeral: lives for at most one scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    /// Trading pair in "BASE/QUOTE" form (e.g. "BTC/USDT")
    pub symbol: String,

    /// Exchange with the lower price (buy leg)
    pub buy_exchange: ExchangeId,

    /// Exchange with the higher price (sell leg)
    pub sell_exchange: ExchangeId,

    /// Observed price on the buy exchange
    pub buy_price: Decimal,

    /// Observed price on the sell exchange
    pub sell_price: Decimal,

    /// Spread as a percentage of the buy price
    pub profit_percentage: Decimal,

    /// Tradable volume in base units, when the feed reports one
    #[serde(default)]
    pub volume: Option<Decimal>,

    /// When the discrepancy was observed
    pub timestamp: DateTime<Utc>,
}

impl Opportunity {
    /// Split the symbol into its (base, quote) assets.
    pub fn assets(&self) -> Option<(&str, &str)> {
        let (base, quote) = self.symbol.split_once('/')?;
        if base.is_empty() || quote.is_empty() {
            return None;
        }
        Some((base, quote))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn opportunity(symbol: &str) -> Opportunity {
        Opportunity {
            symbol: symbol.to_string(),
            buy_exchange: ExchangeId::Binance,
            sell_exchange: ExchangeId::Kraken,
            buy_price: dec!(100),
            sell_price: dec!(101.2),
            profit_percentage: dec!(1.2),
            volume: Some(dec!(0.5)),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn splits_symbol_into_assets() {
        let opp = opportunity("BTC/USDT");
        assert_eq!(opp.assets(), Some(("BTC", "USDT")));
    }

    #[test]
    fn rejects_malformed_symbols() {
        assert_eq!(opportunity("BTCUSDT").assets(), None);
        assert_eq!(opportunity("BTC/").assets(), None);
        assert_eq!(opportunity("/USDT").assets(), None);
    }

    #[test]
    fn deserializes_feed_wire_format() {
        let json = r#"{
            "symbol": "ETH/USDT",
            "buyExchange": "binance",
            "sellExchange": "kraken",
            "buyPrice": 2000.0,
            "sellPrice": 2031.0,
            "profitPercentage": 1.55,
            "volume": 2.5,
            "timestamp": "2026-08-01T12:00:00Z"
        }"#;
        let opp: Opportunity = serde_json::from_str(json).unwrap();
        assert_eq!(opp.buy_exchange, ExchangeId::Binance);
        assert_eq!(opp.sell_exchange, ExchangeId::Kraken);
        assert_eq!(opp.profit_percentage, dec!(1.55));
        assert_eq!(opp.volume, Some(dec!(2.5)));
    }

    #[test]
    fn volume_defaults_to_none() {
        let json = r#"{
            "symbol": "ETH/USDT",
            "buyExchange": "bybit",
            "sellExchange": "okx",
            "buyPrice": 2000.0,
            "sellPrice": 2031.0,
            "profitPercentage": 1.55,
            "timestamp": "2026-08-01T12:00:00Z"
        }"#;
        let opp: Opportunity = serde_json::from_str(json).unwrap();
        assert_eq!(opp.volume, None);
    }
}
