//! Binance spot gateway: HMAC-SHA256 signed REST market orders.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use crate::models::ExchangeCredentials;

use super::{ExchangeGateway, ExchangeId, GatewayError, OrderFill};

const BASE_URL: &str = "https://api.binance.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BinanceGateway {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    #[serde(with = "rust_decimal::serde::str")]
    executed_qty: Decimal,
    #[serde(default)]
    fills: Vec<Fill>,
}

#[derive(Debug, Deserialize)]
struct Fill {
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    qty: Decimal,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    free: Decimal,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

impl BinanceGateway {
    pub fn connect(credentials: &ExchangeCredentials) -> Result<Self, GatewayError> {
        Self::with_base_url(credentials, BASE_URL.to_string())
    }

    /// Create with a custom base URL (for testing).
    pub fn with_base_url(
        credentials: &ExchangeCredentials,
        base_url: String,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url,
            api_key: credentials.api_key.clone(),
            api_secret: credentials.api_secret.clone(),
        })
    }

    /// "BTC/USDT" -> "BTCUSDT"
    fn spot_symbol(symbol: &str) -> Result<String, GatewayError> {
        let (base, quote) = symbol
            .split_once('/')
            .ok_or_else(|| GatewayError::InvalidSymbol(symbol.to_string()))?;
        Ok(format!("{}{}", base, quote).to_uppercase())
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        amount: Decimal,
    ) -> Result<OrderFill, GatewayError> {
        let spot = Self::spot_symbol(symbol)?;
        let query = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newOrderRespType=FULL&timestamp={}",
            spot,
            side,
            amount.normalize(),
            Utc::now().timestamp_millis(),
        );
        let url = format!(
            "{}/api/v3/order?{}&signature={}",
            self.base_url,
            query,
            self.sign(&query)
        );

        debug!(symbol = %spot, side, amount = %amount, "placing binance market order");
        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let message = match resp.json::<ApiError>().await {
                Ok(e) => format!("{} (code {})", e.msg, e.code),
                Err(_) => format!("http status {}", status),
            };
            return Err(GatewayError::Rejected {
                exchange: ExchangeId::Binance,
                message,
            });
        }

        let order: OrderResponse = resp.json().await?;
        Self::fill_from_order(order)
    }

    /// Average the per-lot fills into one price; a market order may match
    /// several resting orders.
    fn fill_from_order(order: OrderResponse) -> Result<OrderFill, GatewayError> {
        let filled: Decimal = order.fills.iter().map(|f| f.qty).sum();
        if filled.is_zero() || order.executed_qty.is_zero() {
            return Err(GatewayError::InvalidResponse {
                exchange: ExchangeId::Binance,
                detail: "order reported no fills".to_string(),
            });
        }
        let notional: Decimal = order.fills.iter().map(|f| f.price * f.qty).sum();
        Ok(OrderFill {
            order_id: order.order_id.to_string(),
            price: notional / filled,
            amount: order.executed_qty,
        })
    }
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    async fn market_buy(&self, symbol: &str, amount: Decimal) -> Result<OrderFill, GatewayError> {
        self.place_order(symbol, "BUY", amount).await
    }

    async fn market_sell(&self, symbol: &str, amount: Decimal) -> Result<OrderFill, GatewayError> {
        self.place_order(symbol, "SELL", amount).await
    }

    async fn balance(&self, asset: &str) -> Result<Decimal, GatewayError> {
        let query = format!("timestamp={}", Utc::now().timestamp_millis());
        let url = format!(
            "{}/api/v3/account?{}&signature={}",
            self.base_url,
            query,
            self.sign(&query)
        );

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let message = match resp.json::<ApiError>().await {
                Ok(e) => format!("{} (code {})", e.msg, e.code),
                Err(_) => format!("http status {}", status),
            };
            return Err(GatewayError::Rejected {
                exchange: ExchangeId::Binance,
                message,
            });
        }

        let account: AccountResponse = resp.json().await?;
        Ok(account
            .balances
            .into_iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO))
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        // Connection pool is released on drop; nothing to tear down server-side.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn gateway() -> BinanceGateway {
        let creds = ExchangeCredentials {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            passphrase: None,
        };
        BinanceGateway::connect(&creds).unwrap()
    }

    #[test]
    fn maps_symbols_to_spot_format() {
        assert_eq!(BinanceGateway::spot_symbol("BTC/USDT").unwrap(), "BTCUSDT");
        assert_eq!(BinanceGateway::spot_symbol("eth/usdt").unwrap(), "ETHUSDT");
        assert!(matches!(
            BinanceGateway::spot_symbol("BTCUSDT"),
            Err(GatewayError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn signature_is_deterministic_hex() {
        let gw = gateway();
        let a = gw.sign("symbol=BTCUSDT&timestamp=1");
        let b = gw.sign("symbol=BTCUSDT&timestamp=1");
        let c = gw.sign("symbol=BTCUSDT&timestamp=2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn averages_fills_into_one_price() {
        let order: OrderResponse = serde_json::from_str(
            r#"{
                "orderId": 42,
                "executedQty": "0.030",
                "fills": [
                    {"price": "100.0", "qty": "0.010"},
                    {"price": "103.0", "qty": "0.020"}
                ]
            }"#,
        )
        .unwrap();
        let fill = BinanceGateway::fill_from_order(order).unwrap();
        assert_eq!(fill.order_id, "42");
        assert_eq!(fill.amount, dec!(0.030));
        assert_eq!(fill.price, dec!(102));
    }

    #[test]
    fn empty_fill_list_is_invalid() {
        let order: OrderResponse = serde_json::from_str(
            r#"{"orderId": 42, "executedQty": "0", "fills": []}"#,
        )
        .unwrap();
        assert!(matches!(
            BinanceGateway::fill_from_order(order),
            Err(GatewayError::InvalidResponse { .. })
        ));
    }
}
