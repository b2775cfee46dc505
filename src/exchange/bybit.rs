//! Bybit v5 spot gateway: header-signed REST market orders.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::debug;

use crate::models::ExchangeCredentials;

use super::{ExchangeGateway, ExchangeId, GatewayError, OrderFill};

const BASE_URL: &str = "https://api.bybit.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RECV_WINDOW: &str = "5000";

pub struct BybitGateway {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

/// Every v5 endpoint wraps its payload in this envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CreateResult {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderList {
    list: Vec<OrderDetail>,
}

#[derive(Debug, Deserialize)]
struct OrderDetail {
    #[serde(rename = "avgPrice", default)]
    avg_price: String,
    #[serde(rename = "cumExecQty", default)]
    cum_exec_qty: String,
}

#[derive(Debug, Deserialize)]
struct WalletList {
    list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
struct WalletAccount {
    coin: Vec<CoinBalance>,
}

#[derive(Debug, Deserialize)]
struct CoinBalance {
    coin: String,
    #[serde(rename = "walletBalance", default)]
    wallet_balance: String,
}

impl BybitGateway {
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

    /// v5 signature: HMAC-SHA256 over timestamp + key + recv_window + payload,
    /// where payload is the JSON body (POST) or the query string (GET).
    fn sign(&self, timestamp: i64, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(format!("{}{}{}{}", timestamp, self.api_key, RECV_WINDOW, payload).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn parse_decimal(value: &str, field: &str) -> Result<Decimal, GatewayError> {
        Decimal::from_str(value).map_err(|_| GatewayError::InvalidResponse {
            exchange: ExchangeId::Bybit,
            detail: format!("{} is not a number: {:?}", field, value),
        })
    }

    fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, GatewayError> {
        if envelope.ret_code != 0 {
            return Err(GatewayError::Rejected {
                exchange: ExchangeId::Bybit,
                message: format!("{} (retCode {})", envelope.ret_msg, envelope.ret_code),
            });
        }
        envelope.result.ok_or_else(|| GatewayError::InvalidResponse {
            exchange: ExchangeId::Bybit,
            detail: "missing result payload".to_string(),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, GatewayError> {
        let body_text = body.to_string();
        let timestamp = Utc::now().timestamp_millis();
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", self.sign(timestamp, &body_text))
            .header("Content-Type", "application/json")
            .body(body_text)
            .send()
            .await?;
        let envelope: Envelope<T> = resp.json().await?;
        Self::unwrap_envelope(envelope)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T, GatewayError> {
        let timestamp = Utc::now().timestamp_millis();
        let resp = self
            .http
            .get(format!("{}{}?{}", self.base_url, path, query))
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", self.sign(timestamp, query))
            .send()
            .await?;
        let envelope: Envelope<T> = resp.json().await?;
        Self::unwrap_envelope(envelope)
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        amount: Decimal,
    ) -> Result<OrderFill, GatewayError> {
        let spot = Self::spot_symbol(symbol)?;
        let body = json!({
            "category": "spot",
            "symbol": spot,
            "side": side,
            "orderType": "Market",
            "qty": amount.normalize().to_string(),
            "marketUnit": "baseCoin",
        });

        debug!(symbol = %spot, side, amount = %amount, "placing bybit market order");
        let created: CreateResult = self.post("/v5/order/create", &body).await?;

        // Order creation only returns an id; fills come from the order query.
        let query = format!("category=spot&orderId={}", created.order_id);
        let orders: OrderList = self.get("/v5/order/realtime", &query).await?;
        let detail = orders
            .list
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::InvalidResponse {
                exchange: ExchangeId::Bybit,
                detail: format!("order {} not found after creation", created.order_id),
            })?;

        let price = Self::parse_decimal(&detail.avg_price, "avgPrice")?;
        let filled = Self::parse_decimal(&detail.cum_exec_qty, "cumExecQty")?;
        if price.is_zero() || filled.is_zero() {
            return Err(GatewayError::InvalidResponse {
                exchange: ExchangeId::Bybit,
                detail: format!("order {} reported no fills", created.order_id),
            });
        }

        Ok(OrderFill {
            order_id: created.order_id,
            price,
            amount: filled,
        })
    }
}

#[async_trait]
impl ExchangeGateway for BybitGateway {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    async fn market_buy(&self, symbol: &str, amount: Decimal) -> Result<OrderFill, GatewayError> {
        self.place_order(symbol, "Buy", amount).await
    }

    async fn market_sell(&self, symbol: &str, amount: Decimal) -> Result<OrderFill, GatewayError> {
        self.place_order(symbol, "Sell", amount).await
    }

    async fn balance(&self, asset: &str) -> Result<Decimal, GatewayError> {
        let query = format!("accountType=UNIFIED&coin={}", asset.to_uppercase());
        let wallets: WalletList = self.get("/v5/account/wallet-balance", &query).await?;

        let balance = wallets
            .list
            .into_iter()
            .flat_map(|account| account.coin)
            .find(|c| c.coin.eq_ignore_ascii_case(asset));
        match balance {
            Some(c) => Self::parse_decimal(&c.wallet_balance, "walletBalance"),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        // Connection pool is released on drop; nothing to tear down server-side.
        Ok(())
    }
}
