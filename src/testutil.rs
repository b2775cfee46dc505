//! Shared test doubles: scripted gateways, an in-memory trade store, and a
//! static opportunity feed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::db::{StoreError, TradeStore};
use crate::exchange::{
    ExchangeGateway, ExchangeId, GatewayError, GatewayProvider, OrderFill,
};
use crate::feed::{FeedError, FeedQuery, OpportunityFeed};
use crate::models::{ExchangeCredentials, Opportunity, Strategy, Trade};
use crate::trading::AcceptedOpportunity;

pub fn credentials() -> ExchangeCredentials {
    ExchangeCredentials {
        api_key: "test-key".to_string(),
        api_secret: "test-secret".to_string(),
        passphrase: None,
    }
}

/// A binance->kraken BTC/USDT opportunity at 1.2% spread, accepted by a
/// strategy capped at `max_amount`.
pub fn accepted_opportunity(max_amount: Decimal) -> AcceptedOpportunity {
    AcceptedOpportunity {
        opportunity: Opportunity {
            symbol: "BTC/USDT".to_string(),
            buy_exchange: ExchangeId::Binance,
            sell_exchange: ExchangeId::Kraken,
            buy_price: dec!(60000),
            sell_price: dec!(60720),
            profit_percentage: dec!(1.2),
            volume: Some(dec!(0.5)),
            timestamp: Utc::now(),
        },
        strategy: Strategy {
            id: 1,
            active: true,
            min_profit_percentage: dec!(1.0),
            exchanges: [ExchangeId::Binance, ExchangeId::Kraken].into_iter().collect(),
            max_trade_amount: max_amount,
        },
    }
}

/// Every gateway call an execution made, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(ExchangeId),
    Balance(ExchangeId, String),
    Buy(ExchangeId, String, Decimal),
    Sell(ExchangeId, String, Decimal),
    Close(ExchangeId),
}

/// Scripted behavior for one venue's gateways.
#[derive(Debug, Clone)]
pub struct GatewayScript {
    pub fill_price: Decimal,
    pub balances: HashMap<String, Decimal>,
    pub default_balance: Decimal,
    pub fail_connect: bool,
    pub fail_balance: bool,
    pub fail_buy: bool,
    /// Fail this many sell attempts before succeeding (u32::MAX: always fail)
    pub fail_sell_times: u32,
}

impl GatewayScript {
    pub fn filling_at(fill_price: Decimal) -> Self {
        Self {
            fill_price,
            balances: HashMap::new(),
            default_balance: dec!(1000000),
            fail_connect: false,
            fail_balance: false,
            fail_buy: false,
            fail_sell_times: 0,
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_balance(mut self) -> Self {
        self.fail_balance = true;
        self
    }

    pub fn failing_buys(mut self) -> Self {
        self.fail_buy = true;
        self
    }

    pub fn failing_sells(mut self, times: u32) -> Self {
        self.fail_sell_times = times;
        self
    }

    pub fn with_balance(mut self, asset: &str, balance: Decimal) -> Self {
        self.balances.insert(asset.to_string(), balance);
        self
    }
}

/// Gateway provider whose connections follow per-venue scripts and record
/// every call.
pub struct ScriptedProvider {
    scripts: HashMap<ExchangeId, GatewayScript>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_script(mut self, exchange: ExchangeId, script: GatewayScript) -> Self {
        self.scripts.insert(exchange, script);
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<Call>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl GatewayProvider for ScriptedProvider {
    async fn connect(
        &self,
        exchange: ExchangeId,
        _credentials: &ExchangeCredentials,
    ) -> Result<Box<dyn ExchangeGateway>, GatewayError> {
        self.record(Call::Connect(exchange));
        let script = self
            .scripts
            .get(&exchange)
            .cloned()
            .ok_or(GatewayError::Unsupported(exchange))?;
        if script.fail_connect {
            return Err(GatewayError::Rejected {
                exchange,
                message: "scripted connect failure".to_string(),
            });
        }
        Ok(Box::new(ScriptedGateway {
            exchange,
            script,
            sells_attempted: AtomicU32::new(0),
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct ScriptedGateway {
    exchange: ExchangeId,
    script: GatewayScript,
    sells_attempted: AtomicU32,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedGateway {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn rejected(&self, message: &str) -> GatewayError {
        GatewayError::Rejected {
            exchange: self.exchange,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ExchangeGateway for ScriptedGateway {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    async fn market_buy(&self, symbol: &str, amount: Decimal) -> Result<OrderFill, GatewayError> {
        self.record(Call::Buy(self.exchange, symbol.to_string(), amount));
        if self.script.fail_buy {
            return Err(self.rejected("scripted buy failure"));
        }
        Ok(OrderFill {
            order_id: format!("{}-buy", self.exchange),
            price: self.script.fill_price,
            amount,
        })
    }

    async fn market_sell(&self, symbol: &str, amount: Decimal) -> Result<OrderFill, GatewayError> {
        self.record(Call::Sell(self.exchange, symbol.to_string(), amount));
        let attempt = self.sells_attempted.fetch_add(1, Ordering::SeqCst);
        if attempt < self.script.fail_sell_times {
            return Err(self.rejected("scripted sell failure"));
        }
        Ok(OrderFill {
            order_id: format!("{}-sell", self.exchange),
            price: self.script.fill_price,
            amount,
        })
    }

    async fn balance(&self, asset: &str) -> Result<Decimal, GatewayError> {
        self.record(Call::Balance(self.exchange, asset.to_string()));
        if self.script.fail_balance {
            return Err(self.rejected("scripted balance failure"));
        }
        Ok(self
            .script
            .balances
            .get(asset)
            .copied()
            .unwrap_or(self.script.default_balance))
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        self.record(Call::Close(self.exchange));
        Ok(())
    }
}

/// Trade store that keeps everything in memory, or refuses every write.
pub struct MemoryStore {
    trades: Arc<Mutex<Vec<Trade>>>,
    fail: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            trades: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            trades: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }
    }

    pub fn trades(&self) -> Arc<Mutex<Vec<Trade>>> {
        Arc::clone(&self.trades)
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn save_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Sqlx(sqlx::Error::PoolClosed));
        }
        self.trades.lock().unwrap().push(trade.clone());
        Ok(())
    }
}

/// Feed returning a fixed set of opportunities, optionally slow or broken.
pub struct StaticFeed {
    opportunities: Vec<Opportunity>,
    delay: Option<Duration>,
    fail: bool,
}

impl StaticFeed {
    pub fn with_opportunities(opportunities: Vec<Opportunity>) -> Self {
        Self {
            opportunities,
            delay: None,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            opportunities: Vec::new(),
            delay: None,
            fail: true,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl OpportunityFeed for StaticFeed {
    async fn fetch(&self, _query: &FeedQuery) -> Result<Vec<Opportunity>, FeedError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(FeedError::Status {
                status: 503,
                body: "scripted feed failure".to_string(),
            });
        }
        Ok(self.opportunities.clone())
    }
}
