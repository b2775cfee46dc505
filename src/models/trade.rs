//! Trade model: the recorded result of one two-leg execution attempt.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::exchange::{ExchangeId, OrderFill};
use crate::models::Opportunity;

/// Terminal state of an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    /// Both legs filled
    Completed,
    /// Buy leg filled, sell leg did not: an open position is being held
    Partial,
    /// Buy leg failed, no position taken
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Completed => "completed",
            TradeStatus::Partial => "partial",
            TradeStatus::Failed => "failed",
        }
    }
}

/// One execution attempt. Created by the executor on completion or failure,
/// handed to the trade store, and kept only as a bounded trailing reference
/// in the session for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub user_id: i64,
    pub symbol: String,
    pub buy_exchange: ExchangeId,
    pub sell_exchange: ExchangeId,

    /// Fill price of the buy leg, when it executed
    pub buy_price: Option<Decimal>,

    /// Fill price of the sell leg, when it executed
    pub sell_price: Option<Decimal>,

    /// Quantity in base units: the buy-leg fill, or the requested quantity
    /// when nothing filled
    pub amount: Decimal,

    /// Realized profit in quote units (completed trades only)
    pub profit: Option<Decimal>,

    /// Spread percentage of the opportunity that triggered the attempt
    pub profit_percentage: Decimal,

    pub status: TradeStatus,

    /// Error from the leg that failed, for partial/failed attempts
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Trade {
    /// Both legs filled.
    pub fn completed(
        user_id: i64,
        opportunity: &Opportunity,
        buy: &OrderFill,
        sell: &OrderFill,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            symbol: opportunity.symbol.clone(),
            buy_exchange: opportunity.buy_exchange,
            sell_exchange: opportunity.sell_exchange,
            buy_price: Some(buy.price),
            sell_price: Some(sell.price),
            amount: buy.amount,
            profit: Some((sell.price - buy.price) * buy.amount),
            profit_percentage: opportunity.profit_percentage,
            status: TradeStatus::Completed,
            error: None,
            created_at: started_at,
            completed_at: Some(Utc::now()),
        }
    }

    /// Buy leg filled but the sell leg never did. The position is still open,
    /// so there is no completion timestamp and no realized profit.
    pub fn partial(
        user_id: i64,
        opportunity: &Opportunity,
        buy: &OrderFill,
        error: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            symbol: opportunity.symbol.clone(),
            buy_exchange: opportunity.buy_exchange,
            sell_exchange: opportunity.sell_exchange,
            buy_price: Some(buy.price),
            sell_price: None,
            amount: buy.amount,
            profit: None,
            profit_percentage: opportunity.profit_percentage,
            status: TradeStatus::Partial,
            error: Some(error),
            created_at: started_at,
            completed_at: None,
        }
    }

    /// Buy leg failed; nothing was taken on either venue.
    pub fn failed(
        user_id: i64,
        opportunity: &Opportunity,
        requested_amount: Decimal,
        error: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            symbol: opportunity.symbol.clone(),
            buy_exchange: opportunity.buy_exchange,
            sell_exchange: opportunity.sell_exchange,
            buy_price: None,
            sell_price: None,
            amount: requested_amount,
            profit: None,
            profit_percentage: opportunity.profit_percentage,
            status: TradeStatus::Failed,
            error: Some(error),
            created_at: started_at,
            completed_at: None,
        }
    }
}
