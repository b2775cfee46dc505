//! Strategy model: one user-configured risk filter.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange::ExchangeId;
use crate::models::Opportunity;

/// A user's rule for which opportunities may be traded and how much may be
/// committed. Belongs to exactly one session and is immutable for the
/// duration of a scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,

    /// Inactive strategies never accept anything
    pub active: bool,

    /// Minimum spread percentage to act on (>= 0)
    pub min_profit_percentage: Decimal,

    /// Venues this strategy may trade on (non-empty)
    pub exchanges: HashSet<ExchangeId>,

    /// Per-trade quantity cap in base units (> 0)
    pub max_trade_amount: Decimal,
}

impl Strategy {
    /// Whether this strategy accepts the opportunity: it must be active, the
    /// spread must clear the minimum, both venues must be allowed, and the
    /// observed volume (when reported) must fit under the trade cap.
    pub fn accepts(&self, opportunity: &Opportunity) -> bool {
        if !self.active {
            return false;
        }
        if opportunity.profit_percentage < self.min_profit_percentage {
            return false;
        }
        if !self.exchanges.contains(&opportunity.buy_exchange)
            || !self.exchanges.contains(&opportunity.sell_exchange)
        {
            return false;
        }
        if let Some(volume) = opportunity.volume {
            if volume > self.max_trade_amount {
                return false;
            }
        }
        true
    }
}
