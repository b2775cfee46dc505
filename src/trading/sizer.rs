//! Trade sizing: how much of an accepted opportunity to actually commit.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::AcceptedOpportunity;

/// Free balances on the two accounts an execution will draw from, in the
/// units each leg spends.
#[derive(Debug, Clone, Copy)]
pub struct LegBalances {
    /// Quote-asset balance on the buy exchange
    pub buy_quote: Decimal,
    /// Base-asset balance on the sell exchange
    pub sell_base: Decimal,
}

/// Computes the quantity to trade for an accepted opportunity.
///
/// The result never exceeds the accepting strategy's cap, the opportunity's
/// observed volume, or what either account balance allows.
pub struct TradeSizer {
    trade_fraction: Decimal,
}

impl TradeSizer {
    /// `trade_fraction` is the share of the strategy cap committed per
    /// attempt; values outside (0, 1] are clamped.
    pub fn new(trade_fraction: Decimal) -> Self {
        Self {
            trade_fraction: trade_fraction.clamp(dec!(0.001), Decimal::ONE),
        }
    }

    /// Quantity in base units, or zero when some bound leaves no room.
    /// Balances are `None` only when nothing will actually be placed
    /// (dry runs); live sizing always supplies them.
    pub fn size(
        &self,
        accepted: &AcceptedOpportunity,
        balances: Option<&LegBalances>,
    ) -> Decimal {
        let mut amount = accepted.strategy.max_trade_amount * self.trade_fraction;

        if let Some(volume) = accepted.opportunity.volume {
            amount = amount.min(volume);
        }

        if let Some(balances) = balances {
            amount = amount.min(balances.sell_base);

            let buy_price = accepted.opportunity.buy_price;
            if buy_price <= Decimal::ZERO {
                return Decimal::ZERO;
            }
            amount = amount.min(balances.buy_quote / buy_price);
        }

        amount.max(Decimal::ZERO)
    }
}
