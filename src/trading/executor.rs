//! Two-leg trade execution.
//!
//! Buy on the cheaper venue, then sell the filled amount on the pricier one.
//! A failed buy leg is the safe case: nothing is held. A failed sell leg
//! after a filled buy leaves an unhedged position; the sell is retried on a
//! backoff schedule and, if it never fills, the attempt is recorded as a
//! `partial` trade for manual unwind.

use std::sync::Arc;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::db::TradeStore;
use crate::exchange::{ExchangeGateway, ExchangeId, GatewayError, GatewayProvider, OrderFill};
use crate::models::Trade;
use crate::session::UserSession;

use super::{AcceptedOpportunity, LegBalances, TradeSizer};

/// Why an attempt stopped before any order was placed.
#[derive(Debug)]
pub enum SkipReason {
    /// No credentials on file for a required venue
    MissingCredentials(ExchangeId),
    /// Could not open an authenticated connection
    Connect(ExchangeId, GatewayError),
    /// Balance lookup failed on one leg
    Balance(ExchangeId, GatewayError),
    /// Symbol is not in BASE/QUOTE form
    InvalidSymbol(String),
    /// Sizing left nothing to trade
    ZeroSize,
    /// Dry-run mode: sized and logged only
    DryRun(Decimal),
}

/// Outcome of executing one accepted opportunity. Every variant that placed
/// an order carries the recorded trade.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Both legs filled
    Completed(Trade),
    /// Buy filled, sell failed after retries; position still open
    Partial(Trade),
    /// Buy leg failed; nothing held
    Failed(Trade),
    /// Aborted before any order; nothing recorded
    Skipped(SkipReason),
}

/// Runs the two-leg protocol for accepted opportunities.
pub struct TradeExecutor {
    provider: Arc<dyn GatewayProvider>,
    store: Arc<dyn TradeStore>,
    sizer: TradeSizer,
    config: EngineConfig,
}

impl TradeExecutor {
    pub fn new(
        provider: Arc<dyn GatewayProvider>,
        store: Arc<dyn TradeStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            store,
            sizer: TradeSizer::new(config.trade_fraction),
            config,
        }
    }

    /// Execute one accepted opportunity for one user.
    pub async fn execute(
        &self,
        session: &UserSession,
        accepted: &AcceptedOpportunity,
    ) -> ExecutionOutcome {
        let opportunity = &accepted.opportunity;
        let user_id = session.user_id();

        // Resolve credentials for both venues before taking any action.
        let Some(buy_creds) = session.credentials(opportunity.buy_exchange) else {
            warn!(
                user_id,
                exchange = %opportunity.buy_exchange,
                symbol = %opportunity.symbol,
                "no credentials for buy venue, skipping opportunity"
            );
            return ExecutionOutcome::Skipped(SkipReason::MissingCredentials(
                opportunity.buy_exchange,
            ));
        };
        let Some(sell_creds) = session.credentials(opportunity.sell_exchange) else {
            warn!(
                user_id,
                exchange = %opportunity.sell_exchange,
                symbol = %opportunity.symbol,
                "no credentials for sell venue, skipping opportunity"
            );
            return ExecutionOutcome::Skipped(SkipReason::MissingCredentials(
                opportunity.sell_exchange,
            ));
        };

        if self.config.dry_run {
            let amount = self.sizer.size(accepted, None);
            info!(
                user_id,
                symbol = %opportunity.symbol,
                buy = %opportunity.buy_exchange,
                sell = %opportunity.sell_exchange,
                amount = %amount,
                "dry run: would execute two-leg trade"
            );
            return ExecutionOutcome::Skipped(SkipReason::DryRun(amount));
        }

        // Two independent connections, one per leg.
        let mut buy_gateway = match self.provider.connect(opportunity.buy_exchange, buy_creds).await
        {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!(user_id, exchange = %opportunity.buy_exchange, error = %e, "buy gateway unavailable");
                return ExecutionOutcome::Skipped(SkipReason::Connect(opportunity.buy_exchange, e));
            }
        };
        let mut sell_gateway = match self
            .provider
            .connect(opportunity.sell_exchange, sell_creds)
            .await
        {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!(user_id, exchange = %opportunity.sell_exchange, error = %e, "sell gateway unavailable");
                release(&mut buy_gateway).await;
                return ExecutionOutcome::Skipped(SkipReason::Connect(
                    opportunity.sell_exchange,
                    e,
                ));
            }
        };

        let outcome = self
            .run_legs(session, accepted, buy_gateway.as_ref(), sell_gateway.as_ref())
            .await;

        // Both connections are released on every exit path.
        release(&mut buy_gateway).await;
        release(&mut sell_gateway).await;

        outcome
    }

    async fn run_legs(
        &self,
        session: &UserSession,
        accepted: &AcceptedOpportunity,
        buy_gateway: &dyn ExchangeGateway,
        sell_gateway: &dyn ExchangeGateway,
    ) -> ExecutionOutcome {
        let opportunity = &accepted.opportunity;
        let user_id = session.user_id();
        let started_at = Utc::now();

        let Some((base, quote)) = opportunity.assets() else {
            warn!(user_id, symbol = %opportunity.symbol, "malformed symbol, skipping opportunity");
            return ExecutionOutcome::Skipped(SkipReason::InvalidSymbol(
                opportunity.symbol.clone(),
            ));
        };

        // Balance lookup is fallible; an unavailable balance skips the trade.
        let buy_quote = match buy_gateway.balance(quote).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(user_id, exchange = %opportunity.buy_exchange, asset = quote, error = %e, "balance unavailable");
                return ExecutionOutcome::Skipped(SkipReason::Balance(
                    opportunity.buy_exchange,
                    e,
                ));
            }
        };
        let sell_base = match sell_gateway.balance(base).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(user_id, exchange = %opportunity.sell_exchange, asset = base, error = %e, "balance unavailable");
                return ExecutionOutcome::Skipped(SkipReason::Balance(
                    opportunity.sell_exchange,
                    e,
                ));
            }
        };

        let amount = self.sizer.size(
            accepted,
            Some(&LegBalances {
                buy_quote,
                sell_base,
            }),
        );
        if amount <= Decimal::ZERO {
            debug!(user_id, symbol = %opportunity.symbol, "sized to zero, skipping opportunity");
            return ExecutionOutcome::Skipped(SkipReason::ZeroSize);
        }

        // Buy leg. Failure here is the safe abort: no position taken.
        let buy_fill = match buy_gateway.market_buy(&opportunity.symbol, amount).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(
                    user_id,
                    symbol = %opportunity.symbol,
                    exchange = %opportunity.buy_exchange,
                    error = %e,
                    "buy leg failed, attempt abandoned"
                );
                let trade =
                    Trade::failed(user_id, opportunity, amount, e.to_string(), started_at);
                self.record(&trade).await;
                return ExecutionOutcome::Failed(trade);
            }
        };
        info!(
            user_id,
            symbol = %opportunity.symbol,
            exchange = %opportunity.buy_exchange,
            order_id = %buy_fill.order_id,
            price = %buy_fill.price,
            amount = %buy_fill.amount,
            "buy leg filled"
        );

        // Sell leg, for the amount the buy leg actually filled.
        match self
            .sell_with_retry(sell_gateway, &opportunity.symbol, buy_fill.amount)
            .await
        {
            Ok(sell_fill) => {
                info!(
                    user_id,
                    symbol = %opportunity.symbol,
                    exchange = %opportunity.sell_exchange,
                    order_id = %sell_fill.order_id,
                    price = %sell_fill.price,
                    amount = %sell_fill.amount,
                    "sell leg filled"
                );
                let trade =
                    Trade::completed(user_id, opportunity, &buy_fill, &sell_fill, started_at);
                self.record(&trade).await;
                ExecutionOutcome::Completed(trade)
            }
            Err(e) => {
                error!(
                    user_id,
                    symbol = %opportunity.symbol,
                    exchange = %opportunity.sell_exchange,
                    amount = %buy_fill.amount,
                    error = %e,
                    "sell leg failed after retries: holding an unhedged position"
                );
                let trade =
                    Trade::partial(user_id, opportunity, &buy_fill, e.to_string(), started_at);
                self.record(&trade).await;
                ExecutionOutcome::Partial(trade)
            }
        }
    }

    /// One sell attempt plus up to `sell_retry_attempts` retries on an
    /// exponential schedule.
    async fn sell_with_retry(
        &self,
        gateway: &dyn ExchangeGateway,
        symbol: &str,
        amount: Decimal,
    ) -> Result<OrderFill, GatewayError> {
        let mut schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.sell_retry_initial_backoff)
            .with_max_elapsed_time(None)
            .build();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match gateway.market_sell(symbol, amount).await {
                Ok(fill) => return Ok(fill),
                Err(e) if attempt <= self.config.sell_retry_attempts => {
                    let delay = schedule
                        .next_backoff()
                        .unwrap_or(self.config.sell_retry_initial_backoff);
                    warn!(attempt, symbol, error = %e, "sell leg failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Persistence failure must not undo already-executed orders.
    async fn record(&self, trade: &Trade) {
        if let Err(e) = self.store.save_trade(trade).await {
            error!(trade_id = %trade.id, error = %e, "failed to persist trade");
        }
    }
}

async fn release(gateway: &mut Box<dyn ExchangeGateway>) {
    if let Err(e) = gateway.close().await {
        debug!(exchange = %gateway.exchange(), error = %e, "gateway close failed");
    }
}
