//! Per-user trading session: the unit of isolation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::exchange::ExchangeId;
use crate::feed::FeedQuery;
use crate::models::{ExchangeCredentials, Strategy, Trade};
use crate::trading::ExecutionOutcome;

/// How many finished trades a session keeps for status reporting; the store
/// owns the full history.
const RECENT_TRADES: usize = 20;

/// Everything the engine holds for one enrolled user. Owned by the
/// scheduler's registry and replaced wholesale when the user is re-enabled;
/// credentials and strategies are immutable for the session's lifetime.
pub struct UserSession {
    user_id: i64,
    credentials: HashMap<ExchangeId, ExchangeCredentials>,
    strategies: Vec<Strategy>,
    completed: AtomicU64,
    partial: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    recent: RwLock<VecDeque<Trade>>,
    last_trade_at: RwLock<Option<DateTime<Utc>>>,
}

/// Point-in-time summary counters for one session.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub user_id: i64,
    pub strategies: usize,
    pub exchanges: usize,
    pub completed: u64,
    pub partial: u64,
    pub failed: u64,
    pub skipped: u64,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub recent_trades: Vec<Trade>,
}

impl UserSession {
    pub fn new(
        user_id: i64,
        credentials: HashMap<ExchangeId, ExchangeCredentials>,
        strategies: Vec<Strategy>,
    ) -> Self {
        Self {
            user_id,
            credentials,
            strategies,
            completed: AtomicU64::new(0),
            partial: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            recent: RwLock::new(VecDeque::with_capacity(RECENT_TRADES)),
            last_trade_at: RwLock::new(None),
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn credentials(&self, exchange: ExchangeId) -> Option<&ExchangeCredentials> {
        self.credentials.get(&exchange)
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// The feed filter for this session: the union of the active strategies'
    /// venues, in stable order.
    pub fn feed_query(&self) -> FeedQuery {
        let venues: HashSet<ExchangeId> = self
            .strategies
            .iter()
            .filter(|s| s.active)
            .flat_map(|s| s.exchanges.iter().copied())
            .collect();
        let mut exchanges: Vec<ExchangeId> = venues.into_iter().collect();
        exchanges.sort_by_key(|e| e.as_str());
        FeedQuery { exchanges }
    }

    /// Fold one execution outcome into the session's counters and trailing
    /// trade log.
    pub async fn record_outcome(&self, outcome: &ExecutionOutcome) {
        let trade = match outcome {
            ExecutionOutcome::Completed(trade) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                Some(trade)
            }
            ExecutionOutcome::Partial(trade) => {
                self.partial.fetch_add(1, Ordering::Relaxed);
                Some(trade)
            }
            ExecutionOutcome::Failed(trade) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Some(trade)
            }
            ExecutionOutcome::Skipped(_) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                None
            }
        };

        if let Some(trade) = trade {
            let mut recent = self.recent.write().await;
            if recent.len() == RECENT_TRADES {
                recent.pop_front();
            }
            recent.push_back(trade.clone());
            *self.last_trade_at.write().await = Some(trade.created_at);
        }
    }

    pub async fn status(&self) -> SessionStatus {
        SessionStatus {
            user_id: self.user_id,
            strategies: self.strategies.len(),
            exchanges: self.credentials.len(),
            completed: self.completed.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            last_trade_at: *self.last_trade_at.read().await,
            recent_trades: self.recent.read().await.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::testutil::{accepted_opportunity, credentials};
    use crate::trading::SkipReason;

    use super::*;

    fn session() -> UserSession {
        let mut creds = HashMap::new();
        creds.insert(ExchangeId::Binance, credentials());
        UserSession::new(7, creds, Vec::new())
    }

    fn completed_trade() -> Trade {
        let accepted = accepted_opportunity(dec!(0.01));
        let fill = crate::exchange::OrderFill {
            order_id: "o".to_string(),
            price: dec!(100),
            amount: dec!(0.01),
        };
        Trade::completed(7, &accepted.opportunity, &fill, &fill, Utc::now())
    }

    #[tokio::test]
    async fn counts_outcomes_by_kind() {
        let session = session();
        session
            .record_outcome(&ExecutionOutcome::Completed(completed_trade()))
            .await;
        session
            .record_outcome(&ExecutionOutcome::Skipped(SkipReason::ZeroSize))
            .await;
        session
            .record_outcome(&ExecutionOutcome::Skipped(SkipReason::ZeroSize))
            .await;

        let status = session.status().await;
        assert_eq!(status.completed, 1);
        assert_eq!(status.skipped, 2);
        assert_eq!(status.partial, 0);
        assert_eq!(status.recent_trades.len(), 1);
        assert!(status.last_trade_at.is_some());
    }

    #[tokio::test]
    async fn recent_trades_are_bounded() {
        let session = session();
        for _ in 0..(RECENT_TRADES + 5) {
            session
                .record_outcome(&ExecutionOutcome::Completed(completed_trade()))
                .await;
        }
        let status = session.status().await;
        assert_eq!(status.recent_trades.len(), RECENT_TRADES);
        assert_eq!(status.completed, (RECENT_TRADES + 5) as u64);
    }

    #[test]
    fn feed_query_unions_active_strategy_venues() {
        let strategies = vec![
            Strategy {
                id: 1,
                active: true,
                min_profit_percentage: dec!(1),
                exchanges: [ExchangeId::Kraken, ExchangeId::Binance].into_iter().collect(),
                max_trade_amount: dec!(1),
            },
            Strategy {
                id: 2,
                active: false,
                min_profit_percentage: dec!(1),
                exchanges: [ExchangeId::Okx].into_iter().collect(),
                max_trade_amount: dec!(1),
            },
        ];
        let session = UserSession::new(7, HashMap::new(), strategies);
        let query = session.feed_query();
        assert_eq!(query.exchanges, vec![ExchangeId::Binance, ExchangeId::Kraken]);
    }
}
