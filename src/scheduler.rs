//! Trading scheduler: owns the active sessions and drives the scan cycle.
//!
//! One long-lived background task wakes on a fixed period, snapshots the
//! session registry, and processes every session in its own task. All
//! per-user and per-opportunity failures are contained and logged; the loop
//! only stops on an explicit `stop()`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::exchange::ExchangeId;
use crate::feed::{FeedError, OpportunityFeed};
use crate::models::{ExchangeCredentials, Strategy};
use crate::session::{SessionStatus, UserSession};
use crate::trading::{match_opportunities, ExecutionOutcome, TradeExecutor};

/// Engine-level summary counters.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub active_users: usize,
    pub cycles: u64,
}

#[derive(Debug, Error)]
enum CycleError {
    #[error("opportunity feed timed out after {0:?}")]
    FeedTimeout(Duration),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

pub struct TradingScheduler {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    config: EngineConfig,
    sessions: RwLock<HashMap<i64, Arc<UserSession>>>,
    feed: Arc<dyn OpportunityFeed>,
    executor: TradeExecutor,
    running: AtomicBool,
    wake: Notify,
    cycles: AtomicU64,
}

impl TradingScheduler {
    pub fn new(
        config: EngineConfig,
        feed: Arc<dyn OpportunityFeed>,
        executor: TradeExecutor,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sessions: RwLock::new(HashMap::new()),
                feed,
                executor,
                running: AtomicBool::new(false),
                wake: Notify::new(),
                cycles: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start the background cycle loop. A no-op when already running.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().map_or(false, |h| !h.is_finished()) {
            warn!("scheduler already running");
            return;
        }

        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *handle = Some(tokio::spawn(async move { inner.run_loop().await }));
        info!(
            interval_secs = self.inner.config.cycle_interval.as_secs(),
            "scheduler started"
        );
    }

    /// Stop the loop and wait until the background task has exited.
    /// Executions already in flight finish and record their outcome first;
    /// the rest of the cycle is discarded.
    pub async fn stop(&self) {
        let mut handle = self.handle.lock().await;
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.wake.notify_waiters();

        if let Some(task) = handle.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("scheduler task panicked");
                }
            }
            info!("scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Install a user's session, atomically replacing any existing one.
    pub async fn enable_user(
        &self,
        user_id: i64,
        credentials: HashMap<ExchangeId, ExchangeCredentials>,
        strategies: Vec<Strategy>,
    ) {
        let session = Arc::new(UserSession::new(user_id, credentials, strategies));
        let replaced = self
            .inner
            .sessions
            .write()
            .await
            .insert(user_id, session)
            .is_some();
        info!(user_id, replaced, "auto-trading enabled");
    }

    /// Remove a user's session. A cycle already holding the old snapshot may
    /// finish its in-flight work; the next cycle will not see the user.
    pub async fn disable_user(&self, user_id: i64) {
        if self.inner.sessions.write().await.remove(&user_id).is_some() {
            info!(user_id, "auto-trading disabled");
        }
    }

    pub async fn is_enabled(&self, user_id: i64) -> bool {
        self.inner.sessions.read().await.contains_key(&user_id)
    }

    pub async fn status(&self, user_id: i64) -> Option<SessionStatus> {
        let session = self.inner.sessions.read().await.get(&user_id).cloned()?;
        Some(session.status().await)
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            active_users: self.inner.sessions.read().await.len(),
            cycles: self.inner.cycles.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    pub(crate) async fn run_cycle_once(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.run_cycle().await;
        self.inner.running.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    async fn run_loop(self: Arc<Self>) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.run_cycle().await;
            self.cycles.fetch_add(1, Ordering::Relaxed);
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
            }
        }
        debug!("scheduler loop exited");
    }

    /// One scan-filter-execute pass over a snapshot of the active sessions.
    ///
    /// The snapshot makes concurrent enable/disable benign: a just-disabled
    /// user may complete the trades already in flight this cycle. Each
    /// session runs in its own task so one user's failure, or even a panic,
    /// never touches another user's cycle.
    async fn run_cycle(self: &Arc<Self>) {
        let sessions: Vec<Arc<UserSession>> =
            self.sessions.read().await.values().cloned().collect();
        if sessions.is_empty() {
            return;
        }
        debug!(sessions = sessions.len(), "cycle started");

        let limit = Arc::new(Semaphore::new(self.config.max_concurrent_sessions));
        let mut user_ids = Vec::with_capacity(sessions.len());
        let mut tasks = Vec::with_capacity(sessions.len());
        for session in sessions {
            let inner = Arc::clone(self);
            let limit = Arc::clone(&limit);
            user_ids.push(session.user_id());
            tasks.push(tokio::spawn(async move {
                let _permit = limit.acquire_owned().await.ok();
                if !inner.running.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(e) = inner.process_session(&session).await {
                    warn!(user_id = session.user_id(), error = %e, "session cycle failed");
                }
            }));
        }

        for (user_id, result) in user_ids.into_iter().zip(join_all(tasks).await) {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(user_id, "session processing panicked");
                }
            }
        }
    }

    /// Scan, filter, and execute for one session.
    async fn process_session(&self, session: &Arc<UserSession>) -> Result<(), CycleError> {
        let user_id = session.user_id();
        let query = session.feed_query();

        let opportunities = match timeout(self.config.feed_timeout, self.feed.fetch(&query)).await
        {
            Ok(Ok(opportunities)) => opportunities,
            Ok(Err(e)) => return Err(CycleError::Feed(e)),
            Err(_) => return Err(CycleError::FeedTimeout(self.config.feed_timeout)),
        };
        if opportunities.is_empty() {
            return Ok(());
        }

        let accepted = match_opportunities(&opportunities, session.strategies());
        debug!(
            user_id,
            opportunities = opportunities.len(),
            accepted = accepted.len(),
            "strategies matched"
        );

        // The feed may report the same discrepancy more than once per
        // snapshot; execute each (symbol, venues) key at most once.
        let mut executed: HashSet<String> = HashSet::new();
        for accepted in accepted {
            if !self.running.load(Ordering::SeqCst) {
                debug!(user_id, "cycle stopping, remaining opportunities discarded");
                break;
            }

            let opportunity = &accepted.opportunity;
            let key = format!(
                "{}:{}:{}",
                opportunity.symbol, opportunity.buy_exchange, opportunity.sell_exchange
            );
            if !executed.insert(key) {
                continue;
            }

            let outcome = self.executor.execute(session, &accepted).await;
            session.record_outcome(&outcome).await;
            if let ExecutionOutcome::Completed(trade) = &outcome {
                info!(
                    user_id,
                    trade_id = %trade.id,
                    symbol = %trade.symbol,
                    profit = ?trade.profit,
                    "trade completed"
                );
            }
        }

        Ok(())
    }
}
