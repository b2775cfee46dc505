//! SQLite persistence: enrollments, strategies, and the trade log.
//!
//! The engine proper depends only on the `TradeStore` seam; the rest is the
//! thin CRUD that the CLI and the `run` wiring use to load users and report
//! statistics.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::warn;

use crate::exchange::ExchangeId;
use crate::models::{ExchangeCredentials, Strategy, Trade};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Sink for finished execution attempts. A persistence failure is logged by
/// the caller and never undoes already-executed exchange orders.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn save_trade(&self, trade: &Trade) -> Result<(), StoreError>;
}

/// One user's stored trading setup, as loaded at engine start.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub user_id: i64,
    pub credentials: HashMap<ExchangeId, ExchangeCredentials>,
    pub strategies: Vec<Strategy>,
}

/// Aggregate trade counters for status reporting.
#[derive(Debug, Clone, Default)]
pub struct TradeStats {
    pub total: i64,
    pub completed: i64,
    pub partial: i64,
    pub failed: i64,
    pub total_profit: f64,
}

/// Stored trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: String,
    pub user_id: i64,
    pub symbol: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: Option<f64>,
    pub sell_price: Option<f64>,
    pub amount: f64,
    pub profit: Option<f64>,
    pub profit_percentage: f64,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                auto_trade_enabled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                user_id INTEGER NOT NULL,
                exchange TEXT NOT NULL,
                api_key TEXT NOT NULL,
                api_secret TEXT NOT NULL,
                passphrase TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, exchange)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                min_profit_percentage REAL NOT NULL,
                exchanges TEXT NOT NULL,
                max_trade_amount REAL NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                buy_exchange TEXT NOT NULL,
                sell_exchange TEXT NOT NULL,
                buy_price REAL,
                sell_price REAL,
                amount REAL NOT NULL,
                profit REAL,
                profit_percentage REAL NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Users ====================

    pub async fn set_auto_trade(&self, user_id: i64, enabled: bool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, auto_trade_enabled) VALUES (?1, ?2)
            ON CONFLICT(user_id) DO UPDATE SET auto_trade_enabled = ?2
            "#,
        )
        .bind(user_id)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn auto_trade_enabled(&self, user_id: i64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT auto_trade_enabled FROM users WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map_or(false, |r| r.get::<bool, _>(0)))
    }

    // ==================== API keys ====================

    pub async fn upsert_api_key(
        &self,
        user_id: i64,
        exchange: ExchangeId,
        credentials: &ExchangeCredentials,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (user_id, exchange, api_key, api_secret, passphrase)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, exchange) DO UPDATE SET
                api_key = ?3, api_secret = ?4, passphrase = ?5
            "#,
        )
        .bind(user_id)
        .bind(exchange.as_str())
        .bind(&credentials.api_key)
        .bind(&credentials.api_secret)
        .bind(&credentials.passphrase)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn api_keys_for(
        &self,
        user_id: i64,
    ) -> Result<HashMap<ExchangeId, ExchangeCredentials>, StoreError> {
        let rows = sqlx::query(
            "SELECT exchange, api_key, api_secret, passphrase FROM api_keys WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut credentials = HashMap::new();
        for row in rows {
            let name: String = row.get("exchange");
            match name.parse::<ExchangeId>() {
                Ok(exchange) => {
                    credentials.insert(
                        exchange,
                        ExchangeCredentials {
                            api_key: row.get("api_key"),
                            api_secret: row.get("api_secret"),
                            passphrase: row.get("passphrase"),
                        },
                    );
                }
                Err(e) => warn!(user_id, error = %e, "ignoring stored key for unknown exchange"),
            }
        }
        Ok(credentials)
    }

    // ==================== Strategies ====================

    pub async fn add_strategy(&self, user_id: i64, strategy: &Strategy) -> Result<i64, StoreError> {
        let mut exchanges: Vec<&str> = strategy.exchanges.iter().map(|e| e.as_str()).collect();
        exchanges.sort_unstable();

        let result = sqlx::query(
            r#"
            INSERT INTO strategies (user_id, is_active, min_profit_percentage, exchanges, max_trade_amount)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(user_id)
        .bind(strategy.active)
        .bind(strategy.min_profit_percentage.to_f64().unwrap_or(0.0))
        .bind(exchanges.join(","))
        .bind(strategy.max_trade_amount.to_f64().unwrap_or(0.0))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn strategies_for(&self, user_id: i64) -> Result<Vec<Strategy>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, is_active, min_profit_percentage, exchanges, max_trade_amount
            FROM strategies WHERE user_id = ?1 ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut strategies = Vec::with_capacity(rows.len());
        for row in rows {
            let names: String = row.get("exchanges");
            let exchanges = names
                .split(',')
                .filter_map(|name| match name.parse::<ExchangeId>() {
                    Ok(exchange) => Some(exchange),
                    Err(e) => {
                        warn!(user_id, error = %e, "ignoring unknown exchange in strategy");
                        None
                    }
                })
                .collect();

            strategies.push(Strategy {
                id: row.get("id"),
                active: row.get("is_active"),
                min_profit_percentage: Decimal::try_from(
                    row.get::<f64, _>("min_profit_percentage"),
                )
                .unwrap_or(Decimal::ZERO),
                exchanges,
                max_trade_amount: Decimal::try_from(row.get::<f64, _>("max_trade_amount"))
                    .unwrap_or(Decimal::ZERO),
            });
        }
        Ok(strategies)
    }

    // ==================== Enrollments ====================

    /// All users flagged for auto-trading, with their credentials and
    /// strategies.
    pub async fn load_enrollments(&self) -> Result<Vec<Enrollment>, StoreError> {
        let rows = sqlx::query("SELECT user_id FROM users WHERE auto_trade_enabled = 1")
            .fetch_all(&self.pool)
            .await?;

        let mut enrollments = Vec::with_capacity(rows.len());
        for row in rows {
            let user_id: i64 = row.get("user_id");
            enrollments.push(Enrollment {
                user_id,
                credentials: self.api_keys_for(user_id).await?,
                strategies: self.strategies_for(user_id).await?,
            });
        }
        Ok(enrollments)
    }

    // ==================== Trades ====================

    pub async fn trade_stats(&self, user_id: i64) -> Result<TradeStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(status = 'completed'), 0) AS completed,
                COALESCE(SUM(status = 'partial'), 0) AS partial,
                COALESCE(SUM(status = 'failed'), 0) AS failed,
                COALESCE(SUM(profit), 0.0) AS total_profit
            FROM trades WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(TradeStats {
            total: row.get("total"),
            completed: row.get("completed"),
            partial: row.get("partial"),
            failed: row.get("failed"),
            total_profit: row.get("total_profit"),
        })
    }

    /// Attempts that left an open position, oldest first. These need a
    /// manual unwind.
    pub async fn partial_trades(&self) -> Result<Vec<StoredTrade>, StoreError> {
        let trades = sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades WHERE status = 'partial' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }

    pub async fn recent_trades(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<StoredTrade>, StoreError> {
        let trades = sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }
}

#[async_trait]
impl TradeStore for Database {
    async fn save_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, user_id, symbol, buy_exchange, sell_exchange,
                buy_price, sell_price, amount, profit, profit_percentage,
                status, error_message, created_at, completed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&trade.id)
        .bind(trade.user_id)
        .bind(&trade.symbol)
        .bind(trade.buy_exchange.as_str())
        .bind(trade.sell_exchange.as_str())
        .bind(trade.buy_price.and_then(|p| p.to_f64()))
        .bind(trade.sell_price.and_then(|p| p.to_f64()))
        .bind(trade.amount.to_f64().unwrap_or(0.0))
        .bind(trade.profit.and_then(|p| p.to_f64()))
        .bind(trade.profit_percentage.to_f64().unwrap_or(0.0))
        .bind(trade.status.as_str())
        .bind(&trade.error)
        .bind(trade.created_at.to_rfc3339())
        .bind(trade.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
