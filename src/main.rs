//! Cross-exchange arbitrage auto-trader.
//!
//! Scans externally detected price discrepancies for every enrolled user,
//! filters them through each user's strategies, and executes the two-leg
//! trade: buy on the cheaper venue, sell on the pricier one.

mod config;
mod db;
mod exchange;
mod feed;
mod models;
mod scheduler;
mod session;
#[cfg(test)]
mod testutil;
mod trading;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::EngineConfig;
use crate::db::Database;
use crate::exchange::{ExchangeId, LiveGatewayProvider};
use crate::feed::HttpOpportunityFeed;
use crate::models::{ExchangeCredentials, Strategy};
use crate::scheduler::TradingScheduler;
use crate::trading::TradeExecutor;

/// Arbitrage auto-trading CLI.
#[derive(Parser)]
#[command(name = "arbitrader")]
#[command(about = "Execute cross-exchange arbitrage for enrolled users", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./arbitrader.db?mode=rwc")]
    database: String,

    /// Opportunity feed base URL
    #[arg(short, long, env = "FEED_URL", default_value = "http://127.0.0.1:8900")]
    feed_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading engine for all enrolled users
    Run {
        /// Cycle interval in seconds
        #[arg(short, long, default_value = "5")]
        interval: u64,

        /// Log intended trades without placing orders
        #[arg(long)]
        dry_run: bool,
    },

    /// Enable auto-trading for a user
    Enable {
        user: i64,
    },

    /// Disable auto-trading for a user
    Disable {
        user: i64,
    },

    /// Store API credentials for one of a user's exchange accounts
    AddKey {
        user: i64,

        /// Venue name (e.g. "binance")
        #[arg(short, long)]
        exchange: String,

        #[arg(long)]
        api_key: String,

        #[arg(long)]
        api_secret: String,

        /// Required by some venues (KuCoin, OKX)
        #[arg(long)]
        passphrase: Option<String>,
    },

    /// Add a trading strategy for a user
    AddStrategy {
        user: i64,

        /// Minimum spread percentage to act on
        #[arg(long)]
        min_profit: f64,

        /// Comma-separated venue names (e.g. "binance,kraken")
        #[arg(long)]
        exchanges: String,

        /// Per-trade quantity cap in base units
        #[arg(long)]
        max_amount: f64,
    },

    /// Show enrollment state and trade statistics
    Status {
        user: Option<i64>,
    },

    /// Show the default engine configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db = Arc::new(Database::new(&cli.database).await?);

    match cli.command {
        Commands::Run { interval, dry_run } => {
            let enrollments = db.load_enrollments().await?;
            if enrollments.is_empty() {
                println!("No enrolled users. Use 'arbitrader enable <user>' first.");
                return Ok(());
            }

            let config = EngineConfig {
                cycle_interval: Duration::from_secs(interval),
                dry_run,
                ..EngineConfig::default()
            };
            let feed = Arc::new(HttpOpportunityFeed::new(cli.feed_url.clone())?);
            let executor =
                TradeExecutor::new(Arc::new(LiveGatewayProvider), db.clone(), config.clone());
            let scheduler = TradingScheduler::new(config, feed, executor);

            let users = enrollments.len();
            for enrollment in enrollments {
                scheduler
                    .enable_user(
                        enrollment.user_id,
                        enrollment.credentials,
                        enrollment.strategies,
                    )
                    .await;
            }

            println!("\n=== Arbitrage Auto-Trader ===");
            println!("Enrolled users:  {}", users);
            println!("Cycle interval:  {}s", interval);
            println!("Feed:            {}", cli.feed_url);
            println!(
                "Mode:            {}",
                if dry_run { "DRY RUN (no orders placed)" } else { "LIVE TRADING" }
            );
            println!("\nPress Ctrl+C to stop.\n");

            scheduler.start().await;
            tokio::signal::ctrl_c().await?;
            info!("shutdown signal received");
            scheduler.stop().await;

            let stats = scheduler.stats().await;
            println!("\nCycles run: {}", stats.cycles);
        }

        Commands::Enable { user } => {
            let keys = db.api_keys_for(user).await?;
            if keys.is_empty() {
                println!("User {} has no API keys. Use 'arbitrader add-key' first.", user);
                return Ok(());
            }
            let strategies = db.strategies_for(user).await?;
            if strategies.iter().filter(|s| s.active).count() == 0 {
                println!(
                    "User {} has no active strategies. Use 'arbitrader add-strategy' first.",
                    user
                );
                return Ok(());
            }

            db.set_auto_trade(user, true).await?;
            println!("Auto-trading enabled for user {}", user);
        }

        Commands::Disable { user } => {
            db.set_auto_trade(user, false).await?;
            println!("Auto-trading disabled for user {}", user);
        }

        Commands::AddKey {
            user,
            exchange,
            api_key,
            api_secret,
            passphrase,
        } => {
            let exchange: ExchangeId = exchange.parse()?;
            let credentials = ExchangeCredentials {
                api_key,
                api_secret,
                passphrase,
            };
            db.upsert_api_key(user, exchange, &credentials).await?;
            println!("Stored {} credentials for user {}", exchange, user);
        }

        Commands::AddStrategy {
            user,
            min_profit,
            exchanges,
            max_amount,
        } => {
            let venues = exchanges
                .split(',')
                .map(|name| name.parse::<ExchangeId>())
                .collect::<Result<HashSet<_>, _>>()?;
            if venues.is_empty() {
                anyhow::bail!("a strategy needs at least one exchange");
            }
            if max_amount <= 0.0 {
                anyhow::bail!("max amount must be positive");
            }
            if min_profit < 0.0 {
                anyhow::bail!("minimum profit percentage must not be negative");
            }

            let strategy = Strategy {
                id: 0,
                active: true,
                min_profit_percentage: Decimal::try_from(min_profit)?,
                exchanges: venues,
                max_trade_amount: Decimal::try_from(max_amount)?,
            };
            let id = db.add_strategy(user, &strategy).await?;
            println!("Added strategy {} for user {}", id, user);
        }

        Commands::Status { user } => match user {
            Some(user) => {
                let enabled = db.auto_trade_enabled(user).await?;
                let keys = db.api_keys_for(user).await?;
                let strategies = db.strategies_for(user).await?;
                let stats = db.trade_stats(user).await?;

                println!("\n=== User {} ===", user);
                println!("Auto-trading:      {}", if enabled { "enabled" } else { "disabled" });
                println!("Exchanges:         {}", keys.len());
                println!(
                    "Active strategies: {}/{}",
                    strategies.iter().filter(|s| s.active).count(),
                    strategies.len()
                );

                println!("\n=== Trades ===");
                println!("Total:     {}", stats.total);
                println!("Completed: {}", stats.completed);
                println!("Partial:   {}", stats.partial);
                println!("Failed:    {}", stats.failed);
                println!("Profit:    ${:.2}", stats.total_profit);

                let recent = db.recent_trades(user, 10).await?;
                if !recent.is_empty() {
                    println!("\n=== Recent Trades ===");
                    for trade in recent {
                        println!(
                            "  {} {} {} -> {} [{}] profit ${:.2}",
                            trade.created_at,
                            trade.symbol,
                            trade.buy_exchange,
                            trade.sell_exchange,
                            trade.status,
                            trade.profit.unwrap_or(0.0)
                        );
                    }
                }
            }
            None => {
                let partials = db.partial_trades().await?;
                if partials.is_empty() {
                    println!("No open partial positions.");
                } else {
                    println!("\n=== OPEN PARTIAL POSITIONS (need manual unwind) ===");
                    for trade in partials {
                        println!(
                            "  user {} {} bought {} on {} at {:.4}, sell on {} never filled: {}",
                            trade.user_id,
                            trade.symbol,
                            trade.amount,
                            trade.buy_exchange,
                            trade.buy_price.unwrap_or(0.0),
                            trade.sell_exchange,
                            trade.error_message.unwrap_or_default()
                        );
                    }
                }
            }
        },

        Commands::Config => {
            let config = EngineConfig::default();
            println!("\n=== Engine Configuration ===\n");
            println!("Cycle interval:       {:?}", config.cycle_interval);
            println!("Feed timeout:         {:?}", config.feed_timeout);
            println!("Concurrent sessions:  {}", config.max_concurrent_sessions);
            println!("Trade fraction:       {}", config.trade_fraction);
            println!("Sell retries:         {}", config.sell_retry_attempts);
            println!("Sell retry backoff:   {:?}", config.sell_retry_initial_backoff);
            println!("\nSupported exchanges:");
            for exchange in ExchangeId::ALL {
                println!("  {}", exchange);
            }
        }
    }

    Ok(())
}
