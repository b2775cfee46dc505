//! Trading core: strategy matching, sizing, and two-leg execution.

mod executor;
mod matcher;
mod sizer;

pub use executor::{ExecutionOutcome, SkipReason, TradeExecutor};
pub use matcher::{match_opportunities, AcceptedOpportunity};
pub use sizer::{LegBalances, TradeSizer};
