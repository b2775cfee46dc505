//! Data models for opportunities, strategies, trades, and credentials.

mod credentials;
mod opportunity;
mod strategy;
mod trade;

pub use credentials::ExchangeCredentials;
pub use opportunity::Opportunity;
pub use strategy::Strategy;
pub use trade::{Trade, TradeStatus};
