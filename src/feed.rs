//! Opportunity feed client.
//!
//! Detected arbitrage opportunities arrive from an external discovery
//! service. This module defines the consuming seam plus the HTTP client the
//! binary wires in; the scheduler bounds every fetch with its own timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::exchange::ExchangeId;
use crate::models::Opportunity;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed request failed: {status} - {body}")]
    Status { status: u16, body: String },
}

/// What a session wants from the feed: only opportunities on venues its
/// strategies can trade.
#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub exchanges: Vec<ExchangeId>,
}

#[async_trait]
pub trait OpportunityFeed: Send + Sync {
    /// Current opportunities, newest first. May be empty.
    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<Opportunity>, FeedError>;
}

/// REST client for the discovery service.
pub struct HttpOpportunityFeed {
    client: Client,
    base_url: String,
}

impl HttpOpportunityFeed {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FeedError> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn request_url(&self, query: &FeedQuery) -> String {
        let mut url = format!("{}/opportunities", self.base_url);
        if !query.exchanges.is_empty() {
            let names: Vec<&str> = query.exchanges.iter().map(|e| e.as_str()).collect();
            url = format!("{}?exchanges={}", url, names.join(","));
        }
        url
    }
}

#[async_trait]
impl OpportunityFeed for HttpOpportunityFeed {
    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<Opportunity>, FeedError> {
        let url = self.request_url(query);
        debug!(url = %url, "fetching opportunities");

        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Status { status, body });
        }

        Ok(resp.json().await?)
    }
}
