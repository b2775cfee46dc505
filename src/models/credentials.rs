//! Exchange account credentials.

use std::fmt;

use serde::{Deserialize, Serialize};

/// API credentials for one exchange account. Handed to the engine already
/// validated; the engine only checks presence.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
    /// Required by some venues (KuCoin, OKX)
    pub passphrase: Option<String>,
}

// Secrets stay out of logs and error chains.
impl fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
