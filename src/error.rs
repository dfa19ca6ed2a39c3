//! Error taxonomy shared by the token lifecycle, provider clients and the
//! reconciliation job.
//!
//! Persistence internals keep using `anyhow` with context; those errors are
//! wrapped into [`Error::Storage`] where they cross a component boundary.

use crate::credentials::Provider;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No grant exists for this user and provider; the user must (re)authorize.
    #[error("no {provider} credential for user {user_id}")]
    NoCredential { user_id: String, provider: Provider },

    /// The refresh token was rejected or the exchange could not be performed.
    #[error("{provider} token refresh failed: {reason}")]
    RefreshFailed { provider: Provider, reason: String },

    /// The access token was rejected twice in a row.
    #[error("{provider} rejected the access token after a forced refresh")]
    Authorization { provider: Provider },

    /// Non-auth failure from a provider. `status` is `None` for transport
    /// failures and timeouts.
    #[error("{provider} request failed (status {}): {body}", status_label(.status))]
    Upstream {
        provider: Provider,
        status: Option<u16>,
        body: String,
    },

    /// A pot deposit or withdrawal was rejected.
    #[error("transfer failed (status {}): {body}", status_label(.status))]
    Transfer { status: Option<u16>, body: String },

    /// Ciphertext could not be opened with the configured key.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True when only a fresh user authorization can resolve the error.
    pub fn is_reauthorization_required(&self) -> bool {
        matches!(
            self,
            Error::NoCredential { .. } | Error::RefreshFailed { .. } | Error::Authorization { .. }
        )
    }

    pub(crate) fn upstream(provider: Provider, err: reqwest::Error) -> Self {
        Error::Upstream {
            provider,
            status: err.status().map(|s| s.as_u16()),
            body: err.to_string(),
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}
