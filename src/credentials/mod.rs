//! Encrypted credential storage for OAuth tokens.
//!
//! Holds one record per (user, provider) grant. Tokens are sealed with
//! AES-256-GCM before they reach SQLite and opened only for the duration of a
//! request or refresh cycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenManager (oauth::lifecycle)    │
//! │  - seal/open around every read/write     │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!      (seal)                (open)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SecretBox                          │
//! │  - AES-256-GCM, fresh nonce per value    │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore (SQLite)           │
//! │  - ciphertext only, soft delete          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use potsweep::credentials::{CredentialStore, CredentialUpdate, Provider, SecretBox};
//! use chrono::{Utc, Duration};
//!
//! # fn main() -> anyhow::Result<()> {
//! let secret_box = SecretBox::from_base64(&std::env::var("POTSWEEP_ENCRYPTION_KEY")?)?;
//! let store = CredentialStore::new("potsweep.db")?;
//!
//! store.upsert("user1", Provider::TrueLayer, &CredentialUpdate {
//!     access_token_ciphertext: secret_box.seal("access")?,
//!     refresh_token_ciphertext: Some(secret_box.seal("refresh")?),
//!     expires_at: Utc::now() + Duration::hours(1),
//!     scope: "accounts balance cards offline_access".to_string(),
//! })?;
//!
//! if let Some(record) = store.get("user1", Provider::TrueLayer)? {
//!     println!("expires at {}", record.expires_at);
//! }
//! store.soft_delete("user1", Provider::TrueLayer)?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod encryption;
mod storage;

pub use encryption::{open, seal, validate_key, SecretBox};
pub use storage::CredentialStore;

/// OAuth grant owner. Each provider has its own token endpoint and semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Read-only open-banking aggregator. Always issues refresh tokens.
    TrueLayer,
    /// Direct bank API with pot write access. Refresh tokens are optional.
    Monzo,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::TrueLayer, Provider::Monzo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::TrueLayer => "truelayer",
            Provider::Monzo => "monzo",
        }
    }

    /// Whether a grant from this provider must carry a refresh token.
    pub fn requires_refresh_token(&self) -> bool {
        matches!(self, Provider::TrueLayer)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "truelayer" => Ok(Provider::TrueLayer),
            "monzo" => Ok(Provider::Monzo),
            other => Err(crate::error::Error::Config(format!(
                "unknown provider '{}'",
                other
            ))),
        }
    }
}

/// Persisted grant, tokens sealed.
#[derive(Clone, Debug, PartialEq)]
pub struct CredentialRecord {
    pub user_id: String,
    pub provider: Provider,
    pub access_token_ciphertext: String,
    pub refresh_token_ciphertext: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// Space-delimited grant scopes
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields replaced on every upsert. `created_at` of an existing record is
/// preserved.
#[derive(Clone, Debug)]
pub struct CredentialUpdate {
    pub access_token_ciphertext: String,
    pub refresh_token_ciphertext: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: String,
}

/// Opened tokens. Lives only on the stack of the operation that needs them.
#[derive(Clone)]
pub struct DecryptedCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: String,
}

impl fmt::Debug for DecryptedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedCredential")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
