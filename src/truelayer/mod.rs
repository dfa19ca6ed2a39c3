//! Read-only view of a user's cards and accounts through the TrueLayer Data
//! API.
//!
//! Account ids here belong to the aggregator. They never identify a Monzo pot
//! or account on the direct API; see [`crate::monzo`] for that namespace.

mod client;

pub use client::TrueLayerClient;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account or card id issued by the aggregator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregatorAccountId(pub String);

impl AggregatorAccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregatorAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bank behind an aggregated account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderInfo {
    #[serde(default)]
    pub display_name: Option<String>,
    pub provider_id: String,
}

impl ProviderInfo {
    pub fn is_monzo(&self) -> bool {
        self.provider_id.to_lowercase().contains("monzo")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Card {
    pub account_id: AggregatorAccountId,
    pub display_name: String,
    #[serde(default)]
    pub card_network: Option<String>,
    #[serde(default)]
    pub card_type: Option<String>,
    #[serde(default)]
    pub partial_card_number: Option<String>,
    pub provider: ProviderInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Transaction,
    Savings,
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AggregatorAccountId,
    pub account_type: AccountType,
    pub display_name: String,
    #[serde(default)]
    pub currency: Option<String>,
    pub provider: ProviderInfo,
}

/// Point-in-time balance in major currency units, as the provider reports it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub current: f64,
    #[serde(default)]
    pub available: Option<f64>,
    pub currency: String,
    #[serde(default)]
    pub credit_limit: Option<f64>,
}

impl Balance {
    /// Spendable funds; providers that omit `available` report `current`.
    pub fn available_or_current(&self) -> f64 {
        self.available.unwrap_or(self.current)
    }
}

/// Card and account reads for one user.
///
/// Implementations obtain and refresh the user's aggregator token themselves.
#[async_trait]
pub trait AccountReader: Send + Sync {
    async fn list_cards(&self, user_id: &str) -> Result<Vec<Card>>;

    /// `None` when the provider has no balance for the card.
    async fn card_balance(&self, user_id: &str, account_id: &AggregatorAccountId) -> Result<Option<Balance>>;

    async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>>;

    /// `None` when the provider has no balance for the account.
    async fn account_balance(
        &self,
        user_id: &str,
        account_id: &AggregatorAccountId,
    ) -> Result<Option<Balance>>;
}
