//! Pot reads and transfers through the Monzo direct API.
//!
//! Ids in this module come from Monzo itself. They are a separate namespace
//! from aggregator ids and are only ever obtained from this API or from a
//! stored automation rule.

mod client;

pub use client::MonzoClient;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! monzo_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

monzo_id!(MonzoAccountId);
monzo_id!(PotId);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonzoAccount {
    pub id: MonzoAccountId,
    /// e.g. `uk_retail`, `uk_retail_joint`
    #[serde(rename = "type", default)]
    pub account_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub closed: bool,
}

impl MonzoAccount {
    /// Open personal current account.
    pub fn is_main_current_account(&self) -> bool {
        !self.closed && self.account_type == "uk_retail"
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pot {
    pub id: PotId,
    pub name: String,
    /// Minor units
    pub balance: i64,
    pub currency: String,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Main account into pot
    Deposit,
    /// Pot back to main account
    Withdraw,
}

impl TransferDirection {
    /// Positive amounts deposit, negative amounts withdraw.
    pub fn for_amount(amount_minor_units: i64) -> Option<Self> {
        match amount_minor_units {
            0 => None,
            a if a > 0 => Some(TransferDirection::Deposit),
            _ => Some(TransferDirection::Withdraw),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            TransferDirection::Deposit => "deposit",
            TransferDirection::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Zero amount; nothing was sent.
    NoOp,
    Completed {
        direction: TransferDirection,
        pot_id: PotId,
        /// Magnitude, always positive
        amount_minor_units: i64,
        dedupe_id: String,
    },
}

/// Pot and account operations against the direct API.
///
/// Callers supply the access token; obtaining and refreshing it is the
/// token manager's job.
#[async_trait]
pub trait PotWriter: Send + Sync {
    async fn list_accounts(&self, access_token: &str) -> Result<Vec<MonzoAccount>>;

    async fn list_pots(
        &self,
        access_token: &str,
        current_account_id: Option<&MonzoAccountId>,
    ) -> Result<Vec<Pot>>;

    /// `None` when the pot does not exist.
    async fn get_pot_by_id(&self, access_token: &str, pot_id: &PotId) -> Result<Option<Pot>>;

    /// Moves `amount_minor_units` between `account_id` and the pot. The sign
    /// picks the direction; zero is a local no-op. Every call mints a fresh
    /// dedupe id.
    async fn transfer(
        &self,
        access_token: &str,
        account_id: &MonzoAccountId,
        pot_id: &PotId,
        amount_minor_units: i64,
    ) -> Result<TransferOutcome>;
}
