//! Automation rules: which cards a user wants covered, by which pot, funded
//! from which account.

mod store;

pub use store::RuleStore;

use crate::monzo::PotId;
use crate::truelayer::AggregatorAccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account the transfer is funded from, as the aggregator sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAccount {
    pub provider: String,
    pub account_id: AggregatorAccountId,
}

/// Pot on the direct API. `pot_name` locates the same pot in the
/// aggregator's account listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPot {
    pub pot_id: PotId,
    pub pot_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCard {
    pub provider: String,
    pub account_id: AggregatorAccountId,
    pub display_name: String,
    #[serde(default)]
    pub partial_card_number: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    /// Keep the pot equal to the full outstanding card balance.
    #[default]
    FullBalance,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::FullBalance => "full_balance",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "full_balance" => Some(TransferType::FullBalance),
            _ => None,
        }
    }
}

/// A stored rule.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRule {
    pub id: Uuid,
    pub user_id: String,
    pub source_account: SourceAccount,
    pub target_pot: TargetPot,
    pub credit_cards: Vec<RuleCard>,
    /// Minor units the source account must keep after a deposit.
    pub minimum_bank_balance: i64,
    pub transfer_type: TransferType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a user supplies when creating or replacing a rule.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInput {
    pub source_account: SourceAccount,
    pub target_pot: TargetPot,
    pub credit_cards: Vec<RuleCard>,
    #[serde(default)]
    pub minimum_bank_balance: i64,
    #[serde(default)]
    pub transfer_type: TransferType,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleValidationError {
    #[error("a rule must cover at least one credit card")]
    NoCards,
    #[error("minimumBankBalance must not be negative")]
    NegativeMinimumBalance,
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

impl RuleInput {
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.credit_cards.is_empty() {
            return Err(RuleValidationError::NoCards);
        }
        if self.minimum_bank_balance < 0 {
            return Err(RuleValidationError::NegativeMinimumBalance);
        }
        if self.source_account.account_id.as_str().is_empty() {
            return Err(RuleValidationError::EmptyField("sourceAccount.accountId"));
        }
        if self.target_pot.pot_id.as_str().is_empty() {
            return Err(RuleValidationError::EmptyField("targetPot.potId"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_input() -> RuleInput {
    RuleInput {
        source_account: SourceAccount {
            provider: "ob-monzo".to_string(),
            account_id: AggregatorAccountId::new("tl-main"),
        },
        target_pot: TargetPot {
            pot_id: PotId::new("pot_cc"),
            pot_name: "Credit Card".to_string(),
        },
        credit_cards: vec![RuleCard {
            provider: "ob-amex".to_string(),
            account_id: AggregatorAccountId::new("card-1"),
            display_name: "Amex Gold".to_string(),
            partial_card_number: Some("1234".to_string()),
        }],
        minimum_bank_balance: 5000,
        transfer_type: TransferType::FullBalance,
        is_active: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_defaults_from_json() {
        let input: RuleInput = serde_json::from_str(
            r#"{
                "sourceAccount": {"provider": "ob-monzo", "accountId": "tl-main"},
                "targetPot": {"potId": "pot_cc", "potName": "Credit Card"},
                "creditCards": [{"provider": "ob-amex", "accountId": "card-1", "displayName": "Amex"}]
            }"#,
        )
        .unwrap();

        assert_eq!(input.minimum_bank_balance, 0);
        assert_eq!(input.transfer_type, TransferType::FullBalance);
        assert!(input.is_active);
        assert!(input.credit_cards[0].partial_card_number.is_none());
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut input = sample_input();
        input.credit_cards.clear();
        assert_eq!(input.validate(), Err(RuleValidationError::NoCards));

        let mut input = sample_input();
        input.minimum_bank_balance = -1;
        assert_eq!(input.validate(), Err(RuleValidationError::NegativeMinimumBalance));

        let mut input = sample_input();
        input.target_pot.pot_id = PotId::new("");
        assert_eq!(
            input.validate(),
            Err(RuleValidationError::EmptyField("targetPot.potId"))
        );
    }

    #[test]
    fn test_transfer_type_wire_name() {
        assert_eq!(
            serde_json::to_string(&TransferType::FullBalance).unwrap(),
            "\"full_balance\""
        );
        assert_eq!(TransferType::parse("full_balance"), Some(TransferType::FullBalance));
        assert_eq!(TransferType::parse("percentage"), None);
    }
}
