//! Daily reconciliation of credit card balances against a savings pot.
//!
//! # Flow
//!
//! ```text
//! users with live credentials
//!   └─ per user (isolated)
//!        └─ per plan (one per active rule, or one default plan)
//!             cards ──► total ─┐
//!             pot balance ─────┼─► decide ─► Monzo token? ─► resolve pot ─► transfer
//!             main available ──┘                 └─ none ─► dry run
//! ```
//!
//! Balances come from the aggregator, transfers go through the direct API.
//! The two never share identifiers: the pot is resolved again on the direct
//! API before anything is moved.

pub mod decision;
mod job;
pub mod scheduler;

pub use decision::{compute_transfer_amount, decide, to_minor_units, Decision};
pub use job::ReconcileJob;

use crate::error::Error;
use crate::monzo::TransferDirection;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// What one plan did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    NoChange {
        difference_minor_units: i64,
    },
    InsufficientFunds {
        required_minor_units: i64,
        available_minor_units: i64,
        minimum_balance_minor_units: i64,
    },
    /// A transfer was warranted but the user has no direct-API grant.
    DryRun {
        amount_minor_units: i64,
        direction: TransferDirection,
    },
    Transferred {
        amount_minor_units: i64,
        direction: TransferDirection,
        dedupe_id: String,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug)]
pub struct PlanReport {
    /// `None` for the default plan of a user without rules.
    pub rule_id: Option<Uuid>,
    pub outcome: Result<PlanOutcome, Error>,
}

#[derive(Debug)]
pub struct UserReport {
    pub user_id: String,
    pub plans: Vec<PlanReport>,
    /// Set when the user could not be processed at all.
    pub error: Option<Error>,
}

impl UserReport {
    pub fn is_failed(&self) -> bool {
        self.error.is_some() || self.plans.iter().any(|p| p.outcome.is_err())
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub users: Vec<UserReport>,
}

impl RunReport {
    pub fn outcomes(&self) -> impl Iterator<Item = &PlanOutcome> {
        self.users
            .iter()
            .flat_map(|u| u.plans.iter())
            .filter_map(|p| p.outcome.as_ref().ok())
    }

    pub fn transfer_count(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o, PlanOutcome::Transferred { .. }))
            .count()
    }

    pub fn failed_users(&self) -> usize {
        self.users.iter().filter(|u| u.is_failed()).count()
    }

    pub fn user(&self, user_id: &str) -> Option<&UserReport> {
        self.users.iter().find(|u| u.user_id == user_id)
    }
}
