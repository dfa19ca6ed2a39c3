//! Rule persistence using SQLite.
//!
//! The card set is stored as a JSON column; everything else is flat.

use super::{AutomationRule, RuleCard, RuleInput, SourceAccount, TargetPot, TransferType};
use crate::monzo::PotId;
use crate::truelayer::AggregatorAccountId;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Persists automation rules in SQLite.
pub struct RuleStore {
    conn: Mutex<Connection>,
}

impl RuleStore {
    /// Opens (or creates) the database and ensures the table exists.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open rules database")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS automation_rules (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                source_provider TEXT NOT NULL,
                source_account_id TEXT NOT NULL,
                target_pot_id TEXT NOT NULL,
                target_pot_name TEXT NOT NULL,
                credit_cards TEXT NOT NULL,
                minimum_bank_balance INTEGER NOT NULL,
                transfer_type TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rules_user ON automation_rules(user_id);
            "#,
        )
        .context("Failed to create automation_rules table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("rule store lock poisoned"))
    }

    pub fn create(&self, user_id: &str, input: &RuleInput) -> Result<AutomationRule> {
        let now = Utc::now();
        let rule = AutomationRule {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            source_account: input.source_account.clone(),
            target_pot: input.target_pot.clone(),
            credit_cards: input.credit_cards.clone(),
            minimum_bank_balance: input.minimum_bank_balance,
            transfer_type: input.transfer_type,
            is_active: input.is_active,
            created_at: now,
            updated_at: now,
        };
        let cards = serde_json::to_string(&rule.credit_cards).context("Failed to encode card set")?;

        self.conn()?
            .execute(
                r#"
                INSERT INTO automation_rules (
                    id, user_id, source_provider, source_account_id, target_pot_id,
                    target_pot_name, credit_cards, minimum_bank_balance, transfer_type,
                    is_active, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                "#,
                params![
                    rule.id.to_string(),
                    rule.user_id,
                    rule.source_account.provider,
                    rule.source_account.account_id.as_str(),
                    rule.target_pot.pot_id.as_str(),
                    rule.target_pot.pot_name,
                    cards,
                    rule.minimum_bank_balance,
                    rule.transfer_type.as_str(),
                    rule.is_active,
                    now.timestamp_millis(),
                ],
            )
            .context("Failed to insert rule")?;

        Ok(rule)
    }

    /// Replaces a rule's fields. Returns `None` if the user owns no rule with
    /// that id.
    pub fn update(&self, user_id: &str, id: Uuid, input: &RuleInput) -> Result<Option<AutomationRule>> {
        let cards = serde_json::to_string(&input.credit_cards).context("Failed to encode card set")?;
        let updated = self
            .conn()?
            .execute(
                r#"
                UPDATE automation_rules
                SET source_provider = ?3, source_account_id = ?4, target_pot_id = ?5,
                    target_pot_name = ?6, credit_cards = ?7, minimum_bank_balance = ?8,
                    transfer_type = ?9, is_active = ?10, updated_at = ?11
                WHERE id = ?1 AND user_id = ?2
                "#,
                params![
                    id.to_string(),
                    user_id,
                    input.source_account.provider,
                    input.source_account.account_id.as_str(),
                    input.target_pot.pot_id.as_str(),
                    input.target_pot.pot_name,
                    cards,
                    input.minimum_bank_balance,
                    input.transfer_type.as_str(),
                    input.is_active,
                    Utc::now().timestamp_millis(),
                ],
            )
            .context("Failed to update rule")?;

        if updated == 0 {
            return Ok(None);
        }
        self.get(user_id, id)
    }

    /// Deletes a rule. Returns `false` if the user owns no rule with that id.
    pub fn delete(&self, user_id: &str, id: Uuid) -> Result<bool> {
        let deleted = self
            .conn()?
            .execute(
                "DELETE FROM automation_rules WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id],
            )
            .context("Failed to delete rule")?;
        Ok(deleted > 0)
    }

    pub fn get(&self, user_id: &str, id: Uuid) -> Result<Option<AutomationRule>> {
        let conn = self.conn()?;
        let rule = conn
            .query_row(
                &format!(
                    "SELECT {} FROM automation_rules WHERE id = ?1 AND user_id = ?2",
                    COLUMNS
                ),
                params![id.to_string(), user_id],
                read_rule,
            )
            .optional()
            .context("Failed to query rule")?;

        rule.transpose()
    }

    /// All of a user's rules, oldest first.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<AutomationRule>> {
        self.query_user(user_id, false)
    }

    /// A user's active rules, oldest first.
    pub fn list_active_for_user(&self, user_id: &str) -> Result<Vec<AutomationRule>> {
        self.query_user(user_id, true)
    }

    fn query_user(&self, user_id: &str, active_only: bool) -> Result<Vec<AutomationRule>> {
        let conn = self.conn()?;
        let filter = if active_only { " AND is_active = 1" } else { "" };
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM automation_rules WHERE user_id = ?1{} ORDER BY created_at, id",
                COLUMNS, filter
            ))
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map(params![user_id], read_rule)
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read results")?;

        rows.into_iter().collect()
    }
}

const COLUMNS: &str = "id, user_id, source_provider, source_account_id, target_pot_id, \
                       target_pot_name, credit_cards, minimum_bank_balance, transfer_type, \
                       is_active, created_at, updated_at";

fn read_rule(row: &Row<'_>) -> rusqlite::Result<Result<AutomationRule>> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let source_provider: String = row.get(2)?;
    let source_account_id: String = row.get(3)?;
    let target_pot_id: String = row.get(4)?;
    let target_pot_name: String = row.get(5)?;
    let credit_cards: String = row.get(6)?;
    let minimum_bank_balance: i64 = row.get(7)?;
    let transfer_type: String = row.get(8)?;
    let is_active: bool = row.get(9)?;
    let created_at: i64 = row.get(10)?;
    let updated_at: i64 = row.get(11)?;

    let build = || -> Result<AutomationRule> {
        let credit_cards: Vec<RuleCard> =
            serde_json::from_str(&credit_cards).context("stored card set is invalid")?;
        Ok(AutomationRule {
            id: Uuid::parse_str(&id).context("stored rule id is invalid")?,
            user_id,
            source_account: SourceAccount {
                provider: source_provider,
                account_id: AggregatorAccountId::new(source_account_id),
            },
            target_pot: TargetPot {
                pot_id: PotId::new(target_pot_id),
                pot_name: target_pot_name,
            },
            credit_cards,
            minimum_bank_balance,
            transfer_type: TransferType::parse(&transfer_type)
                .ok_or_else(|| anyhow!("unknown transfer type: {}", transfer_type))?,
            is_active,
            created_at: from_millis(created_at)?,
            updated_at: from_millis(updated_at)?,
        })
    };

    Ok(build())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}
