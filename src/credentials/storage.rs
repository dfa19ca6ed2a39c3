//! Credential records backed by SQLite.
//!
//! The store only ever sees ciphertext. Records are soft-deleted on
//! disconnect; lookups filter `deleted = 0`.

use super::{CredentialRecord, CredentialUpdate, Provider};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     id INTEGER PRIMARY KEY,
///     user_id TEXT NOT NULL,
///     provider TEXT NOT NULL,
///     access_token TEXT NOT NULL,   -- sealed
///     refresh_token TEXT,           -- sealed (optional)
///     expires_at INTEGER NOT NULL,  -- epoch ms
///     scope TEXT NOT NULL,
///     created_at INTEGER NOT NULL,  -- epoch ms
///     updated_at INTEGER NOT NULL,  -- epoch ms
///     deleted INTEGER NOT NULL DEFAULT 0,
///     deleted_at INTEGER
/// );
/// -- at most one live record per (user_id, provider)
/// CREATE UNIQUE INDEX idx_live_credential ON credentials(user_id, provider) WHERE deleted = 0;
/// ```
///
/// # Thread Safety
/// The connection is wrapped in a Mutex, so every operation (including the
/// read-then-write of `upsert`) is serialized.
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Creates or opens a credential store at `db_path` (`":memory:"` for tests).
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        // Open/create database
        let conn = Connection::open(db_path).context("Failed to open database")?;

        // Create schema if not exists
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at INTEGER NOT NULL,
                scope TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_live_credential
                ON credentials(user_id, provider) WHERE deleted = 0;
            CREATE INDEX IF NOT EXISTS idx_credentials_user ON credentials(user_id);
            "#,
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("credential store lock poisoned"))
    }

    /// Returns the live record for a user and provider, if any.
    pub fn get(&self, user_id: &str, provider: Provider) -> Result<Option<CredentialRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM credentials WHERE user_id = ?1 AND provider = ?2 AND deleted = 0",
                    COLUMNS
                ),
                params![user_id, provider.as_str()],
                read_record,
            )
            .optional()
            .context("Failed to query credential")?;

        record.transpose()
    }

    /// Returns every live record for a user.
    pub fn get_all(&self, user_id: &str) -> Result<Vec<CredentialRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM credentials WHERE user_id = ?1 AND deleted = 0 ORDER BY provider",
                COLUMNS
            ))
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map(params![user_id], read_record)
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read results")?;

        rows.into_iter().collect()
    }

    /// Inserts a record, or updates the live one in place.
    ///
    /// An existing record keeps its `created_at`; ciphertexts, expiry and
    /// scope are replaced and `updated_at` is bumped. Other providers' records
    /// for the same user are never touched.
    pub fn upsert(&self, user_id: &str, provider: Provider, update: &CredentialUpdate) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        // Update the live record in place if there is one
        let updated = tx
            .execute(
                r#"
                UPDATE credentials
                SET access_token = ?3, refresh_token = ?4, expires_at = ?5,
                    scope = ?6, updated_at = ?7
                WHERE user_id = ?1 AND provider = ?2 AND deleted = 0
                "#,
                params![
                    user_id,
                    provider.as_str(),
                    update.access_token_ciphertext,
                    update.refresh_token_ciphertext,
                    update.expires_at.timestamp_millis(),
                    update.scope,
                    now,
                ],
            )
            .context("Failed to update credential")?;

        // Otherwise insert a fresh one
        if updated == 0 {
            tx.execute(
                r#"
                INSERT INTO credentials (
                    user_id, provider, access_token, refresh_token,
                    expires_at, scope, created_at, updated_at, deleted
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 0)
                "#,
                params![
                    user_id,
                    provider.as_str(),
                    update.access_token_ciphertext,
                    update.refresh_token_ciphertext,
                    update.expires_at.timestamp_millis(),
                    update.scope,
                    now,
                ],
            )
            .context("Failed to insert credential")?;
        }

        tx.commit().context("Failed to commit credential")?;
        Ok(())
    }

    /// Marks the live record deleted. Returns `false` when there was nothing
    /// live to delete; calling it twice is not an error.
    pub fn soft_delete(&self, user_id: &str, provider: Provider) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute(
                r#"
                UPDATE credentials SET deleted = 1, deleted_at = ?3
                WHERE user_id = ?1 AND provider = ?2 AND deleted = 0
                "#,
                params![user_id, provider.as_str(), Utc::now().timestamp_millis()],
            )
            .context("Failed to delete credential")?;

        Ok(rows_affected > 0)
    }

    /// Distinct users holding at least one live credential.
    pub fn list_users(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT user_id FROM credentials WHERE deleted = 0 ORDER BY user_id")
            .context("Failed to prepare query")?;

        let users = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read results")?;

        Ok(users)
    }
}

const COLUMNS: &str = "user_id, provider, access_token, refresh_token, expires_at, scope, \
                       created_at, updated_at, deleted, deleted_at";

/// Maps a row to a record. The outer result is SQLite's; the inner one covers
/// values SQLite accepted but we cannot interpret.
fn read_record(row: &Row<'_>) -> rusqlite::Result<Result<CredentialRecord>> {
    let provider: String = row.get(1)?;
    let expires_at: i64 = row.get(4)?;
    let created_at: i64 = row.get(6)?;
    let updated_at: i64 = row.get(7)?;
    let deleted_at: Option<i64> = row.get(9)?;
    let user_id: String = row.get(0)?;
    let access_token_ciphertext: String = row.get(2)?;
    let refresh_token_ciphertext: Option<String> = row.get(3)?;
    let scope: String = row.get(5)?;
    let deleted: bool = row.get(8)?;

    // Parse provider and timestamps
    let build = || -> Result<CredentialRecord> {
        Ok(CredentialRecord {
            user_id,
            provider: provider
                .parse()
                .map_err(|e| anyhow!("stored provider is invalid: {}", e))?,
            access_token_ciphertext,
            refresh_token_ciphertext,
            expires_at: from_millis(expires_at)?,
            scope,
            created_at: from_millis(created_at)?,
            updated_at: from_millis(updated_at)?,
            deleted,
            deleted_at: deleted_at.map(from_millis).transpose()?,
        })
    };

    Ok(build())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}
