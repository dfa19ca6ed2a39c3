//! API token persistence using SQLite.
//!
//! Each token is an opaque UUID v4 that resolves to exactly one user id.
//! Tokens are issued out of band (`potsweep issue-token`) and revoked
//! individually; a user may hold several.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Maps API bearer tokens to user ids.
pub struct UserTokenStore {
    conn: Mutex<Connection>,
}

impl UserTokenStore {
    /// Opens (or creates) the database and ensures the table exists.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open token database")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS user_tokens (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_user_tokens_user ON user_tokens(user_id);
            "#,
        )
        .context("Failed to create user_tokens table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("token store lock poisoned"))
    }

    /// Issues a new token for `user_id` and returns it.
    pub fn issue(&self, user_id: &str) -> Result<String> {
        // Validate user id format
        validate_user_id(user_id)?;

        let token = Uuid::new_v4().to_string();
        self.conn()?
            .execute(
                "INSERT INTO user_tokens (token, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![token, user_id, Utc::now().timestamp_millis()],
            )
            .context("Failed to insert token")?;

        Ok(token)
    }

    /// Resolves a live token to its user id.
    pub fn lookup(&self, token: &str) -> Result<Option<String>> {
        let user_id = self
            .conn()?
            .query_row(
                "SELECT user_id FROM user_tokens WHERE token = ?1 AND revoked = 0",
                params![token],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up token")?;

        Ok(user_id)
    }

    /// Revokes a token. Returns `false` if it was unknown or already revoked.
    pub fn revoke(&self, token: &str) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute(
                "UPDATE user_tokens SET revoked = 1 WHERE token = ?1 AND revoked = 0",
                params![token],
            )
            .context("Failed to revoke token")?;

        Ok(rows_affected > 0)
    }
}

/// User ids are 1-128 characters of `[A-Za-z0-9-_.@]`.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    // Length check
    if user_id.is_empty() || user_id.len() > 128 {
        return Err(anyhow!("user id must be 1-128 characters"));
    }

    // Character check
    if let Some(c) = user_id
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(anyhow!(
            "invalid character '{}' in user id (must be [A-Za-z0-9-_.@])",
            c
        ));
    }

    Ok(())
}
