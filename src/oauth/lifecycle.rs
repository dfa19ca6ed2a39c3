//! Token lifecycle for every (user, provider) grant.
//!
//! ```text
//!            wall clock crosses expires_at
//!   VALID ───────────────────────────────▶ EXPIRED
//!     ▲                                       │ refresh initiated
//!     │ exchange ok, record upserted          ▼
//!     └──────────────────────────────── REFRESHING
//!                                             │ exchange failed
//!                                             ▼
//!                                      RefreshFailed (record untouched)
//!
//!   MISSING: no live record. Terminal until a new authorization completes.
//! ```
//!
//! Only one token exchange may be in flight per (user, provider). Refreshes
//! take a per-key async mutex and re-read the record once they hold it, so a
//! caller that waited behind another refresh reuses its result instead of
//! spending the refresh token a second time.

use super::exchange::{refresh_access_token, TokenGrant};
use super::provider::ProviderRegistry;
use crate::credentials::{
    CredentialRecord, CredentialStore, CredentialUpdate, DecryptedCredential, Provider, SecretBox,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Observable state of a credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialState {
    Valid,
    Expired,
    Refreshing,
    Missing,
}

type LockKey = (String, Provider);

/// Owns the refresh protocol for every provider grant.
///
/// The store, the secret box and the lock registry are explicit dependencies;
/// nothing here is process-global, and decrypted tokens are never cached
/// between calls.
pub struct TokenManager {
    store: Arc<CredentialStore>,
    secret_box: Arc<SecretBox>,
    providers: ProviderRegistry,
    http: reqwest::Client,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    refresh_leeway: Duration,
}

impl TokenManager {
    pub fn new(
        store: Arc<CredentialStore>,
        secret_box: Arc<SecretBox>,
        providers: ProviderRegistry,
        http: reqwest::Client,
    ) -> Self {
        Self {
            store,
            secret_box,
            providers,
            http,
            locks: DashMap::new(),
            refresh_leeway: Duration::zero(),
        }
    }

    /// Refresh proactively when a token is within `leeway` of expiry.
    pub fn with_refresh_leeway(mut self, leeway: Duration) -> Self {
        self.refresh_leeway = leeway;
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Returns an access token that is valid now, refreshing first if needed.
    ///
    /// # Errors
    /// - [`Error::NoCredential`] when the user never authorized this provider
    /// - [`Error::RefreshFailed`] when the token exchange fails
    /// - [`Error::Decryption`] when stored ciphertext cannot be opened
    pub async fn get_valid_access_token(&self, user_id: &str, provider: Provider) -> Result<String> {
        let credential = self.load_required(user_id, provider)?;
        if !self.is_expired(credential.expires_at) {
            return Ok(credential.access_token);
        }

        debug!(user_id = %user_id, provider = %provider, "Access token expired, refreshing");

        let lock = self.lock_for(user_id, provider);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        let credential = self.load_required(user_id, provider)?;
        if !self.is_expired(credential.expires_at) {
            debug!(user_id = %user_id, provider = %provider, "Reusing token refreshed concurrently");
            return Ok(credential.access_token);
        }

        let refreshed = self.refresh_locked(user_id, provider, credential).await?;
        Ok(refreshed.access_token)
    }

    /// Refreshes after the provider rejected `rejected_token`, regardless of
    /// the local expiry; the provider is the authority on validity.
    ///
    /// If the stored token already differs from the rejected one, a
    /// concurrent caller has refreshed and its token is returned instead.
    pub async fn force_refresh(
        &self,
        user_id: &str,
        provider: Provider,
        rejected_token: &str,
    ) -> Result<String> {
        let lock = self.lock_for(user_id, provider);
        let _guard = lock.lock().await;

        let credential = self.load_required(user_id, provider)?;
        if credential.access_token != rejected_token && !self.is_expired(credential.expires_at) {
            debug!(user_id = %user_id, provider = %provider, "Rejected token already replaced");
            return Ok(credential.access_token);
        }

        info!(user_id = %user_id, provider = %provider, "Forcing token refresh after rejection");
        let refreshed = self.refresh_locked(user_id, provider, credential).await?;
        Ok(refreshed.access_token)
    }

    /// Reports where the credential sits in the lifecycle.
    pub fn credential_state(&self, user_id: &str, provider: Provider) -> Result<CredentialState> {
        let key = (user_id.to_string(), provider);
        let refreshing = self
            .locks
            .get(&key)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false);
        if refreshing {
            return Ok(CredentialState::Refreshing);
        }

        let record = self
            .store
            .get(user_id, provider)
            .map_err(Error::Storage)?;
        Ok(match record {
            None => CredentialState::Missing,
            Some(record) if self.is_expired(record.expires_at) => CredentialState::Expired,
            Some(_) => CredentialState::Valid,
        })
    }

    /// Whether a live grant exists, without opening it.
    pub fn has_credential(&self, user_id: &str, provider: Provider) -> Result<bool> {
        Ok(self
            .store
            .get(user_id, provider)
            .map_err(Error::Storage)?
            .is_some())
    }

    /// Seals and persists a grant obtained from an authorization callback.
    pub fn store_grant(&self, user_id: &str, provider: Provider, grant: &TokenGrant) -> Result<()> {
        if provider.requires_refresh_token() && grant.refresh_token.is_none() {
            return Err(Error::Config(format!(
                "{} grant did not include a refresh token (is offline_access requested?)",
                provider
            )));
        }

        self.persist(user_id, provider, grant, grant.refresh_token.as_deref(), None)?;

        info!(
            user_id = %user_id,
            provider = %provider,
            has_refresh_token = grant.refresh_token.is_some(),
            "Stored new grant"
        );
        Ok(())
    }

    /// Soft-deletes the user's grant. Idempotent.
    pub fn disconnect(&self, user_id: &str, provider: Provider) -> Result<bool> {
        let removed = self
            .store
            .soft_delete(user_id, provider)
            .map_err(Error::Storage)?;

        // Drop the refresh lock unless another caller still holds it
        self.locks.remove_if(&(user_id.to_string(), provider), |_, lock| {
            Arc::strong_count(lock) == 1
        });

        info!(user_id = %user_id, provider = %provider, removed, "Disconnected provider");
        Ok(removed)
    }

    /// Providers the user currently has live grants for.
    pub fn connected_providers(&self, user_id: &str) -> Result<Vec<Provider>> {
        Ok(self
            .store
            .get_all(user_id)
            .map_err(Error::Storage)?
            .into_iter()
            .map(|record| record.provider)
            .collect())
    }

    /// Must be called with the key's lock held.
    async fn refresh_locked(
        &self,
        user_id: &str,
        provider: Provider,
        credential: DecryptedCredential,
    ) -> Result<DecryptedCredential> {
        let refresh_token = credential.refresh_token.as_deref().ok_or_else(|| {
            Error::RefreshFailed {
                provider,
                reason: "no refresh token stored; re-authorization required".to_string(),
            }
        })?;

        let config = self.providers.get(provider).ok_or_else(|| Error::RefreshFailed {
            provider,
            reason: "provider client credentials are not configured".to_string(),
        })?;

        info!(user_id = %user_id, provider = %provider, "Refreshing OAuth token");

        let grant = refresh_access_token(&self.http, config, refresh_token)
            .await
            .inspect_err(|e| {
                warn!(user_id = %user_id, provider = %provider, error = %e, "Token refresh failed");
            })?;

        // Keep the existing refresh token if the provider did not rotate it
        let refresh_token = grant
            .refresh_token
            .as_deref()
            .or(credential.refresh_token.as_deref());
        let refreshed = self.persist(
            user_id,
            provider,
            &grant,
            refresh_token,
            Some(credential.scope.as_str()),
        )?;

        info!(
            user_id = %user_id,
            provider = %provider,
            rotated_refresh_token = grant.refresh_token.is_some(),
            "OAuth token refreshed successfully"
        );
        Ok(refreshed)
    }

    fn persist(
        &self,
        user_id: &str,
        provider: Provider,
        grant: &TokenGrant,
        refresh_token: Option<&str>,
        previous_scope: Option<&str>,
    ) -> Result<DecryptedCredential> {
        let expires_at = Utc::now() + Duration::seconds(grant.expires_in);
        let scope = grant
            .scope
            .clone()
            .or_else(|| previous_scope.map(str::to_string))
            .unwrap_or_default();

        let update = CredentialUpdate {
            access_token_ciphertext: self.secret_box.seal(&grant.access_token)?,
            refresh_token_ciphertext: refresh_token
                .map(|token| self.secret_box.seal(token))
                .transpose()?,
            expires_at,
            scope: scope.clone(),
        };
        self.store
            .upsert(user_id, provider, &update)
            .map_err(Error::Storage)?;

        Ok(DecryptedCredential {
            access_token: grant.access_token.clone(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at,
            scope,
        })
    }

    fn load_required(&self, user_id: &str, provider: Provider) -> Result<DecryptedCredential> {
        let record = self
            .store
            .get(user_id, provider)
            .map_err(Error::Storage)?
            .ok_or_else(|| Error::NoCredential {
                user_id: user_id.to_string(),
                provider,
            })?;
        self.open_record(&record)
    }

    /// Decryption failures propagate as-is; they are never reported as a
    /// missing credential.
    fn open_record(&self, record: &CredentialRecord) -> Result<DecryptedCredential> {
        Ok(DecryptedCredential {
            access_token: self.secret_box.open(&record.access_token_ciphertext)?,
            refresh_token: record
                .refresh_token_ciphertext
                .as_deref()
                .map(|sealed| self.secret_box.open(sealed))
                .transpose()?,
            expires_at: record.expires_at,
            scope: record.scope.clone(),
        })
    }

    fn is_expired(&self, expires_at: DateTime<Utc>) -> bool {
        Utc::now() + self.refresh_leeway >= expires_at
    }

    fn lock_for(&self, user_id: &str, provider: Provider) -> Arc<Mutex<()>> {
        self.locks
            .entry((user_id.to_string(), provider))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
