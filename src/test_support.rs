//! Fixtures shared by unit tests.

use crate::config::ProvidersConfig;
use crate::credentials::{CredentialStore, CredentialUpdate, Provider, SecretBox};
use crate::oauth::{ProviderConfig, ProviderRegistry, TokenManager};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use std::sync::Arc;

pub struct Tokens {
    pub store: Arc<CredentialStore>,
    pub secret_box: Arc<SecretBox>,
    pub manager: Arc<TokenManager>,
}

impl Tokens {
    /// Both providers configured against `token_url`.
    pub fn new(token_url: &str) -> Self {
        let store = Arc::new(CredentialStore::new(":memory:").unwrap());
        let secret_box = Arc::new(SecretBox::from_base64(&BASE64.encode([5u8; 32])).unwrap());

        let mut tl = ProvidersConfig::default().truelayer;
        tl.token_url = token_url.to_string();
        let mut mz = ProvidersConfig::default().monzo;
        mz.token_url = token_url.to_string();
        let providers = ProviderRegistry::new()
            .with(ProviderConfig::new(Provider::TrueLayer, &tl, "tl-id".into(), "tl-secret".into()))
            .with(ProviderConfig::new(Provider::Monzo, &mz, "mz-id".into(), "mz-secret".into()));

        let manager = Arc::new(TokenManager::new(
            Arc::clone(&store),
            Arc::clone(&secret_box),
            providers,
            reqwest::Client::new(),
        ));
        Self {
            store,
            secret_box,
            manager,
        }
    }

    /// Stores a grant valid for another hour.
    pub fn seed(&self, user_id: &str, provider: Provider, access: &str, refresh: Option<&str>) {
        self.seed_expiring(user_id, provider, access, refresh, Duration::hours(1));
    }

    pub fn seed_expiring(
        &self,
        user_id: &str,
        provider: Provider,
        access: &str,
        refresh: Option<&str>,
        expires_in: Duration,
    ) {
        self.seed_scoped(user_id, provider, access, refresh, expires_in, "");
    }

    pub fn seed_scoped(
        &self,
        user_id: &str,
        provider: Provider,
        access: &str,
        refresh: Option<&str>,
        expires_in: Duration,
        scope: &str,
    ) {
        self.store
            .upsert(
                user_id,
                provider,
                &CredentialUpdate {
                    access_token_ciphertext: self.secret_box.seal(access).unwrap(),
                    refresh_token_ciphertext: refresh.map(|r| self.secret_box.seal(r).unwrap()),
                    expires_at: Utc::now() + expires_in,
                    scope: scope.to_string(),
                },
            )
            .unwrap();
    }
}
