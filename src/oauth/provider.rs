//! OAuth provider configurations.
//!
//! Endpoints come from the config file (so sandbox and live environments can
//! be swapped); client credentials only ever come from the environment.

use crate::config::ProviderEndpoints;
use crate::credentials::Provider;
use std::collections::HashMap;

/// Fully resolved OAuth configuration for one provider.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub provider: Provider,

    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Base URL of the provider's data API
    pub api_base_url: String,

    /// Requested OAuth scopes
    pub scopes: Vec<String>,

    pub client_id: String,

    pub client_secret: String,
}

impl ProviderConfig {
    pub fn new(provider: Provider, endpoints: &ProviderEndpoints, client_id: String, client_secret: String) -> Self {
        Self {
            provider,
            auth_url: endpoints.auth_url.clone(),
            token_url: endpoints.token_url.clone(),
            api_base_url: endpoints.api_base_url.clone(),
            scopes: endpoints.scopes.clone(),
            client_id,
            client_secret,
        }
    }

    /// Loads client credentials from `POTSWEEP_OAUTH_{PROVIDER}_CLIENT_ID` and
    /// `POTSWEEP_OAUTH_{PROVIDER}_CLIENT_SECRET`. Returns `None` when either is
    /// unset, leaving the provider unconfigured.
    pub fn from_env(provider: Provider, endpoints: &ProviderEndpoints) -> Option<Self> {
        let env_prefix = provider.as_str().to_uppercase();
        let client_id = std::env::var(format!("POTSWEEP_OAUTH_{}_CLIENT_ID", env_prefix)).ok()?;
        let client_secret =
            std::env::var(format!("POTSWEEP_OAUTH_{}_CLIENT_SECRET", env_prefix)).ok()?;
        Some(Self::new(provider, endpoints, client_id, client_secret))
    }

    /// Build authorization URL with state and redirect_uri
    pub fn build_auth_url(&self, state: &str, redirect_uri: &str) -> String {
        let scopes = self.scopes.join(" ");
        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&state={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        );
        if !scopes.is_empty() {
            url.push_str(&format!("&scope={}", urlencoding::encode(&scopes)));
        }
        if self.provider == Provider::TrueLayer {
            url.push_str(&format!(
                "&providers={}",
                urlencoding::encode("uk-ob-all uk-oauth-all")
            ));
        }
        url
    }
}

/// Provider configs keyed by provider. Providers missing from the registry
/// cannot start new grants or refresh existing ones.
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    configs: HashMap<Provider, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, config: ProviderConfig) -> Self {
        self.configs.insert(config.provider, config);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<&ProviderConfig> {
        self.configs.get(&provider)
    }

    pub fn is_configured(&self, provider: Provider) -> bool {
        self.configs.contains_key(&provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvidersConfig;
    use std::sync::Mutex;

    // Serialize env-var-mutating tests; the process env is shared.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn truelayer() -> ProviderConfig {
        ProviderConfig::new(
            Provider::TrueLayer,
            &ProvidersConfig::default().truelayer,
            "test_client_id".to_string(),
            "test_secret".to_string(),
        )
    }

    #[test]
    fn test_build_auth_url() {
        let url = truelayer().build_auth_url("random_state", "http://localhost:3000/callback");

        assert!(url.starts_with("https://auth.truelayer.com/?response_type=code"));
        assert!(url.contains("client_id=test_client_id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fcallback"));
        assert!(url.contains("scope=info%20accounts%20balance%20cards%20offline_access"));
        assert!(url.contains("state=random_state"));
        assert!(url.contains("providers=uk-ob-all%20uk-oauth-all"));
    }

    #[test]
    fn test_monzo_auth_url_has_no_scope_or_providers() {
        let config = ProviderConfig::new(
            Provider::Monzo,
            &ProvidersConfig::default().monzo,
            "id".to_string(),
            "secret".to_string(),
        );
        let url = config.build_auth_url("s", "http://localhost/cb");
        assert!(url.starts_with("https://auth.monzo.com/?response_type=code"));
        assert!(!url.contains("scope="));
        assert!(!url.contains("providers="));
    }

    #[test]
    fn test_from_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let endpoints = ProvidersConfig::default().monzo;

        std::env::remove_var("POTSWEEP_OAUTH_MONZO_CLIENT_ID");
        std::env::remove_var("POTSWEEP_OAUTH_MONZO_CLIENT_SECRET");
        assert!(ProviderConfig::from_env(Provider::Monzo, &endpoints).is_none());

        std::env::set_var("POTSWEEP_OAUTH_MONZO_CLIENT_ID", "oauth2client_abc");
        std::env::set_var("POTSWEEP_OAUTH_MONZO_CLIENT_SECRET", "mnzconf.secret");
        let config = ProviderConfig::from_env(Provider::Monzo, &endpoints).unwrap();
        assert_eq!(config.client_id, "oauth2client_abc");
        assert_eq!(config.token_url, "https://api.monzo.com/oauth2/token");

        std::env::remove_var("POTSWEEP_OAUTH_MONZO_CLIENT_ID");
        std::env::remove_var("POTSWEEP_OAUTH_MONZO_CLIENT_SECRET");
    }

    #[test]
    fn test_registry() {
        let registry = ProviderRegistry::new().with(truelayer());
        assert!(registry.is_configured(Provider::TrueLayer));
        assert!(!registry.is_configured(Provider::Monzo));
        assert_eq!(
            registry.get(Provider::TrueLayer).unwrap().token_url,
            "https://auth.truelayer.com/connect/token"
        );
    }
}
