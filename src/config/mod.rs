use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::time::Duration;

/// Complete potsweep configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// SQLite database holding credentials and automation rules
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "potsweep.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Outbound HTTP settings shared by every provider client
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Upper bound for any single upstream call (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    20
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Builds the HTTP client used for every provider call.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout())
            .user_agent(concat!("potsweep/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Token lifecycle settings
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// A token this close to expiry is refreshed before use (seconds)
    #[serde(default = "default_refresh_leeway")]
    pub refresh_leeway_seconds: i64,
}

fn default_refresh_leeway() -> i64 {
    90
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_leeway_seconds: default_refresh_leeway(),
        }
    }
}

/// Reconciliation job settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Differences smaller than this (minor units) are treated as zero
    #[serde(default = "default_dead_band")]
    pub dead_band_minor_units: i64,
    /// Case-insensitive substrings identifying the credit card pot by name
    #[serde(default = "default_pot_markers")]
    pub pot_markers: Vec<String>,
    /// Daily run time, "HH:MM" in UTC
    #[serde(default = "default_run_at")]
    pub run_at_utc: String,
    /// Users reconciled concurrently within one run
    #[serde(default = "default_max_concurrent_users")]
    pub max_concurrent_users: usize,
}

fn default_dead_band() -> i64 {
    100
}

fn default_pot_markers() -> Vec<String> {
    vec!["credit card".to_string(), "💳".to_string()]
}

fn default_run_at() -> String {
    "06:00".to_string()
}

fn default_max_concurrent_users() -> usize {
    1
}

impl ReconcileConfig {
    pub fn run_at(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.run_at_utc, "%H:%M")
            .with_context(|| format!("Invalid run_at_utc '{}', expected HH:MM", self.run_at_utc))
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            dead_band_minor_units: default_dead_band(),
            pot_markers: default_pot_markers(),
            run_at_utc: default_run_at(),
            max_concurrent_users: default_max_concurrent_users(),
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Public base URL used to build OAuth redirect URIs
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    /// When false every request acts as the "default" user
    #[serde(default = "default_auth_enabled")]
    pub auth_enabled: bool,
    #[serde(default = "default_state_expiry")]
    pub oauth_state_expiry_seconds: i64,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_callback_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_auth_enabled() -> bool {
    true
}

fn default_state_expiry() -> i64 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            callback_base_url: default_callback_base_url(),
            auth_enabled: default_auth_enabled(),
            oauth_state_expiry_seconds: default_state_expiry(),
        }
    }
}

/// Endpoints for both providers
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_truelayer")]
    pub truelayer: ProviderEndpoints,
    #[serde(default = "default_monzo")]
    pub monzo: ProviderEndpoints,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            truelayer: default_truelayer(),
            monzo: default_monzo(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub api_base_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_truelayer() -> ProviderEndpoints {
    ProviderEndpoints {
        auth_url: "https://auth.truelayer.com/".to_string(),
        token_url: "https://auth.truelayer.com/connect/token".to_string(),
        api_base_url: "https://api.truelayer.com/data/v1".to_string(),
        scopes: ["info", "accounts", "balance", "cards", "offline_access"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

fn default_monzo() -> ProviderEndpoints {
    ProviderEndpoints {
        auth_url: "https://auth.monzo.com/".to_string(),
        token_url: "https://api.monzo.com/oauth2/token".to_string(),
        api_base_url: "https://api.monzo.com".to_string(),
        scopes: Vec::new(),
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<AppConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path))?;
    let config: AppConfig = toml::from_str(&contents).context("Failed to parse config file")?;
    config.reconcile.run_at()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.database.path, "potsweep.db");
        assert_eq!(config.http.timeout_seconds, 20);
        assert_eq!(config.tokens.refresh_leeway_seconds, 90);
        assert_eq!(config.reconcile.dead_band_minor_units, 100);
        assert_eq!(config.reconcile.pot_markers, vec!["credit card", "💳"]);
        assert_eq!(
            config.reconcile.run_at().unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap()
        );
        assert!(config.server.auth_enabled);
        assert_eq!(config.providers.monzo.api_base_url, "https://api.monzo.com");
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [database]
            path = "/var/lib/potsweep/potsweep.db"

            [http]
            timeout_seconds = 10

            [reconcile]
            dead_band_minor_units = 50
            pot_markers = ["cc pot"]
            run_at_utc = "21:30"
            max_concurrent_users = 4

            [server]
            callback_base_url = "https://sweep.example.com"
            auth_enabled = false

            [providers.truelayer]
            auth_url = "https://auth.truelayer-sandbox.com/"
            token_url = "https://auth.truelayer-sandbox.com/connect/token"
            api_base_url = "https://api.truelayer-sandbox.com/data/v1"
            scopes = ["accounts", "offline_access"]
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.database.path, "/var/lib/potsweep/potsweep.db");
        assert_eq!(config.http.timeout(), Duration::from_secs(10));
        assert_eq!(config.reconcile.dead_band_minor_units, 50);
        assert_eq!(config.reconcile.pot_markers, vec!["cc pot"]);
        assert_eq!(config.reconcile.max_concurrent_users, 4);
        assert!(!config.server.auth_enabled);
        assert_eq!(
            config.providers.truelayer.token_url,
            "https://auth.truelayer-sandbox.com/connect/token"
        );
        // Untouched provider keeps its defaults
        assert_eq!(config.providers.monzo.token_url, "https://api.monzo.com/oauth2/token");
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [tokens]
            refresh_leeway_seconds = 0
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.tokens.refresh_leeway_seconds, 0);
        assert_eq!(config.reconcile.dead_band_minor_units, 100); // Default
        assert_eq!(config.server.bind_address, "0.0.0.0:3000"); // Default
    }

    #[test]
    fn test_load_config_rejects_bad_run_time() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reconcile]\nrun_at_utc = \"25:99\"").unwrap();

        let result = load_config(file.path().to_str().unwrap());
        assert!(result.is_err());
    }
}
