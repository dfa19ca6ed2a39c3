//! OAuth token exchange logic.
//!
//! Handles both grants the system performs against a provider's token
//! endpoint: authorization code (on callback) and refresh token.

use super::provider::ProviderConfig;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Lifetime assumed when a provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Tokens issued by a provider, not yet sealed.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent when the provider neither issued nor rotated a refresh token
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl From<TokenResponse> for TokenGrant {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            scope: response.scope,
        }
    }
}

/// Exchange an authorization code for tokens.
///
/// A failed exchange surfaces as [`Error::Upstream`] with the provider's
/// status and body.
pub async fn exchange_code_for_token(
    http: &reqwest::Client,
    config: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenGrant> {
    let mut form_data = HashMap::new();
    form_data.insert("grant_type", "authorization_code");
    form_data.insert("code", code);
    form_data.insert("redirect_uri", redirect_uri);
    form_data.insert("client_id", config.client_id.as_str());
    form_data.insert("client_secret", config.client_secret.as_str());

    tracing::debug!(
        provider = %config.provider,
        "Exchanging authorization code for token at {}",
        config.token_url
    );

    let response = http
        .post(&config.token_url)
        .header("Accept", "application/json")
        .form(&form_data)
        .send()
        .await
        .map_err(|e| Error::upstream(config.provider, e))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        return Err(Error::Upstream {
            provider: config.provider,
            status: Some(status.as_u16()),
            body,
        });
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| Error::upstream(config.provider, e))?;

    tracing::debug!(
        provider = %config.provider,
        has_refresh_token = token_response.refresh_token.is_some(),
        expires_in = ?token_response.expires_in,
        "Authorization code exchange successful"
    );

    Ok(token_response.into())
}

/// Exchange a refresh token for a new access token.
///
/// Any failure, transport or HTTP, is a [`Error::RefreshFailed`] carrying
/// the upstream reason. The returned grant's `refresh_token` is whatever the
/// provider sent; retaining the previous one is the caller's job.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    config: &ProviderConfig,
    refresh_token: &str,
) -> Result<TokenGrant> {
    let mut form_data = HashMap::new();
    form_data.insert("grant_type", "refresh_token");
    form_data.insert("client_id", config.client_id.as_str());
    form_data.insert("client_secret", config.client_secret.as_str());
    form_data.insert("refresh_token", refresh_token);

    let refresh_failed = |reason: String| Error::RefreshFailed {
        provider: config.provider,
        reason,
    };

    let response = http
        .post(&config.token_url)
        .header("Accept", "application/json")
        .form(&form_data)
        .send()
        .await
        .map_err(|e| refresh_failed(format!("request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        return Err(refresh_failed(format!("status {}: {}", status, body)));
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| refresh_failed(format!("invalid token response: {}", e)))?;

    Ok(token_response.into())
}
