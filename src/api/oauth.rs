//! OAuth 2.0 authorization code flow for the two provider grants.
//!
//! 1. `GET /api/oauth/:provider/start` redirects to the provider with a
//!    CSRF state bound to the calling user.
//! 2. The provider redirects back to `GET /api/oauth/:provider/callback`.
//! 3. The code is exchanged and the grant sealed into the credential store.

use super::{ApiError, ApiState};
use crate::credentials::Provider;
use crate::oauth::exchange::exchange_code_for_token;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{Json, Redirect},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
pub struct OAuthSuccessResponse {
    success: bool,
    message: String,
    provider: Provider,
}

pub(super) fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/api/oauth/:provider/start", get(oauth_start))
        .route("/api/oauth/:provider/callback", get(oauth_callback))
}

fn parse_provider(name: &str) -> Result<Provider, ApiError> {
    name.parse()
        .map_err(|_| ApiError::NotFound(format!("Provider '{}' not found", name)))
}

fn redirect_uri(state: &ApiState, provider: Provider) -> String {
    format!(
        "{}/api/oauth/{}/callback",
        state.callback_base_url.trim_end_matches('/'),
        provider
    )
}

/// GET /api/oauth/:provider/start
async fn oauth_start(
    State(state): State<Arc<ApiState>>,
    Path(provider_name): Path<String>,
    headers: HeaderMap,
) -> Result<Redirect, ApiError> {
    let provider = parse_provider(&provider_name)?;
    let user_id = state.user(&headers)?;

    let provider_config = state.tokens.providers().get(provider).ok_or_else(|| {
        error!(provider = %provider, "OAuth client credentials not configured");
        ApiError::ServerError(format!(
            "OAuth not configured for '{}'. Set POTSWEEP_OAUTH_{}_CLIENT_ID and POTSWEEP_OAUTH_{}_CLIENT_SECRET.",
            provider,
            provider.as_str().to_uppercase(),
            provider.as_str().to_uppercase()
        ))
    })?;

    let csrf_state = state.state_manager.create_state(provider, &user_id);
    let auth_url = provider_config.build_auth_url(&csrf_state, &redirect_uri(&state, provider));

    info!(provider = %provider, user_id = %user_id, "Redirecting to OAuth provider");
    Ok(Redirect::temporary(&auth_url))
}

/// GET /api/oauth/:provider/callback
///
/// The user comes from the consumed state, not from a header; the browser
/// arrives here from the provider's redirect.
async fn oauth_callback(
    State(state): State<Arc<ApiState>>,
    Path(provider_name): Path<String>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Json<OAuthSuccessResponse>, ApiError> {
    let provider = parse_provider(&provider_name)?;

    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(provider = %provider, error = %error, description = %description, "OAuth authorization failed");
        return Err(ApiError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| ApiError::BadRequest("Missing 'code' parameter".to_string()))?;
    let csrf_state = callback
        .state
        .ok_or_else(|| ApiError::BadRequest("Missing 'state' parameter".to_string()))?;

    let entry = state
        .state_manager
        .validate_and_consume(&csrf_state)
        .ok_or_else(|| {
            warn!(provider = %provider, "Invalid or expired OAuth state");
            ApiError::Unauthorized("Invalid or expired OAuth state".to_string())
        })?;

    if entry.provider != provider {
        error!(expected = %entry.provider, actual = %provider, "Provider mismatch in OAuth callback");
        return Err(ApiError::BadRequest("Provider mismatch".to_string()));
    }
    let user_id = entry.user_id;

    let provider_config = state
        .tokens
        .providers()
        .get(provider)
        .ok_or_else(|| ApiError::ServerError(format!("OAuth not configured for '{}'", provider)))?;

    debug!(provider = %provider, user_id = %user_id, "Exchanging authorization code");
    let grant = exchange_code_for_token(
        state.tokens.http_client(),
        provider_config,
        &code,
        &redirect_uri(&state, provider),
    )
    .await
    .map_err(|e| {
        error!(provider = %provider, user_id = %user_id, error = %e, "Token exchange failed");
        ApiError::BadGateway(format!("Failed to exchange authorization code: {}", e))
    })?;

    state.tokens.store_grant(&user_id, provider, &grant)?;

    info!(provider = %provider, user_id = %user_id, "OAuth flow completed successfully");
    Ok(Json(OAuthSuccessResponse {
        success: true,
        message: format!("Successfully connected {}", provider),
        provider,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{json_body, TestApi};
    use super::*;
    use axum::http::StatusCode;
    use mockito::{Matcher, Server};
    use tower::ServiceExt;

    #[test]
    fn test_oauth_callback_deserialization() {
        let callback: OAuthCallback =
            serde_urlencoded::from_str("code=auth_code_123&state=csrf_state_456").unwrap();
        assert_eq!(callback.code.as_deref(), Some("auth_code_123"));
        assert_eq!(callback.state.as_deref(), Some("csrf_state_456"));
        assert!(callback.error.is_none());

        let callback: OAuthCallback =
            serde_urlencoded::from_str("error=access_denied&error_description=User+cancelled").unwrap();
        assert_eq!(callback.error.as_deref(), Some("access_denied"));
        assert_eq!(callback.error_description.as_deref(), Some("User cancelled"));
    }

    #[tokio::test]
    async fn test_start_redirects_with_state() {
        let api = TestApi::new("http://127.0.0.1:9/token");

        let response = api
            .router()
            .oneshot(api.request("GET", "/api/oauth/monzo/start", Some("alice"), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers()["location"].to_str().unwrap();
        assert!(location.starts_with("https://auth.monzo.com/"));
        assert!(location.contains("client_id=mz-id"));
        assert!(location.contains(&urlencoding::encode(
            "http://localhost:3000/api/oauth/monzo/callback"
        ).into_owned()));
        assert_eq!(api.state_manager.count(), 1);
    }

    #[tokio::test]
    async fn test_start_requires_user() {
        let api = TestApi::new("http://127.0.0.1:9/token");
        let response = api
            .router()
            .oneshot(api.request("GET", "/api/oauth/truelayer/start", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let api = TestApi::new("http://127.0.0.1:9/token");
        let response = api
            .router()
            .oneshot(api.request("GET", "/api/oauth/starling/start", Some("alice"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_callback_stores_grant_for_state_owner() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tl_at","refresh_token":"tl_rt","expires_in":3600,"scope":"accounts cards"}"#)
            .expect(1)
            .create_async()
            .await;
        let api = TestApi::new(&format!("{}/token", server.url()));
        let csrf = api.state_manager.create_state(Provider::TrueLayer, "alice");

        let response = api
            .router()
            .oneshot(api.request(
                "GET",
                &format!("/api/oauth/truelayer/callback?code=the-code&state={}", csrf),
                None,
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["provider"], "truelayer");
        token.assert_async().await;

        let access = api
            .tokens
            .manager
            .get_valid_access_token("alice", Provider::TrueLayer)
            .await
            .unwrap();
        assert_eq!(access, "tl_at");
    }

    #[tokio::test]
    async fn test_callback_rejects_unknown_state() {
        let mut server = Server::new_async().await;
        let token = server.mock("POST", "/token").expect(0).create_async().await;
        let api = TestApi::new(&format!("{}/token", server.url()));

        let response = api
            .router()
            .oneshot(api.request(
                "GET",
                "/api/oauth/monzo/callback?code=c&state=forged",
                None,
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_callback_provider_mismatch() {
        let api = TestApi::new("http://127.0.0.1:9/token");
        let csrf = api.state_manager.create_state(Provider::Monzo, "alice");

        let response = api
            .router()
            .oneshot(api.request(
                "GET",
                &format!("/api/oauth/truelayer/callback?code=c&state={}", csrf),
                None,
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_truelayer_grant_without_refresh_token_rejected() {
        let mut server = Server::new_async().await;
        let _token = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tl_at","expires_in":3600}"#)
            .create_async()
            .await;
        let api = TestApi::new(&format!("{}/token", server.url()));
        let csrf = api.state_manager.create_state(Provider::TrueLayer, "alice");

        let response = api
            .router()
            .oneshot(api.request(
                "GET",
                &format!("/api/oauth/truelayer/callback?code=c&state={}", csrf),
                None,
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!api
            .tokens
            .manager
            .has_credential("alice", Provider::TrueLayer)
            .unwrap());
    }

    #[tokio::test]
    async fn test_provider_error_is_reported() {
        let api = TestApi::new("http://127.0.0.1:9/token");
        let response = api
            .router()
            .oneshot(api.request(
                "GET",
                "/api/oauth/monzo/callback?error=access_denied&error_description=User+cancelled",
                None,
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("access_denied"));
    }
}
