//! HTTP surface: provider connection management and automation rules.
//!
//! Every route except the OAuth callback resolves the calling user from an
//! issued API token (see [`crate::auth::authenticate_user`]). The callback
//! resolves the user from the single-use OAuth state instead.

pub mod connections;
pub mod oauth;
pub mod rules;
mod state_manager;

pub use state_manager::{run_state_cleanup, StateEntry, StateManager};

use crate::auth::{authenticate_user, AuthError, TokenError, UserTokenStore};
use crate::error::Error;
use crate::oauth::TokenManager;
use crate::rules::RuleStore;
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Shared state for every API route
#[derive(Clone)]
pub struct ApiState {
    pub tokens: Arc<TokenManager>,
    pub rules: Arc<RuleStore>,
    pub user_tokens: Arc<UserTokenStore>,
    pub state_manager: StateManager,
    pub auth_enabled: bool,
    pub callback_base_url: String,
}

impl ApiState {
    fn user(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        Ok(authenticate_user(
            headers,
            self.auth_enabled,
            &self.user_tokens,
        )?)
    }
}

pub fn create_router(state: ApiState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .merge(oauth::router())
        .merge(connections::router())
        .merge(rules::router())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        ApiError::Unauthorized(format!("Invalid token: {}", e))
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Token(e) => e.into(),
            AuthError::Unrecognized => ApiError::Unauthorized(format!("Invalid token: {}", e)),
            AuthError::Storage(_) => ApiError::ServerError(e.to_string()),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(msg) => ApiError::BadRequest(msg),
            Error::NoCredential { .. } => ApiError::NotFound(e.to_string()),
            Error::RefreshFailed { .. }
            | Error::Authorization { .. }
            | Error::Upstream { .. }
            | Error::Transfer { .. } => ApiError::BadGateway(e.to_string()),
            Error::Decryption(_) | Error::Storage(_) => ApiError::ServerError(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::ServerError(format!("{:#}", e))
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::test_support::Tokens;
    use axum::body::Body;
    use axum::http::Request;

    pub struct TestApi {
        pub tokens: Tokens,
        pub rules: Arc<RuleStore>,
        pub user_tokens: Arc<UserTokenStore>,
        pub state_manager: StateManager,
    }

    impl TestApi {
        pub fn new(token_url: &str) -> Self {
            Self {
                tokens: Tokens::new(token_url),
                rules: Arc::new(RuleStore::new(":memory:").unwrap()),
                user_tokens: Arc::new(UserTokenStore::new(":memory:").unwrap()),
                state_manager: StateManager::new(600),
            }
        }

        pub fn router(&self) -> Router {
            create_router(ApiState {
                tokens: Arc::clone(&self.tokens.manager),
                rules: Arc::clone(&self.rules),
                user_tokens: Arc::clone(&self.user_tokens),
                state_manager: self.state_manager.clone(),
                auth_enabled: true,
                callback_base_url: "http://localhost:3000".to_string(),
            })
        }

        /// Builds a request authenticated as `user` with a freshly issued token.
        pub fn request(
            &self,
            method: &str,
            uri: &str,
            user: Option<&str>,
            body: Option<String>,
        ) -> Request<Body> {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(user) = user {
                let token = self.user_tokens.issue(user).unwrap();
                builder = builder.header("authorization", format!("Bearer {}", token));
            }
            match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            }
        }
    }

    pub async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
