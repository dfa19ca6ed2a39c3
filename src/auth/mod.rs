use axum::http::HeaderMap;

mod store;

#[cfg(test)]
mod tests;

pub use store::{validate_user_id, UserTokenStore};

/// User id assumed for every request when authentication is disabled.
pub const DEFAULT_USER: &str = "default";

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Returns the token string if present and valid.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    // Get Authorization header
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    // Parse "Bearer <token>" format
    parse_bearer_token(auth_header)
}

/// Resolves the calling user from an issued API token.
///
/// With authentication disabled every caller is [`DEFAULT_USER`] and the
/// header is ignored.
pub fn authenticate_user(
    headers: &HeaderMap,
    auth_enabled: bool,
    tokens: &UserTokenStore,
) -> Result<String, AuthError> {
    if !auth_enabled {
        return Ok(DEFAULT_USER.to_string());
    }

    let token = extract_bearer_token(headers)?;

    // Token must have been issued and not revoked
    tokens
        .lookup(&token)
        .map_err(AuthError::Storage)?
        .ok_or(AuthError::Unrecognized)
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    // Expect "Bearer <token>"
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum TokenError {
    #[error("Authorization token not provided")]
    Missing,
    #[error("Invalid authorization token format")]
    InvalidFormat,
    #[error("Authorization token is empty")]
    Empty,
}

/// Failure to resolve a caller
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("Authorization token not recognized")]
    Unrecognized,
    #[error("token lookup failed: {0:#}")]
    Storage(anyhow::Error),
}
