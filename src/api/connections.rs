//! Connection status and disconnect for the calling user's provider grants.

use super::{ApiError, ApiState};
use crate::credentials::Provider;
use crate::oauth::CredentialState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct ConnectionSummary {
    pub provider: Provider,
    /// Client credentials are present, so new grants can be started
    pub configured: bool,
    pub state: CredentialState,
}

#[derive(Debug, Serialize)]
pub struct ListConnectionsResponse {
    pub connections: Vec<ConnectionSummary>,
}

pub(super) fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/api/connections", get(list_connections))
        .route("/api/connections/:provider", delete(disconnect))
}

/// GET /api/connections
async fn list_connections(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<ListConnectionsResponse>, ApiError> {
    let user_id = state.user(&headers)?;

    let connections = Provider::ALL
        .iter()
        .map(|&provider| {
            Ok(ConnectionSummary {
                provider,
                configured: state.tokens.providers().is_configured(provider),
                state: state.tokens.credential_state(&user_id, provider)?,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(Json(ListConnectionsResponse { connections }))
}

/// DELETE /api/connections/:provider
///
/// Soft-deletes the grant. Disconnecting twice is not an error.
async fn disconnect(
    State(state): State<Arc<ApiState>>,
    Path(provider_name): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let provider: Provider = provider_name
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Provider '{}' not found", provider_name)))?;
    let user_id = state.user(&headers)?;

    let removed = state.tokens.disconnect(&user_id, provider)?;
    info!(user_id = %user_id, provider = %provider, removed, "Connection removed via API");

    Ok(StatusCode::NO_CONTENT)
}
