//! CRUD for the calling user's automation rules.

use super::{ApiError, ApiState};
use crate::rules::{AutomationRule, RuleInput};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, put},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Serialize)]
pub struct ListRulesResponse {
    pub rules: Vec<AutomationRule>,
}

pub(super) fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/api/rules", get(list_rules).post(create_rule))
        .route("/api/rules/:id", put(update_rule).delete(delete_rule))
}

fn validate(input: &RuleInput) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn rule_not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Rule '{}' not found", id))
}

/// GET /api/rules
async fn list_rules(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<ListRulesResponse>, ApiError> {
    let user_id = state.user(&headers)?;
    let rules = state.rules.list_for_user(&user_id)?;
    Ok(Json(ListRulesResponse { rules }))
}

/// POST /api/rules
async fn create_rule(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(input): Json<RuleInput>,
) -> Result<(StatusCode, Json<AutomationRule>), ApiError> {
    let user_id = state.user(&headers)?;
    validate(&input)?;

    let rule = state.rules.create(&user_id, &input)?;
    info!(user_id = %user_id, rule_id = %rule.id, cards = rule.credit_cards.len(), "Rule created");
    Ok((StatusCode::CREATED, Json(rule)))
}

/// PUT /api/rules/:id
async fn update_rule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(input): Json<RuleInput>,
) -> Result<Json<AutomationRule>, ApiError> {
    let user_id = state.user(&headers)?;
    validate(&input)?;

    let rule = state
        .rules
        .update(&user_id, id, &input)?
        .ok_or_else(|| rule_not_found(id))?;
    info!(user_id = %user_id, rule_id = %id, active = rule.is_active, "Rule updated");
    Ok(Json(rule))
}

/// DELETE /api/rules/:id
async fn delete_rule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let user_id = state.user(&headers)?;
    if !state.rules.delete(&user_id, id)? {
        return Err(rule_not_found(id));
    }
    info!(user_id = %user_id, rule_id = %id, "Rule deleted");
    Ok(StatusCode::NO_CONTENT)
}
