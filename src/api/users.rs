use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::auth::AdminSession;
use super::error::ApiError;
use super::validation::{validate_password, validate_username};
use crate::db::{CreateUserRequest, RemoveUserRequest};
use crate::AppState;

/// Non-admin usernames, alphabetically
///
/// GET /users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _admin: AdminSession,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.credentials.list_users().await?))
}

/// Create a read-only account
///
/// POST /users
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    AdminSession(admin): AdminSession,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(body_error)?;
    validate_username(&request.username).map_err(|e| ApiError::validation_field("username", e))?;
    validate_password(&request.password).map_err(|e| ApiError::validation_field("password", e))?;

    let id = state
        .credentials
        .add_user(&request.username, &request.password)
        .await?;

    info!(admin = %admin.username, username = %request.username, user_id = id, "User created");
    Ok(Json(json!({ "status": "success" })))
}

/// Remove a read-only account
///
/// DELETE /users
pub async fn remove_user(
    State(state): State<Arc<AppState>>,
    AdminSession(admin): AdminSession,
    payload: Result<Json<RemoveUserRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(body_error)?;
    state.credentials.remove_user(&request.username).await?;
    state.sessions.revoke_user(&request.username);

    info!(admin = %admin.username, username = %request.username, "User removed");
    Ok(Json(json!({ "status": "success" })))
}

fn body_error(rejection: JsonRejection) -> ApiError {
    ApiError::bad_request(rejection.body_text())
}
